use std::error::Error;
use std::io::{self, Write};

use faceauth_core::faces::{AuthenticationOutcome, EnrollmentOutcome};
use faceauth_core::response::{error_message, AuthenticateResponse, EnrollResponse};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::cli::OutputMode;
use crate::doctor::{CheckStatus, DoctorOutcome};
use crate::errors::{AppError, AppResult};
use crate::operations::PhotoExport;

fn write_json<T: Serialize>(payload: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_enroll(outcome: &EnrollmentOutcome, mode: OutputMode, verbose: bool) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    println!("{line}");
                }
            }
            let record = &outcome.record;
            println!(
                "Enrolled {} ({}); reference photo {}",
                record.identity, record.display_name, record.reference_photo
            );
            if record.reference_embedding.is_some() {
                println!("Embedding stored with the record");
            }
        }
        OutputMode::Json => write_json(&EnrollResponse::from(outcome))?,
    }
    Ok(())
}

pub fn render_authenticate(
    outcome: &AuthenticationOutcome,
    mode: OutputMode,
    verbose: bool,
) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            if verbose {
                for line in &outcome.logs {
                    println!("{line}");
                }
            }
            let verdict = if outcome.accepted() {
                "Authenticated"
            } else {
                "Face not recognized for"
            };
            println!(
                "{verdict} {} (confidence {:.2}%)",
                outcome.record.identity,
                outcome.score.confidence_percent()
            );
        }
        OutputMode::Json => write_json(&AuthenticateResponse::from(outcome))?,
    }
    Ok(())
}

pub fn render_photo(export: &PhotoExport, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => println!(
            "Exported {} to {} ({} bytes)",
            export.handle,
            export.output.display(),
            export.bytes
        ),
        OutputMode::Json => write_json(export)?,
    }
    Ok(())
}

pub fn render_doctor(outcome: &DoctorOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for check in &outcome.checks {
                let label = match check.status {
                    CheckStatus::Pass => "PASS",
                    CheckStatus::Warn => "WARN",
                    CheckStatus::Fail => "FAIL",
                };
                println!("[{label}] {}: {}", check.name, check.message);
            }
            if outcome.ok {
                println!("All required checks passed");
            } else {
                println!("Some checks failed");
            }
        }
        OutputMode::Json => write_json(outcome)?,
    }
    Ok(())
}

/// JSON body for a failed command: the success flag and a caller-safe message.
pub fn error_payload(err: &AppError) -> Value {
    json!({
        "success": false,
        "message": error_message(err),
    })
}

pub fn enroll_error_payload(err: &AppError) -> Value {
    serde_json::to_value(EnrollResponse::from(err)).unwrap_or_else(|_| error_payload(err))
}

pub fn authenticate_error_payload(err: &AppError) -> Value {
    serde_json::to_value(AuthenticateResponse::from(err)).unwrap_or_else(|_| error_payload(err))
}

/// Human mode describes the failure on stderr. JSON mode prints `payload`
/// and leaves server-fault detail to the log.
pub fn render_error(err: &AppError, mode: OutputMode, payload: &Value) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            if !err.is_caller_error() {
                error!(error = %err.human_message(), "command failed");
            }
            if let Err(write_err) = write_json(payload) {
                eprintln!("error: {}", write_err.human_message());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn server_fault() -> AppError {
        AppError::ModelLoad {
            path: PathBuf::from("/opt/models/cascade.json"),
            message: "truncated".into(),
        }
    }

    #[test]
    fn error_payload_hides_server_fault_detail() {
        let payload = error_payload(&server_fault());
        assert_eq!(payload["success"], false);
        assert!(payload.get("error").is_none());
        assert!(!payload.to_string().contains("/opt/models"));
    }

    #[test]
    fn enroll_failures_use_the_enroll_response() {
        let err = AppError::DuplicateIdentity {
            identity: "a@x.com".into(),
        };
        assert_eq!(
            enroll_error_payload(&err),
            json!({ "success": false, "message": "Identity already registered" })
        );
        assert!(!enroll_error_payload(&server_fault())
            .to_string()
            .contains("/opt/models"));
    }

    #[test]
    fn authenticate_failures_use_the_authenticate_response() {
        let err = AppError::IdentityNotFound {
            identity: "a@x.com".into(),
        };
        assert_eq!(
            authenticate_error_payload(&err),
            json!({ "success": false, "message": "User not found" })
        );
    }
}
