use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use faceauth_cli::cli::{AuthenticateArgs, OutputMode, StoreArgs};
use faceauth_cli::commands::{AuthenticateHandler, CommandHandler, REJECTED_EXIT_CODE};
use faceauth_cli::config::ConfigSource;
use faceauth_cli::errors::AppError;
use faceauth_core::faces::{AuthenticationOutcome, ComparisonPath, EnrollmentRecord, MatchScore};

fn sample_args() -> AuthenticateArgs {
    AuthenticateArgs {
        identity: "a@x.com".into(),
        image: PathBuf::from("probe.png"),
        stores: StoreArgs::default(),
    }
}

fn outcome(accepted: bool) -> AuthenticationOutcome {
    AuthenticationOutcome {
        record: EnrollmentRecord {
            id: "6d1f".into(),
            identity: "a@x.com".into(),
            display_name: "Ada Lovelace".into(),
            contact: None,
            reference_photo: "abc.png".into(),
            reference_embedding: None,
            created_at: "2024-01-01T00:00:00.000Z".into(),
        },
        score: MatchScore {
            raw: if accepted { 12.0 } else { 6400.0 },
            confidence: if accepted { 0.9988 } else { 0.36 },
            accepted,
        },
        path: ComparisonPath::RawPixel,
        logs: vec![],
    }
}

#[test]
fn accepted_match_exits_successfully() {
    let rendered = Arc::new(Mutex::new(Vec::new()));
    let handler = AuthenticateHandler::with_dependencies(
        sample_args(),
        ConfigSource::default(),
        |_args, _config| Ok(outcome(true)),
        {
            let rendered = Arc::clone(&rendered);
            move |outcome, mode, _verbose| {
                rendered.lock().unwrap().push((outcome.accepted(), mode));
                Ok(())
            }
        },
    );

    let exit = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    assert_eq!(*rendered.lock().unwrap(), vec![(true, OutputMode::Human)]);
}

#[test]
fn rejected_match_is_rendered_then_exits_with_rejection_code() {
    let rendered = Arc::new(Mutex::new(0));
    let handler = AuthenticateHandler::with_dependencies(
        sample_args(),
        ConfigSource::default(),
        |_args, _config| Ok(outcome(false)),
        {
            let rendered = Arc::clone(&rendered);
            move |_outcome, _mode, _verbose| {
                *rendered.lock().unwrap() += 1;
                Ok(())
            }
        },
    );

    let exit = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(exit, ExitCode::from(REJECTED_EXIT_CODE));
    assert_eq!(*rendered.lock().unwrap(), 1);
}

#[test]
fn missing_identity_propagates_not_found() {
    let handler = AuthenticateHandler::with_dependencies(
        sample_args(),
        ConfigSource::default(),
        |args, _config| {
            Err(AppError::IdentityNotFound {
                identity: args.identity.clone(),
            })
        },
        |_outcome, _mode, _verbose| Ok(()),
    );

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    assert!(matches!(err, AppError::IdentityNotFound { .. }));
    assert_eq!(err.exit_code(), ExitCode::from(4));
}

#[test]
fn authenticate_failures_render_the_authenticate_response() {
    let handler = AuthenticateHandler::new(sample_args(), ConfigSource::default());
    let payload = handler.failure_payload(&AppError::IdentityNotFound {
        identity: "a@x.com".into(),
    });
    assert_eq!(
        payload,
        serde_json::json!({ "success": false, "message": "User not found" })
    );
}
