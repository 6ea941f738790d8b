use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use faceauth_cli::cli::{EnrollArgs, OutputMode, StoreArgs};
use faceauth_cli::commands::{CommandHandler, EnrollHandler};
use faceauth_cli::config::ConfigSource;
use faceauth_cli::errors::AppError;
use faceauth_core::faces::{EnrollmentOutcome, EnrollmentRecord};

fn sample_args() -> EnrollArgs {
    EnrollArgs {
        identity: "a@x.com".into(),
        name: "Ada Lovelace".into(),
        contact: Some("+44 20 0000".into()),
        image: PathBuf::from("face.png"),
        stores: StoreArgs {
            record_dir: Some(PathBuf::from("/var/lib/faceauth/records")),
            photo_dir: None,
        },
    }
}

fn sample_outcome() -> EnrollmentOutcome {
    EnrollmentOutcome {
        record: EnrollmentRecord {
            id: "6d1f".into(),
            identity: "a@x.com".into(),
            display_name: "Ada Lovelace".into(),
            contact: Some("+44 20 0000".into()),
            reference_photo: "abc.png".into(),
            reference_embedding: None,
            created_at: "2024-01-01T00:00:00.000Z".into(),
        },
        logs: vec!["Registered identity a@x.com".into()],
    }
}

#[test]
fn enroll_handler_passes_verbose_flag_to_renderer() {
    let render_calls = Arc::new(Mutex::new(Vec::new()));
    let handler = EnrollHandler::with_dependencies(
        sample_args(),
        ConfigSource::default(),
        |_args, _config| Ok(sample_outcome()),
        {
            let render_calls = Arc::clone(&render_calls);
            move |outcome, mode, verbose| {
                render_calls
                    .lock()
                    .unwrap()
                    .push((outcome.record.identity.clone(), mode, verbose));
                Ok(())
            }
        },
    );

    let exit = handler.execute(OutputMode::Json, true).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    let calls = render_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("a@x.com".to_string(), OutputMode::Json, true));
}

#[test]
fn enroll_handler_hands_args_and_config_to_runner() {
    let seen = Arc::new(Mutex::new(None));
    let handler = EnrollHandler::with_dependencies(
        sample_args(),
        ConfigSource::new(Some(PathBuf::from("/etc/alt.toml"))),
        {
            let seen = Arc::clone(&seen);
            move |args: &EnrollArgs, config: &ConfigSource| {
                *seen.lock().unwrap() = Some((
                    args.stores.record_dir.clone(),
                    config.explicit().map(PathBuf::from),
                ));
                Ok(sample_outcome())
            }
        },
        |_outcome, _mode, _verbose| Ok(()),
    );

    handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(
        seen.lock().unwrap().clone(),
        Some((
            Some(PathBuf::from("/var/lib/faceauth/records")),
            Some(PathBuf::from("/etc/alt.toml"))
        ))
    );
}

#[test]
fn enroll_handler_surfaces_run_errors() {
    let handler = EnrollHandler::with_dependencies(
        sample_args(),
        ConfigSource::default(),
        |args, _config| {
            Err(AppError::DuplicateIdentity {
                identity: args.identity.clone(),
            })
        },
        |_outcome, _mode, _verbose| panic!("renderer must not run"),
    );

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    match err {
        AppError::DuplicateIdentity { identity } => assert_eq!(identity, "a@x.com"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn enroll_failures_render_the_enroll_response() {
    let handler = EnrollHandler::new(sample_args(), ConfigSource::default());

    let payload = handler.failure_payload(&AppError::NoFaceDetected);
    assert_eq!(
        payload,
        serde_json::json!({ "success": false, "message": "No face detected in the image" })
    );

    let payload = handler.failure_payload(&AppError::Extraction {
        message: "/opt/models/encoder.dat: truncated".into(),
    });
    assert_eq!(payload["success"], false);
    assert!(!payload.to_string().contains("/opt/models"));
}
