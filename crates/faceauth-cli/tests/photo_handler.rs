use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use faceauth_cli::cli::{OutputMode, PhotoArgs};
use faceauth_cli::commands::{CommandHandler, PhotoHandler};
use faceauth_cli::config::ConfigSource;
use faceauth_cli::errors::AppError;
use faceauth_cli::operations::PhotoExport;

fn sample_args() -> PhotoArgs {
    PhotoArgs {
        handle: "abc.png".into(),
        output: PathBuf::from("/tmp/abc.png"),
        photo_dir: None,
    }
}

#[test]
fn photo_handler_renders_the_export() {
    let rendered = Arc::new(Mutex::new(None));
    let handler = PhotoHandler::with_dependencies(
        sample_args(),
        ConfigSource::default(),
        |args, _config| {
            Ok(PhotoExport {
                handle: args.handle.clone(),
                output: args.output.clone(),
                bytes: 42,
            })
        },
        {
            let rendered = Arc::clone(&rendered);
            move |export, _mode| {
                *rendered.lock().unwrap() = Some((export.handle.clone(), export.bytes));
                Ok(())
            }
        },
    );

    let exit = handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(exit, ExitCode::SUCCESS);
    assert_eq!(
        rendered.lock().unwrap().clone(),
        Some(("abc.png".to_string(), 42))
    );
}

#[test]
fn photo_handler_surfaces_missing_photos() {
    let handler = PhotoHandler::with_dependencies(
        sample_args(),
        ConfigSource::default(),
        |args, _config| {
            Err(AppError::StoredArtifactMissing {
                handle: args.handle.clone(),
            })
        },
        |_export, _mode| Ok(()),
    );

    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    assert!(matches!(err, AppError::StoredArtifactMissing { .. }));
}
