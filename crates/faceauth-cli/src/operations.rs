//! Wires configuration, the face pipeline and the filesystem stores into the
//! core enrollment and authentication operations.

use std::fs;
use std::path::{Path, PathBuf};

use faceauth_core::decode::ImagePayload;
use faceauth_core::faces::{
    run_authentication_with, run_enrollment_with, AuthenticationOutcome, AuthenticationRequest,
    BlobStore, EnrollmentOutcome, EnrollmentRequest, FacePipeline, FilesystemBlobStore,
};
use serde::Serialize;
use tracing::info;

use crate::cli::{AuthenticateArgs, EnrollArgs, PhotoArgs, StoreArgs};
use crate::config::{open_stores, store_layout, ConfigSource};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct PhotoExport {
    pub handle: String,
    pub output: PathBuf,
    pub bytes: usize,
}

pub fn run_enroll(args: &EnrollArgs, source: &ConfigSource) -> AppResult<EnrollmentOutcome> {
    let loaded = source.load()?;
    let config = &loaded.resolved;
    let image = read_image_file(&args.image)?;
    let (records, blobs) = open_stores(config, &args.stores)?;
    let pipeline = FacePipeline::from_config(config)?;

    let request = EnrollmentRequest {
        identity: &args.identity,
        display_name: &args.name,
        contact: args.contact.as_deref(),
        image: ImagePayload::from_bytes(&image),
    };
    run_enrollment_with(&request, &pipeline, &records, &blobs)
}

pub fn run_authenticate(
    args: &AuthenticateArgs,
    source: &ConfigSource,
) -> AppResult<AuthenticationOutcome> {
    let loaded = source.load()?;
    let config = &loaded.resolved;
    let image = read_image_file(&args.image)?;
    let (records, blobs) = open_stores(config, &args.stores)?;
    let pipeline = FacePipeline::from_config(config)?;

    let request = AuthenticationRequest {
        identity: &args.identity,
        image: ImagePayload::from_bytes(&image),
    };
    run_authentication_with(&request, &pipeline, &records, &blobs)
}

pub fn run_photo_export(args: &PhotoArgs, source: &ConfigSource) -> AppResult<PhotoExport> {
    let loaded = source.load()?;
    let overrides = StoreArgs {
        record_dir: None,
        photo_dir: args.photo_dir.clone(),
    };
    let layout = store_layout(&loaded.resolved, &overrides);
    let blobs = FilesystemBlobStore::new(layout.photos);

    let bytes = blobs.load(&args.handle)?;
    fs::write(&args.output, &bytes).map_err(|source| AppError::StoreWrite {
        path: args.output.clone(),
        source,
    })?;
    info!(
        handle = %args.handle,
        output = %args.output.display(),
        bytes = bytes.len(),
        "exported reference photo"
    );

    Ok(PhotoExport {
        handle: args.handle.clone(),
        output: args.output.clone(),
        bytes: bytes.len(),
    })
}

/// An unreadable input file is the caller's problem, like an undecodable one.
fn read_image_file(path: &Path) -> AppResult<Vec<u8>> {
    fs::read(path).map_err(|err| AppError::Decode {
        message: format!("cannot read {}: {err}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn config_for(dir: &Path) -> ConfigSource {
        let path = dir.join("faceauth.toml");
        fs::write(
            &path,
            format!("data_dir = \"{}\"\n", dir.join("data").display()),
        )
        .unwrap();
        ConfigSource::new(Some(path))
    }

    #[test]
    fn photo_export_copies_the_stored_bytes() {
        let dir = tempdir().unwrap();
        let source = config_for(dir.path());
        let photos = dir.path().join("data/photos");
        fs::create_dir_all(&photos).unwrap();
        fs::write(photos.join("abc.png"), b"png-bytes").unwrap();

        let args = PhotoArgs {
            handle: "abc.png".into(),
            output: dir.path().join("out.png"),
            photo_dir: None,
        };
        let export = run_photo_export(&args, &source).unwrap();

        assert_eq!(export.bytes, 9);
        assert_eq!(fs::read(dir.path().join("out.png")).unwrap(), b"png-bytes");
    }

    #[test]
    fn photo_export_reports_missing_handles() {
        let dir = tempdir().unwrap();
        let args = PhotoArgs {
            handle: "missing.png".into(),
            output: dir.path().join("out.png"),
            photo_dir: Some(dir.path().to_path_buf()),
        };
        let err = run_photo_export(&args, &config_for(dir.path())).unwrap_err();
        assert!(matches!(err, AppError::StoredArtifactMissing { .. }));
        assert!(!dir.path().join("out.png").exists());
    }

    #[test]
    fn photo_export_rejects_path_like_handles() {
        let dir = tempdir().unwrap();
        let args = PhotoArgs {
            handle: "../faceauth.toml".into(),
            output: dir.path().join("out.png"),
            photo_dir: Some(dir.path().to_path_buf()),
        };
        let err = run_photo_export(&args, &config_for(dir.path())).unwrap_err();
        assert!(matches!(err, AppError::InvalidHandle { .. }));
    }

    #[test]
    fn unreadable_image_is_a_decode_error() {
        let err = read_image_file(Path::new("/nonexistent/face.png")).unwrap_err();
        assert!(matches!(err, AppError::Decode { .. }));
    }
}
