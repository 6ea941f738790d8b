use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use faceauth_config::ConfigError;
use thiserror::Error;

use crate::response::OutcomeStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("invalid identity '{identity}': {message}")]
    InvalidIdentity { identity: String, message: String },

    #[error("failed to decode image: {message}")]
    Decode { message: String },

    #[error("no face detected in the image")]
    NoFaceDetected,

    #[error("identity '{identity}' is already registered")]
    DuplicateIdentity { identity: String },

    #[error("identity '{identity}' not found")]
    IdentityNotFound { identity: String },

    #[error("stored reference photo '{handle}' not found")]
    StoredArtifactMissing { handle: String },

    #[error("face detection failed: {message}")]
    Detection { message: String },

    #[error("feature extraction failed: {message}")]
    Extraction { message: String },

    #[error("cannot compare representations: {message}")]
    RepresentationMismatch { message: String },

    #[error("invalid blob handle '{handle}'")]
    InvalidHandle { handle: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("missing {kind} model; provide {flag} or set ${env}")]
    MissingModel {
        kind: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("failed to write {path}: {source}")]
    StoreWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("record file {path} is invalid: {message}")]
    InvalidRecordFile { path: PathBuf, message: String },

    #[error("record {path} is encrypted and requires a record key")]
    EncryptedRecordRequiresKey { path: PathBuf },

    #[error("record encryption error: {0}")]
    Encryption(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::MissingField { .. } => ExitCode::from(2),
            AppError::InvalidIdentity { .. } => ExitCode::from(2),
            AppError::Decode { .. } => ExitCode::from(2),
            AppError::NoFaceDetected => ExitCode::from(3),
            AppError::DuplicateIdentity { .. } => ExitCode::from(2),
            AppError::IdentityNotFound { .. } => ExitCode::from(4),
            AppError::StoredArtifactMissing { .. } => ExitCode::from(4),
            AppError::InvalidHandle { .. } => ExitCode::from(2),
            AppError::MissingModel { .. } => ExitCode::from(2),
            AppError::ModelLoad { .. } => ExitCode::from(2),
            AppError::Config(_) => ExitCode::from(2),
            AppError::InvalidConfig(_) => ExitCode::from(2),
            AppError::EncryptedRecordRequiresKey { .. } => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }

    /// Classifies the error for a transport layer.
    pub fn status(&self) -> OutcomeStatus {
        match self {
            AppError::MissingField { .. }
            | AppError::InvalidIdentity { .. }
            | AppError::Decode { .. }
            | AppError::NoFaceDetected
            | AppError::InvalidHandle { .. } => OutcomeStatus::BadRequest,
            AppError::DuplicateIdentity { .. } => OutcomeStatus::Conflict,
            AppError::IdentityNotFound { .. } | AppError::StoredArtifactMissing { .. } => {
                OutcomeStatus::NotFound
            }
            _ => OutcomeStatus::ServerError,
        }
    }

    /// Caller-side conditions that are reported, not logged as faults.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self.status(),
            OutcomeStatus::BadRequest | OutcomeStatus::Conflict | OutcomeStatus::NotFound
        ) && !matches!(self, AppError::StoredArtifactMissing { .. })
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_map_to_client_statuses() {
        assert_eq!(AppError::NoFaceDetected.status(), OutcomeStatus::BadRequest);
        assert_eq!(
            AppError::DuplicateIdentity {
                identity: "a@x.com".into()
            }
            .status(),
            OutcomeStatus::Conflict
        );
        assert_eq!(
            AppError::IdentityNotFound {
                identity: "a@x.com".into()
            }
            .status(),
            OutcomeStatus::NotFound
        );
        assert!(AppError::NoFaceDetected.is_caller_error());
    }

    #[test]
    fn missing_artifact_is_a_server_side_fault() {
        let err = AppError::StoredArtifactMissing {
            handle: "abc.png".into(),
        };
        assert_eq!(err.status(), OutcomeStatus::NotFound);
        assert!(!err.is_caller_error());
        assert_eq!(
            AppError::Extraction {
                message: "boom".into()
            }
            .status(),
            OutcomeStatus::ServerError
        );
    }
}
