//! Structured results handed to a transport.
//!
//! Every error is recovered here: callers always receive a response with a
//! success flag, a message and an [`OutcomeStatus`].
//!
//! A rejected authentication still reports its confidence. That tells an
//! unauthenticated caller how close the attempt came; transports exposed to
//! untrusted clients should consider dropping the field.

use serde::Serialize;
use tracing::{error, info};

use crate::errors::AppError;
use crate::faces::authentication::{
    run_authentication_with, AuthenticationOutcome, AuthenticationRequest,
};
use crate::faces::enrollment::{run_enrollment_with, EnrollmentOutcome, EnrollmentRequest};
use crate::faces::pipeline::FacePipeline;
use crate::faces::store::{BlobStore, RecordStore};

pub const MSG_ENROLLED: &str = "User registered successfully";
pub const MSG_AUTHENTICATED: &str = "Login successful";
pub const MSG_REJECTED: &str = "Face not recognized";
pub const MSG_NO_FACE: &str = "No face detected in the image";
pub const MSG_DUPLICATE: &str = "Identity already registered";
pub const MSG_NOT_FOUND: &str = "User not found";
pub const MSG_PHOTO_MISSING: &str = "Stored image not found";
pub const MSG_SERVER_ERROR: &str = "Internal error while processing the request";

/// Transport-neutral classification of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Ok,
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledUser {
    pub name: String,
    pub identity: String,
    /// Blob handle of the stored reference photo.
    pub photo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<EnrolledUser>,
    #[serde(skip)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    pub success: bool,
    pub message: String,
    /// Record id, set only on acceptance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    /// Percentage, two decimals. Present whenever a comparison ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip)]
    pub status: OutcomeStatus,
}

impl AuthenticateResponse {
    fn failure(message: String, status: OutcomeStatus) -> Self {
        Self {
            success: false,
            message,
            id: None,
            identity: None,
            first_name: None,
            last_name: None,
            contact: None,
            photo: None,
            confidence: None,
            status,
        }
    }
}

/// Message shown to the caller. Server faults are not described.
pub fn error_message(err: &AppError) -> String {
    match err {
        AppError::NoFaceDetected => MSG_NO_FACE.to_string(),
        AppError::DuplicateIdentity { .. } => MSG_DUPLICATE.to_string(),
        AppError::IdentityNotFound { .. } => MSG_NOT_FOUND.to_string(),
        AppError::StoredArtifactMissing { .. } => MSG_PHOTO_MISSING.to_string(),
        other if other.status() == OutcomeStatus::ServerError => MSG_SERVER_ERROR.to_string(),
        other => other.human_message(),
    }
}

fn log_failure(operation: &'static str, identity: &str, err: &AppError) {
    if err.is_caller_error() {
        info!(operation, identity, reason = %err, "request refused");
    } else {
        error!(operation, identity, error = %err, "request failed");
    }
}

impl From<&EnrollmentOutcome> for EnrollResponse {
    fn from(outcome: &EnrollmentOutcome) -> Self {
        let record = &outcome.record;
        Self {
            success: true,
            message: MSG_ENROLLED.to_string(),
            user: Some(EnrolledUser {
                name: record.display_name.clone(),
                identity: record.identity.clone(),
                photo: record.reference_photo.clone(),
            }),
            status: OutcomeStatus::Ok,
        }
    }
}

impl From<&AppError> for EnrollResponse {
    fn from(err: &AppError) -> Self {
        Self {
            success: false,
            message: error_message(err),
            user: None,
            status: err.status(),
        }
    }
}

impl From<&AuthenticationOutcome> for AuthenticateResponse {
    fn from(outcome: &AuthenticationOutcome) -> Self {
        let confidence = Some(outcome.score.confidence_percent());
        if !outcome.accepted() {
            let mut response =
                Self::failure(MSG_REJECTED.to_string(), OutcomeStatus::Unauthorized);
            response.confidence = confidence;
            return response;
        }

        let record = &outcome.record;
        let (first_name, last_name) = record.split_name();
        Self {
            success: true,
            message: MSG_AUTHENTICATED.to_string(),
            id: Some(record.id.clone()),
            identity: Some(record.identity.clone()),
            first_name: Some(first_name),
            last_name: Some(last_name),
            contact: record.contact.clone(),
            photo: Some(record.reference_photo.clone()),
            confidence,
            status: OutcomeStatus::Ok,
        }
    }
}

impl From<&AppError> for AuthenticateResponse {
    fn from(err: &AppError) -> Self {
        Self::failure(error_message(err), err.status())
    }
}

pub fn enroll<R, B>(
    request: &EnrollmentRequest<'_>,
    pipeline: &FacePipeline,
    records: &R,
    blobs: &B,
) -> EnrollResponse
where
    R: RecordStore + ?Sized,
    B: BlobStore + ?Sized,
{
    match run_enrollment_with(request, pipeline, records, blobs) {
        Ok(outcome) => (&outcome).into(),
        Err(err) => {
            log_failure("enroll", request.identity, &err);
            EnrollResponse::from(&err)
        }
    }
}

pub fn authenticate<R, B>(
    request: &AuthenticationRequest<'_>,
    pipeline: &FacePipeline,
    records: &R,
    blobs: &B,
) -> AuthenticateResponse
where
    R: RecordStore + ?Sized,
    B: BlobStore + ?Sized,
{
    match run_authentication_with(request, pipeline, records, blobs) {
        Ok(outcome) => (&outcome).into(),
        Err(err) => {
            log_failure("authenticate", request.identity, &err);
            AuthenticateResponse::from(&err)
        }
    }
}
