use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::decode::{decode_image, ImagePayload};
use crate::errors::{AppError, AppResult};
use crate::faces::pipeline::FacePipeline;
use crate::faces::store::{BlobStore, EnrollmentRecord, RecordStore};

const MAX_IDENTITY_LEN: usize = 254;

#[derive(Debug, Clone, Copy)]
pub struct EnrollmentRequest<'a> {
    pub identity: &'a str,
    pub display_name: &'a str,
    pub contact: Option<&'a str>,
    pub image: ImagePayload<'a>,
}

#[derive(Debug)]
pub struct EnrollmentOutcome {
    pub record: EnrollmentRecord,
    pub logs: Vec<String>,
}

/// Identities are opaque keys; reject what cannot be a sane key.
pub fn validate_identity(identity: &str) -> AppResult<()> {
    if identity.trim().is_empty() {
        return Err(AppError::MissingField { field: "identity" });
    }

    let invalid = |message: &str| AppError::InvalidIdentity {
        identity: identity.to_string(),
        message: message.to_string(),
    };
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(invalid("identity is too long"));
    }
    if identity.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(invalid("identity must not contain whitespace or control characters"));
    }
    if identity.contains(['/', '\\']) {
        return Err(invalid("identity must not contain path separators"));
    }
    Ok(())
}

pub fn run_enrollment_with<R, B>(
    request: &EnrollmentRequest<'_>,
    pipeline: &FacePipeline,
    records: &R,
    blobs: &B,
) -> AppResult<EnrollmentOutcome>
where
    R: RecordStore + ?Sized,
    B: BlobStore + ?Sized,
{
    validate_identity(request.identity)?;
    let display_name = request.display_name.trim();
    if display_name.is_empty() {
        return Err(AppError::MissingField { field: "name" });
    }
    if request.image.is_empty() {
        return Err(AppError::MissingField { field: "image" });
    }
    let contact = request
        .contact
        .map(str::trim)
        .filter(|contact| !contact.is_empty());

    let mut logs = Vec::new();

    if records.find_by_identity(request.identity)?.is_some() {
        return Err(AppError::DuplicateIdentity {
            identity: request.identity.to_string(),
        });
    }

    let frame = decode_image(request.image)?;
    logs.push(format!("Decoded image ({}x{})", frame.width(), frame.height()));

    let face = pipeline.locate(&frame)?;
    logs.push(format!(
        "Face located at ({}, {}) size {}x{}",
        face.bounds.x, face.bounds.y, face.bounds.width, face.bounds.height
    ));

    let photo = pipeline.reference_photo(&face)?;
    let handle = blobs.save(&photo, &format!("{}.png", Uuid::new_v4().simple()))?;
    logs.push(format!(
        "Stored {size}x{size} reference photo {handle}",
        size = pipeline.crop_size()
    ));

    let embedding = match pipeline.embed(&face) {
        Ok(embedding) => embedding,
        Err(err) => {
            discard_photo(blobs, &handle);
            return Err(err);
        }
    };
    if let Some(values) = &embedding {
        logs.push(format!("Extracted embedding with {} dimensions", values.len()));
    }

    let record = EnrollmentRecord {
        id: Uuid::new_v4().to_string(),
        identity: request.identity.to_string(),
        display_name: display_name.to_string(),
        contact: contact.map(str::to_string),
        reference_photo: handle.clone(),
        reference_embedding: embedding,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    // A concurrent enrollment may have won since the lookup above.
    if let Err(err) = records.insert_if_absent(&record) {
        discard_photo(blobs, &handle);
        return Err(err);
    }
    logs.push(format!("Registered identity {}", record.identity));

    info!(
        identity = %record.identity,
        photo = %record.reference_photo,
        embedding = record.reference_embedding.is_some(),
        "identity enrolled"
    );

    Ok(EnrollmentOutcome { record, logs })
}

fn discard_photo<B: BlobStore + ?Sized>(blobs: &B, handle: &str) {
    if let Err(err) = blobs.remove(handle) {
        warn!(handle, error = %err, "failed to remove orphaned reference photo");
    }
}
