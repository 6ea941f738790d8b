use tracing::info;

use crate::decode::{decode_image, ImagePayload};
use crate::errors::{AppError, AppResult};
use crate::faces::comparer::MatchScore;
use crate::faces::pipeline::FacePipeline;
use crate::faces::store::{BlobStore, EnrollmentRecord, RecordStore};

#[derive(Debug, Clone, Copy)]
pub struct AuthenticationRequest<'a> {
    pub identity: &'a str,
    pub image: ImagePayload<'a>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonPath {
    Embedding,
    RawPixel,
}

/// A completed comparison. A rejected match is an outcome, not an error.
#[derive(Debug)]
pub struct AuthenticationOutcome {
    pub record: EnrollmentRecord,
    pub score: MatchScore,
    pub path: ComparisonPath,
    pub logs: Vec<String>,
}

impl AuthenticationOutcome {
    pub fn accepted(&self) -> bool {
        self.score.accepted
    }
}

pub fn run_authentication_with<R, B>(
    request: &AuthenticationRequest<'_>,
    pipeline: &FacePipeline,
    records: &R,
    blobs: &B,
) -> AppResult<AuthenticationOutcome>
where
    R: RecordStore + ?Sized,
    B: BlobStore + ?Sized,
{
    if request.identity.trim().is_empty() {
        return Err(AppError::MissingField { field: "identity" });
    }

    let record = records
        .find_by_identity(request.identity)?
        .ok_or_else(|| AppError::IdentityNotFound {
            identity: request.identity.to_string(),
        })?;

    let mut logs = Vec::new();
    let frame = decode_image(request.image)?;
    logs.push(format!("Decoded image ({}x{})", frame.width(), frame.height()));

    let face = pipeline.locate(&frame)?;
    logs.push(format!(
        "Face located at ({}, {}) size {}x{}",
        face.bounds.x, face.bounds.y, face.bounds.width, face.bounds.height
    ));

    // Embeddings only when both sides have one; otherwise the stored photo.
    let (path, score) = match (&record.reference_embedding, pipeline.has_embedder()) {
        (Some(reference), true) => {
            let probe = pipeline.embed(&face)?.ok_or_else(|| AppError::Extraction {
                message: "embedding extractor returned nothing".into(),
            })?;
            let score = pipeline.compare_embeddings(probe, reference)?;
            logs.push(format!(
                "Compared embeddings ({}): raw score {:.4}",
                pipeline.embedding_metric(),
                score.raw
            ));
            (ComparisonPath::Embedding, score)
        }
        _ => {
            let stored = blobs.load(&record.reference_photo)?;
            let score = pipeline.compare_pixels(&face, &record.reference_photo, &stored)?;
            logs.push(format!(
                "Compared pixels ({}): raw score {:.2}",
                pipeline.pixel_metric(),
                score.raw
            ));
            (ComparisonPath::RawPixel, score)
        }
    };

    logs.push(format!(
        "Match {} with confidence {:.2}%",
        if score.accepted { "accepted" } else { "rejected" },
        score.confidence_percent()
    ));
    info!(
        identity = %record.identity,
        path = ?path,
        accepted = score.accepted,
        confidence = score.confidence_percent(),
        "authentication decided"
    );

    Ok(AuthenticationOutcome {
        record,
        score,
        path,
        logs,
    })
}
