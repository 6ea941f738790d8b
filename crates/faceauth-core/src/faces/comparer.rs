use faceauth_config::{EmbeddingMetric, ThresholdSettings};
use image::RgbImage;
use serde::Serialize;

use crate::errors::{AppError, AppResult};
use crate::faces::extractor::{Representation, RepresentationKind};

/// Raw pixel error at which the heuristic confidence reaches zero.
const PIXEL_ERROR_SCALE: f64 = 10_000.0;

/// Outcome of comparing a probe against a reference.
///
/// `confidence` is a heuristic score in `[0, 1]`, not a probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchScore {
    /// Metric value before normalisation (MSE, cosine similarity, ...).
    pub raw: f64,
    pub confidence: f64,
    pub accepted: bool,
}

impl MatchScore {
    /// Confidence as a percentage rounded to two decimals.
    pub fn confidence_percent(&self) -> f64 {
        (self.confidence * 10_000.0).round() / 100.0
    }
}

pub trait Matcher: Send + Sync {
    fn compare(&self, probe: &Representation, reference: &Representation)
        -> AppResult<MatchScore>;

    fn kind(&self) -> RepresentationKind;

    fn metric(&self) -> &'static str;
}

/// Mean squared error over equally sized patches.
#[derive(Debug, Clone, Copy)]
pub struct PixelMatcher {
    threshold: f64,
}

impl PixelMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Matcher for PixelMatcher {
    fn compare(
        &self,
        probe: &Representation,
        reference: &Representation,
    ) -> AppResult<MatchScore> {
        let (Representation::Patch(probe), Representation::Patch(reference)) = (probe, reference)
        else {
            return Err(kind_mismatch(RepresentationKind::Patch, probe, reference));
        };

        let error = mean_squared_error(probe, reference)?;
        Ok(MatchScore {
            raw: error,
            confidence: 1.0 - (error / PIXEL_ERROR_SCALE).min(1.0),
            accepted: error < self.threshold,
        })
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Patch
    }

    fn metric(&self) -> &'static str {
        "mean-squared-error"
    }
}

/// Compares embedding vectors with the configured metric and its own threshold.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingMatcher {
    metric: EmbeddingMetric,
    threshold: f64,
}

impl EmbeddingMatcher {
    pub fn new(metric: EmbeddingMetric, threshold: f64) -> Self {
        Self { metric, threshold }
    }

    pub fn from_thresholds(metric: EmbeddingMetric, thresholds: &ThresholdSettings) -> Self {
        let threshold = match metric {
            EmbeddingMetric::Cosine => thresholds.cosine,
            EmbeddingMetric::MeanAbsDiff => thresholds.mean_abs,
        };
        Self::new(metric, threshold)
    }
}

impl Matcher for EmbeddingMatcher {
    fn compare(
        &self,
        probe: &Representation,
        reference: &Representation,
    ) -> AppResult<MatchScore> {
        let (Representation::Embedding(probe), Representation::Embedding(reference)) =
            (probe, reference)
        else {
            return Err(kind_mismatch(RepresentationKind::Embedding, probe, reference));
        };

        if probe.is_empty() || probe.len() != reference.len() {
            return Err(AppError::RepresentationMismatch {
                message: format!(
                    "embedding lengths differ or are empty ({} vs {})",
                    probe.len(),
                    reference.len()
                ),
            });
        }

        let score = match self.metric {
            EmbeddingMetric::Cosine => {
                let similarity = cosine_similarity(probe, reference);
                MatchScore {
                    raw: similarity,
                    confidence: similarity.clamp(0.0, 1.0),
                    accepted: similarity > self.threshold,
                }
            }
            EmbeddingMetric::MeanAbsDiff => {
                let mean_abs = probe
                    .iter()
                    .zip(reference.iter())
                    .map(|(a, b)| (a - b).abs())
                    .sum::<f64>()
                    / probe.len() as f64;
                let proxy = 1.0 - mean_abs / 2.0;
                MatchScore {
                    raw: mean_abs,
                    confidence: proxy.clamp(0.0, 1.0),
                    accepted: proxy > self.threshold,
                }
            }
        };
        Ok(score)
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Embedding
    }

    fn metric(&self) -> &'static str {
        match self.metric {
            EmbeddingMetric::Cosine => "cosine",
            EmbeddingMetric::MeanAbsDiff => "mean-abs-diff",
        }
    }
}

fn kind_mismatch(
    expected: RepresentationKind,
    probe: &Representation,
    reference: &Representation,
) -> AppError {
    AppError::RepresentationMismatch {
        message: format!(
            "expected two {expected:?} representations, got {:?} and {:?}",
            probe.kind(),
            reference.kind()
        ),
    }
}

/// Channel-wise mean squared error over every pixel.
pub fn mean_squared_error(lhs: &RgbImage, rhs: &RgbImage) -> AppResult<f64> {
    if lhs.dimensions() != rhs.dimensions() {
        return Err(AppError::RepresentationMismatch {
            message: format!(
                "patch sizes differ ({:?} vs {:?})",
                lhs.dimensions(),
                rhs.dimensions()
            ),
        });
    }
    let samples = lhs.as_raw();
    if samples.is_empty() {
        return Err(AppError::RepresentationMismatch {
            message: "patches are empty".into(),
        });
    }

    let total: f64 = samples
        .iter()
        .zip(rhs.as_raw().iter())
        .map(|(&a, &b)| {
            let diff = a as f64 - b as f64;
            diff * diff
        })
        .sum();
    Ok(total / samples.len() as f64)
}

/// Zero-magnitude inputs yield 0.0 rather than NaN.
pub fn cosine_similarity(lhs: &[f64], rhs: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_lhs = 0.0;
    let mut norm_rhs = 0.0;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    let denominator = norm_lhs.sqrt() * norm_rhs.sqrt();
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    dot / denominator
}
