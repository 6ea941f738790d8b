use std::env;
use std::io::{self, Cursor};
use std::path::PathBuf;

use faceauth_config::{
    EmbeddingBackendKind, EmbeddingMetric, ExtractionStrategy, LocatorKind, ResolvedConfig,
    ThresholdSettings,
};
use image::{ImageOutputFormat, RgbImage};
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::faces::cascade::CascadeFaceLocator;
use crate::faces::comparer::{EmbeddingMatcher, MatchScore, Matcher, PixelMatcher};
use crate::faces::extractor::{
    resize_patch, resolve_model_paths, CommandEmbeddingModel, DlibEmbeddingModel,
    EmbeddingExtractor, EmbeddingModel, FeatureExtractor, RawPixelExtractor, Representation,
};
use crate::faces::locator::{locate_primary_face, DlibFaceLocator, FaceLocator, FaceRegion};

const CASCADE_ENV: &str = "FACEAUTH_CASCADE_MODEL";

/// Detector, extractors and matchers, built once at startup and shared
/// read-only by every request.
pub struct FacePipeline {
    locator: Box<dyn FaceLocator>,
    embedder: Option<Box<dyn FeatureExtractor>>,
    pixels: RawPixelExtractor,
    pixel_matcher: PixelMatcher,
    embedding_matcher: EmbeddingMatcher,
}

impl FacePipeline {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        embedder: Option<Box<dyn FeatureExtractor>>,
        crop_size: u32,
        metric: EmbeddingMetric,
        thresholds: &ThresholdSettings,
    ) -> Self {
        Self {
            locator,
            embedder,
            pixels: RawPixelExtractor::new(crop_size),
            pixel_matcher: PixelMatcher::new(thresholds.pixel_error),
            embedding_matcher: EmbeddingMatcher::from_thresholds(metric, thresholds),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> AppResult<Self> {
        let locator = build_locator(config)?;
        let embedder = match config.strategy {
            ExtractionStrategy::RawPixel => None,
            ExtractionStrategy::Embedding => Some(build_embedder(config)?),
        };
        let pipeline = Self::new(
            locator,
            embedder,
            config.crop_size,
            config.embedding_metric,
            &config.thresholds,
        );
        pipeline.check_kinds()?;
        info!(
            locator = pipeline.locator_name(),
            embedder = pipeline.embedder_name().unwrap_or("none"),
            strategy = ?config.strategy,
            crop_size = config.crop_size,
            "face pipeline ready"
        );
        Ok(pipeline)
    }

    /// Each extractor must feed a matcher of the same representation kind.
    fn check_kinds(&self) -> AppResult<()> {
        let pairs = [
            (
                Some(self.pixels.kind()),
                self.pixel_matcher.kind(),
                self.pixel_matcher.metric(),
            ),
            (
                self.embedder.as_deref().map(|embedder| embedder.kind()),
                self.embedding_matcher.kind(),
                self.embedding_matcher.metric(),
            ),
        ];
        for (extracted, expected, metric) in pairs {
            match extracted {
                Some(kind) if kind != expected => {
                    return Err(AppError::RepresentationMismatch {
                        message: format!(
                            "{metric} matcher expects {expected:?} but the extractor yields {kind:?}"
                        ),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn locator_name(&self) -> &'static str {
        self.locator.name()
    }

    pub fn embedder_name(&self) -> Option<&str> {
        self.embedder.as_deref().map(|embedder| embedder.name())
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn crop_size(&self) -> u32 {
        self.pixels.size()
    }

    pub fn locate(&self, frame: &RgbImage) -> AppResult<FaceRegion> {
        locate_primary_face(self.locator.as_ref(), frame)
    }

    /// PNG bytes of the crop at the canonical size.
    pub fn reference_photo(&self, face: &FaceRegion) -> AppResult<Vec<u8>> {
        let patch = resize_patch(&face.image, self.pixels.size());
        let mut bytes = Vec::new();
        patch
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .map_err(|err| AppError::Io(io::Error::new(io::ErrorKind::Other, err.to_string())))?;
        Ok(bytes)
    }

    /// `None` when no embedding strategy is configured.
    pub fn embed(&self, face: &FaceRegion) -> AppResult<Option<Vec<f64>>> {
        let Some(embedder) = self.embedder.as_deref() else {
            return Ok(None);
        };
        match embedder.extract(face)? {
            Representation::Embedding(values) => Ok(Some(values)),
            Representation::Patch(_) => Err(AppError::Extraction {
                message: format!("extractor '{}' did not produce an embedding", embedder.name()),
            }),
        }
    }

    pub fn compare_embeddings(&self, probe: Vec<f64>, reference: &[f64]) -> AppResult<MatchScore> {
        self.embedding_matcher.compare(
            &Representation::Embedding(probe),
            &Representation::Embedding(reference.to_vec()),
        )
    }

    /// Compares the probe crop against a stored reference photo.
    pub fn compare_pixels(
        &self,
        face: &FaceRegion,
        handle: &str,
        stored_photo: &[u8],
    ) -> AppResult<MatchScore> {
        let size = self.pixels.size();
        let stored = image::load_from_memory(stored_photo)
            .map_err(|err| AppError::InvalidRecordFile {
                path: PathBuf::from(handle),
                message: format!("stored photo is not a readable image: {err}"),
            })?
            .to_rgb8();
        let stored = if stored.dimensions() == (size, size) {
            stored
        } else {
            debug!(
                handle,
                width = stored.width(),
                height = stored.height(),
                "resizing stored photo to the canonical size"
            );
            resize_patch(&stored, size)
        };

        let probe = self.pixels.extract(face)?;
        self.pixel_matcher
            .compare(&probe, &Representation::Patch(stored))
    }

    pub fn pixel_metric(&self) -> &'static str {
        self.pixel_matcher.metric()
    }

    pub fn embedding_metric(&self) -> &'static str {
        self.embedding_matcher.metric()
    }
}

fn build_locator(config: &ResolvedConfig) -> AppResult<Box<dyn FaceLocator>> {
    match config.locator {
        LocatorKind::Cascade => {
            let path = config
                .cascade_model
                .clone()
                .or_else(|| env::var(CASCADE_ENV).ok().map(PathBuf::from))
                .ok_or(AppError::MissingModel {
                    kind: "cascade",
                    flag: "cascade_model",
                    env: CASCADE_ENV,
                })?;
            Ok(Box::new(CascadeFaceLocator::from_path(
                &path,
                config.detection,
            )?))
        }
        LocatorKind::Dlib => {
            debug!("dlib locator ignores scale_factor and min_neighbors");
            Ok(Box::new(DlibFaceLocator::new()))
        }
    }
}

fn build_embedder(config: &ResolvedConfig) -> AppResult<Box<dyn FeatureExtractor>> {
    let model: Box<dyn EmbeddingModel> = match config.embedding_backend {
        EmbeddingBackendKind::Dlib => {
            let paths = resolve_model_paths(
                config.landmark_model.as_deref(),
                config.encoder_model.as_deref(),
            )?;
            Box::new(DlibEmbeddingModel::new(&paths, config.jitters)?)
        }
        EmbeddingBackendKind::Command => {
            let program = config.embedding_command.clone().ok_or_else(|| {
                AppError::InvalidConfig(
                    "embedding_backend = \"command\" requires embedding_command".into(),
                )
            })?;
            Box::new(CommandEmbeddingModel::new(
                program,
                config.embedding_model_name.clone(),
            ))
        }
    };
    Ok(Box::new(EmbeddingExtractor::new(
        model,
        config.artifact_dir.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::extractor::RepresentationKind;
    use crate::faces::locator::FaceBounds;
    use faceauth_config::ConfigFile;
    use image::Rgb;

    struct FixedLocator;

    impl FaceLocator for FixedLocator {
        fn locate(&self, _frame: &RgbImage) -> AppResult<Vec<FaceBounds>> {
            Ok(vec![FaceBounds::new(10, 10, 40, 40)])
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn pipeline() -> FacePipeline {
        FacePipeline::new(
            Box::new(FixedLocator),
            None,
            100,
            EmbeddingMetric::Cosine,
            &ThresholdSettings::default(),
        )
    }

    fn frame() -> RgbImage {
        RgbImage::from_fn(80, 80, |x, y| Rgb([(x * 3) as u8, (y * 3) as u8, 128]))
    }

    #[test]
    fn stored_photo_matches_its_own_source() {
        let pipeline = pipeline();
        let face = pipeline.locate(&frame()).unwrap();
        let photo = pipeline.reference_photo(&face).unwrap();

        let stored = image::load_from_memory(&photo).unwrap().to_rgb8();
        assert_eq!(stored.dimensions(), (100, 100));

        let score = pipeline.compare_pixels(&face, "ref.png", &photo).unwrap();
        assert!(score.accepted);
        assert_eq!(score.confidence_percent(), 100.0);
    }

    #[test]
    fn unreadable_stored_photo_is_reported() {
        let pipeline = pipeline();
        let face = pipeline.locate(&frame()).unwrap();
        let err = pipeline
            .compare_pixels(&face, "ref.png", b"not a png")
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRecordFile { .. }));
    }

    #[test]
    fn raw_pixel_pipeline_has_no_embedder() {
        let pipeline = pipeline();
        let face = pipeline.locate(&frame()).unwrap();
        assert!(!pipeline.has_embedder());
        assert_eq!(pipeline.embedder_name(), None);
        assert_eq!(pipeline.locator_name(), "fixed");
        assert_eq!(pipeline.embed(&face).unwrap(), None);
    }

    /// Claims to embed but hands back a pixel patch.
    struct PatchEmbedder;

    impl FeatureExtractor for PatchEmbedder {
        fn extract(&self, face: &FaceRegion) -> AppResult<Representation> {
            Ok(Representation::Patch(face.image.clone()))
        }

        fn kind(&self) -> RepresentationKind {
            RepresentationKind::Patch
        }

        fn name(&self) -> &str {
            "patch-embedder"
        }
    }

    #[test]
    fn extractor_and_matcher_kinds_must_agree() {
        assert!(pipeline().check_kinds().is_ok());

        let mismatched = FacePipeline::new(
            Box::new(FixedLocator),
            Some(Box::new(PatchEmbedder)),
            100,
            EmbeddingMetric::Cosine,
            &ThresholdSettings::default(),
        );
        let err = mismatched.check_kinds().unwrap_err();
        assert!(matches!(err, AppError::RepresentationMismatch { .. }));
    }

    #[test]
    fn command_backend_requires_a_program() {
        let raw = ConfigFile {
            locator: Some(LocatorKind::Dlib),
            strategy: Some(ExtractionStrategy::Embedding),
            embedding_backend: Some(EmbeddingBackendKind::Command),
            ..ConfigFile::default()
        };
        let err = build_embedder(&ResolvedConfig::from_raw(raw)).err().unwrap();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }

    #[test]
    fn command_backend_builds_an_embedding_extractor() {
        let raw = ConfigFile {
            strategy: Some(ExtractionStrategy::Embedding),
            embedding_backend: Some(EmbeddingBackendKind::Command),
            embedding_command: Some(PathBuf::from("/usr/local/bin/embed-face")),
            embedding_model_name: Some("Facenet".into()),
            ..ConfigFile::default()
        };
        let embedder = build_embedder(&ResolvedConfig::from_raw(raw)).unwrap();
        assert_eq!(embedder.name(), "Facenet");
    }

    #[test]
    fn cascade_locator_reports_unreadable_models() {
        let raw = ConfigFile {
            cascade_model: Some(PathBuf::from("/nonexistent/cascade.json")),
            ..ConfigFile::default()
        };
        let err = FacePipeline::from_config(&ResolvedConfig::from_raw(raw))
            .err()
            .unwrap();
        assert!(matches!(err, AppError::ModelLoad { .. }));
    }
}
