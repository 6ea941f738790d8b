use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use dlib_face_recognition::{
    FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix, LandmarkPredictor, LandmarkPredictorTrait,
    Rectangle,
};
use image::imageops::{self, FilterType};
use image::{ImageOutputFormat, RgbImage};
use serde::Deserialize;
use tempfile::{Builder, TempPath};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::faces::locator::FaceRegion;

const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";
const ARTIFACT_PREFIX: &str = "faceauth-";

/// What a face was reduced to for comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Embedding(Vec<f64>),
    Patch(RgbImage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepresentationKind {
    Embedding,
    Patch,
}

impl Representation {
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Representation::Embedding(_) => RepresentationKind::Embedding,
            Representation::Patch(_) => RepresentationKind::Patch,
        }
    }
}

pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, face: &FaceRegion) -> AppResult<Representation>;

    fn kind(&self) -> RepresentationKind;

    fn name(&self) -> &str;
}

/// Square resize used for both the raw-pixel representation and stored photos.
pub fn resize_patch(image: &RgbImage, size: u32) -> RgbImage {
    imageops::resize(image, size, size, FilterType::Triangle)
}

#[derive(Debug, Clone, Copy)]
pub struct RawPixelExtractor {
    size: u32,
}

impl RawPixelExtractor {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

impl FeatureExtractor for RawPixelExtractor {
    fn extract(&self, face: &FaceRegion) -> AppResult<Representation> {
        Ok(Representation::Patch(resize_patch(&face.image, self.size)))
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Patch
    }

    fn name(&self) -> &str {
        "raw-pixel"
    }
}

/// Runs a pretrained embedding model against an image file.
pub trait EmbeddingModel: Send + Sync {
    fn represent(&self, artifact: &Path) -> AppResult<Vec<f64>>;

    fn name(&self) -> &str;
}

/// Embeds a face crop by handing it to an [`EmbeddingModel`] through a
/// short-lived PNG file.
pub struct EmbeddingExtractor {
    model: Box<dyn EmbeddingModel>,
    artifact_dir: Option<PathBuf>,
}

impl EmbeddingExtractor {
    pub fn new(model: Box<dyn EmbeddingModel>, artifact_dir: Option<PathBuf>) -> Self {
        Self {
            model,
            artifact_dir,
        }
    }
}

impl FeatureExtractor for EmbeddingExtractor {
    fn extract(&self, face: &FaceRegion) -> AppResult<Representation> {
        let artifact = TransientArtifact::write(&face.image, self.artifact_dir.as_deref())?;
        let result = self
            .model
            .represent(artifact.path())
            .map_err(into_extraction)
            .and_then(validate_embedding);
        artifact.release();

        let embedding = result?;
        debug!(
            model = self.model.name(),
            dimensions = embedding.len(),
            "extracted face embedding"
        );
        Ok(Representation::Embedding(embedding))
    }

    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Embedding
    }

    fn name(&self) -> &str {
        self.model.name()
    }
}

fn into_extraction(err: AppError) -> AppError {
    match err {
        AppError::Extraction { .. } => err,
        other => AppError::Extraction {
            message: other.to_string(),
        },
    }
}

/// A uniquely named PNG on disk, removed when released or dropped.
pub struct TransientArtifact {
    path: TempPath,
}

impl TransientArtifact {
    pub fn write(image: &RgbImage, dir: Option<&Path>) -> AppResult<Self> {
        let mut builder = Builder::new();
        builder.prefix(ARTIFACT_PREFIX).suffix(".png");
        let created = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = created.map_err(|err| AppError::Extraction {
            message: format!("failed to create transient artifact: {err}"),
        })?;

        image
            .write_to(file.as_file_mut(), ImageOutputFormat::Png)
            .map_err(|err| AppError::Extraction {
                message: format!("failed to write transient artifact: {err}"),
            })?;
        file.as_file_mut()
            .flush()
            .map_err(|err| AppError::Extraction {
                message: format!("failed to write transient artifact: {err}"),
            })?;

        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file. Failures are logged and otherwise ignored.
    pub fn release(self) {
        let display = self.path.display().to_string();
        if let Err(err) = self.path.close() {
            warn!(path = %display, error = %err, "failed to remove transient artifact");
        }
    }
}

/// Rejects vectors that cannot take part in a comparison.
pub fn validate_embedding(values: Vec<f64>) -> AppResult<Vec<f64>> {
    if values.is_empty() {
        return Err(AppError::Extraction {
            message: "embedding vector is empty".into(),
        });
    }
    if values.iter().any(|value| !value.is_finite()) {
        return Err(AppError::Extraction {
            message: "embedding vector contains non-finite values".into(),
        });
    }
    let magnitude = values.iter().map(|value| value * value).sum::<f64>().sqrt();
    if magnitude <= f64::EPSILON {
        return Err(AppError::Extraction {
            message: "embedding vector has zero magnitude".into(),
        });
    }
    Ok(values)
}

#[derive(Debug, Clone)]
pub struct FaceModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

/// Configured paths win; the `DLIB_*_MODEL` environment variables fill gaps.
pub fn resolve_model_paths(
    landmark: Option<&Path>,
    encoder: Option<&Path>,
) -> AppResult<FaceModelPaths> {
    let landmark = landmark
        .map(Path::to_path_buf)
        .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
        .ok_or(AppError::MissingModel {
            kind: "landmark predictor",
            flag: "landmark_model",
            env: LANDMARK_ENV,
        })?;

    let encoder = encoder
        .map(Path::to_path_buf)
        .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
        .ok_or(AppError::MissingModel {
            kind: "face encoding network",
            flag: "encoder_model",
            env: ENCODER_ENV,
        })?;

    Ok(FaceModelPaths { landmark, encoder })
}

struct DlibNetworks {
    predictor: LandmarkPredictor,
    encoder: FaceEncoderNetwork,
}

/// dlib ResNet face encoder. The artifact is assumed to be a face crop, so the
/// whole image is used as the face rectangle.
pub struct DlibEmbeddingModel {
    networks: Mutex<DlibNetworks>,
    jitters: u32,
}

impl DlibEmbeddingModel {
    pub fn new(models: &FaceModelPaths, jitters: u32) -> AppResult<Self> {
        debug!(path = %models.landmark.display(), "loading landmark model");
        let predictor =
            LandmarkPredictor::open(&models.landmark).map_err(|message| AppError::ModelLoad {
                path: models.landmark.clone(),
                message,
            })?;
        debug!(path = %models.encoder.display(), "loading encoder model");
        let encoder =
            FaceEncoderNetwork::open(&models.encoder).map_err(|message| AppError::ModelLoad {
                path: models.encoder.clone(),
                message,
            })?;

        Ok(Self {
            networks: Mutex::new(DlibNetworks { predictor, encoder }),
            jitters,
        })
    }
}

impl EmbeddingModel for DlibEmbeddingModel {
    fn represent(&self, artifact: &Path) -> AppResult<Vec<f64>> {
        let image = image::open(artifact)
            .map_err(|err| AppError::Extraction {
                message: format!("failed to read {}: {err}", artifact.display()),
            })?
            .to_rgb8();
        let matrix = ImageMatrix::from_image(&image);
        let whole = Rectangle {
            left: 0,
            top: 0,
            right: image.width().saturating_sub(1) as i64,
            bottom: image.height().saturating_sub(1) as i64,
        };

        let networks = self.networks.lock().map_err(|_| AppError::Extraction {
            message: "embedding model lock poisoned".into(),
        })?;
        let landmarks = networks.predictor.face_landmarks(&matrix, &whole);
        let encodings = networks
            .encoder
            .get_face_encodings(&matrix, &[landmarks], self.jitters);

        encodings
            .iter()
            .next()
            .map(|encoding| encoding.as_ref().to_vec())
            .ok_or_else(|| AppError::Extraction {
                message: "encoder produced no embedding".into(),
            })
    }

    fn name(&self) -> &str {
        "dlib-resnet"
    }
}

/// Delegates to an external program invoked as `<program> <image> <model>`,
/// which prints the embedding as JSON on stdout.
pub struct CommandEmbeddingModel {
    program: PathBuf,
    model_name: String,
}

impl CommandEmbeddingModel {
    pub fn new(program: PathBuf, model_name: impl Into<String>) -> Self {
        Self {
            program,
            model_name: model_name.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunnerFace {
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RunnerOutput {
    Single(RunnerFace),
    Many(Vec<RunnerFace>),
}

/// Accepts `{"embedding": [...]}` or a list of such objects (first one wins).
pub fn parse_runner_output(stdout: &[u8]) -> AppResult<Vec<f64>> {
    let parsed: RunnerOutput =
        serde_json::from_slice(stdout).map_err(|err| AppError::Extraction {
            message: format!("unrecognised embedding runner output: {err}"),
        })?;
    match parsed {
        RunnerOutput::Single(face) => Ok(face.embedding),
        RunnerOutput::Many(faces) => faces
            .into_iter()
            .next()
            .map(|face| face.embedding)
            .ok_or_else(|| AppError::Extraction {
                message: "embedding runner returned no faces".into(),
            }),
    }
}

impl EmbeddingModel for CommandEmbeddingModel {
    fn represent(&self, artifact: &Path) -> AppResult<Vec<f64>> {
        debug!(
            program = %self.program.display(),
            model = %self.model_name,
            "invoking embedding runner"
        );
        let output = Command::new(&self.program)
            .arg(artifact)
            .arg(&self.model_name)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| AppError::Extraction {
                message: format!("failed to run {}: {err}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Extraction {
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    stderr.trim()
                ),
            });
        }

        parse_runner_output(&output.stdout)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::locator::FaceBounds;
    use image::Rgb;
    use std::sync::Arc;
    use tempfile::TempDir;

    type Seen = Arc<Mutex<Option<PathBuf>>>;

    struct RecordingModel {
        seen: Seen,
        result: Result<Vec<f64>, String>,
    }

    fn recording(result: Result<Vec<f64>, String>) -> (Box<dyn EmbeddingModel>, Seen) {
        let seen: Seen = Arc::default();
        let model = RecordingModel {
            seen: Arc::clone(&seen),
            result,
        };
        (Box::new(model), seen)
    }

    fn seen_path(seen: &Seen) -> PathBuf {
        seen.lock().unwrap().clone().unwrap()
    }

    impl EmbeddingModel for RecordingModel {
        fn represent(&self, artifact: &Path) -> AppResult<Vec<f64>> {
            assert!(artifact.exists(), "artifact must exist while the model runs");
            let decoded = image::open(artifact).unwrap().to_rgb8();
            assert_eq!(decoded.dimensions(), (30, 20));
            *self.seen.lock().unwrap() = Some(artifact.to_path_buf());
            self.result.clone().map_err(|message| AppError::ModelLoad {
                path: artifact.to_path_buf(),
                message,
            })
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn region() -> FaceRegion {
        FaceRegion {
            bounds: FaceBounds::new(0, 0, 30, 20),
            image: RgbImage::from_fn(30, 20, |x, y| Rgb([x as u8 * 8, y as u8 * 12, 90])),
        }
    }

    #[test]
    fn raw_pixel_extractor_resizes_to_canonical_size() {
        let extractor = RawPixelExtractor::new(100);
        match extractor.extract(&region()).unwrap() {
            Representation::Patch(patch) => assert_eq!(patch.dimensions(), (100, 100)),
            other => panic!("unexpected representation: {other:?}"),
        }
        assert_eq!(extractor.kind(), RepresentationKind::Patch);
    }

    #[test]
    fn artifact_is_removed_after_success() {
        let dir = TempDir::new().unwrap();
        let (model, seen) = recording(Ok(vec![0.5, 0.25, 1.0]));
        let extractor = EmbeddingExtractor::new(model, Some(dir.path().to_path_buf()));

        let representation = extractor.extract(&region()).unwrap();
        assert_eq!(representation, Representation::Embedding(vec![0.5, 0.25, 1.0]));

        let seen = seen_path(&seen);
        assert!(seen.starts_with(dir.path()));
        assert!(seen
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(ARTIFACT_PREFIX));
        assert!(!seen.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn artifact_is_removed_after_model_failure() {
        let dir = TempDir::new().unwrap();
        let (model, seen) = recording(Err("model exploded".into()));
        let extractor = EmbeddingExtractor::new(model, Some(dir.path().to_path_buf()));

        let err = extractor.extract(&region()).unwrap_err();
        match err {
            AppError::Extraction { message } => assert!(message.contains("model exploded")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!seen_path(&seen).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn degenerate_embeddings_are_extraction_errors() {
        let dir = TempDir::new().unwrap();
        let (model, _seen) = recording(Ok(vec![0.0, 0.0]));
        let extractor = EmbeddingExtractor::new(model, Some(dir.path().to_path_buf()));
        assert!(matches!(
            extractor.extract(&region()),
            Err(AppError::Extraction { .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(validate_embedding(vec![]).is_err());
        assert!(validate_embedding(vec![f64::NAN, 1.0]).is_err());
        assert!(validate_embedding(vec![0.1]).is_ok());
    }

    #[test]
    fn unwritable_artifact_dir_is_an_extraction_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = TransientArtifact::write(&region().image, Some(&missing)).unwrap_err();
        assert!(matches!(err, AppError::Extraction { .. }));
    }

    #[test]
    fn runner_output_accepts_both_shapes() {
        assert_eq!(
            parse_runner_output(br#"{"embedding": [0.1, 0.2]}"#).unwrap(),
            vec![0.1, 0.2]
        );
        assert_eq!(
            parse_runner_output(br#"[{"embedding": [1.0]}, {"embedding": [2.0]}]"#).unwrap(),
            vec![1.0]
        );
        assert!(parse_runner_output(b"[]").is_err());
        assert!(parse_runner_output(b"not json").is_err());
    }

    #[test]
    fn missing_runner_program_is_an_extraction_error() {
        let dir = TempDir::new().unwrap();
        let model = CommandEmbeddingModel::new(dir.path().join("no-such-runner"), "ArcFace");
        let err = model.represent(&dir.path().join("face.png")).unwrap_err();
        assert!(matches!(err, AppError::Extraction { .. }));
    }

    #[test]
    fn configured_model_paths_take_precedence() {
        let paths = resolve_model_paths(
            Some(Path::new("/models/landmarks.dat")),
            Some(Path::new("/models/encoder.dat")),
        )
        .unwrap();
        assert_eq!(paths.landmark, PathBuf::from("/models/landmarks.dat"));
        assert_eq!(paths.encoder, PathBuf::from("/models/encoder.dat"));
    }
}
