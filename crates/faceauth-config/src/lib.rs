use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/faceauth/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/faceauth/config.toml";
pub const DEFAULT_SCALE_FACTOR: f64 = 1.1;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 4;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 30;
pub const DEFAULT_CROP_SIZE: u32 = 100;
pub const DEFAULT_JITTERS: u32 = 1;
pub const DEFAULT_PIXEL_ERROR_THRESHOLD: f64 = 3000.0;
pub const DEFAULT_COSINE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MEAN_ABS_THRESHOLD: f64 = 0.975;
pub const DEFAULT_EMBEDDING_MODEL_NAME: &str = "ArcFace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorKind {
    #[default]
    Cascade,
    Dlib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionStrategy {
    #[default]
    RawPixel,
    Embedding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingBackendKind {
    #[default]
    Dlib,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingMetric {
    #[default]
    Cosine,
    MeanAbsDiff,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub locator: Option<LocatorKind>,
    pub cascade_model: Option<PathBuf>,
    pub scale_factor: Option<f64>,
    pub min_neighbors: Option<u32>,
    pub min_face_size: Option<u32>,
    pub max_face_size: Option<u32>,
    pub strategy: Option<ExtractionStrategy>,
    pub embedding_backend: Option<EmbeddingBackendKind>,
    pub embedding_metric: Option<EmbeddingMetric>,
    pub embedding_command: Option<PathBuf>,
    pub embedding_model_name: Option<String>,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub jitters: Option<u32>,
    pub crop_size: Option<u32>,
    pub pixel_error_threshold: Option<f64>,
    pub cosine_threshold: Option<f64>,
    pub mean_abs_threshold: Option<f64>,
    pub data_dir: Option<PathBuf>,
    pub record_store_dir: Option<PathBuf>,
    pub blob_store_dir: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub record_key: Option<String>,
}

/// Sensitivity knobs handed to the face locator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionSettings {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    pub min_face_size: u32,
    pub max_face_size: Option<u32>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            max_face_size: None,
        }
    }
}

/// Accept/reject thresholds, one per comparison formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSettings {
    pub pixel_error: f64,
    pub cosine: f64,
    pub mean_abs: f64,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            pixel_error: DEFAULT_PIXEL_ERROR_THRESHOLD,
            cosine: DEFAULT_COSINE_THRESHOLD,
            mean_abs: DEFAULT_MEAN_ABS_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub locator: LocatorKind,
    pub cascade_model: Option<PathBuf>,
    pub detection: DetectionSettings,
    pub strategy: ExtractionStrategy,
    pub embedding_backend: EmbeddingBackendKind,
    pub embedding_metric: EmbeddingMetric,
    pub embedding_command: Option<PathBuf>,
    pub embedding_model_name: String,
    pub landmark_model: Option<PathBuf>,
    pub encoder_model: Option<PathBuf>,
    pub jitters: u32,
    pub crop_size: u32,
    pub thresholds: ThresholdSettings,
    pub data_dir: Option<PathBuf>,
    pub record_store_dir: Option<PathBuf>,
    pub blob_store_dir: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub record_key: Option<String>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        // A scale step of 1.0 or less would never terminate the window sweep.
        let scale_factor = raw
            .scale_factor
            .filter(|value| value.is_finite() && *value > 1.0)
            .unwrap_or(DEFAULT_SCALE_FACTOR);

        Self {
            locator: raw.locator.unwrap_or_default(),
            cascade_model: raw.cascade_model,
            detection: DetectionSettings {
                scale_factor,
                min_neighbors: raw.min_neighbors.unwrap_or(DEFAULT_MIN_NEIGHBORS),
                min_face_size: raw.min_face_size.unwrap_or(DEFAULT_MIN_FACE_SIZE),
                max_face_size: raw.max_face_size,
            },
            strategy: raw.strategy.unwrap_or_default(),
            embedding_backend: raw.embedding_backend.unwrap_or_default(),
            embedding_metric: raw.embedding_metric.unwrap_or_default(),
            embedding_command: raw.embedding_command,
            embedding_model_name: raw
                .embedding_model_name
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL_NAME.to_string()),
            landmark_model: raw.landmark_model,
            encoder_model: raw.encoder_model,
            jitters: raw.jitters.unwrap_or(DEFAULT_JITTERS),
            crop_size: raw.crop_size.unwrap_or(DEFAULT_CROP_SIZE).max(1),
            thresholds: ThresholdSettings {
                pixel_error: raw
                    .pixel_error_threshold
                    .unwrap_or(DEFAULT_PIXEL_ERROR_THRESHOLD),
                cosine: raw.cosine_threshold.unwrap_or(DEFAULT_COSINE_THRESHOLD),
                mean_abs: raw.mean_abs_threshold.unwrap_or(DEFAULT_MEAN_ABS_THRESHOLD),
            },
            data_dir: raw.data_dir,
            record_store_dir: raw.record_store_dir,
            blob_store_dir: raw.blob_store_dir,
            artifact_dir: raw.artifact_dir,
            record_key: raw.record_key,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub fn default_config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_config_paths())
}

/// Loads exactly `path`; unlike discovery, a missing file is an error.
pub fn load_explicit(path: &Path) -> Result<ResolvedConfigWithSource, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_config(path, &contents)?;
    Ok(ResolvedConfigWithSource {
        resolved: ResolvedConfig::from_raw(parsed),
        source: Some(path.to_path_buf()),
    })
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed = parse_config(path, &contents)?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::from_raw(entry.contents),
            source: Some(entry.source),
        }),
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}

fn parse_config(path: &Path, contents: &str) -> Result<ConfigFile, ConfigError> {
    toml::from_str::<ConfigFile>(contents).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
