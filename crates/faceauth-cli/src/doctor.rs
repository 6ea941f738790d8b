use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use faceauth_config::{
    self, ConfigError, EmbeddingBackendKind, ExtractionStrategy, LocatorKind, ResolvedConfig,
    ResolvedConfigWithSource,
};
use faceauth_core::faces::{
    decode_record_key, resolve_store_layout, CascadeModel, EnvStoreDirResolver,
};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::errors::AppResult;

const CHECK_CONFIG: &str = "config";
const CHECK_CASCADE_MODEL: &str = "cascade_model";
const CHECK_LANDMARK_MODEL: &str = "landmark_model";
const CHECK_ENCODER_MODEL: &str = "encoder_model";
const CHECK_EMBEDDING_COMMAND: &str = "embedding_command";
const CHECK_RECORD_DIR: &str = "record_store_dir";
const CHECK_PHOTO_DIR: &str = "photo_store_dir";
const CHECK_RECORD_KEY: &str = "record_key";

const CASCADE_ENV: &str = "FACEAUTH_CASCADE_MODEL";
const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, path: Option<&Path>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            path: path.map(|p| p.display().to_string()),
        }
    }
}

/// `ok` is false only when a check failed; warnings are advisory.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorOutcome {
    pub ok: bool,
    pub checks: Vec<DoctorCheck>,
}

pub struct DoctorContext {
    pub config_paths: Vec<PathBuf>,
    /// Set by `--config`; replaces discovery.
    pub explicit_config: Option<PathBuf>,
    pub lookup_env: fn(&str) -> Option<String>,
}

impl DoctorContext {
    pub fn with_config(explicit_config: Option<PathBuf>) -> Self {
        Self {
            explicit_config,
            ..Self::default()
        }
    }
}

impl Default for DoctorContext {
    fn default() -> Self {
        Self {
            config_paths: faceauth_config::default_config_paths(),
            explicit_config: None,
            lookup_env: |key| env::var(key).ok(),
        }
    }
}

pub fn run_doctor(explicit_config: Option<&Path>) -> AppResult<DoctorOutcome> {
    let ctx = DoctorContext::with_config(explicit_config.map(Path::to_path_buf));
    run_doctor_with(&ctx)
}

pub fn run_doctor_with(ctx: &DoctorContext) -> AppResult<DoctorOutcome> {
    let (config_check, loaded) = check_config(ctx);
    let config = &loaded.resolved;

    let mut checks = vec![config_check];
    checks.push(check_locator(config, ctx));
    checks.extend(check_embedding(config, ctx));

    let layout = resolve_store_layout(
        &EnvStoreDirResolver,
        config.data_dir.as_deref(),
        config.record_store_dir.as_deref(),
        config.blob_store_dir.as_deref(),
    );
    checks.push(check_dir(CHECK_RECORD_DIR, "Record store", &layout.records));
    checks.push(check_dir(CHECK_PHOTO_DIR, "Photo store", &layout.photos));
    checks.push(check_record_key(config));

    let ok = checks.iter().all(|c| c.status != CheckStatus::Fail);

    Ok(DoctorOutcome { ok, checks })
}

fn check_config(ctx: &DoctorContext) -> (DoctorCheck, ResolvedConfigWithSource) {
    let fallback = || ResolvedConfigWithSource {
        resolved: ResolvedConfig::default(),
        source: None,
    };

    if let Some(path) = &ctx.explicit_config {
        return match faceauth_config::load_explicit(path) {
            Ok(loaded) => (
                DoctorCheck::new(
                    CHECK_CONFIG,
                    CheckStatus::Pass,
                    format!("Loaded config from {}", path.display()),
                    Some(path.as_path()),
                ),
                loaded,
            ),
            Err(err) => (config_failure(&err), fallback()),
        };
    }

    let existing = ctx.config_paths.iter().filter(|p| p.exists()).count();
    match faceauth_config::load_from_paths(&ctx.config_paths) {
        Ok(Some(entry)) => {
            let check = if existing > 1 {
                DoctorCheck::new(
                    CHECK_CONFIG,
                    CheckStatus::Warn,
                    format!(
                        "Several config files exist; using {}",
                        entry.source.display()
                    ),
                    Some(entry.source.as_path()),
                )
            } else {
                DoctorCheck::new(
                    CHECK_CONFIG,
                    CheckStatus::Pass,
                    format!("Loaded config from {}", entry.source.display()),
                    Some(entry.source.as_path()),
                )
            };
            let loaded = ResolvedConfigWithSource {
                resolved: ResolvedConfig::from_raw(entry.contents),
                source: Some(entry.source),
            };
            (check, loaded)
        }
        Ok(None) => (
            DoctorCheck::new(
                CHECK_CONFIG,
                CheckStatus::Warn,
                format!(
                    "No config file found; using defaults (tried {})",
                    display_paths(&ctx.config_paths)
                ),
                None,
            ),
            fallback(),
        ),
        Err(err) => (config_failure(&err), fallback()),
    }
}

fn config_failure(err: &ConfigError) -> DoctorCheck {
    let path = match err {
        ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
    };
    DoctorCheck::new(
        CHECK_CONFIG,
        CheckStatus::Fail,
        err.to_string(),
        Some(path.as_path()),
    )
}

fn check_locator(config: &ResolvedConfig, ctx: &DoctorContext) -> DoctorCheck {
    match config.locator {
        LocatorKind::Dlib => DoctorCheck::new(
            CHECK_CASCADE_MODEL,
            CheckStatus::Pass,
            "dlib HOG locator selected; no cascade model needed",
            None,
        ),
        LocatorKind::Cascade => {
            let Some(path) = configured_or_env(config.cascade_model.as_deref(), CASCADE_ENV, ctx)
            else {
                return DoctorCheck::new(
                    CHECK_CASCADE_MODEL,
                    CheckStatus::Fail,
                    format!("Cascade model not configured; set cascade_model or ${CASCADE_ENV}"),
                    None,
                );
            };
            match CascadeModel::load(&path) {
                Ok(model) => DoctorCheck::new(
                    CHECK_CASCADE_MODEL,
                    CheckStatus::Pass,
                    format!(
                        "Loaded cascade model ({} stages, {}x{} window)",
                        model.stages.len(),
                        model.window_width,
                        model.window_height
                    ),
                    Some(path.as_path()),
                ),
                Err(err) => DoctorCheck::new(
                    CHECK_CASCADE_MODEL,
                    CheckStatus::Fail,
                    err.human_message(),
                    Some(path.as_path()),
                ),
            }
        }
    }
}

fn check_embedding(config: &ResolvedConfig, ctx: &DoctorContext) -> Vec<DoctorCheck> {
    if config.strategy == ExtractionStrategy::RawPixel {
        return Vec::new();
    }
    match config.embedding_backend {
        EmbeddingBackendKind::Dlib => vec![
            check_model(
                CHECK_LANDMARK_MODEL,
                configured_or_env(config.landmark_model.as_deref(), LANDMARK_ENV, ctx),
                LANDMARK_ENV,
            ),
            check_model(
                CHECK_ENCODER_MODEL,
                configured_or_env(config.encoder_model.as_deref(), ENCODER_ENV, ctx),
                ENCODER_ENV,
            ),
        ],
        EmbeddingBackendKind::Command => {
            vec![check_command(config.embedding_command.as_deref())]
        }
    }
}

fn configured_or_env(configured: Option<&Path>, key: &str, ctx: &DoctorContext) -> Option<PathBuf> {
    configured
        .map(Path::to_path_buf)
        .or_else(|| (ctx.lookup_env)(key).map(PathBuf::from))
}

fn check_model(name: &str, path: Option<PathBuf>, env_key: &str) -> DoctorCheck {
    match path {
        None => DoctorCheck::new(
            name,
            CheckStatus::Fail,
            format!("Model path not configured; set {name} or ${env_key}"),
            None,
        ),
        Some(p) => match fs::File::open(&p) {
            Ok(_) => DoctorCheck::new(
                name,
                CheckStatus::Pass,
                format!("Found model at {}", p.display()),
                Some(p.as_path()),
            ),
            Err(err) => DoctorCheck::new(
                name,
                CheckStatus::Fail,
                format!("Cannot read model {}: {}", p.display(), err),
                Some(p.as_path()),
            ),
        },
    }
}

fn check_command(program: Option<&Path>) -> DoctorCheck {
    let Some(program) = program else {
        return DoctorCheck::new(
            CHECK_EMBEDDING_COMMAND,
            CheckStatus::Fail,
            "embedding_backend = \"command\" requires embedding_command",
            None,
        );
    };
    match fs::metadata(program) {
        Ok(meta) if meta.is_file() && meta.permissions().mode() & 0o111 != 0 => DoctorCheck::new(
            CHECK_EMBEDDING_COMMAND,
            CheckStatus::Pass,
            format!("Embedding runner {} is executable", program.display()),
            Some(program),
        ),
        Ok(_) => DoctorCheck::new(
            CHECK_EMBEDDING_COMMAND,
            CheckStatus::Fail,
            format!("Embedding runner {} is not an executable file", program.display()),
            Some(program),
        ),
        Err(err) => DoctorCheck::new(
            CHECK_EMBEDDING_COMMAND,
            CheckStatus::Fail,
            format!("Cannot stat embedding runner {}: {}", program.display(), err),
            Some(program),
        ),
    }
}

fn check_dir(name: &str, label: &str, path: &Path) -> DoctorCheck {
    match (path.exists(), path.is_dir()) {
        (false, _) => DoctorCheck::new(
            name,
            CheckStatus::Warn,
            format!(
                "{label} {} missing; it is created on first enrollment",
                path.display()
            ),
            Some(path),
        ),
        (true, false) => DoctorCheck::new(
            name,
            CheckStatus::Fail,
            format!("{label} {} is not a directory", path.display()),
            Some(path),
        ),
        (true, true) => {
            let readable = fs::read_dir(path).is_ok();
            let writeable = is_writeable_dir(path);
            if readable && writeable {
                DoctorCheck::new(
                    name,
                    CheckStatus::Pass,
                    format!("{label} {} is readable/writable", path.display()),
                    Some(path),
                )
            } else {
                let missing = match (readable, writeable) {
                    (false, false) => "read/write",
                    (false, true) => "read",
                    _ => "write",
                };
                DoctorCheck::new(
                    name,
                    CheckStatus::Fail,
                    format!("{label} {} lacks {missing} permissions", path.display()),
                    Some(path),
                )
            }
        }
    }
}

fn check_record_key(config: &ResolvedConfig) -> DoctorCheck {
    match config.record_key.as_deref() {
        None => DoctorCheck::new(
            CHECK_RECORD_KEY,
            CheckStatus::Warn,
            "record_key not set; enrollment records are stored unencrypted",
            None,
        ),
        Some(encoded) => match decode_record_key(encoded) {
            Ok(_) => DoctorCheck::new(
                CHECK_RECORD_KEY,
                CheckStatus::Pass,
                "Enrollment records are sealed with AES-256-GCM",
                None,
            ),
            Err(err) => DoctorCheck::new(
                CHECK_RECORD_KEY,
                CheckStatus::Fail,
                err.human_message(),
                None,
            ),
        },
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Probes by creating and dropping a temp file in `path`.
fn is_writeable_dir(path: &Path) -> bool {
    NamedTempFile::new_in(path).is_ok()
}
