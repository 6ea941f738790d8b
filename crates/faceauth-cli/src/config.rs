use std::path::{Path, PathBuf};

use faceauth_config::{self, ResolvedConfig, ResolvedConfigWithSource};
use faceauth_core::faces::{
    decode_record_key, resolve_store_layout, EnvStoreDirResolver, FilesystemBlobStore,
    FilesystemRecordStore, StoreLayout,
};
use tracing::debug;

use crate::cli::StoreArgs;
use crate::errors::AppResult;

/// Either the file named by `--config` or the default discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSource {
    explicit: Option<PathBuf>,
}

impl ConfigSource {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }

    pub fn explicit(&self) -> Option<&Path> {
        self.explicit.as_deref()
    }

    pub fn load(&self) -> AppResult<ResolvedConfigWithSource> {
        let loaded = match self.explicit() {
            Some(path) => faceauth_config::load_explicit(path)?,
            None => faceauth_config::load_resolved_config()?,
        };
        match &loaded.source {
            Some(path) => debug!(path = %path.display(), "loaded configuration"),
            None => debug!("no configuration file found; using defaults"),
        }
        Ok(loaded)
    }
}

/// Flags beat config keys, which beat the data directory defaults.
pub fn store_layout(config: &ResolvedConfig, overrides: &StoreArgs) -> StoreLayout {
    resolve_store_layout(
        &EnvStoreDirResolver,
        config.data_dir.as_deref(),
        overrides
            .record_dir
            .as_deref()
            .or(config.record_store_dir.as_deref()),
        overrides
            .photo_dir
            .as_deref()
            .or(config.blob_store_dir.as_deref()),
    )
}

pub fn open_record_store(config: &ResolvedConfig, dir: &Path) -> AppResult<FilesystemRecordStore> {
    let store = FilesystemRecordStore::new(dir);
    match config.record_key.as_deref() {
        Some(encoded) => Ok(store.with_key(decode_record_key(encoded)?)),
        None => Ok(store),
    }
}

pub fn open_stores(
    config: &ResolvedConfig,
    overrides: &StoreArgs,
) -> AppResult<(FilesystemRecordStore, FilesystemBlobStore)> {
    let layout = store_layout(config, overrides);
    debug!(
        records = %layout.records.display(),
        photos = %layout.photos.display(),
        "using store directories"
    );
    let records = open_record_store(config, &layout.records)?;
    Ok((records, FilesystemBlobStore::new(layout.photos)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceauth_config::ConfigFile;
    use faceauth_core::errors::AppError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn flags_override_configured_dirs() {
        let config = ResolvedConfig::from_raw(ConfigFile {
            data_dir: Some(PathBuf::from("/srv/faceauth")),
            blob_store_dir: Some(PathBuf::from("/srv/photos")),
            ..ConfigFile::default()
        });
        let overrides = StoreArgs {
            record_dir: Some(PathBuf::from("/tmp/records")),
            photo_dir: None,
        };

        let layout = store_layout(&config, &overrides);
        assert_eq!(layout.records, PathBuf::from("/tmp/records"));
        assert_eq!(layout.photos, PathBuf::from("/srv/photos"));
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempdir().unwrap();
        let source = ConfigSource::new(Some(dir.path().join("absent.toml")));
        assert!(matches!(source.load(), Err(AppError::Config(_))));
    }

    #[test]
    fn explicit_config_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faceauth.toml");
        fs::write(&path, "crop_size = 64\n").unwrap();

        let loaded = ConfigSource::new(Some(path.clone())).load().unwrap();
        assert_eq!(loaded.source, Some(path));
        assert_eq!(loaded.resolved.crop_size, 64);
    }

    #[test]
    fn malformed_record_key_is_rejected() {
        let config = ResolvedConfig::from_raw(ConfigFile {
            record_key: Some("not base64!".into()),
            ..ConfigFile::default()
        });
        let err = open_record_store(&config, Path::new("/tmp/records")).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }
}
