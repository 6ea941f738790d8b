use std::env;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{AppError, AppResult};

const DEFAULT_DATA_DIR: &str = "/var/lib/faceauth";
const DATA_DIR_ENV: &str = "FACEAUTH_DATA_DIR";
const RECORDS_SUBDIR: &str = "records";
const PHOTOS_SUBDIR: &str = "photos";
const STORE_VERSION: u32 = 1;
const STORE_ALGORITHM: &str = "AES-256-GCM";
const STORE_NONCE_LEN: usize = 12;
const RECORD_KEY_LEN: usize = 32;

/// One registered identity. Written once at enrollment, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrollmentRecord {
    pub id: String,
    pub identity: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub reference_photo: String,
    /// Absent for records enrolled under the raw-pixel strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_embedding: Option<Vec<f64>>,
    pub created_at: String,
}

impl EnrollmentRecord {
    /// First/last name split on the first space.
    pub fn split_name(&self) -> (String, String) {
        split_display_name(&self.display_name)
    }
}

pub fn split_display_name(display_name: &str) -> (String, String) {
    match display_name.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.to_string()),
        None => (display_name.to_string(), String::new()),
    }
}

pub trait RecordStore: Send + Sync {
    fn find_by_identity(&self, identity: &str) -> AppResult<Option<EnrollmentRecord>>;

    /// Atomically creates the record, failing with `DuplicateIdentity` when
    /// one already exists for the identity.
    fn insert_if_absent(&self, record: &EnrollmentRecord) -> AppResult<()>;
}

pub trait BlobStore: Send + Sync {
    fn save(&self, bytes: &[u8], name: &str) -> AppResult<String>;

    fn load(&self, handle: &str) -> AppResult<Vec<u8>>;

    fn remove(&self, handle: &str) -> AppResult<()>;
}

pub trait StoreDirResolver {
    fn data_dir(&self, configured: Option<&Path>) -> PathBuf;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvStoreDirResolver;

impl StoreDirResolver for EnvStoreDirResolver {
    fn data_dir(&self, configured: Option<&Path>) -> PathBuf {
        if let Some(dir) = configured {
            dir.to_path_buf()
        } else if let Ok(env_value) = env::var(DATA_DIR_ENV) {
            PathBuf::from(env_value)
        } else {
            PathBuf::from(DEFAULT_DATA_DIR)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub records: PathBuf,
    pub photos: PathBuf,
}

/// Explicit directories win; otherwise both stores live under the data dir.
pub fn resolve_store_layout<R: StoreDirResolver>(
    resolver: &R,
    data_dir: Option<&Path>,
    records: Option<&Path>,
    photos: Option<&Path>,
) -> StoreLayout {
    let base = resolver.data_dir(data_dir);
    StoreLayout {
        records: records
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base.join(RECORDS_SUBDIR)),
        photos: photos
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base.join(PHOTOS_SUBDIR)),
    }
}

/// Decodes a base64 AES-256 key from configuration.
pub fn decode_record_key(encoded: &str) -> AppResult<[u8; RECORD_KEY_LEN]> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| AppError::InvalidConfig(format!("record_key is not base64: {err}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        AppError::InvalidConfig(format!(
            "record_key must decode to {RECORD_KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// One JSON document per identity, optionally sealed with AES-256-GCM.
#[derive(Debug, Clone)]
pub struct FilesystemRecordStore {
    dir: PathBuf,
    key: Option<[u8; RECORD_KEY_LEN]>,
}

impl FilesystemRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: [u8; RECORD_KEY_LEN]) -> Self {
        self.key = Some(key);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names are a fixed-length digest of the identity so lookups need
    /// no index and any valid identity fits within NAME_MAX.
    pub fn record_path(&self, identity: &str) -> PathBuf {
        let digest = Sha256::digest(identity.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    fn serialize(&self, record: &EnrollmentRecord) -> AppResult<Vec<u8>> {
        match &self.key {
            Some(key) => seal_record(record, key),
            None => serde_json::to_vec_pretty(record).map_err(AppError::from),
        }
    }

    fn deserialize(&self, path: &Path, data: &[u8]) -> AppResult<EnrollmentRecord> {
        if let Ok(envelope) = serde_json::from_slice::<EncryptedRecord>(data) {
            return open_record(path, envelope, self.key.as_ref());
        }

        serde_json::from_slice(data).map_err(|err| AppError::InvalidRecordFile {
            path: path.to_path_buf(),
            message: format!("invalid record contents: {err}"),
        })
    }
}

impl RecordStore for FilesystemRecordStore {
    fn find_by_identity(&self, identity: &str) -> AppResult<Option<EnrollmentRecord>> {
        let path = self.record_path(identity);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AppError::StoreRead { path, source }),
        };

        let record = self.deserialize(&path, &data)?;
        if record.identity != identity {
            return Err(AppError::InvalidRecordFile {
                path,
                message: format!("holds identity '{}'", record.identity),
            });
        }
        Ok(Some(record))
    }

    fn insert_if_absent(&self, record: &EnrollmentRecord) -> AppResult<()> {
        let path = self.record_path(&record.identity);
        let serialized = self.serialize(record)?;

        match write_new_file(&self.dir, &path, &serialized) {
            Ok(()) => {
                debug!(identity = %record.identity, path = %path.display(), "record created");
                Ok(())
            }
            Err(WriteNewError::Exists) => Err(AppError::DuplicateIdentity {
                identity: record.identity.clone(),
            }),
            Err(WriteNewError::Io { path, source }) => Err(AppError::StoreWrite { path, source }),
        }
    }
}

/// Flat directory of reference photos addressed by file name.
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    dir: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, handle: &str) -> AppResult<PathBuf> {
        validate_handle(handle)?;
        Ok(self.dir.join(handle))
    }
}

/// Handles are plain file names: no separators, no leading dot.
pub fn validate_handle(handle: &str) -> AppResult<()> {
    let valid = !handle.is_empty()
        && !handle.starts_with('.')
        && handle
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidHandle {
            handle: handle.to_string(),
        })
    }
}

impl BlobStore for FilesystemBlobStore {
    fn save(&self, bytes: &[u8], name: &str) -> AppResult<String> {
        let path = self.path_for(name)?;
        match write_new_file(&self.dir, &path, bytes) {
            Ok(()) => Ok(name.to_string()),
            Err(WriteNewError::Exists) => Err(AppError::StoreWrite {
                path,
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            }),
            Err(WriteNewError::Io { path, source }) => Err(AppError::StoreWrite { path, source }),
        }
    }

    fn load(&self, handle: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(handle)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(AppError::StoredArtifactMissing {
                    handle: handle.to_string(),
                })
            }
            Err(source) => Err(AppError::StoreRead { path, source }),
        }
    }

    fn remove(&self, handle: &str) -> AppResult<()> {
        let path = self.path_for(handle)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AppError::StoreWrite { path, source }),
        }
    }
}

enum WriteNewError {
    Exists,
    Io { path: PathBuf, source: io::Error },
}

fn io_failure(path: &Path) -> impl FnOnce(io::Error) -> WriteNewError + '_ {
    move |source| WriteNewError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes through a sibling temp file and links it into place only if `path`
/// does not exist yet.
fn write_new_file(dir: &Path, path: &Path, contents: &[u8]) -> Result<(), WriteNewError> {
    fs::create_dir_all(dir).map_err(io_failure(dir))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_failure(path))?;

    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            writer.write_all(contents).map_err(io_failure(path))?;
            writer.flush().map_err(io_failure(path))?;
        }
        file.sync_all().map_err(io_failure(path))?;
    }

    let file = tmp.persist_noclobber(path).map_err(|err| {
        if err.error.kind() == io::ErrorKind::AlreadyExists {
            WriteNewError::Exists
        } else {
            WriteNewError::Io {
                path: path.to_path_buf(),
                source: err.error,
            }
        }
    })?;
    restrict_permissions(&file).map_err(io_failure(path))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(0o600);
    file.set_permissions(perms)
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File) -> io::Result<()> {
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct EncryptedRecord {
    version: u32,
    algorithm: String,
    nonce: String,
    ciphertext: String,
}

fn seal_record(record: &EnrollmentRecord, key: &[u8]) -> AppResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(record)?;
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let mut nonce = [0u8; STORE_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to encrypt record: {err}")))?;
    let envelope = EncryptedRecord {
        version: STORE_VERSION,
        algorithm: STORE_ALGORITHM.to_string(),
        nonce: general_purpose::STANDARD.encode(nonce),
        ciphertext: general_purpose::STANDARD.encode(ciphertext),
    };
    serde_json::to_vec_pretty(&envelope).map_err(AppError::from)
}

fn open_record(
    path: &Path,
    envelope: EncryptedRecord,
    key: Option<&[u8; RECORD_KEY_LEN]>,
) -> AppResult<EnrollmentRecord> {
    if envelope.algorithm != STORE_ALGORITHM {
        return Err(AppError::Encryption(format!(
            "unsupported record algorithm '{}'",
            envelope.algorithm
        )));
    }
    if envelope.version != STORE_VERSION {
        return Err(AppError::Encryption(format!(
            "unsupported record version {}",
            envelope.version
        )));
    }

    let key = key.ok_or_else(|| AppError::EncryptedRecordRequiresKey {
        path: path.to_path_buf(),
    })?;

    let nonce = general_purpose::STANDARD
        .decode(envelope.nonce.trim())
        .map_err(|err| AppError::Encryption(format!("invalid nonce encoding: {err}")))?;
    if nonce.len() != STORE_NONCE_LEN {
        return Err(AppError::Encryption(format!(
            "expected nonce of {} bytes but found {}",
            STORE_NONCE_LEN,
            nonce.len()
        )));
    }
    let ciphertext = general_purpose::STANDARD
        .decode(envelope.ciphertext.trim())
        .map_err(|err| AppError::Encryption(format!("invalid ciphertext encoding: {err}")))?;

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to decrypt record: {err}")))?;

    serde_json::from_slice(&plaintext).map_err(|err| AppError::InvalidRecordFile {
        path: path.to_path_buf(),
        message: format!("invalid decrypted record contents: {err}"),
    })
}
