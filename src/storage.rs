//! # Storage Abstraction Module
//!
//! Granules, figures and exports can live on the local filesystem or in an
//! S3 bucket (GPM mirrors and shared result buckets are common). This module
//! hides the difference behind [`StorageBackend`], picked from the path:
//!
//! - **S3 paths**: `s3://bucket-name/gpm/2A.GPM.DPR....HDF5`
//! - **Local paths**: anything else
//!
//! Reading a granule needs a real file because libnetcdf/HDF5 only open
//! paths, so [`materialize`] copies remote objects to a temporary file first.
//!
//! ```rust,no_run
//! use gpm_dpr::storage::{StorageBackend, StorageFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = StorageFactory::from_path("s3://my-bucket/figures/ppi.png").await?;
//!     storage.write("s3://my-bucket/figures/ppi.png", b"...").await?;
//!     Ok(())
//! }
//! ```

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use log::debug;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AWS S3 GetObject error: {0}")]
    S3GetObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>),

    #[error("AWS S3 PutObject error: {0}")]
    S3PutObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>),

    #[error("AWS S3 HeadObject error: {0}")]
    S3HeadObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>),

    #[error("AWS ByteStream error: {0}")]
    ByteStream(String),

    #[error("Invalid S3 path format: {0}")]
    InvalidS3Path(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Unified read/write interface over local files and S3 objects
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the whole object
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Writes the object, creating parent directories for local paths
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;
}

/// Local filesystem storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage;

#[async_trait::async_trait]
impl StorageBackend for LocalStorage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        fs::read(path).await.map_err(|e| classify_io(path, e))
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await.map_err(|e| classify_io(path, e))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

fn classify_io(path: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::PathNotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
        _ => StorageError::Io(e),
    }
}

/// Amazon S3 storage backend
///
/// Credentials come from the usual AWS chain (environment, profile, IAM role).
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
}

impl S3Storage {
    pub async fn new() -> StorageResult<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Ok(S3Storage {
            client: S3Client::new(&config),
        })
    }

    pub fn from_config(config: &aws_config::SdkConfig) -> Self {
        S3Storage {
            client: S3Client::new(config),
        }
    }

    /// Splits `s3://bucket/key` into `(bucket, key)`
    pub fn parse_s3_path(s3_path: &str) -> StorageResult<(String, String)> {
        let rest = s3_path.strip_prefix("s3://").ok_or_else(|| {
            StorageError::InvalidS3Path(format!("S3 path must start with 's3://': {}", s3_path))
        })?;

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(StorageError::InvalidS3Path(format!(
                "Expected 's3://bucket/key': {}",
                s3_path
            ))),
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Storage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let (bucket, key) = Self::parse_s3_path(path)?;

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                aws_sdk_s3::error::SdkError::ServiceError(service_err)
                    if service_err.err().is_no_such_key() =>
                {
                    StorageError::PathNotFound(path.to_string())
                }
                _ => StorageError::S3GetObject(e),
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ByteStream(e.to_string()))?
            .into_bytes()
            .to_vec();
        debug!("Read {} bytes from {}", data.len(), path);
        Ok(data)
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let (bucket, key) = Self::parse_s3_path(path)?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(StorageError::S3PutObject)?;
        debug!("Wrote {} bytes to {}", data.len(), path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let (bucket, key) = Self::parse_s3_path(path)?;

        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(aws_sdk_s3::error::SdkError::ServiceError(service_err))
                if service_err.err().is_not_found() =>
            {
                Ok(false)
            }
            Err(e) => Err(StorageError::S3HeadObject(e)),
        }
    }
}

/// Storage backend picked from a path
#[derive(Debug)]
pub enum Storage {
    Local(LocalStorage),
    S3(S3Storage),
}

#[async_trait::async_trait]
impl StorageBackend for Storage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        match self {
            Storage::Local(storage) => storage.read(path).await,
            Storage::S3(storage) => storage.read(path).await,
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        match self {
            Storage::Local(storage) => storage.write(path, data).await,
            Storage::S3(storage) => storage.write(path, data).await,
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self {
            Storage::Local(storage) => storage.exists(path).await,
            Storage::S3(storage) => storage.exists(path).await,
        }
    }
}

/// Creates storage backends from path patterns
pub struct StorageFactory;

impl StorageFactory {
    /// `s3://` paths get an [`S3Storage`]; everything else is local
    pub async fn from_path(path: &str) -> StorageResult<Storage> {
        if Self::is_s3_path(path) {
            Ok(Storage::S3(S3Storage::new().await?))
        } else {
            Ok(Storage::Local(LocalStorage))
        }
    }

    pub fn is_s3_path(path: &str) -> bool {
        path.starts_with("s3://")
    }
}

/// A granule available as a local file for the duration of a run.
/// Remote objects are backed by a temporary file removed on drop.
#[derive(Debug)]
pub struct LocalCopy {
    path: PathBuf,
    _temp: Option<tempfile::TempPath>,
}

impl LocalCopy {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }
}

impl From<PathBuf> for LocalCopy {
    fn from(path: PathBuf) -> Self {
        LocalCopy { path, _temp: None }
    }
}

/// Makes `path` openable by libnetcdf: local paths pass through, S3 objects
/// are downloaded into a temporary file.
pub async fn materialize(path: &str) -> StorageResult<LocalCopy> {
    if !StorageFactory::is_s3_path(path) {
        if !LocalStorage.exists(path).await? {
            return Err(StorageError::PathNotFound(path.to_string()));
        }
        return Ok(LocalCopy::from(PathBuf::from(path)));
    }

    let storage = StorageFactory::from_path(path).await?;
    let data = storage.read(path).await?;
    let suffix = Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let temp = tempfile::Builder::new()
        .prefix("gpm-granule-")
        .suffix(&suffix)
        .tempfile()?
        .into_temp_path();
    debug!("Staging {} into {:?}", path, temp);
    fs::write(&temp, data).await?;

    Ok(LocalCopy {
        path: temp.to_path_buf(),
        _temp: Some(temp),
    })
}


#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Needs AWS credentials and TEST_S3_BUCKET
    async fn test_s3_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let bucket = match std::env::var("TEST_S3_BUCKET") {
            Ok(bucket) => bucket,
            Err(_) => return Ok(()),
        };

        let path = format!("s3://{}/gpm-dpr-test/figure.png", bucket);
        let storage = StorageFactory::from_path(&path).await?;
        storage.write(&path, b"figure bytes").await?;
        assert!(storage.exists(&path).await?);

        let copy = materialize(&path).await?;
        assert!(copy.is_temporary());
        assert_eq!(std::fs::read(copy.path())?, b"figure bytes");
        Ok(())
    }
}
