//! Artifact repository: a content-addressed store for harvested documents,
//! backed by either the local filesystem or an S3 bucket. Paths are
//! `/`-separated and identical across both backends; a run binds to exactly
//! one backend at startup.

mod layout;
mod local;
mod s3;

pub use layout::{entry_prefix, EntryPaths, ThumbSize};
pub use local::LocalRepository;
pub use s3::S3Repository;

use bytes::Bytes;
use models::StorageBackend;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o failure for repository path {path:?}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("s3 {operation} failed for key {key:?}")]
    S3 {
        operation: &'static str,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// The two repository backends behind one narrow surface.
#[derive(Clone)]
pub enum Repository {
    Local(LocalRepository),
    S3(S3Repository),
}

impl Repository {
    /// Open the backend selected by config. S3 credentials fall back to the
    /// ambient AWS environment when not set explicitly.
    pub async fn open(backend: &StorageBackend, data_path: &std::path::Path) -> Result<Self, Error> {
        match backend {
            StorageBackend::Local => Ok(Repository::Local(LocalRepository::open(data_path)?)),
            StorageBackend::S3 {
                bucket,
                region,
                prefix,
                access_key,
                secret_key,
            } => Ok(Repository::S3(
                S3Repository::open(
                    bucket,
                    region,
                    prefix.as_deref(),
                    access_key.as_deref(),
                    secret_key.as_deref(),
                )
                .await,
            )),
        }
    }

    pub async fn put(&self, path: &str, bytes: Bytes) -> Result<(), Error> {
        match self {
            Repository::Local(local) => local.put(path, bytes).await,
            Repository::S3(s3) => s3.put(path, bytes).await,
        }
    }

    pub async fn has(&self, path: &str) -> Result<bool, Error> {
        match self {
            Repository::Local(local) => local.has(path).await,
            Repository::S3(s3) => s3.has(path).await,
        }
    }

    pub async fn get(&self, path: &str) -> Result<Option<Bytes>, Error> {
        match self {
            Repository::Local(local) => local.get(path).await,
            Repository::S3(s3) => s3.get(path).await,
        }
    }

    /// All paths below `prefix`, in unspecified order.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        match self {
            Repository::Local(local) => local.list_prefix(prefix).await,
            Repository::S3(s3) => s3.list_prefix(prefix).await,
        }
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), Error> {
        match self {
            Repository::Local(local) => local.delete_prefix(prefix).await,
            Repository::S3(s3) => s3.delete_prefix(prefix).await,
        }
    }
}
