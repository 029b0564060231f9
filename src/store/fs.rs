use std::path::{Component, Path, PathBuf};

use super::{ObjectStore, StoreError};

/// Object store over a local directory.
///
/// `file:///abs/path` addresses an absolute path. Any other `scheme://rest`
/// URI (e.g. `s3://bucket/key`) and plain relative keys are resolved under
/// the root, so a mirrored bucket can be served from disk.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf, StoreError> {
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        let key = match uri.split_once("://") {
            Some((_, rest)) => rest,
            None => uri,
        };
        let relative = Path::new(key.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::InvalidUri(uri.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for FsObjectStore {
    fn get_bytes(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(uri)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(uri.to_string()),
            _ => StoreError::Io {
                uri: uri.to_string(),
                source: e,
            },
        })
    }

    fn put_bytes(&self, uri: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(uri)?;
        let io_err = |source: std::io::Error| StoreError::Io {
            uri: uri.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&path, bytes).map_err(io_err)
    }
}
