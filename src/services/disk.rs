use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::middleware::validation::contains_path_traversal;

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Replace an existing file. Content-addressed uploads leave this off.
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Public URL the file is served under.
    pub path: String,
    /// False when the file already existed and was kept.
    pub written: bool,
}

#[async_trait]
pub trait Disk: Send + Sync {
    async fn output_file(&self, bucket: &str, path: &str, data: &[u8], opts: OutputOptions) -> AppResult<StoredFile>;
    /// Returns whether a file was removed. A missing file is not an error.
    async fn delete(&self, bucket: &str, path: &str) -> AppResult<bool>;
    async fn exists(&self, bucket: &str, path: &str) -> AppResult<bool>;
    async fn read_file(&self, bucket: &str, path: &str) -> AppResult<Vec<u8>>;

    fn public_url(&self, bucket: &str, path: &str) -> String;
    /// Inverse of [`Disk::public_url`]; `None` for URLs this disk does not serve.
    fn locate(&self, url: &str) -> Option<(String, String)>;
}

/// Buckets as subdirectories of a local root.
pub struct LocalDisk {
    root: PathBuf,
    public_prefix: String,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        Self { root: root.into(), public_prefix }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, bucket: &str, path: &str) -> AppResult<PathBuf> {
        let path = path.trim_start_matches('/');
        if bucket.is_empty() || bucket.contains(['/', '\\']) || contains_path_traversal(bucket) {
            return Err(AppError::InputError(format!("Invalid bucket: {}", bucket)));
        }
        if path.is_empty() || contains_path_traversal(path) || path.split('/').any(|s| s == "..") {
            return Err(AppError::InputError(format!("Invalid file path: {}", path)));
        }
        Ok(self.root.join(bucket).join(path))
    }
}

#[async_trait]
impl Disk for LocalDisk {
    async fn output_file(&self, bucket: &str, path: &str, data: &[u8], opts: OutputOptions) -> AppResult<StoredFile> {
        let target = self.resolve(bucket, path)?;
        let url = self.public_url(bucket, path);

        if !opts.overwrite && tokio::fs::try_exists(&target).await? {
            return Ok(StoredFile { path: url, written: false });
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so readers never see a partial file
        let tmp = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &target).await?;

        tracing::debug!(bucket, path, bytes = data.len(), "stored file");
        Ok(StoredFile { path: url, written: true })
    }

    async fn delete(&self, bucket: &str, path: &str) -> AppResult<bool> {
        let target = self.resolve(bucket, path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, bucket: &str, path: &str) -> AppResult<bool> {
        let target = self.resolve(bucket, path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    async fn read_file(&self, bucket: &str, path: &str) -> AppResult<Vec<u8>> {
        let target = self.resolve(bucket, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("File {}/{} not found", bucket, path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_prefix, bucket, path.trim_start_matches('/'))
    }

    fn locate(&self, url: &str) -> Option<(String, String)> {
        let rest = url.strip_prefix(&self.public_prefix)?.strip_prefix('/')?;
        let (bucket, path) = rest.split_once('/')?;
        if bucket.is_empty() || path.is_empty() {
            return None;
        }
        Some((bucket.to_string(), path.to_string()))
    }
}
