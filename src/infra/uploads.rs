//! Per-user image storage and retrieval helpers.

use std::error::Error as StdError;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{StreamExt, pin_mut, stream};
use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::domain::identity::Identity;

const RANDOM_NAME_LEN: usize = 12;

/// Errors that can occur while interacting with the upload storage backend.
#[derive(Debug, Error)]
pub enum UploadStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error("stored path belongs to another user")]
    Forbidden,
    #[error("file type `{extension}` is not allowed")]
    UnsupportedExtension { extension: String },
    #[error("uploaded file exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("uploaded file stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("uploaded file is empty")]
    EmptyPayload,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UploadStorageError {
    pub fn stream(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::PayloadStream {
            source: source.into(),
        }
    }
}

/// Result of storing an uploaded image.
#[derive(Debug, Clone)]
pub struct StoredImage {
    /// Site-relative URL, e.g. `/uploads/7/2024-05-01/a1b2c3d4e5f6.png`.
    pub url: String,
    pub file_name: String,
    pub size_bytes: u64,
}

/// Filesystem-backed upload storage partitioned by user and day.
#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
    url_prefix: String,
    max_file_bytes: u64,
    allowed_extensions: Vec<String>,
}

impl UploadStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(
        root: PathBuf,
        url_prefix: impl Into<String>,
        max_file_bytes: u64,
        allowed_extensions: Vec<String>,
    ) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            max_file_bytes,
            allowed_extensions,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Validate the client-supplied file name and return its normalised extension.
    pub fn check_extension(&self, original_name: &str) -> Result<String, UploadStorageError> {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();

        if self
            .allowed_extensions
            .iter()
            .any(|allowed| *allowed == extension)
        {
            Ok(extension)
        } else {
            Err(UploadStorageError::UnsupportedExtension { extension })
        }
    }

    /// Stream the payload to `<user>/<date>/<random>.<ext>`, enforcing the size limit.
    ///
    /// The partially written file is removed on any failure.
    pub async fn store_stream<S>(
        &self,
        owner: &Identity,
        original_name: &str,
        stream: S,
    ) -> Result<StoredImage, UploadStorageError>
    where
        S: futures::Stream<Item = Result<Bytes, UploadStorageError>>,
    {
        let extension = self.check_extension(original_name)?;
        let (stored_path, file_name) = self.build_stored_path(owner, &extension);
        let absolute = self.resolve(&stored_path)?;

        let file = create_target(&absolute).await?;

        match self.write_payload(file, stream).await {
            Ok(size_bytes) => Ok(StoredImage {
                url: format!("{}/{}", self.url_prefix, stored_path),
                file_name,
                size_bytes,
            }),
            Err(err) => {
                let _ = fs::remove_file(&absolute).await;
                Err(err)
            }
        }
    }

    /// Store a fully-buffered payload. Intended for tests and small assets.
    pub async fn store(
        &self,
        owner: &Identity,
        original_name: &str,
        data: Bytes,
    ) -> Result<StoredImage, UploadStorageError> {
        let stream = stream::once(async move { Ok::<_, UploadStorageError>(data) });
        self.store_stream(owner, original_name, stream).await
    }

    /// Read a stored image on behalf of `owner`. Paths outside the owner's partition are
    /// rejected before touching the filesystem.
    pub async fn read_owned(
        &self,
        owner: &Identity,
        stored_path: &str,
    ) -> Result<Bytes, UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        let first = Path::new(stored_path).components().next();
        let owner_segment = owner.upload_segment();
        if !matches!(first, Some(Component::Normal(segment)) if segment == owner_segment.as_str())
        {
            return Err(UploadStorageError::Forbidden);
        }

        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    async fn write_payload<S>(
        &self,
        mut file: fs::File,
        stream: S,
    ) -> Result<u64, UploadStorageError>
    where
        S: futures::Stream<Item = Result<Bytes, UploadStorageError>>,
    {
        let mut total_bytes: u64 = 0;

        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }

            total_bytes = total_bytes.saturating_add(chunk.len() as u64);
            if total_bytes > self.max_file_bytes {
                return Err(UploadStorageError::PayloadTooLarge {
                    limit: self.max_file_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;

        if total_bytes == 0 {
            return Err(UploadStorageError::EmptyPayload);
        }
        Ok(total_bytes)
    }

    /// Resolve the absolute filesystem path for a stored upload.
    fn resolve(&self, stored_path: &str) -> Result<PathBuf, UploadStorageError> {
        let relative = Path::new(stored_path);
        if stored_path.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(UploadStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }

    fn build_stored_path(&self, owner: &Identity, extension: &str) -> (String, String) {
        let now = OffsetDateTime::now_utc();
        let directory = now
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_else(|_| now.date().to_string());
        let identifier = Uuid::new_v4().simple().to_string();
        let file_name = format!("{}.{extension}", &identifier[..RANDOM_NAME_LEN]);
        (
            format!("{}/{directory}/{file_name}", owner.upload_segment()),
            file_name,
        )
    }
}

/// Create the target file and its parent directories.
///
/// Maintenance may prune an empty directory between the two steps, so a missing parent is
/// recreated once.
async fn create_target(absolute: &Path) -> Result<fs::File, UploadStorageError> {
    let mut retried = false;
    loop {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::File::create(absolute).await {
            Ok(file) => return Ok(file),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !retried => retried = true,
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn storage(root: &Path) -> UploadStorage {
        UploadStorage::new(
            root.join("uploads"),
            "/uploads/",
            8,
            vec!["png".to_string(), "jpg".to_string()],
        )
        .expect("storage")
    }

    #[tokio::test]
    async fn stores_under_user_and_date() {
        let dir = TempDir::new().expect("temp dir");
        let storage = storage(dir.path());
        let owner = Identity::new(7, "ada");

        let stored = storage
            .store(&owner, "Photo.PNG", Bytes::from_static(b"abc"))
            .await
            .expect("stored");

        assert!(stored.url.starts_with("/uploads/7/"));
        assert!(stored.url.ends_with(&stored.file_name));
        assert!(stored.file_name.ends_with(".png"));
        assert_eq!(stored.file_name.len(), RANDOM_NAME_LEN + ".png".len());
        assert_eq!(stored.size_bytes, 3);

        let relative = stored.url.trim_start_matches("/uploads/");
        let data = storage.read_owned(&owner, relative).await.expect("read");
        assert_eq!(&data[..], b"abc");
    }

    #[tokio::test]
    async fn rejects_disallowed_extensions() {
        let dir = TempDir::new().expect("temp dir");
        let storage = storage(dir.path());

        let err = storage
            .store(&Identity::new(1, "ada"), "script.svg", Bytes::from_static(b"<svg/>"))
            .await
            .expect_err("svg rejected");
        assert!(matches!(err, UploadStorageError::UnsupportedExtension { .. }));
    }

    #[tokio::test]
    async fn oversized_payload_leaves_nothing_behind() {
        let dir = TempDir::new().expect("temp dir");
        let storage = storage(dir.path());
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"12345")),
            Ok(Bytes::from_static(b"67890")),
        ]);

        let err = storage
            .store_stream(&Identity::new(1, "ada"), "big.png", chunks)
            .await
            .expect_err("too large");
        assert!(matches!(err, UploadStorageError::PayloadTooLarge { limit: 8 }));

        let leftovers = walkdir::WalkDir::new(storage.root())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let storage = storage(dir.path());

        let err = storage
            .store(&Identity::new(1, "ada"), "empty.png", Bytes::new())
            .await
            .expect_err("empty");
        assert!(matches!(err, UploadStorageError::EmptyPayload));
    }

    #[tokio::test]
    async fn reads_are_scoped_to_the_owner() {
        let dir = TempDir::new().expect("temp dir");
        let storage = storage(dir.path());
        let owner = Identity::new(1, "ada");
        let stored = storage
            .store(&owner, "a.png", Bytes::from_static(b"png"))
            .await
            .expect("stored");
        let relative = stored.url.trim_start_matches("/uploads/").to_string();

        let err = storage
            .read_owned(&Identity::new(2, "bob"), &relative)
            .await
            .expect_err("foreign read");
        assert!(matches!(err, UploadStorageError::Forbidden));

        let err = storage
            .read_owned(&owner, "1/../2/secret.png")
            .await
            .expect_err("traversal");
        assert!(matches!(err, UploadStorageError::InvalidPath));
    }

    #[tokio::test]
    async fn target_creation_recreates_pruned_parents() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("uploads/1/2024-06-01/a.png");

        let file = create_target(&target).await.expect("created");
        drop(file);
        std::fs::remove_file(&target).expect("remove file");
        std::fs::remove_dir(target.parent().expect("parent")).expect("prune dir");

        create_target(&target).await.expect("recreated");
        assert!(target.is_file());
    }
}
