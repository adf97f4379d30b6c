//! Avatar pipeline: URL to stable blob key to stored object.
//!
//! The key derives from the numeric user id in the avatar URL path, with the
//! `v` query parameter appended when present (`avatars/{id}-{v}`). Keys are
//! never cleared from the user row; when an avatar version bumps, the old
//! blob is simply orphaned.

use crate::blobstore::BlobStore;
use crate::download::{DownloadError, Downloader};
use crate::store::{StoreError, UserStore};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const MAX_AVATAR_BYTES: u64 = 10 * 1024 * 1024;

static AVATAR_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(avatars\.)?githubusercontent\.com$").expect("static regex"));
static AVATAR_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/u/(\d+)$").expect("static regex"));

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("invalid avatar url: {0}")]
    InvalidUrl(String),

    #[error("avatar exceeds {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error("user {0} not found")]
    RecordNotFound(i64),

    #[error(transparent)]
    Download(DownloadError),

    #[error(transparent)]
    Storage(#[from] crate::blobstore::BlobError),

    #[error(transparent)]
    Store(StoreError),

    #[error("avatar spool error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DownloadError> for AvatarError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::FileSizeExceeded { limit } => AvatarError::FileTooLarge { limit },
            other => AvatarError::Download(other),
        }
    }
}

/// Derive the blob key for an avatar URL. Total on valid inputs and
/// deterministic: the same URL always yields the same key.
pub fn avatar_key(raw_url: &str) -> Result<String, AvatarError> {
    let url = Url::parse(raw_url)
        .map_err(|e| AvatarError::InvalidUrl(format!("{raw_url}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AvatarError::InvalidUrl(format!(
            "{raw_url}: unsupported scheme {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| AvatarError::InvalidUrl(format!("{raw_url}: missing host")))?;
    if !AVATAR_HOST.is_match(host) {
        return Err(AvatarError::InvalidUrl(format!(
            "{raw_url}: unexpected host {host}"
        )));
    }

    let caps = AVATAR_PATH
        .captures(url.path())
        .ok_or_else(|| AvatarError::InvalidUrl(format!("{raw_url}: unexpected path")))?;
    let user_id = &caps[1];

    let version = url
        .query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty());

    Ok(match version {
        Some(version) => format!("avatars/{user_id}-{version}"),
        None => format!("avatars/{user_id}"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarOutcome {
    pub key: String,
    pub uploaded: bool,
    pub skipped: bool,
}

pub struct AvatarPipeline {
    downloader: Arc<dyn Downloader>,
    blobs: Arc<dyn BlobStore>,
    users: Arc<dyn UserStore>,
    max_bytes: u64,
}

impl fmt::Debug for AvatarPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarPipeline")
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

impl AvatarPipeline {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        blobs: Arc<dyn BlobStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            downloader,
            blobs,
            users,
            max_bytes: MAX_AVATAR_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Derive the key, store the blob unless it already exists, and record
    /// the key on the user row. The spool file is dropped on every path.
    pub async fn process(&self, user_id: i64, url: &str) -> Result<AvatarOutcome, AvatarError> {
        let key = avatar_key(url)?;

        if self.blobs.exists(&key).await? {
            debug!(user_id, key, "avatar blob already stored, skipping download");
            self.record_key(user_id, &key).await?;
            return Ok(AvatarOutcome {
                key,
                uploaded: false,
                skipped: true,
            });
        }

        let head = self.downloader.head(url).await.map_err(AvatarError::from)?;
        if let Some(advertised) = head.content_length
            && advertised > self.max_bytes
        {
            return Err(AvatarError::FileTooLarge {
                limit: self.max_bytes,
            });
        }

        // NamedTempFile unlinks on drop, covering every exit below.
        let spool = tempfile::NamedTempFile::new()?;
        let mut file = tokio::fs::File::create(spool.path()).await?;
        let outcome = self
            .downloader
            .download(url, &mut file, Some(self.max_bytes))
            .await
            .map_err(AvatarError::from)?;
        file.sync_all().await?;
        drop(file);

        let bytes = tokio::fs::read(spool.path()).await?;
        self.blobs
            .put(&key, bytes, Some(&outcome.content_type))
            .await?;

        self.record_key(user_id, &key).await?;
        info!(
            user_id,
            key,
            bytes = outcome.bytes_written,
            content_type = %outcome.content_type,
            "avatar stored"
        );

        Ok(AvatarOutcome {
            key,
            uploaded: true,
            skipped: false,
        })
    }

    async fn record_key(&self, user_id: i64, key: &str) -> Result<(), AvatarError> {
        match self.users.set_avatar_key(user_id, key).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(AvatarError::RecordNotFound(user_id)),
            Err(e) => Err(AvatarError::Store(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use crate::download::{DownloadOutcome, HeadInfo};
    use crate::store::MockUserStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    struct StubDownloader {
        body: Vec<u8>,
        content_type: String,
        advertised_length: Option<u64>,
        downloads: AtomicUsize,
    }

    impl StubDownloader {
        fn serving(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                content_type: "image/jpeg".into(),
                advertised_length: Some(body.len() as u64),
                downloads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Downloader for StubDownloader {
        async fn head(&self, _url: &str) -> Result<HeadInfo, DownloadError> {
            Ok(HeadInfo {
                content_length: self.advertised_length,
                content_type: self.content_type.clone(),
            })
        }

        async fn download(
            &self,
            _url: &str,
            sink: &mut (dyn AsyncWrite + Send + Unpin),
            max_size: Option<u64>,
        ) -> Result<DownloadOutcome, DownloadError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if let Some(max) = max_size
                && self.body.len() as u64 > max
            {
                return Err(DownloadError::FileSizeExceeded { limit: max });
            }
            sink.write_all(&self.body)
                .await
                .map_err(|e| DownloadError::Transport(e.to_string()))?;
            Ok(DownloadOutcome {
                bytes_written: self.body.len() as u64,
                content_type: self.content_type.clone(),
            })
        }
    }

    #[test]
    fn key_includes_version_suffix_when_present() {
        assert_eq!(
            avatar_key("https://avatars.githubusercontent.com/u/178611968?v=4").unwrap(),
            "avatars/178611968-4"
        );
    }

    #[test]
    fn key_without_version_is_bare_id() {
        assert_eq!(
            avatar_key("https://avatars.githubusercontent.com/u/42").unwrap(),
            "avatars/42"
        );
    }

    #[test]
    fn same_url_always_derives_same_key() {
        let url = "https://avatars.githubusercontent.com/u/9?v=12";
        assert_eq!(avatar_key(url).unwrap(), avatar_key(url).unwrap());
    }

    #[test]
    fn bare_host_is_accepted() {
        assert_eq!(
            avatar_key("https://githubusercontent.com/u/7").unwrap(),
            "avatars/7"
        );
    }

    #[test]
    fn invalid_urls_are_rejected() {
        for url in [
            "ftp://avatars.githubusercontent.com/u/42",
            "https://example.com/u/42",
            "https://avatars.githubusercontent.com/users/42",
            "https://avatars.githubusercontent.com/u/nope",
            "not a url",
        ] {
            assert!(
                matches!(avatar_key(url), Err(AvatarError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    fn user_store_expecting_key(user_id: i64, key: &'static str) -> Arc<MockUserStore> {
        let mut users = MockUserStore::new();
        users
            .expect_set_avatar_key()
            .withf(move |id, k| *id == user_id && k == key)
            .returning(|_, _| Ok(()));
        Arc::new(users)
    }

    #[tokio::test]
    async fn process_downloads_stores_and_records() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let downloader = Arc::new(StubDownloader::serving(b"jpeg-bytes"));
        let users = user_store_expecting_key(42, "avatars/42-4");
        let pipeline = AvatarPipeline::new(downloader, blobs.clone(), users);

        let outcome = pipeline
            .process(42, "https://avatars.githubusercontent.com/u/42?v=4")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            AvatarOutcome {
                key: "avatars/42-4".into(),
                uploaded: true,
                skipped: false,
            }
        );
        assert_eq!(
            blobs.object("avatars/42-4"),
            Some((b"jpeg-bytes".to_vec(), Some("image/jpeg".to_string())))
        );
    }

    #[tokio::test]
    async fn process_skips_download_when_blob_exists() {
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs
            .put("avatars/42", b"old".to_vec(), None)
            .await
            .unwrap();
        let downloader = Arc::new(StubDownloader::serving(b"new"));
        let users = user_store_expecting_key(42, "avatars/42");
        let pipeline = AvatarPipeline::new(downloader.clone(), blobs, users);

        let outcome = pipeline
            .process(42, "https://avatars.githubusercontent.com/u/42")
            .await
            .unwrap();

        assert!(outcome.skipped);
        assert!(!outcome.uploaded);
        assert_eq!(downloader.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn process_rejects_oversized_avatar_from_head() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let downloader = Arc::new(StubDownloader {
            body: vec![0; 8],
            content_type: "image/png".into(),
            advertised_length: Some(MAX_AVATAR_BYTES + 1),
            downloads: AtomicUsize::new(0),
        });
        let users = Arc::new(MockUserStore::new());
        let pipeline = AvatarPipeline::new(downloader.clone(), blobs, users);

        let err = pipeline
            .process(42, "https://avatars.githubusercontent.com/u/42")
            .await
            .unwrap_err();

        assert!(matches!(err, AvatarError::FileTooLarge { .. }));
        assert_eq!(downloader.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn process_rejects_oversized_avatar_mid_stream() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let body = vec![0u8; 64];
        let downloader = Arc::new(StubDownloader {
            body,
            content_type: "image/png".into(),
            // Origin lies about the size; the streaming cap still holds.
            advertised_length: Some(1),
            downloads: AtomicUsize::new(0),
        });
        let users = Arc::new(MockUserStore::new());
        let pipeline =
            AvatarPipeline::new(downloader, blobs.clone(), users).with_max_bytes(16);

        let err = pipeline
            .process(42, "https://avatars.githubusercontent.com/u/42")
            .await
            .unwrap_err();

        assert!(matches!(err, AvatarError::FileTooLarge { .. }));
        assert!(blobs.keys().is_empty());
    }

    #[tokio::test]
    async fn process_surfaces_missing_user() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let downloader = Arc::new(StubDownloader::serving(b"png"));
        let mut users = MockUserStore::new();
        users
            .expect_set_avatar_key()
            .returning(|id, _| Err(StoreError::NotFound(format!("user {id}"))));
        let pipeline = AvatarPipeline::new(downloader, blobs, Arc::new(users));

        let err = pipeline
            .process(7, "https://avatars.githubusercontent.com/u/7")
            .await
            .unwrap_err();

        assert!(matches!(err, AvatarError::RecordNotFound(7)));
    }
}
