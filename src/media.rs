//! Attachment downloads.
//!
//! Every attachment is stored once in a flat media directory under a
//! generated name. Re-encountering an attachment reuses that name and only
//! downloads again when the file has gone missing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{AttachmentRef, Record, SourceAttachment};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeStats {
    pub downloaded: usize,
    pub reused: usize,
    pub failed: usize,
}

pub struct AttachmentMaterializer<D> {
    media_root: PathBuf,
    downloader: D,
}

impl<D: Downloader> AttachmentMaterializer<D> {
    pub fn new(media_root: impl Into<PathBuf>, downloader: D) -> Self {
        Self {
            media_root: media_root.into(),
            downloader,
        }
    }

    /// Merges `attachments` into `record`, downloading what is not on disk
    /// yet. A failed download skips that attachment only.
    pub async fn materialize(
        &self,
        record: &mut Record,
        attachments: &[SourceAttachment],
    ) -> MaterializeStats {
        let mut stats = MaterializeStats::default();

        for attachment in attachments {
            let known = record
                .attachments
                .iter()
                .position(|existing| existing.id == attachment.id);

            match known {
                Some(pos) => {
                    let entry = &mut record.attachments[pos];
                    if entry.stored_filename.is_empty() {
                        entry.stored_filename = stored_filename_for(&attachment.file_name);
                    }
                    let local = self.media_root.join(&entry.stored_filename);
                    entry.local_path = path_string(&local);

                    if file_exists(&local).await {
                        stats.reused += 1;
                        continue;
                    }
                    match self.download(&attachment.url, &local).await {
                        Ok(()) => {
                            debug!("Restored missing attachment {}", entry.stored_filename);
                            stats.downloaded += 1;
                        }
                        Err(e) => {
                            warn!("Failed to save attachment {}: {}", attachment.file_name, e);
                            stats.failed += 1;
                        }
                    }
                }
                None => {
                    let stored_filename = stored_filename_for(&attachment.file_name);
                    let local = self.media_root.join(&stored_filename);
                    if !file_exists(&local).await {
                        if let Err(e) = self.download(&attachment.url, &local).await {
                            warn!("Failed to save attachment {}: {}", attachment.file_name, e);
                            stats.failed += 1;
                            continue;
                        }
                    }
                    record.attachments.push(AttachmentRef {
                        id: attachment.id.clone(),
                        file_name: attachment.file_name.clone(),
                        stored_filename,
                        content_type: attachment.content_type.clone(),
                        size: attachment.size,
                        original_url: attachment.url.clone(),
                        local_path: path_string(&local),
                    });
                    stats.downloaded += 1;
                }
            }
        }

        stats
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), DownloadError> {
        let bytes = self.downloader.fetch(url).await?;

        tokio::fs::create_dir_all(&self.media_root)
            .await
            .map_err(|source| DownloadError::Io {
                path: self.media_root.clone(),
                source,
            })?;

        let partial = target.with_file_name(format!(
            "{}.part",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|source| DownloadError::Io {
                path: partial.clone(),
                source,
            })?;
        tokio::fs::rename(&partial, target)
            .await
            .map_err(|source| DownloadError::Io {
                path: target.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}

/// A fresh unique name that keeps the original extension.
fn stored_filename_for(file_name: &str) -> String {
    let id = Uuid::new_v4().simple();
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", id, ext),
        _ => id.to_string(),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct FakeDownloader {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(DownloadError::Other("404".to_string()));
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    fn attachment(id: &str, name: &str) -> SourceAttachment {
        SourceAttachment {
            id: id.to_string(),
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            size: 10,
            url: format!("https://cdn.example/{}/{}", id, name),
        }
    }

    fn empty_record() -> Record {
        Record {
            message_id: "1".to_string(),
            author: "alice".to_string(),
            content: String::new(),
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            thread: None,
            attachments: Vec::new(),
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_first_sight_downloads_once() {
        let dir = tempdir().unwrap();
        let downloader = FakeDownloader::default();
        let materializer = AttachmentMaterializer::new(dir.path(), downloader.clone());
        let mut record = empty_record();

        let stats = materializer
            .materialize(&mut record, &[attachment("a1", "photo.PNG")])
            .await;
        assert_eq!(stats.downloaded, 1);
        assert_eq!(record.attachments.len(), 1);

        let stored = &record.attachments[0];
        assert!(stored.stored_filename.ends_with(".PNG"));
        assert_eq!(stored.stored_filename.len(), 32 + ".PNG".len());
        assert!(dir.path().join(&stored.stored_filename).exists());
        assert!(!dir
            .path()
            .join(format!("{}.part", stored.stored_filename))
            .exists());
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reencounter_keeps_name_and_skips_download() {
        let dir = tempdir().unwrap();
        let downloader = FakeDownloader::default();
        let materializer = AttachmentMaterializer::new(dir.path(), downloader.clone());
        let mut record = empty_record();
        let incoming = [attachment("a1", "photo.png")];

        materializer.materialize(&mut record, &incoming).await;
        let first = record.attachments[0].stored_filename.clone();
        let stats = materializer.materialize(&mut record, &incoming).await;

        assert_eq!(stats.reused, 1);
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].stored_filename, first);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_restored_under_same_name() {
        let dir = tempdir().unwrap();
        let downloader = FakeDownloader::default();
        let materializer = AttachmentMaterializer::new(dir.path(), downloader.clone());
        let mut record = empty_record();
        let incoming = [attachment("a1", "scan")];

        materializer.materialize(&mut record, &incoming).await;
        let stored = record.attachments[0].stored_filename.clone();
        assert!(!stored.contains('.'));
        std::fs::remove_file(dir.path().join(&stored)).unwrap();

        let stats = materializer.materialize(&mut record, &incoming).await;
        assert_eq!(stats.downloaded, 1);
        assert_eq!(record.attachments[0].stored_filename, stored);
        assert!(dir.path().join(&stored).exists());
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_download_skips_only_that_attachment() {
        let dir = tempdir().unwrap();
        let materializer = AttachmentMaterializer::new(dir.path(), FakeDownloader::default());
        let mut record = empty_record();

        let stats = materializer
            .materialize(
                &mut record,
                &[attachment("bad", "broken.png"), attachment("ok", "fine.jpg")],
            )
            .await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.downloaded, 1);
        assert_eq!(record.attachments.len(), 1);
        assert_eq!(record.attachments[0].id, "ok");
    }

    #[tokio::test]
    async fn test_legacy_entry_without_stored_name_gets_one() {
        let dir = tempdir().unwrap();
        let materializer = AttachmentMaterializer::new(dir.path(), FakeDownloader::default());
        let mut record = empty_record();
        record.attachments.push(AttachmentRef {
            id: "a1".to_string(),
            file_name: "old.gif".to_string(),
            stored_filename: String::new(),
            content_type: None,
            size: 1,
            original_url: String::new(),
            local_path: String::new(),
        });

        materializer
            .materialize(&mut record, &[attachment("a1", "old.gif")])
            .await;
        let entry = &record.attachments[0];
        assert!(entry.stored_filename.ends_with(".gif"));
        assert!(entry.local_path.ends_with(&entry.stored_filename));
        assert!(dir.path().join(&entry.stored_filename).exists());
    }
}
