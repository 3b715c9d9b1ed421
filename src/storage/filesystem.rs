//! Local-directory document store.
//!
//! Each document is one file directly under the root directory, named by
//! its storage key. Names are validated before touching the filesystem so a
//! request can never reach outside the root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    check_name, document_key, DocumentInfo, DocumentStore, StorageError, StorageResult,
    StoredDocument,
};

#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Open (creating if needed) the storage directory.
    pub async fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root).await?;
        let root = fs::canonicalize(root).await?;
        if !fs::metadata(&root).await?.is_dir() {
            return Err(StorageError::Backend(format!(
                "storage path is not a directory: {}",
                root.display()
            )));
        }
        info!(root = %root.display(), "filesystem document store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> StorageResult<PathBuf> {
        check_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl DocumentStore for FilesystemStore {
    async fn upload(&self, original_name: &str, bytes: Vec<u8>) -> StorageResult<StoredDocument> {
        let key = document_key(original_name, Utc::now());
        let path = self.path_for(&key)?;

        // Written under a hidden name first so `list` never sees a partial file.
        let part = self.root.join(format!(".{key}.part"));
        write_new(&part, &bytes).await?;
        // Link rather than rename: linking fails instead of replacing an
        // existing document with the same key.
        let published = fs::hard_link(&part, &path).await;
        remove_part(&part).await;
        published?;

        debug!(key = %key, size = bytes.len(), "stored document on disk");
        Ok(StoredDocument { path: key })
    }

    async fn list(&self) -> StorageResult<Vec<DocumentInfo>> {
        let mut docs = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if check_name(&name).is_err() {
                continue;
            }
            docs.push(DocumentInfo {
                name,
                size_bytes: meta.len(),
            });
        }
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(docs)
    }

    async fn download(&self, name: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// Create `path` (which must not exist yet) and write all of `bytes` to it.
/// A failed write removes what was created.
async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = match file.write_all(bytes).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        drop(file);
        remove_part(path).await;
    }
    written
}

async fn remove_part(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "could not remove partial upload: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::open(&dir.path().join("locker")).await.unwrap();

        let stored = store.upload("report.pdf", b"%PDF-1.7".to_vec()).await.unwrap();
        assert!(stored.path.ends_with("-report.pdf"));
        assert!(store.root().join(&stored.path).is_file());

        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![stored.path.clone()]);
        assert_eq!(store.download(&stored.path).await.unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::open(dir.path()).await.unwrap();
        let err = store.download("20240101T000000000Z-deadbeef-x.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::open(&dir.path().join("root")).await.unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"x").unwrap();

        let err = store.download("../secret.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidName(_)));
    }

    #[tokio::test]
    async fn list_skips_directories_and_hidden_files() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::open(dir.path()).await.unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join(".DS_Store"), b"x").unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_leaves_no_partial_files() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::open(dir.path()).await.unwrap();
        let stored = store.upload("scan.png", b"png".to_vec()).await.unwrap();

        let on_disk: Vec<String> = std::fs::read_dir(store.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(on_disk, vec![stored.path]);
    }

    #[tokio::test]
    async fn stale_partial_upload_is_not_listed() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::open(dir.path()).await.unwrap();
        std::fs::write(
            dir.path().join(".20240101T000000000Z-deadbeef-x.pdf.part"),
            b"%PD",
        )
        .unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_file_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let part = dir.path().join(".k.part");
        std::fs::write(&part, b"first").unwrap();

        assert!(write_new(&part, b"second").await.is_err());
        assert_eq!(std::fs::read(&part).unwrap(), b"first");
    }
}
