use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use super::{document_key, DocumentInfo, DocumentStore, StorageError, StorageResult, StoredDocument};

/// In-process store. Reads see every completed upload.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<DashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upload(&self, original_name: &str, bytes: Vec<u8>) -> StorageResult<StoredDocument> {
        let key = document_key(original_name, Utc::now());
        debug!(key = %key, size = bytes.len(), "storing document in memory");
        self.documents.insert(key.clone(), Arc::new(bytes));
        Ok(StoredDocument { path: key })
    }

    async fn list(&self) -> StorageResult<Vec<DocumentInfo>> {
        let mut docs: Vec<DocumentInfo> = self
            .documents
            .iter()
            .map(|entry| DocumentInfo {
                name: entry.key().clone(),
                size_bytes: entry.value().len() as u64,
            })
            .collect();
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(docs)
    }

    async fn download(&self, name: &str) -> StorageResult<Vec<u8>> {
        self.documents
            .get(name)
            .map(|entry| entry.value().as_ref().clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_list_and_download() {
        let store = MemoryStore::new();
        let stored = store.upload("x-ray.jpg", b"jpeg".to_vec()).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(
            listed,
            vec![DocumentInfo {
                name: stored.path.clone(),
                size_bytes: 4
            }]
        );
        assert_eq!(store.download(&stored.path).await.unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let store = MemoryStore::new();
        store.upload("a.pdf", vec![1]).await.unwrap();
        let err = store.download("a.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(name) if name == "a.pdf"));
    }

    #[tokio::test]
    async fn clones_share_contents() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.upload("a.pdf", vec![1]).await.unwrap();
        assert_eq!(other.list().await.unwrap().len(), 1);
    }
}
