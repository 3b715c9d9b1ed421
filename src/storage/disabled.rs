use async_trait::async_trait;

use super::{DocumentInfo, DocumentStore, StorageError, StorageResult, StoredDocument};

/// No-op backend for deployments without document storage. Listing is
/// always empty and nothing can be stored or fetched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStore;

#[async_trait]
impl DocumentStore for DisabledStore {
    async fn upload(&self, _original_name: &str, _bytes: Vec<u8>) -> StorageResult<StoredDocument> {
        Err(StorageError::Disabled)
    }

    async fn list(&self) -> StorageResult<Vec<DocumentInfo>> {
        Ok(Vec::new())
    }

    async fn download(&self, _name: &str) -> StorageResult<Vec<u8>> {
        Err(StorageError::Disabled)
    }

    fn backend_name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_nothing_and_stores_nothing() {
        let store = DisabledStore;
        assert!(store.list().await.unwrap().is_empty());
        assert!(matches!(store.upload("a.pdf", vec![1]).await, Err(StorageError::Disabled)));
        assert!(matches!(store.download("a.pdf").await, Err(StorageError::Disabled)));
    }
}
