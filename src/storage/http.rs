//! Remote object store reached over plain HTTP.
//!
//! Protocol: `PUT {base}/{key}` stores a body, `GET {base}/` returns a JSON
//! array of `{name, size_bytes}`, `GET {base}/{key}` returns the body.
//! Remote stores are typically eventually consistent, so a fresh upload may
//! be missing from an immediate `list`.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::{
    check_name, document_key, DocumentInfo, DocumentStore, StorageError, StorageResult,
    StoredDocument,
};

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    http: Client,
    base: Url,
}

impl HttpObjectStore {
    pub fn new(base_url: &str) -> StorageResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| StorageError::Backend(format!("invalid storage URL {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(StorageError::Backend(format!(
                "storage URL cannot be a base: {base_url}"
            )));
        }
        // Normalise so that object URLs are `{base}/{key}`.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    fn object_url(&self, name: &str) -> StorageResult<Url> {
        check_name(name)?;
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::Backend("storage URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(name);
        Ok(url)
    }
}

fn backend_err(op: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(format!("{op} failed: {e}"))
}

#[async_trait]
impl DocumentStore for HttpObjectStore {
    async fn upload(&self, original_name: &str, bytes: Vec<u8>) -> StorageResult<StoredDocument> {
        let key = document_key(original_name, Utc::now());
        let url = self.object_url(&key)?;
        let size = bytes.len();

        let resp = self
            .http
            .put(url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| backend_err("upload", e))?;
        if !resp.status().is_success() {
            return Err(backend_err("upload", resp.status()));
        }

        debug!(key = %key, size, "stored document in remote object store");
        Ok(StoredDocument { path: key })
    }

    async fn list(&self) -> StorageResult<Vec<DocumentInfo>> {
        let resp = self
            .http
            .get(self.base.clone())
            .send()
            .await
            .map_err(|e| backend_err("list", e))?;
        if !resp.status().is_success() {
            return Err(backend_err("list", resp.status()));
        }
        resp.json().await.map_err(|e| backend_err("list", e))
    }

    async fn download(&self, name: &str) -> StorageResult<Vec<u8>> {
        let url = self.object_url(name)?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| backend_err("download", e))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(name.to_string())),
            s if s.is_success() => {
                let bytes = resp.bytes().await.map_err(|e| backend_err("download", e))?;
                Ok(bytes.to_vec())
            }
            s => Err(backend_err("download", s)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
