//! DigiLocker document storage.
//!
//! One [`DocumentStore`] interface over interchangeable backends, picked once
//! at start-up from configuration. Every backend names stored documents with
//! the same key scheme (see [`document_key`]).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod disabled;
pub mod filesystem;
pub mod http;
pub mod memory;

pub use disabled::DisabledStore;
pub use filesystem::FilesystemStore;
pub use http::HttpObjectStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid document name: {0}")]
    InvalidName(String),
    #[error("document storage is disabled")]
    Disabled,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub name: String,
    pub size_bytes: u64,
}

/// Uniform access to opaque binary documents.
///
/// No locks are held between calls: a name returned by `list` may be gone
/// by the time it is downloaded.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upload(&self, original_name: &str, bytes: Vec<u8>) -> StorageResult<StoredDocument>;
    async fn list(&self) -> StorageResult<Vec<DocumentInfo>>;
    async fn download(&self, name: &str) -> StorageResult<Vec<u8>>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageBackend {
    Memory,
    Filesystem,
    Http,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub dir: std::path::PathBuf,
    pub url: Option<String>,
}

/// Build the configured backend.
pub async fn open_store(settings: &StorageSettings) -> StorageResult<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match settings.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Filesystem => Arc::new(FilesystemStore::open(&settings.dir).await?),
        StorageBackend::Http => {
            let url = settings.url.as_deref().ok_or_else(|| {
                StorageError::Backend("the http backend needs a storage URL".to_string())
            })?;
            Arc::new(HttpObjectStore::new(url)?)
        }
        StorageBackend::Disabled => Arc::new(DisabledStore),
    };
    Ok(store)
}

/// Storage key for a new upload:
/// `{yyyyMMddTHHmmssSSSZ}-{8 hex of a v4 uuid}-{sanitised name}`.
///
/// Keys sort chronologically, the random segment keeps same-millisecond
/// uploads of the same file apart, and the name stays readable.
pub fn document_key(original_name: &str, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%dT%H%M%S%3fZ");
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}-{}", &nonce[..8], sanitise_name(original_name))
}

/// Keep `[A-Za-z0-9._-]`, map everything else to `_`, collapse runs of
/// dots and drop leading ones.
pub fn sanitise_name(original_name: &str) -> String {
    // Browsers may send a full path; keep only the final component.
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);

    let mut cleaned = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if c == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(c);
    }
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Reject names that could escape a backend's namespace.
pub fn check_name(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains("..")
        || name.contains(['/', '\\', '\0']);
    if bad {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_has_timestamp_nonce_and_name() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let key = document_key("Lab Report (1).pdf", now);
        let parts: Vec<&str> = key.splitn(3, '-').collect();
        assert_eq!(parts[0], "20240309T140507000Z");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[2], "Lab_Report__1_.pdf");
        assert!(check_name(&key).is_ok());
    }

    #[test]
    fn same_file_same_instant_gets_distinct_keys() {
        let now = Utc::now();
        assert_ne!(document_key("x.jpg", now), document_key("x.jpg", now));
    }

    #[test]
    fn sanitising_strips_paths_and_dots() {
        assert_eq!(sanitise_name("C:\\Users\\me\\scan.png"), "scan.png");
        assert_eq!(sanitise_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitise_name(".env"), "env");
        assert_eq!(sanitise_name("..."), "file");
        assert_eq!(sanitise_name("scan..final...png"), "scan.final.png");
        assert_eq!(sanitise_name(""), "file");
    }

    #[test]
    fn traversal_names_are_rejected() {
        for name in ["", "..", "../x", "a/b", "a\\b", ".hidden", "a..b"] {
            assert!(matches!(check_name(name), Err(StorageError::InvalidName(_))), "{name}");
        }
    }
}
