//! Start-up configuration, read once from flags and the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::flow::InvocationPolicy;
use crate::llm::{LlmProvider, LlmSettings};
use crate::storage::{StorageBackend, StorageSettings};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY is required when LLM_PROVIDER is gemini")]
    MissingApiKey,
    #[error("STORAGE_URL is required when STORAGE_BACKEND is http")]
    MissingStorageUrl,
    #[error("LLM_MAX_ATTEMPTS must be at least 1")]
    NoAttempts,
    #[error("LLM_TIMEOUT_SECS must be at least 1")]
    NoTimeout,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "health-assist")]
#[command(about = "AI health assistant: symptom analysis, risk scoring, transcription, X-ray analysis and document storage")]
pub struct AppConfig {
    /// REST listen address
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:3000")]
    pub http_addr: SocketAddr,

    /// gRPC listen address
    #[arg(long, env = "GRPC_ADDR", default_value = "0.0.0.0:50051")]
    pub grpc_addr: SocketAddr,

    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value = "gemini")]
    pub llm_provider: LlmProvider,

    /// Overrides the provider's default endpoint
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Per-attempt model call timeout
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value_t = 60)]
    pub llm_timeout_secs: u64,

    /// 1 disables retry
    #[arg(long, env = "LLM_MAX_ATTEMPTS", default_value_t = 1)]
    pub llm_max_attempts: u32,

    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value = "memory")]
    pub storage_backend: StorageBackend,

    #[arg(long, env = "STORAGE_DIR", default_value = "./digilocker")]
    pub storage_dir: PathBuf,

    #[arg(long, env = "STORAGE_URL")]
    pub storage_url: Option<String>,

    /// Enables the read-only share endpoints
    #[arg(long, env = "SHARE_TOKEN", hide_env_values = true)]
    pub share_token: Option<String>,
}

impl AppConfig {
    /// Reject combinations that would only fail later, at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_key = self
            .llm_api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if self.llm_provider == LlmProvider::Gemini && !has_key {
            return Err(ConfigError::MissingApiKey);
        }
        if self.storage_backend == StorageBackend::Http && self.storage_url.is_none() {
            return Err(ConfigError::MissingStorageUrl);
        }
        if self.llm_max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.llm_timeout_secs == 0 {
            return Err(ConfigError::NoTimeout);
        }
        Ok(())
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            provider: self.llm_provider,
            base_url: self.llm_base_url.clone(),
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
        }
    }

    pub fn invocation_policy(&self) -> InvocationPolicy {
        InvocationPolicy {
            timeout: Duration::from_secs(self.llm_timeout_secs),
            max_attempts: self.llm_max_attempts,
        }
    }

    pub fn storage_settings(&self) -> StorageSettings {
        StorageSettings {
            backend: self.storage_backend,
            dir: self.storage_dir.clone(),
            url: self.storage_url.clone(),
        }
    }

    /// The share endpoints stay off unless a non-blank token is set.
    pub fn share_token(&self) -> Option<String> {
        self.share_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["health-assist"];
        argv.extend_from_slice(args);
        AppConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn explicit_flags_win() {
        let cfg = parse(&[
            "--llm-provider",
            "mock",
            "--llm-timeout-secs",
            "5",
            "--llm-max-attempts",
            "3",
            "--storage-backend",
            "filesystem",
            "--storage-dir",
            "/tmp/locker",
        ]);
        assert_eq!(cfg.llm_provider, LlmProvider::Mock);
        assert_eq!(
            cfg.invocation_policy(),
            InvocationPolicy {
                timeout: Duration::from_secs(5),
                max_attempts: 3
            }
        );
        let storage = cfg.storage_settings();
        assert_eq!(storage.backend, StorageBackend::Filesystem);
        assert_eq!(storage.dir, PathBuf::from("/tmp/locker"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn gemini_needs_a_key() {
        let cfg = parse(&["--llm-provider", "gemini", "--llm-api-key", " "]);
        assert_eq!(cfg.validate(), Err(ConfigError::MissingApiKey));

        let cfg = parse(&["--llm-provider", "gemini", "--llm-api-key", "k"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn http_storage_needs_a_url() {
        let cfg = parse(&["--llm-provider", "mock", "--storage-backend", "http"]);
        assert_eq!(cfg.validate(), Err(ConfigError::MissingStorageUrl));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let cfg = parse(&["--llm-provider", "mock", "--llm-max-attempts", "0"]);
        assert_eq!(cfg.validate(), Err(ConfigError::NoAttempts));
    }

    #[test]
    fn blank_share_token_means_disabled() {
        let cfg = parse(&["--llm-provider", "mock", "--share-token", "  "]);
        assert_eq!(cfg.share_token(), None);
        let cfg = parse(&["--llm-provider", "mock", "--share-token", "s3cret"]);
        assert_eq!(cfg.share_token().as_deref(), Some("s3cret"));
    }

    #[test]
    fn unknown_provider_is_a_parse_error() {
        assert!(AppConfig::try_parse_from(["health-assist", "--llm-provider", "gpt"]).is_err());
    }
}
