//! Pipeline configuration.
//!
//! Settings are plain values with serde support so they can be embedded in a
//! larger service configuration. Credentials are never baked into defaults:
//! the registry token is read from the environment.
//!
//! # Environment Variables
//!
//! - `HF_API_TOKEN` - bearer token for registry lookups and gated downloads
//! - `UNLOAD_IDLE` - enable the idle/unload lifecycle around each call

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Environment variable holding the registry bearer token.
pub const TOKEN_ENV: &str = "HF_API_TOKEN";

/// Environment variable enabling the idle-unload lifecycle.
pub const UNLOAD_IDLE_ENV: &str = "UNLOAD_IDLE";

/// Default registry endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Directory used to cache downloaded weights that may exceed device memory.
pub const DEFAULT_OFFLOAD_DIR: &str = "offload";

/// Hard cap on newly generated tokens. Not externally configurable.
pub const DEFAULT_MAX_NEW_TOKENS: usize = 10;

/// End-of-sequence token id used to stop generation. Not externally
/// configurable.
pub const DEFAULT_EOS_TOKEN_ID: u32 = 3;

/// Pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Registry endpoint for metadata lookups.
    pub endpoint: String,
    /// User agent sent with registry requests.
    pub user_agent: String,
    /// Registry request timeout in seconds.
    pub timeout_secs: u64,
    /// Optional bearer token for the registry and gated model downloads.
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    /// Cache directory for downloaded weight files.
    pub offload_dir: PathBuf,
    /// When set, each call acquires an idle witness and wakes the
    /// accelerator before processing.
    #[serde(default)]
    pub unload_idle: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: format!("peft-pipeline/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            auth_token: None,
            offload_dir: PathBuf::from(DEFAULT_OFFLOAD_DIR),
            unload_idle: false,
        }
    }
}

impl PipelineSettings {
    /// Build settings from the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.auth_token = env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        settings.unload_idle = env::var(UNLOAD_IDLE_ENV)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.endpoint, "https://huggingface.co");
        assert_eq!(settings.offload_dir, PathBuf::from("offload"));
        assert!(settings.auth_token.is_none());
        assert!(!settings.unload_idle);
        assert_eq!(DEFAULT_MAX_NEW_TOKENS, 10);
        assert_eq!(DEFAULT_EOS_TOKEN_ID, 3);
    }

    #[test]
    fn test_settings_roundtrip_omits_token() {
        let mut settings = PipelineSettings::default();
        settings.auth_token = Some("secret".to_string());
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }
}
