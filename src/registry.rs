//! Registry lookups for adapter metadata.
//!
//! The registry resolves a published adapter identifier to its metadata,
//! including the `peft` configuration block linking the adapter to its base
//! model. The block is validated once at this boundary through an explicit
//! schema type; downstream code never pokes at raw JSON.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;

use crate::config::PipelineSettings;
use crate::error::{PipelineError, Result, BASE_MODEL_MISSING_MSG, CONFIG_MISSING_MSG};

/// Resolves an adapter identifier to descriptive metadata.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn adapter_info(&self, model_id: &str) -> Result<AdapterInfo>;
}

/// Adapter metadata as returned by the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterInfo {
    #[serde(rename = "modelId", default)]
    pub model_id: Option<String>,

    /// Nested configuration mapping; the `peft` key, when present, describes
    /// adapter/base-model linkage.
    #[serde(default)]
    pub config: Option<HashMap<String, serde_json::Value>>,

    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl AdapterInfo {
    /// Extract and validate the `peft` configuration block.
    ///
    /// An absent, null, or empty block fails with the fixed configuration
    /// message; so does a block of the wrong shape.
    pub fn peft_config(&self) -> Result<PeftConfig> {
        let block = self
            .config
            .as_ref()
            .and_then(|config| config.get("peft"))
            .filter(|value| value.as_object().is_some_and(|obj| !obj.is_empty()))
            .ok_or_else(|| PipelineError::configuration(CONFIG_MISSING_MSG))?;

        serde_json::from_value(block.clone())
            .map_err(|_| PipelineError::configuration(CONFIG_MISSING_MSG))
    }
}

/// Validated `peft` configuration block.
#[derive(Debug, Clone, Deserialize)]
pub struct PeftConfig {
    #[serde(default)]
    pub base_model_name: Option<String>,
}

impl PeftConfig {
    /// The base model identifier the adapter was trained against.
    pub fn base_model_id(&self) -> Result<&str> {
        match self.base_model_name.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(PipelineError::configuration(BASE_MODEL_MISSING_MSG)),
        }
    }
}

/// Hugging Face Hub registry client.
pub struct HubRegistry {
    client: Client,
    endpoint: String,
}

impl HubRegistry {
    /// Create a new registry client, attaching the bearer credential from the
    /// settings when present.
    pub fn new(settings: &PipelineSettings) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        if let Some(token) = &settings.auth_token {
            let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| anyhow::anyhow!("Invalid token format: {}", e))?;
            headers.insert(header::AUTHORIZATION, auth_value);
        }

        let user_agent = header::HeaderValue::from_str(&settings.user_agent)
            .map_err(|e| anyhow::anyhow!("Invalid user agent: {}", e))?;
        headers.insert(header::USER_AGENT, user_agent);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }

    fn api_url(&self, model_id: &str) -> String {
        format!("{}/api/models/{}", self.endpoint, model_id)
    }
}

#[async_trait]
impl ModelRegistry for HubRegistry {
    async fn adapter_info(&self, model_id: &str) -> Result<AdapterInfo> {
        let url = self.api_url(model_id);
        tracing::debug!(%url, "looking up adapter metadata");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Registry {
                model_id: model_id.to_string(),
                source: e,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(model_id.to_string()));
        }

        let response = response
            .error_for_status()
            .map_err(|e| PipelineError::Registry {
                model_id: model_id.to_string(),
                source: e,
            })?;

        let info: AdapterInfo = response.json().await.map_err(|e| PipelineError::Registry {
            model_id: model_id.to_string(),
            source: e,
        })?;

        tracing::debug!("got config");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info_from(value: serde_json::Value) -> AdapterInfo {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_missing_config_block_fails_with_fixed_message() {
        let info = info_from(json!({ "modelId": "org/adapter" }));
        let err = info.peft_config().unwrap_err();
        assert_eq!(err.to_string(), CONFIG_MISSING_MSG);
    }

    #[test]
    fn test_missing_peft_key_fails_with_fixed_message() {
        let info = info_from(json!({
            "modelId": "org/adapter",
            "config": { "model_type": "llama" }
        }));
        let err = info.peft_config().unwrap_err();
        assert_eq!(err.to_string(), CONFIG_MISSING_MSG);
    }

    #[test]
    fn test_empty_peft_block_fails_with_fixed_message() {
        let info = info_from(json!({
            "modelId": "org/adapter",
            "config": { "peft": {} }
        }));
        let err = info.peft_config().unwrap_err();
        assert_eq!(err.to_string(), CONFIG_MISSING_MSG);
    }

    #[test]
    fn test_missing_base_model_fails_with_fixed_message() {
        let info = info_from(json!({
            "config": { "peft": { "task_type": "CAUSAL_LM" } }
        }));
        let peft = info.peft_config().unwrap();
        let err = peft.base_model_id().unwrap_err();
        assert_eq!(err.to_string(), BASE_MODEL_MISSING_MSG);
    }

    #[test]
    fn test_empty_base_model_fails_with_fixed_message() {
        let info = info_from(json!({
            "config": { "peft": { "base_model_name": "" } }
        }));
        let peft = info.peft_config().unwrap();
        let err = peft.base_model_id().unwrap_err();
        assert_eq!(err.to_string(), BASE_MODEL_MISSING_MSG);
    }

    #[test]
    fn test_valid_metadata_resolves_base_model() {
        let info = info_from(json!({
            "modelId": "org/adapter",
            "config": { "peft": { "base_model_name": "org/base-model" } }
        }));
        let peft = info.peft_config().unwrap();
        assert_eq!(peft.base_model_id().unwrap(), "org/base-model");
    }
}
