//! Hub artifact fetching: configs, tokenizers, and weight files.

use async_trait::async_trait;
use candle_core::{DType, Tensor};
use hf_hub::api::tokio::{Api, ApiBuilder, ApiError, ApiRepo};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tokenizers::Tokenizer;

use crate::config::PipelineSettings;
use crate::device::ComputeDevice;
use crate::error::{PipelineError, Result};
use crate::lora::PeftAdapterConfig;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";
const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

/// Source of model and adapter artifacts.
///
/// The pipeline constructs against this trait so artifact delivery can be
/// stubbed out in tests; [`HubFetcher`] is the hub-backed implementation.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Fetch and load the tokenizer bound to a model.
    async fn tokenizer(&self, model_id: &str) -> Result<Tokenizer>;

    /// Fetch the raw model configuration document.
    async fn model_config(&self, model_id: &str) -> Result<serde_json::Value>;

    /// Fetch and load the model weights onto the compute device, converted to
    /// its dtype policy.
    async fn model_weights(
        &self,
        model_id: &str,
        device: &ComputeDevice,
    ) -> Result<HashMap<String, Tensor>>;

    /// Fetch the adapter configuration and weights for an adapter id.
    async fn adapter(
        &self,
        adapter_id: &str,
        device: &ComputeDevice,
    ) -> Result<(PeftAdapterConfig, HashMap<String, Tensor>)>;
}

/// Downloads model artifacts from the hub into the offload directory.
pub struct HubFetcher {
    api: Api,
}

impl HubFetcher {
    pub fn new(settings: &PipelineSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.offload_dir)?;
        let api = ApiBuilder::new()
            .with_token(settings.auth_token.clone())
            .with_cache_dir(settings.offload_dir.clone())
            .build()?;
        Ok(Self { api })
    }

    fn repo(&self, model_id: &str) -> ApiRepo {
        self.api.model(model_id.to_string())
    }

    /// Fetch all weight files for a model, following the sharded index when
    /// one is published. Only a missing index means the model is unsharded;
    /// any other fetch failure propagates.
    async fn weight_files(&self, model_id: &str) -> Result<Vec<PathBuf>> {
        let repo = self.repo(model_id);

        match repo.get(WEIGHTS_INDEX_FILE).await {
            Ok(index_path) => {
                let raw = tokio::fs::read(&index_path).await?;
                let index: serde_json::Value = serde_json::from_slice(&raw)?;
                let weight_map = index
                    .get("weight_map")
                    .and_then(|v| v.as_object())
                    .ok_or_else(|| anyhow::anyhow!("weight index has no weight_map"))?;

                let shards: HashSet<&str> = weight_map
                    .values()
                    .filter_map(|v| v.as_str())
                    .collect();

                tracing::info!(shards = shards.len(), "fetching sharded weights for {model_id}");
                let mut paths = Vec::with_capacity(shards.len());
                for shard in shards {
                    paths.push(repo.get(shard).await?);
                }
                paths.sort();
                Ok(paths)
            }
            Err(err) if is_not_found(&err) => Ok(vec![repo.get(WEIGHTS_FILE).await?]),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl ArtifactSource for HubFetcher {
    async fn tokenizer(&self, model_id: &str) -> Result<Tokenizer> {
        let path = self.repo(model_id).get(TOKENIZER_FILE).await?;
        Tokenizer::from_file(&path).map_err(PipelineError::tokenizer)
    }

    async fn model_config(&self, model_id: &str) -> Result<serde_json::Value> {
        let path = self.repo(model_id).get(CONFIG_FILE).await?;
        let raw = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn model_weights(
        &self,
        model_id: &str,
        device: &ComputeDevice,
    ) -> Result<HashMap<String, Tensor>> {
        let paths = self.weight_files(model_id).await?;

        let mut tensors = HashMap::new();
        for path in &paths {
            tracing::debug!(path = %path.display(), "loading weight file");
            tensors.extend(load_safetensors(path, device)?);
        }
        tracing::info!(count = tensors.len(), "loaded weights for {model_id}");
        Ok(tensors)
    }

    async fn adapter(
        &self,
        adapter_id: &str,
        device: &ComputeDevice,
    ) -> Result<(PeftAdapterConfig, HashMap<String, Tensor>)> {
        let repo = self.repo(adapter_id);

        let config_path = repo.get(ADAPTER_CONFIG_FILE).await?;
        let raw = tokio::fs::read(&config_path).await?;
        let config: PeftAdapterConfig = serde_json::from_slice(&raw)?;

        let weights_path = repo.get(ADAPTER_WEIGHTS_FILE).await?;
        let weights = load_safetensors(&weights_path, device)?;
        tracing::debug!(count = weights.len(), "loaded adapter weights for {adapter_id}");

        Ok((config, weights))
    }
}

/// Whether a hub fetch failed because the file does not exist, as opposed to
/// a network, auth, or I/O failure.
fn is_not_found(err: &ApiError) -> bool {
    match err {
        ApiError::RequestError(e) => e.status().map(|s| s.as_u16()) == Some(404),
        ApiError::TooManyRetries(inner) => is_not_found(inner),
        _ => false,
    }
}

/// Load a safetensors file, converting float tensors to the device dtype.
fn load_safetensors(
    path: &std::path::Path,
    device: &ComputeDevice,
) -> Result<HashMap<String, Tensor>> {
    let tensors = candle_core::safetensors::load(path, device.device())?;

    tensors
        .into_iter()
        .map(|(name, tensor)| {
            let tensor = if tensor.dtype().is_float() && tensor.dtype() != device.dtype() {
                tensor.to_dtype(device.dtype())?
            } else {
                tensor
            };
            Ok((name, tensor))
        })
        .collect()
}
