//! The adapter-augmented text-generation pipeline.
//!
//! Construction resolves an adapter identifier to its base model, loads the
//! tokenizer and base weights, folds the adapter in, and yields a ready
//! instance. Each call tokenizes, generates, and decodes; when the
//! idle-unload policy is on, the call holds an idle witness and wakes the
//! device first.

use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::config::PipelineSettings;
use crate::device::ComputeDevice;
use crate::error::{PipelineError, Result};
use crate::idle::IdleLease;
use crate::loader::{ArtifactSource, HubFetcher};
use crate::lora;
use crate::metrics;
use crate::model::{CausalModel, GenerationOptions, LlamaBuilder, ModelBuilder};
use crate::registry::{HubRegistry, ModelRegistry};

/// One labeled completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    pub generated_text: String,
}

/// A base causal LM wrapped with PEFT adapter weights, exposed as a
/// text-completion call.
pub struct TextGenerationPipeline {
    tokenizer: Tokenizer,
    model: Box<dyn CausalModel>,
    settings: PipelineSettings,
    idle: IdleLease,
}

impl std::fmt::Debug for TextGenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextGenerationPipeline")
            .field("settings", &self.settings)
            .field("idle", &self.idle)
            .finish_non_exhaustive()
    }
}

impl TextGenerationPipeline {
    /// Resolve, validate, and load everything for `adapter_id`.
    ///
    /// Fails if the registry lookup fails, if the adapter metadata lacks a
    /// valid `peft` block or base model reference, or if any artifact cannot
    /// be loaded. A base model load failure is fatal here; no partial
    /// instance is ever returned.
    pub async fn load(adapter_id: &str, settings: PipelineSettings) -> Result<Self> {
        let registry = HubRegistry::new(&settings)?;
        let fetcher = HubFetcher::new(&settings)?;
        Self::load_with(&registry, &fetcher, &LlamaBuilder, adapter_id, settings).await
    }

    /// Same as [`load`](Self::load), against caller-supplied registry,
    /// artifact source, and backend builder.
    pub async fn load_with(
        registry: &dyn ModelRegistry,
        artifacts: &dyn ArtifactSource,
        backend: &dyn ModelBuilder,
        adapter_id: &str,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let info = registry.adapter_info(adapter_id).await?;
        let peft = info.peft_config()?;
        let base_model_id = peft.base_model_id()?.to_string();
        tracing::debug!(%base_model_id, "resolved base model");

        let tokenizer = artifacts.tokenizer(&base_model_id).await?;
        tracing::debug!("loaded tokenizer");

        let device = ComputeDevice::auto()?;

        let model_config = artifacts
            .model_config(&base_model_id)
            .await
            .map_err(|e| PipelineError::model_load(base_model_id.as_str(), e))?;
        let mut weights = artifacts
            .model_weights(&base_model_id, &device)
            .await
            .map_err(|e| PipelineError::model_load(base_model_id.as_str(), e))?;
        tracing::debug!("loaded model");

        let (adapter_config, adapter_weights) = artifacts.adapter(adapter_id, &device).await?;
        let merged = lora::merge_into_base(&mut weights, &adapter_weights, adapter_config.scaling())?;
        if merged == 0 && !adapter_weights.is_empty() {
            // Zero merged tensors means the base weights are unchanged and
            // every call would answer with the unadapted model.
            return Err(PipelineError::configuration(format!(
                "Adapter {adapter_id} is incompatible with base model {base_model_id}: \
                 no adapter tensor pair targets a base weight"
            )));
        }
        tracing::info!(merged, %adapter_id, "attached adapter weights");

        let model = backend
            .build(weights, model_config, &device)
            .map_err(|e| PipelineError::model_load(base_model_id.as_str(), e))?;
        tracing::debug!("model started");

        Ok(Self::from_parts(tokenizer, model, settings, IdleLease::new()))
    }

    /// Assemble a pipeline from already-loaded parts.
    ///
    /// This is the seam for custom backends; the idle lease is shared with
    /// whatever observes accelerator idleness.
    pub fn from_parts(
        tokenizer: Tokenizer,
        model: Box<dyn CausalModel>,
        settings: PipelineSettings,
        idle: IdleLease,
    ) -> Self {
        Self {
            tokenizer,
            model,
            settings,
            idle,
        }
    }

    /// The lease tracking in-flight calls.
    pub fn idle_lease(&self) -> IdleLease {
        self.idle.clone()
    }

    /// Produce a completion for `prompt`.
    ///
    /// Returns a single-element sequence with the decoded text. Tokenization
    /// and generation failures propagate unmodified; there is no retry and no
    /// fallback text.
    pub fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Vec<GeneratedText>> {
        if self.settings.unload_idle {
            // Witness held for the whole call; released on every exit path.
            let _witness = self.idle.witness();
            self.wake()?;
            self.process(prompt, options)
        } else {
            self.process(prompt, options)
        }
    }

    fn wake(&self) -> Result<()> {
        metrics::timed("model_to_device", || self.model.ensure_resident())
    }

    fn process(&self, prompt: &str, options: &GenerationOptions) -> Result<Vec<GeneratedText>> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(PipelineError::tokenizer)?;
        let input_ids = encoding.get_ids();
        let attention_mask = encoding.get_attention_mask();
        tracing::debug!(?input_ids, ?attention_mask, "tokenized inputs");

        if input_ids.is_empty() {
            return Err(PipelineError::tokenizer(
                "prompt produced no input tokens",
            ));
        }

        // The wake inside processing mirrors the explicit pre-wake: both are
        // idempotent, so the order of the two paths does not matter.
        self.wake()?;

        let output = self.model.generate(input_ids, attention_mask, options)?;
        tracing::debug!(?output, "model outputs");

        let text = self
            .tokenizer
            .decode(&output, true)
            .map_err(PipelineError::tokenizer)?;

        Ok(vec![GeneratedText {
            generated_text: text,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_text_serializes_with_single_key() {
        let result = GeneratedText {
            generated_text: "The quick brown fox jumps".to_string(),
        };
        let value = serde_json::to_value(&result).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert_eq!(
            object["generated_text"].as_str().unwrap(),
            "The quick brown fox jumps"
        );
    }
}
