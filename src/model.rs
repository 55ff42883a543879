//! Causal model abstraction and the candle-backed implementation.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig};
use std::collections::HashMap;

use crate::config::{DEFAULT_EOS_TOKEN_ID, DEFAULT_MAX_NEW_TOKENS};
use crate::device::ComputeDevice;
use crate::error::Result;

/// Greedy decode; sampling parameters are deliberately not exposed.
const GENERATION_SEED: u64 = 299792458;

/// Stop conditions for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOptions {
    /// Hard cap on newly generated tokens.
    pub max_new_tokens: usize,
    /// Token id that terminates generation.
    pub eos_token_id: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            eos_token_id: DEFAULT_EOS_TOKEN_ID,
        }
    }
}

/// Narrow contract to the generation-capable model.
///
/// The pipeline is written against this trait so backends can be swapped and
/// generation logic tested without model weights.
pub trait CausalModel: Send + Sync {
    /// Run autoregressive generation, returning the full token sequence
    /// (prompt plus completion).
    ///
    /// The attention mask accompanies the input ids; backends that derive
    /// their own masking may ignore it.
    fn generate(
        &self,
        input_ids: &[u32],
        attention_mask: &[u32],
        options: &GenerationOptions,
    ) -> Result<Vec<u32>>;

    /// Ensure the weights are resident on the compute device. Idempotent;
    /// a no-op once resident (and always on CPU).
    fn ensure_resident(&self) -> Result<()> {
        Ok(())
    }
}

/// Turns fetched artifacts into a generation backend.
///
/// Injected at pipeline construction, next to
/// [`ArtifactSource`](crate::loader::ArtifactSource), so the whole load path
/// can run against stubs.
pub trait ModelBuilder: Send + Sync {
    /// Build a backend from the merged weights and the raw model
    /// configuration document.
    fn build(
        &self,
        weights: HashMap<String, Tensor>,
        config: serde_json::Value,
        device: &ComputeDevice,
    ) -> Result<Box<dyn CausalModel>>;
}

/// Default builder for Llama-family base models.
pub struct LlamaBuilder;

impl ModelBuilder for LlamaBuilder {
    fn build(
        &self,
        weights: HashMap<String, Tensor>,
        config: serde_json::Value,
        device: &ComputeDevice,
    ) -> Result<Box<dyn CausalModel>> {
        let config: LlamaConfig = serde_json::from_value(config)?;
        Ok(Box::new(LlamaCausalLm::from_tensors(weights, config, device)?))
    }
}

/// Llama-family causal LM built from merged weights.
pub struct LlamaCausalLm {
    model: Llama,
    config: Config,
    device: ComputeDevice,
}

impl LlamaCausalLm {
    /// Build the model from a flat tensor map (base weights with the adapter
    /// already folded in).
    pub fn from_tensors(
        tensors: HashMap<String, Tensor>,
        config: LlamaConfig,
        device: &ComputeDevice,
    ) -> Result<Self> {
        let config = config.into_config(false);
        let vb = VarBuilder::from_tensors(tensors, device.dtype(), device.device());
        let model = Llama::load(vb, &config)?;
        Ok(Self {
            model,
            config,
            device: device.clone(),
        })
    }
}

impl CausalModel for LlamaCausalLm {
    fn generate(
        &self,
        input_ids: &[u32],
        _attention_mask: &[u32],
        options: &GenerationOptions,
    ) -> Result<Vec<u32>> {
        // Fresh KV cache per call: no state carries across requests.
        let mut cache = Cache::new(true, self.device.dtype(), &self.config, self.device.device())?;
        let mut logits_processor = LogitsProcessor::new(GENERATION_SEED, None, None);

        let mut tokens: Vec<u32> = input_ids.to_vec();
        for index in 0..options.max_new_tokens {
            let (context_size, context_index) = if index > 0 {
                (1, tokens.len() - 1)
            } else {
                (tokens.len(), 0)
            };
            let context = &tokens[tokens.len() - context_size..];

            let input = Tensor::new(context, self.device.device())?.unsqueeze(0)?;
            let input = self.device.place(&input)?;

            let logits = self.model.forward(&input, context_index, &mut cache)?;
            let logits = logits.squeeze(0)?;

            let next = logits_processor.sample(&logits)?;
            tokens.push(next);
            if next == options.eos_token_id {
                break;
            }
        }

        Ok(tokens)
    }

    fn ensure_resident(&self) -> Result<()> {
        // Residency is fixed at load time; nothing to move here. Kept as the
        // explicit wake point so callers can time it.
        tracing::trace!(accelerator = self.device.is_accelerator(), "model residency checked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let options = GenerationOptions::default();
        assert_eq!(options.max_new_tokens, 10);
        assert_eq!(options.eos_token_id, 3);
    }
}
