//! PEFT adapter configuration and weight merging.
//!
//! Adapters ship a pair of low-rank matrices per targeted projection. Merging
//! folds each pair into the frozen base weight:
//!
//! `W' = W + B @ A * (alpha / r)`
//!
//! so the wrapped model generates with adapter behavior at no per-call cost.

use candle_core::{DType, Tensor};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::Result;

fn default_rank() -> usize {
    8
}

fn default_alpha() -> f64 {
    16.0
}

/// Adapter hyperparameters from `adapter_config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct PeftAdapterConfig {
    #[serde(default = "default_rank")]
    pub r: usize,

    #[serde(default = "default_alpha")]
    pub lora_alpha: f64,

    #[serde(default)]
    pub lora_dropout: f64,

    #[serde(default)]
    pub base_model_name_or_path: Option<String>,

    #[serde(default)]
    pub target_modules: Vec<String>,
}

impl PeftAdapterConfig {
    /// Scaling applied to the low-rank delta.
    pub fn scaling(&self) -> f64 {
        self.lora_alpha / self.r as f64
    }
}

/// Map a PEFT adapter tensor stem to the base model tensor it targets.
///
/// Adapter checkpoints prefix every entry with `base_model.model.`, e.g.
/// `base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight` targets
/// `model.layers.0.self_attn.q_proj.weight`.
fn base_tensor_name(stem: &str) -> String {
    let stem = stem.strip_prefix("base_model.model.").unwrap_or(stem);
    format!("{}.weight", stem)
}

/// Fold adapter weights into the base weights in place.
///
/// Returns the number of base tensors updated. Adapter pairs targeting
/// tensors absent from the base map are skipped with a warning; an adapter
/// whose pairs match nothing produces a merged count of zero, which callers
/// reject as an incompatible adapter.
pub fn merge_into_base(
    base: &mut HashMap<String, Tensor>,
    adapter: &HashMap<String, Tensor>,
    scaling: f64,
) -> Result<usize> {
    let mut merged = 0usize;

    for (name, lora_a) in adapter {
        let Some(stem) = name.strip_suffix(".lora_A.weight") else {
            continue;
        };

        let b_name = format!("{}.lora_B.weight", stem);
        let Some(lora_b) = adapter.get(&b_name) else {
            tracing::warn!(tensor = %name, "adapter A matrix without matching B matrix, skipping");
            continue;
        };

        let target = base_tensor_name(stem);
        let Some(weight) = base.get(&target) else {
            tracing::warn!(tensor = %target, "adapter targets a tensor missing from the base model, skipping");
            continue;
        };

        // PEFT stores A as (r, in) and B as (out, r); the delta matches the
        // (out, in) projection weight.
        let delta = lora_b
            .to_dtype(DType::F32)?
            .matmul(&lora_a.to_dtype(DType::F32)?)?
            .affine(scaling, 0.0)?;

        let original_dtype = weight.dtype();
        let updated = (weight.to_dtype(DType::F32)? + delta)?.to_dtype(original_dtype)?;
        base.insert(target, updated);
        merged += 1;
    }

    tracing::debug!(merged, "folded adapter weights into base model");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_scaling() {
        let config: PeftAdapterConfig =
            serde_json::from_str(r#"{ "r": 8, "lora_alpha": 16.0 }"#).unwrap();
        assert_eq!(config.scaling(), 2.0);
    }

    #[test]
    fn test_config_defaults() {
        let config: PeftAdapterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.r, 8);
        assert_eq!(config.lora_alpha, 16.0);
        assert!(config.base_model_name_or_path.is_none());
    }

    #[test]
    fn test_base_tensor_name_strips_peft_prefix() {
        assert_eq!(
            base_tensor_name("base_model.model.model.layers.0.self_attn.q_proj"),
            "model.layers.0.self_attn.q_proj.weight"
        );
        assert_eq!(base_tensor_name("lm_head"), "lm_head.weight");
    }

    #[test]
    fn test_merge_applies_scaled_delta() -> Result<()> {
        let device = Device::Cpu;

        // W: (2, 3), A: (1, 3), B: (2, 1), scaling 2.0
        let weight = Tensor::from_slice(&[1f32, 0., 0., 0., 1., 0.], (2, 3), &device)?;
        let lora_a = Tensor::from_slice(&[1f32, 2., 3.], (1, 3), &device)?;
        let lora_b = Tensor::from_slice(&[1f32, 10.], (2, 1), &device)?;

        let mut base = HashMap::from([("model.layers.0.self_attn.q_proj.weight".to_string(), weight)]);
        let adapter = HashMap::from([
            (
                "base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight".to_string(),
                lora_a,
            ),
            (
                "base_model.model.model.layers.0.self_attn.q_proj.lora_B.weight".to_string(),
                lora_b,
            ),
        ]);

        let merged = merge_into_base(&mut base, &adapter, 2.0)?;
        assert_eq!(merged, 1);

        let updated = base["model.layers.0.self_attn.q_proj.weight"].to_vec2::<f32>()?;
        // delta = B @ A * 2 = [[2, 4, 6], [20, 40, 60]]
        assert_eq!(updated[0], vec![3., 4., 6.]);
        assert_eq!(updated[1], vec![20., 41., 60.]);
        Ok(())
    }

    #[test]
    fn test_merge_skips_unmatched_targets() -> Result<()> {
        let device = Device::Cpu;
        let mut base = HashMap::from([(
            "model.embed_tokens.weight".to_string(),
            Tensor::zeros((2, 2), DType::F32, &device)?,
        )]);
        let adapter = HashMap::from([
            (
                "base_model.model.model.layers.5.mlp.gate_proj.lora_A.weight".to_string(),
                Tensor::zeros((1, 2), DType::F32, &device)?,
            ),
            (
                "base_model.model.model.layers.5.mlp.gate_proj.lora_B.weight".to_string(),
                Tensor::zeros((2, 1), DType::F32, &device)?,
            ),
        ]);

        let merged = merge_into_base(&mut base, &adapter, 1.0)?;
        assert_eq!(merged, 0);
        Ok(())
    }
}
