//! Unified error types for the pipeline.

use thiserror::Error;

/// Fixed message used when adapter metadata carries no usable `peft` block.
pub const CONFIG_MISSING_MSG: &str = "Config file for this model does not exist or is invalid.";

/// Fixed message used when the `peft` block carries no base model reference.
pub const BASE_MODEL_MISSING_MSG: &str = "There's no base model ID in configuration file.";

/// Unified error type for pipeline construction and generation.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Registry lookup failed (network, auth, malformed response).
    #[error("Registry lookup failed for {model_id}: {source}")]
    Registry {
        model_id: String,
        #[source]
        source: reqwest::Error,
    },

    /// The registry has no model under this identifier.
    #[error("Model not found in registry: {0}")]
    NotFound(String),

    /// Adapter metadata failed boundary validation. The message is fixed
    /// and user-visible.
    #[error("{0}")]
    Configuration(String),

    /// Base model weights could not be loaded. Fatal to construction.
    #[error("Failed to load base model {model_id}: {reason}")]
    ModelLoad { model_id: String, reason: String },

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] candle_core::Error),

    #[error("Hub download failed: {0}")]
    Hub(#[from] hf_hub::api::tokio::ApiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Create a configuration error with a caller-supplied message.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        PipelineError::Configuration(msg.into())
    }

    /// Create a model load error, attaching the model identifier as context.
    pub fn model_load<S: Into<String>>(model_id: S, reason: impl ToString) -> Self {
        PipelineError::ModelLoad {
            model_id: model_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a tokenizer error.
    pub fn tokenizer(err: impl ToString) -> Self {
        PipelineError::Tokenizer(err.to_string())
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_messages_render_verbatim() {
        let err = PipelineError::configuration(CONFIG_MISSING_MSG);
        assert_eq!(
            err.to_string(),
            "Config file for this model does not exist or is invalid."
        );

        let err = PipelineError::configuration(BASE_MODEL_MISSING_MSG);
        assert_eq!(
            err.to_string(),
            "There's no base model ID in configuration file."
        );
    }

    #[test]
    fn test_model_load_carries_context() {
        let err = PipelineError::model_load("org/base-model", "weights not found");
        let msg = err.to_string();
        assert!(msg.contains("org/base-model"));
        assert!(msg.contains("weights not found"));
    }
}
