//! Adapter-augmented text generation.
//!
//! Given a PEFT adapter identifier, [`TextGenerationPipeline`] resolves the
//! adapter's base model from the registry, loads the base weights and
//! tokenizer, folds the adapter weights in, and exposes a text-completion
//! call with an optional GPU idle/wake lifecycle.

pub mod config;
pub mod device;
pub mod error;
pub mod idle;
pub mod loader;
pub mod lora;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod registry;

// Re-export commonly used types
pub use config::PipelineSettings;
pub use device::ComputeDevice;
pub use error::{PipelineError, Result};
pub use idle::{IdleLease, WitnessGuard};
pub use loader::{ArtifactSource, HubFetcher};
pub use lora::PeftAdapterConfig;
pub use model::{CausalModel, GenerationOptions, LlamaBuilder, ModelBuilder};
pub use pipeline::{GeneratedText, TextGenerationPipeline};
pub use registry::{AdapterInfo, HubRegistry, ModelRegistry, PeftConfig};
