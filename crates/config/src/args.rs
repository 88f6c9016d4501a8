use std::path::PathBuf;

use clap::Args;
use llava_predict_core::{
    DecodeParametersPatch,
    runtime::{DeviceKind, Precision},
};

use crate::config::{ConfigOverrides, InferenceOverride};

#[derive(Args, Debug, Clone, Default)]
pub struct CommonModelArgs {
    /// Path to the configuration file (created with defaults when missing).
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub config: Option<PathBuf>,

    /// Hugging Face repository of the base model.
    #[arg(long, value_name = "REPO", help_heading = "Application")]
    pub base_repo: Option<String>,

    /// Directory that custom LoRA weights are extracted into.
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub custom_weights_dir: Option<PathBuf>,

    /// Hub cache directory.
    #[arg(long, value_name = "PATH", help_heading = "Application")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonInferenceArgs {
    /// Device backend (cpu/metal/cuda).
    #[arg(long, help_heading = "Inference")]
    pub device: Option<DeviceKind>,

    /// Numeric precision override.
    #[arg(long, help_heading = "Inference")]
    pub dtype: Option<Precision>,

    /// Conversation template.
    #[arg(long, help_heading = "Inference")]
    pub template: Option<String>,

    /// Seconds to wait for each streamed chunk.
    #[arg(long, value_name = "SECS", help_heading = "Inference")]
    pub stream_timeout: Option<u64>,

    #[arg(long, help_heading = "Inference")]
    pub max_new_tokens: Option<usize>,

    /// Re-run the full sequence every step instead of using the KV cache.
    #[arg(long, help_heading = "Inference")]
    pub no_cache: bool,

    /// Softmax temperature; 0 decodes greedily.
    #[arg(long, help_heading = "Inference")]
    pub temperature: Option<f64>,

    /// Nucleus sampling probability mass.
    #[arg(long, help_heading = "Inference")]
    pub top_p: Option<f64>,

    #[arg(long, help_heading = "Inference")]
    pub seed: Option<u64>,
}

impl From<&CommonInferenceArgs> for InferenceOverride {
    fn from(value: &CommonInferenceArgs) -> Self {
        Self {
            device: value.device,
            precision: value.dtype,
            template: value.template.clone(),
            stream_timeout_secs: value.stream_timeout,
            decode: DecodeParametersPatch {
                max_new_tokens: value.max_new_tokens,
                temperature: value.temperature,
                top_p: value.top_p,
                seed: value.seed,
                use_cache: value.no_cache.then_some(false),
            },
        }
    }
}

pub fn build_config_overrides(
    model: &CommonModelArgs,
    inference: &CommonInferenceArgs,
) -> ConfigOverrides {
    ConfigOverrides {
        config_path: model.config.clone(),
        base_repo: model.base_repo.clone(),
        custom_weights_dir: model.custom_weights_dir.clone(),
        cache_dir: model.cache_dir.clone(),
        inference: inference.into(),
    }
}
