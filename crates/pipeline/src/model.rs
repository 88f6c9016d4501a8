use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use candle_core::{DType, Device};
use llava_predict_core::{ImageProcessor, VisionLanguageModel};
use serde::Serialize;
use tokenizers::Tokenizer;

/// Which weights a predictor runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSource {
    /// A released checkpoint straight from the hub.
    Base { name: String, repo: String },
    /// LoRA weights extracted to `path`, applied on top of `base_repo`.
    CustomLora {
        name: String,
        path: PathBuf,
        base_repo: String,
    },
}

impl ModelSource {
    pub fn name(&self) -> &str {
        match self {
            ModelSource::Base { name, .. } | ModelSource::CustomLora { name, .. } => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, ModelSource::CustomLora { .. })
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Base { name, repo } => write!(f, "{name} ({repo})"),
            ModelSource::CustomLora {
                name,
                path,
                base_repo,
            } => write!(f, "{name} ({} on {base_repo})", path.display()),
        }
    }
}

pub struct LoadedModel {
    pub model: Box<dyn VisionLanguageModel>,
    pub tokenizer: Tokenizer,
    pub image_processor: Box<dyn ImageProcessor>,
    /// Maximum sequence length the model accepts, prompt included.
    pub context_len: usize,
}

/// Builds a runnable model from a [`ModelSource`].
pub trait ModelLoader: Send + Sync {
    fn load(&self, source: &ModelSource, device: &Device, dtype: DType) -> Result<LoadedModel>;
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|err| anyhow!("failed to load tokenizer from {}: {err}", path.display()))
}
