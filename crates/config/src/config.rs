use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use llava_predict_assets::{BASE_MODEL_REPO, WeightSource, default_weight_sources};
use llava_predict_core::{
    DEFAULT_TEMPLATE, DecodeParameters, DecodeParametersPatch,
    runtime::{DeviceKind, Precision},
};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "llava-predict.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub inference: InferenceSettings,
}

/// Where weights come from and where they land on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_repo: String,
    pub base_name: String,
    pub custom_name: String,
    pub custom_weights_dir: PathBuf,
    /// Backing store for the hub client.
    pub cache_dir: PathBuf,
    pub default_weights: Vec<WeightSource>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_repo: BASE_MODEL_REPO.to_string(),
            base_name: "llava-v1.5-13b".to_string(),
            custom_name: "llava-v1.5-13b-custom-lora".to_string(),
            custom_weights_dir: PathBuf::from("/src/custom_weights"),
            cache_dir: PathBuf::from("models"),
            default_weights: default_weight_sources(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub device: DeviceKind,
    pub precision: Option<Precision>,
    pub template: String,
    pub stream_timeout_secs: u64,
    #[serde(flatten)]
    pub decode: DecodeParameters,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            device: DeviceKind::Cpu,
            precision: None,
            template: DEFAULT_TEMPLATE.to_string(),
            stream_timeout_secs: 20,
            decode: DecodeParameters::default(),
        }
    }
}

impl InferenceSettings {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.stream_timeout_secs > 0,
            "stream_timeout_secs must be at least 1"
        );
        Ok(())
    }
}

pub struct ConfigDescriptor {
    pub path: PathBuf,
    /// True when the file did not exist and was written with defaults.
    pub created: bool,
}

impl AppConfig {
    /// Read the TOML file at `path` (or the default file name), writing one
    /// with default values if it does not exist yet.
    pub fn load_or_init(path: Option<&Path>) -> Result<(Self, ConfigDescriptor)> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            let cfg = AppConfig::default();
            let serialized = toml::to_string_pretty(&cfg)?;
            fs::write(&path, serialized)
                .with_context(|| format!("failed to write configuration to {}", path.display()))?;
            info!(path = %path.display(), "wrote default configuration");
            return Ok((cfg, ConfigDescriptor { path, created: true }));
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse configuration at {}", path.display()))?;
        cfg.inference
            .validate()
            .with_context(|| format!("invalid configuration at {}", path.display()))?;
        Ok((cfg, ConfigDescriptor { path, created: false }))
    }

    pub fn load_with_overrides(overrides: &ConfigOverrides) -> Result<(Self, ConfigDescriptor)> {
        let (mut config, descriptor) = Self::load_or_init(overrides.config_path.as_deref())?;
        config.apply_overrides(overrides);
        config.inference.validate()?;
        Ok((config, descriptor))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(repo) = overrides.base_repo.as_ref() {
            self.model.base_repo = repo.clone();
        }
        if let Some(dir) = overrides.custom_weights_dir.as_ref() {
            self.model.custom_weights_dir = dir.clone();
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.model.cache_dir = dir.clone();
        }
        self.inference += &overrides.inference;
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub base_repo: Option<String>,
    pub custom_weights_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub inference: InferenceOverride,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceOverride {
    pub device: Option<DeviceKind>,
    pub precision: Option<Precision>,
    pub template: Option<String>,
    pub stream_timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub decode: DecodeParametersPatch,
}

impl std::ops::AddAssign<&InferenceOverride> for InferenceSettings {
    fn add_assign(&mut self, rhs: &InferenceOverride) {
        if let Some(device) = rhs.device {
            self.device = device;
        }
        if rhs.precision.is_some() {
            self.precision = rhs.precision;
        }
        if let Some(template) = rhs.template.as_ref() {
            self.template = template.clone();
        }
        if let Some(secs) = rhs.stream_timeout_secs {
            self.stream_timeout_secs = secs;
        }
        self.decode += &rhs.decode;
    }
}

pub fn save_config(descriptor: &ConfigDescriptor, config: &AppConfig) -> Result<()> {
    let serialized = toml::to_string_pretty(config)?;
    fs::write(&descriptor.path, serialized).with_context(|| {
        format!(
            "failed to write configuration to {}",
            descriptor.path.display()
        )
    })
}
