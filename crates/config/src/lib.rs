pub mod args;
pub mod config;

pub use args::{CommonInferenceArgs, CommonModelArgs, build_config_overrides};
pub use config::{
    AppConfig, ConfigDescriptor, ConfigOverrides, DEFAULT_CONFIG_FILE, InferenceOverride,
    InferenceSettings, ModelSettings, save_config,
};
