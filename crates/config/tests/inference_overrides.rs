use std::fs;

use anyhow::Result;
use llava_predict_config::{
    AppConfig, CommonInferenceArgs, CommonModelArgs, ConfigOverrides, InferenceOverride,
    build_config_overrides,
};
use llava_predict_core::{DecodeParameters, DecodeParametersPatch, runtime::DeviceKind};

#[test]
fn inference_defaults_embed_decode_defaults() {
    let cfg = AppConfig::default();

    assert_eq!(cfg.inference.template, "llava_v1");
    assert_eq!(cfg.inference.stream_timeout_secs, 20);
    assert_eq!(cfg.inference.decode.max_new_tokens, 1024);
    assert_eq!(cfg.inference.decode.temperature, 0.2);
    assert_eq!(cfg.inference.decode.top_p, 1.0);
    assert_eq!(cfg.inference.decode.seed, None);
    assert!(cfg.inference.decode.use_cache);
    assert_eq!(cfg.model.base_repo, "liuhaotian/llava-v1.5-13b");
    assert_eq!(cfg.model.custom_name, "llava-v1.5-13b-custom-lora");
}

#[test]
fn decode_patch_updates_only_selected_fields() {
    let mut decode = DecodeParameters::default();
    decode += &DecodeParametersPatch {
        max_new_tokens: Some(64),
        top_p: Some(0.9),
        use_cache: Some(false),
        ..Default::default()
    };

    assert_eq!(decode.max_new_tokens, 64);
    assert_eq!(decode.top_p, 0.9);
    assert!(!decode.use_cache);
    assert_eq!(decode.temperature, 0.2);
}

#[test]
fn cli_overrides_win_over_file_values() {
    let mut cfg = AppConfig::default();
    let overrides = ConfigOverrides {
        base_repo: Some("liuhaotian/llava-v1.5-7b".to_string()),
        inference: InferenceOverride {
            device: Some(DeviceKind::Cuda),
            decode: DecodeParametersPatch {
                temperature: Some(0.0),
                ..Default::default()
            },
            ..InferenceOverride::default()
        },
        ..ConfigOverrides::default()
    };

    cfg.apply_overrides(&overrides);

    assert_eq!(cfg.model.base_repo, "liuhaotian/llava-v1.5-7b");
    assert_eq!(cfg.inference.device, DeviceKind::Cuda);
    assert_eq!(cfg.inference.decode.temperature, 0.0);
    assert_eq!(cfg.inference.decode.max_new_tokens, 1024);
}

#[test]
fn no_cache_flag_maps_to_use_cache_false() {
    let inference = CommonInferenceArgs {
        no_cache: true,
        stream_timeout: Some(5),
        ..CommonInferenceArgs::default()
    };
    let overrides = build_config_overrides(&CommonModelArgs::default(), &inference);

    assert_eq!(overrides.inference.decode.use_cache, Some(false));
    assert_eq!(overrides.inference.stream_timeout_secs, Some(5));
    assert!(overrides.config_path.is_none());

    let quiet = build_config_overrides(&CommonModelArgs::default(), &CommonInferenceArgs::default());
    assert_eq!(quiet.inference.decode.use_cache, None);
}

#[test]
fn load_or_init_writes_defaults_then_reads_them_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested/llava-predict.toml");

    let (cfg, descriptor) = AppConfig::load_or_init(Some(&path))?;
    assert!(descriptor.created);
    assert!(path.is_file());
    assert_eq!(cfg.inference.template, "llava_v1");

    let (reloaded, descriptor) = AppConfig::load_or_init(Some(&path))?;
    assert!(!descriptor.created);
    assert_eq!(reloaded.model.default_weights, cfg.model.default_weights);
    assert_eq!(reloaded.inference.decode.max_new_tokens, 1024);
    Ok(())
}

#[test]
fn partial_file_keeps_remaining_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("llava-predict.toml");
    fs::write(
        &path,
        "[inference]\ntemperature = 0.7\nmax_new_tokens = 16\ndevice = \"metal\"\n",
    )?;

    let (cfg, _) = AppConfig::load_or_init(Some(&path))?;

    assert_eq!(cfg.inference.decode.temperature, 0.7);
    assert_eq!(cfg.inference.decode.max_new_tokens, 16);
    assert_eq!(cfg.inference.device, DeviceKind::Metal);
    assert_eq!(cfg.inference.decode.top_p, 1.0);
    assert_eq!(cfg.model.cache_dir.to_str(), Some("models"));
    Ok(())
}

#[test]
fn malformed_file_is_reported_with_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[inference\n")?;

    let err = AppConfig::load_or_init(Some(&path)).err().expect("parse error");
    assert!(err.to_string().contains("broken.toml"));
    Ok(())
}

#[test]
fn zero_stream_timeout_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("llava-predict.toml");
    fs::write(&path, "[inference]\nstream_timeout_secs = 0\n")?;

    let err = AppConfig::load_or_init(Some(&path)).err().expect("zero timeout");
    assert!(format!("{err:#}").contains("stream_timeout_secs"));
    assert!(err.to_string().contains("llava-predict.toml"));

    let fresh = dir.path().join("fresh.toml");
    let overrides = ConfigOverrides {
        config_path: Some(fresh),
        inference: InferenceOverride {
            stream_timeout_secs: Some(0),
            ..InferenceOverride::default()
        },
        ..ConfigOverrides::default()
    };
    assert!(AppConfig::load_with_overrides(&overrides).is_err());
    Ok(())
}
