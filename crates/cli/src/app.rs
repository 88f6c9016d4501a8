use anyhow::{Result, bail};
use llava_predict_assets::{download_weights, fetch_custom_weights};
use llava_predict_config::{AppConfig, ConfigOverrides};
use llava_predict_core::{
    IMAGE_PLACEHOLDER, PromptBuildOptions, known_templates, render_single_turn,
    tokenize_with_image_slots,
};
use llava_predict_pipeline::load_tokenizer;
use serde::Serialize;
use tracing::info;

use crate::args::{Cli, CliCommand, ConfigArgs, PromptArgs, WeightsArgs};

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Weights(args) => run_weights(&args),
        CliCommand::Prompt(args) => run_prompt(&args),
        CliCommand::Templates => {
            for name in known_templates() {
                println!("{name}");
            }
            Ok(())
        }
        CliCommand::Config(args) => run_config(&args),
    }
}

fn run_weights(args: &WeightsArgs) -> Result<()> {
    let (config, descriptor) = AppConfig::load_with_overrides(&ConfigOverrides::from(args))?;
    info!("Using configuration {}", descriptor.path.display());

    if !args.skip_default {
        let fetched = download_weights(&config.model.default_weights, &config.model.cache_dir)?;
        info!("Default weights ready ({} files fetched)", fetched.len());
        for path in &fetched {
            println!("{}", path.display());
        }
    }

    if let Some(custom) = args.custom.as_deref() {
        let dir = fetch_custom_weights(custom, &config.model.custom_weights_dir)?;
        info!(
            "Custom weights for `{}` extracted to {}",
            config.model.custom_name,
            dir.display()
        );
        println!("{}", dir.display());
    }
    Ok(())
}

#[derive(Serialize)]
struct PromptReport<'a> {
    template: &'a str,
    rendered_prompt: &'a str,
    stop_str: &'a str,
    prompt_tokens: Option<usize>,
    image_tokens: Option<usize>,
    tokens: Option<&'a [i64]>,
}

fn run_prompt(args: &PromptArgs) -> Result<()> {
    let Some(question) = args.prompt.as_deref() else {
        bail!("prompt is required (pass --prompt)");
    };
    let (config, _) = AppConfig::load_with_overrides(&ConfigOverrides::from(args))?;
    let template = config.inference.template.as_str();

    let user_message = format!("{IMAGE_PLACEHOLDER}\n{question}");
    let (rendered, stop_str) = render_single_turn(template, &user_message)?;

    let tokens = match args.tokenizer.as_deref() {
        Some(path) => {
            let tokenizer = load_tokenizer(path)?;
            let options = PromptBuildOptions::for_tokenizer(&tokenizer);
            Some(tokenize_with_image_slots(&tokenizer, &rendered, options)?)
        }
        None => None,
    };

    if args.json {
        let report = PromptReport {
            template,
            rendered_prompt: &rendered,
            stop_str: &stop_str,
            prompt_tokens: tokens.as_ref().map(|seq| seq.len()),
            image_tokens: tokens.as_ref().map(|seq| seq.image_token_count()),
            tokens: tokens.as_ref().map(|seq| seq.tokens.as_slice()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{rendered}");
    info!("Stop sequence: {stop_str:?}");
    if let Some(seq) = tokens {
        info!(
            "{} prompt tokens ({} image slots)",
            seq.len(),
            seq.image_token_count()
        );
        println!("{:?}", seq.tokens);
    }
    Ok(())
}

fn run_config(args: &ConfigArgs) -> Result<()> {
    let (config, descriptor) = AppConfig::load_with_overrides(&ConfigOverrides::from(args))?;
    if descriptor.created {
        info!("Wrote default configuration to {}", descriptor.path.display());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
