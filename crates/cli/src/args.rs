use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use llava_predict_config::{
    CommonInferenceArgs, CommonModelArgs, ConfigOverrides, build_config_overrides,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "LLaVA prediction toolkit", long_about = None)]
pub struct Cli {
    /// Quiet mode - only print results, no logs.
    #[arg(short, long, global = true, help_heading = "Application")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Download the default weights and optionally unpack custom LoRA weights.
    Weights(WeightsArgs),
    /// Render a single-turn prompt and optionally tokenize it.
    Prompt(PromptArgs),
    /// List the known conversation templates.
    Templates,
    /// Print the effective configuration.
    Config(ConfigArgs),
}

#[derive(ClapArgs, Debug)]
pub struct WeightsArgs {
    #[command(flatten)]
    pub model: CommonModelArgs,

    /// URL or local path of a custom weights tarball.
    #[arg(long, value_name = "URL|PATH", help_heading = "Weights")]
    pub custom: Option<String>,

    /// Skip the default weight download.
    #[arg(long, help_heading = "Weights")]
    pub skip_default: bool,
}

#[derive(ClapArgs, Debug)]
pub struct PromptArgs {
    #[command(flatten)]
    pub model: CommonModelArgs,

    #[command(flatten)]
    pub inference: CommonInferenceArgs,

    /// User question about the image.
    #[arg(long)]
    pub prompt: Option<String>,

    /// tokenizer.json used to show the token ids of the rendered prompt.
    #[arg(long, value_name = "PATH")]
    pub tokenizer: Option<PathBuf>,

    /// Emit a JSON document instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub model: CommonModelArgs,

    #[command(flatten)]
    pub inference: CommonInferenceArgs,
}

impl From<&PromptArgs> for ConfigOverrides {
    fn from(args: &PromptArgs) -> Self {
        build_config_overrides(&args.model, &args.inference)
    }
}

impl From<&ConfigArgs> for ConfigOverrides {
    fn from(args: &ConfigArgs) -> Self {
        build_config_overrides(&args.model, &args.inference)
    }
}

impl From<&WeightsArgs> for ConfigOverrides {
    fn from(args: &WeightsArgs) -> Self {
        build_config_overrides(&args.model, &CommonInferenceArgs::default())
    }
}
