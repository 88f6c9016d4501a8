use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use serde::Serialize;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::{
    inference::DecodeParameters,
    stopping::KeywordsStoppingCriteria,
    streaming::{StreamStatus, TokenStreamer},
};

/// Forward pass of a vision-language model.
///
/// Implementations own their KV cache and position bookkeeping. Both
/// methods return the logits of the last position; leading singleton
/// dimensions are allowed.
pub trait VisionLanguageModel: Send {
    fn device(&self) -> &Device;
    fn dtype(&self) -> DType;
    fn eos_token_id(&self) -> Option<u32>;

    /// Runs the full prompt. `input_ids` may contain the image sentinel,
    /// which the model replaces with features computed from `images`.
    fn prefill(&mut self, input_ids: &[i64], images: &Tensor) -> Result<Tensor>;

    /// Feeds one freshly sampled token through the cached context.
    fn decode_step(&mut self, token: u32) -> Result<Tensor>;

    /// Drops any cached state from a previous request.
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Eos,
    StopSequence,
    Length,
    /// The stream consumer went away mid-generation.
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub prompt_tokens: usize,
    pub generated_tokens: Vec<u32>,
    pub finish_reason: FinishReason,
}

pub struct GenerationRequest<'a> {
    pub prompt_ids: &'a [i64],
    pub images: &'a Tensor,
    pub params: &'a DecodeParameters,
    pub stopping: Option<&'a KeywordsStoppingCriteria>,
    pub tokenizer: &'a Tokenizer,
}

/// Run the decode loop, feeding every sampled token to `streamer`.
///
/// The streamer always receives `end()`, also when the loop fails, so a
/// consumer never waits for text that will not come.
pub fn generate(
    model: &mut dyn VisionLanguageModel,
    req: &GenerationRequest<'_>,
    streamer: &mut dyn TokenStreamer,
) -> Result<GenerationOutcome> {
    let result = decode_loop(model, req, streamer);
    let ended = streamer.end();
    let outcome = result?;
    ended?;
    debug!(
        prompt_tokens = outcome.prompt_tokens,
        generated = outcome.generated_tokens.len(),
        finish_reason = ?outcome.finish_reason,
        "generation finished"
    );
    Ok(outcome)
}

fn decode_loop(
    model: &mut dyn VisionLanguageModel,
    req: &GenerationRequest<'_>,
    streamer: &mut dyn TokenStreamer,
) -> Result<GenerationOutcome> {
    let params = req.params;
    let prompt_ids: Vec<u32> = req
        .prompt_ids
        .iter()
        .filter_map(|&id| u32::try_from(id).ok())
        .collect();
    let mut generated = Vec::with_capacity(params.max_new_tokens.min(4096));

    if streamer.put(&prompt_ids)? == StreamStatus::Closed {
        return Ok(outcome(req, generated, FinishReason::Disconnected));
    }
    if params.max_new_tokens == 0 {
        return Ok(outcome(req, generated, FinishReason::Length));
    }

    let seed = params.seed.unwrap_or_else(random_seed);
    let mut processor = LogitsProcessor::from_sampling(seed, params.sampling());
    let eos = model.eos_token_id();

    model.reset();
    let mut logits = model
        .prefill(req.prompt_ids, req.images)
        .context("prefill forward pass failed")?;

    let finish_reason = loop {
        let next = processor
            .sample(&logits.flatten_all()?)
            .context("failed to sample next token")?;
        generated.push(next);

        if streamer.put(&[next])? == StreamStatus::Closed {
            break FinishReason::Disconnected;
        }
        if eos == Some(next) {
            break FinishReason::Eos;
        }
        if req
            .stopping
            .is_some_and(|criteria| criteria.should_stop(&generated, req.tokenizer))
        {
            break FinishReason::StopSequence;
        }
        if generated.len() >= params.max_new_tokens {
            break FinishReason::Length;
        }

        logits = if params.use_cache {
            model.decode_step(next)
        } else {
            let mut full = req.prompt_ids.to_vec();
            full.extend(generated.iter().map(|&id| i64::from(id)));
            model.reset();
            model.prefill(&full, req.images)
        }
        .with_context(|| format!("decode step {} failed", generated.len()))?;
    };

    Ok(outcome(req, generated, finish_reason))
}

fn outcome(
    req: &GenerationRequest<'_>,
    generated_tokens: Vec<u32>,
    finish_reason: FinishReason,
) -> GenerationOutcome {
    GenerationOutcome {
        prompt_tokens: req.prompt_ids.len(),
        generated_tokens,
        finish_reason,
    }
}

fn random_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(299_792_458)
}
