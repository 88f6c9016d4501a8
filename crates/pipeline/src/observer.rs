use std::fmt;
use std::time::Duration;

use llava_predict_core::FinishReason;

/// Lifecycle events of a [`crate::Predictor`].
#[derive(Debug, Clone)]
pub enum PredictorEvent {
    WeightsPrepared {
        fetched_files: usize,
        duration: Duration,
    },

    ModelLoadStarted {
        model: String,
        custom: bool,
    },

    ModelLoadFinished {
        model: String,
        context_len: usize,
        duration: Duration,
    },

    GenerationStarted {
        model: String,
        prompt_tokens: usize,
        max_new_tokens: usize,
    },

    GenerationFinished {
        model: String,
        prompt_tokens: usize,
        response_tokens: usize,
        finish_reason: FinishReason,
        duration: Duration,
    },
}

fn format_duration_s(duration: &Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

impl serde::Serialize for PredictorEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use PredictorEvent::*;

        match self {
            WeightsPrepared {
                fetched_files,
                duration,
            } => {
                #[derive(serde::Serialize)]
                struct Event {
                    kind: &'static str,
                    fetched_files: usize,
                    duration_s: String,
                }

                Event {
                    kind: "weights_prepared",
                    fetched_files: *fetched_files,
                    duration_s: format_duration_s(duration),
                }
                .serialize(serializer)
            }
            ModelLoadStarted { model, custom } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    model: &'a str,
                    custom: bool,
                }

                Event {
                    kind: "model_load_started",
                    model,
                    custom: *custom,
                }
                .serialize(serializer)
            }
            ModelLoadFinished {
                model,
                context_len,
                duration,
            } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    model: &'a str,
                    context_len: usize,
                    duration_s: String,
                }

                Event {
                    kind: "model_load_finished",
                    model,
                    context_len: *context_len,
                    duration_s: format_duration_s(duration),
                }
                .serialize(serializer)
            }
            GenerationStarted {
                model,
                prompt_tokens,
                max_new_tokens,
            } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    model: &'a str,
                    prompt_tokens: usize,
                    max_new_tokens: usize,
                }

                Event {
                    kind: "generation_started",
                    model,
                    prompt_tokens: *prompt_tokens,
                    max_new_tokens: *max_new_tokens,
                }
                .serialize(serializer)
            }
            GenerationFinished {
                model,
                prompt_tokens,
                response_tokens,
                finish_reason,
                duration,
            } => {
                #[derive(serde::Serialize)]
                struct Event<'a> {
                    kind: &'static str,
                    model: &'a str,
                    prompt_tokens: usize,
                    response_tokens: usize,
                    finish_reason: FinishReason,
                    duration_s: String,
                }

                Event {
                    kind: "generation_finished",
                    model,
                    prompt_tokens: *prompt_tokens,
                    response_tokens: *response_tokens,
                    finish_reason: *finish_reason,
                    duration_s: format_duration_s(duration),
                }
                .serialize(serializer)
            }
        }
    }
}

impl fmt::Display for PredictorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PredictorEvent::*;

        match self {
            WeightsPrepared {
                fetched_files,
                duration,
            } => write!(
                f,
                "WeightsPrepared fetched_files={fetched_files} in {}",
                format_duration_s(duration)
            ),
            ModelLoadStarted { model, custom } => {
                if *custom {
                    write!(f, "ModelLoadStarted {model} (custom lora)")
                } else {
                    write!(f, "ModelLoadStarted {model}")
                }
            }
            ModelLoadFinished {
                model,
                context_len,
                duration,
            } => write!(
                f,
                "ModelLoadFinished {model} context_len={context_len} in {}",
                format_duration_s(duration)
            ),
            GenerationStarted {
                model,
                prompt_tokens,
                max_new_tokens,
            } => write!(
                f,
                "GenerationStarted {model} prompt_tokens={prompt_tokens} max_new_tokens={max_new_tokens}"
            ),
            GenerationFinished {
                model,
                prompt_tokens,
                response_tokens,
                finish_reason,
                duration,
            } => write!(
                f,
                "GenerationFinished {model} prompt_tokens={prompt_tokens} response_tokens={response_tokens} finish_reason={finish_reason:?} in {}",
                format_duration_s(duration)
            ),
        }
    }
}

/// Receives [`PredictorEvent`]s. Generation events arrive from the worker
/// thread.
pub trait PredictorObserver: Send + Sync {
    fn on_event(&self, _event: &PredictorEvent) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl PredictorObserver for NoopObserver {}
