use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Instant,
};

use anyhow::{Context, Result, anyhow, ensure};
use candle_core::{DType, Device};
use llava_predict_assets::{download_weights, fetch_custom_weights};
use llava_predict_config::{InferenceSettings, ModelSettings};
use llava_predict_core::{
    ChunkAssembler, DecodeParameters, DecodeParametersPatch, GenerationOutcome, GenerationRequest,
    IMAGE_PLACEHOLDER, ImageProcessor, InputError, KeywordsStoppingCriteria, PromptBuildOptions,
    TextStream, VisionLanguageModel, generate, load_image, render_single_turn,
    runtime::{default_dtype_for_device, prepare_device_and_dtype},
    text_stream, tokenize_with_image_slots,
};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::{
    model::{LoadedModel, ModelLoader, ModelSource},
    observer::{NoopObserver, PredictorEvent, PredictorObserver},
};

/// Sentinel weights value meaning "no custom weights".
pub const BASE_WEIGHTS_SENTINEL: &str = "weights";

/// A single prediction request.
#[derive(Debug, Clone)]
pub struct PredictRequest {
    /// Local path or http(s) URL of the input image.
    pub image: String,
    pub prompt: String,
    pub top_p: f64,
    pub temperature: f64,
    pub max_tokens: usize,
    pub seed: Option<u64>,
}

impl PredictRequest {
    pub fn new(image: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            prompt: prompt.into(),
            top_p: 1.0,
            temperature: 0.2,
            max_tokens: 1024,
            seed: None,
        }
    }

    fn decode_patch(&self) -> DecodeParametersPatch {
        DecodeParametersPatch {
            max_new_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            seed: self.seed,
            use_cache: None,
        }
    }
}

struct ReadyModel {
    source: ModelSource,
    model: Arc<Mutex<Box<dyn VisionLanguageModel>>>,
    tokenizer: Arc<Tokenizer>,
    image_processor: Arc<dyn ImageProcessor>,
    context_len: usize,
    device: Device,
    dtype: DType,
}

/// Loads a LLaVA model once and streams answers about images.
///
/// `setup` must succeed before `predict` is called. Predictions share the
/// model behind a mutex, so concurrent calls run one after another.
pub struct Predictor {
    model_settings: ModelSettings,
    inference: InferenceSettings,
    loader: Option<Arc<dyn ModelLoader>>,
    observer: Arc<dyn PredictorObserver>,
    ready: Option<ReadyModel>,
}

impl Predictor {
    pub fn new(
        model_settings: ModelSettings,
        inference: InferenceSettings,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self {
            model_settings,
            inference,
            loader: Some(loader),
            observer: Arc::new(NoopObserver),
            ready: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PredictorObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &dyn PredictorObserver {
        self.observer.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_some()
    }

    pub fn source(&self) -> Option<&ModelSource> {
        self.ready.as_ref().map(|ready| &ready.source)
    }

    /// Map the `weights` argument onto a model source, fetching custom
    /// weights when needed.
    pub fn resolve_source(&self, weights: Option<&str>) -> Result<ModelSource> {
        let settings = &self.model_settings;
        match weights {
            Some(weights) if weights != BASE_WEIGHTS_SENTINEL => {
                info!(weights, "loading custom LLaVA lora model");
                let path = fetch_custom_weights(weights, &settings.custom_weights_dir)?;
                Ok(ModelSource::CustomLora {
                    name: settings.custom_name.clone(),
                    path,
                    base_repo: settings.base_repo.clone(),
                })
            }
            _ => {
                info!("loading base LLaVA model");
                Ok(ModelSource::Base {
                    name: settings.base_name.clone(),
                    repo: settings.base_repo.clone(),
                })
            }
        }
    }

    pub fn setup(&mut self, weights: Option<&str>) -> Result<()> {
        let loader = self
            .loader
            .clone()
            .context("predictor has no model loader")?;
        let start = Instant::now();
        let fetched = download_weights(
            &self.model_settings.default_weights,
            &self.model_settings.cache_dir,
        )
        .context("failed to download default weights")?;
        self.observer.on_event(&PredictorEvent::WeightsPrepared {
            fetched_files: fetched.len(),
            duration: start.elapsed(),
        });

        let source = self.resolve_source(weights)?;
        let (device, dtype) =
            prepare_device_and_dtype(self.inference.device, self.inference.precision)?;
        let dtype = dtype.unwrap_or_else(|| default_dtype_for_device(&device));

        self.observer.on_event(&PredictorEvent::ModelLoadStarted {
            model: source.name().to_string(),
            custom: source.is_custom(),
        });
        let start = Instant::now();
        let loaded = loader
            .load(&source, &device, dtype)
            .with_context(|| format!("failed to load model {source}"))?;
        let duration = start.elapsed();
        info!(model = %source, ?dtype, "model loaded in {:.2?}", duration);
        self.observer.on_event(&PredictorEvent::ModelLoadFinished {
            model: source.name().to_string(),
            context_len: loaded.context_len,
            duration,
        });

        self.install(source, loaded, device, dtype);
        Ok(())
    }

    /// Use an already loaded model, skipping downloads.
    pub fn from_loaded(source: ModelSource, loaded: LoadedModel, inference: InferenceSettings) -> Self {
        let device = loaded.model.device().clone();
        let dtype = loaded.model.dtype();
        let mut predictor = Self {
            model_settings: ModelSettings::default(),
            inference,
            loader: None,
            observer: Arc::new(NoopObserver),
            ready: None,
        };
        predictor.install(source, loaded, device, dtype);
        predictor
    }

    fn install(&mut self, source: ModelSource, loaded: LoadedModel, device: Device, dtype: DType) {
        self.ready = Some(ReadyModel {
            source,
            model: Arc::new(Mutex::new(loaded.model)),
            tokenizer: Arc::new(loaded.tokenizer),
            image_processor: Arc::from(loaded.image_processor),
            context_len: loaded.context_len,
            device,
            dtype,
        });
    }

    /// Start a prediction. The returned iterator yields text chunks as the
    /// model produces them.
    pub fn predict(&self, req: &PredictRequest) -> Result<Prediction> {
        let ready = self
            .ready
            .as_ref()
            .context("predictor is not set up; call setup() first")?;
        self.inference.validate()?;

        if req.prompt.trim().is_empty() {
            return Err(InputError::EmptyPrompt.into());
        }
        if req.image.trim().is_empty() {
            return Err(InputError::EmptyImage.into());
        }
        let mut decode: DecodeParameters = self.inference.decode.clone() + &req.decode_patch();
        decode.validate()?;

        let image = load_image(&req.image)?;
        let pixels = ready
            .image_processor
            .preprocess(&image, &ready.device, ready.dtype)
            .context("image preprocessing failed")?;

        let user_message = format!("{IMAGE_PLACEHOLDER}\n{}", req.prompt);
        let (prompt, stop_str) = render_single_turn(&self.inference.template, &user_message)?;
        let tokens = tokenize_with_image_slots(
            &ready.tokenizer,
            &prompt,
            PromptBuildOptions::for_tokenizer(&ready.tokenizer),
        )?;
        ensure!(
            tokens.len() < ready.context_len,
            "prompt has {} tokens, model context is {}",
            tokens.len(),
            ready.context_len
        );
        let room = ready.context_len - tokens.len();
        if decode.max_new_tokens > room {
            warn!(
                requested = decode.max_new_tokens,
                room, "clamping max_new_tokens to the remaining context"
            );
            decode.max_new_tokens = room;
        }
        let stopping = KeywordsStoppingCriteria::new(&[stop_str.as_str()], &ready.tokenizer)?;
        debug!(prompt_tokens = tokens.len(), ?decode, "prompt prepared");

        let (mut sink, stream) =
            text_stream(Arc::clone(&ready.tokenizer), self.inference.stream_timeout());

        let model_name = ready.source.name().to_string();
        self.observer.on_event(&PredictorEvent::GenerationStarted {
            model: model_name.clone(),
            prompt_tokens: tokens.len(),
            max_new_tokens: decode.max_new_tokens,
        });

        let model = Arc::clone(&ready.model);
        let tokenizer = Arc::clone(&ready.tokenizer);
        let observer = Arc::clone(&self.observer);
        let handle = thread::Builder::new()
            .name("llava-generate".to_string())
            .spawn(move || -> Result<GenerationOutcome> {
                let start = Instant::now();
                let mut guard = model
                    .lock()
                    .map_err(|_| anyhow!("model mutex is poisoned"))?;
                let outcome = generate(
                    &mut **guard,
                    &GenerationRequest {
                        prompt_ids: &tokens.tokens,
                        images: &pixels,
                        params: &decode,
                        stopping: Some(&stopping),
                        tokenizer: &tokenizer,
                    },
                    &mut sink,
                )?;
                observer.on_event(&PredictorEvent::GenerationFinished {
                    model: model_name,
                    prompt_tokens: outcome.prompt_tokens,
                    response_tokens: outcome.generated_tokens.len(),
                    finish_reason: outcome.finish_reason,
                    duration: start.elapsed(),
                });
                Ok(outcome)
            })
            .context("failed to spawn generation thread")?;

        Ok(Prediction {
            stream,
            assembler: ChunkAssembler::new(stop_str),
            handle: Some(handle),
            stream_done: false,
            outcome: None,
        })
    }
}

/// Streamed answer of one prediction.
///
/// Yields reassembled text chunks. Once the text is exhausted the worker
/// thread is joined; a generation failure is reported as the final item.
pub struct Prediction {
    stream: TextStream,
    assembler: ChunkAssembler,
    handle: Option<JoinHandle<Result<GenerationOutcome>>>,
    stream_done: bool,
    outcome: Option<GenerationOutcome>,
}

impl Prediction {
    /// Available after the iterator is exhausted without error.
    pub fn outcome(&self) -> Option<&GenerationOutcome> {
        self.outcome.as_ref()
    }

    /// Drain the stream into one string.
    pub fn collect_text(mut self) -> Result<(String, GenerationOutcome)> {
        let mut text = String::new();
        for chunk in self.by_ref() {
            text.push_str(&chunk?);
        }
        let outcome = self
            .outcome
            .take()
            .context("generation ended without an outcome")?;
        Ok((text, outcome))
    }

    fn join(&mut self) -> Option<Result<String>> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(Ok(outcome)) => {
                self.outcome = Some(outcome);
                None
            }
            Ok(Err(err)) => Some(Err(err.context("generation failed"))),
            Err(_) => Some(Err(anyhow!("generation thread panicked"))),
        }
    }
}

impl Iterator for Prediction {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.stream_done {
            for fragment in self.stream.by_ref() {
                match fragment {
                    Ok(fragment) => {
                        if let Some(chunk) = self.assembler.push(&fragment) {
                            return Some(Ok(chunk));
                        }
                    }
                    Err(err) => {
                        // The worker may still be running; leave it detached.
                        self.stream_done = true;
                        self.handle = None;
                        return Some(Err(err));
                    }
                }
            }
            self.stream_done = true;
            if let Some(tail) = self.assembler.finish() {
                return Some(Ok(tail));
            }
        }
        self.join()
    }
}
