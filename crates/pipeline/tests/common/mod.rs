#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{Result, bail};
use candle_core::{DType, Device, Tensor};
use llava_predict_core::{ClipImageProcessor, VisionLanguageModel};
use llava_predict_pipeline::{
    LoadedModel, ModelLoader, ModelSource, PredictorEvent, PredictorObserver,
};
use tokenizers::Tokenizer;

pub const EOS: u32 = 2;
pub const ZHONG: u32 = 8;
const VOCAB_SIZE: usize = 9;

pub fn build_tokenizer() -> Tokenizer {
    let tokenizer_json = r###"{
      "version": "1.0",
      "truncation": null,
      "padding": null,
      "added_tokens": [
        {"id": 1, "content": "<s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
        {"id": 2, "content": "</s>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
      ],
      "normalizer": null,
      "pre_tokenizer": {"type": "WhitespaceSplit"},
      "post_processor": {
        "type": "TemplateProcessing",
        "single": [
          {"SpecialToken": {"id": "<s>", "type_id": 0}},
          {"Sequence": {"id": "A", "type_id": 0}}
        ],
        "pair": [
          {"SpecialToken": {"id": "<s>", "type_id": 0}},
          {"Sequence": {"id": "A", "type_id": 0}},
          {"Sequence": {"id": "B", "type_id": 1}}
        ],
        "special_tokens": {
          "<s>": {"id": "<s>", "ids": [1], "tokens": ["<s>"]}
        }
      },
      "decoder": {"type": "WordPiece", "prefix": "##", "cleanup": false},
      "model": {
        "type": "WordLevel",
        "vocab": {
          "[UNK]": 0, "<s>": 1, "</s>": 2, "The": 3, "cat": 4, "sat": 5,
          "USER:": 6, "ASSISTANT:": 7, "中": 8
        },
        "unk_token": "[UNK]"
      }
    }"###;
    Tokenizer::from_bytes(tokenizer_json.as_bytes()).expect("tokenizer json should parse")
}

pub fn write_test_image(path: &Path) -> Result<()> {
    image::RgbImage::from_pixel(12, 9, image::Rgb([40, 80, 120])).save(path)?;
    Ok(())
}

pub struct ScriptedModel {
    device: Device,
    script: Vec<u32>,
    cursor: usize,
    fail_at: Option<usize>,
    pub prefills: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl ScriptedModel {
    pub fn new(script: &[u32], fail_at: Option<usize>) -> Self {
        Self {
            device: Device::Cpu,
            script: script.to_vec(),
            cursor: 0,
            fail_at,
            prefills: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn next_logits(&mut self) -> Result<Tensor> {
        if self.fail_at == Some(self.cursor) {
            bail!("forward pass exploded at step {}", self.cursor);
        }
        let token = self.script.get(self.cursor).copied().unwrap_or(EOS);
        self.cursor += 1;
        let mut logits = vec![0f32; VOCAB_SIZE];
        logits[token as usize] = 10.0;
        Ok(Tensor::from_vec(logits, VOCAB_SIZE, &Device::Cpu)?)
    }
}

impl VisionLanguageModel for ScriptedModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn dtype(&self) -> DType {
        DType::F32
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS)
    }

    fn prefill(&mut self, input_ids: &[i64], images: &Tensor) -> Result<Tensor> {
        assert_eq!(images.dims4()?, (1, 3, 8, 8));
        self.prefills
            .lock()
            .expect("prefill capture mutex should not be poisoned")
            .push(input_ids.to_vec());
        self.next_logits()
    }

    fn decode_step(&mut self, _token: u32) -> Result<Tensor> {
        self.next_logits()
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

pub fn small_processor() -> ClipImageProcessor {
    ClipImageProcessor {
        crop_size: 8,
        shortest_edge: 8,
        ..ClipImageProcessor::default()
    }
}

pub fn loaded_model(model: ScriptedModel, context_len: usize) -> LoadedModel {
    LoadedModel {
        model: Box::new(model),
        tokenizer: build_tokenizer(),
        image_processor: Box::new(small_processor()),
        context_len,
    }
}

pub struct DummyLoader {
    script: Vec<u32>,
    pub seen: Mutex<Vec<ModelSource>>,
    pub prefills: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl DummyLoader {
    pub fn new(script: &[u32]) -> Self {
        Self {
            script: script.to_vec(),
            seen: Mutex::new(Vec::new()),
            prefills: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ModelLoader for DummyLoader {
    fn load(&self, source: &ModelSource, device: &Device, dtype: DType) -> Result<LoadedModel> {
        assert!(device.is_cpu());
        assert_eq!(dtype, DType::F32);
        self.seen
            .lock()
            .expect("loader mutex should not be poisoned")
            .push(source.clone());
        let mut model = ScriptedModel::new(&self.script, None);
        model.prefills = Arc::clone(&self.prefills);
        Ok(loaded_model(model, 4096))
    }
}

#[derive(Default)]
pub struct CapturingObserver {
    pub events: Mutex<Vec<PredictorEvent>>,
}

impl CapturingObserver {
    pub fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("observer events mutex should not be poisoned")
            .iter()
            .map(|event| {
                event
                    .to_string()
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }
}

impl PredictorObserver for CapturingObserver {
    fn on_event(&self, event: &PredictorEvent) {
        self.events
            .lock()
            .expect("observer events mutex should not be poisoned")
            .push(event.clone());
    }
}
