#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use candle_core::{DType, Device, Tensor};
use llava_predict_core::VisionLanguageModel;
use tokenizers::Tokenizer;

pub const BOS: u32 = 1;
pub const EOS: u32 = 2;
pub const VOCAB_SIZE: usize = 12;

/// Word-level tokenizer with a LLaMA-style BOS post-processor. Decoding
/// joins tokens with single spaces.
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
          "\n": 6, "中": 7, "USER:": 8, "ASSISTANT:": 9, "hi": 10, "on": 11
        },
        "unk_token": "[UNK]"
      }
    }"###;
    Tokenizer::from_bytes(tokenizer_json.as_bytes()).expect("tokenizer json should parse")
}

pub fn one_hot(token: u32) -> Result<Tensor> {
    let mut logits = vec![0f32; VOCAB_SIZE];
    logits[token as usize] = 10.0;
    Ok(Tensor::from_vec(logits, (1, VOCAB_SIZE), &Device::Cpu)?)
}

#[derive(Debug, Default)]
pub struct ModelCalls {
    pub prefills: Vec<Vec<i64>>,
    pub decode_steps: Vec<u32>,
    pub resets: usize,
}

/// Emits a fixed token script, one token per forward pass.
pub struct ScriptedModel {
    device: Device,
    script: Vec<u32>,
    cursor: usize,
    eos: Option<u32>,
    fail_at: Option<usize>,
    pub calls: Arc<Mutex<ModelCalls>>,
}

impl ScriptedModel {
    pub fn new(script: &[u32]) -> Self {
        Self {
            device: Device::Cpu,
            script: script.to_vec(),
            cursor: 0,
            eos: Some(EOS),
            fail_at: None,
            calls: Arc::new(Mutex::new(ModelCalls::default())),
        }
    }

    pub fn without_eos(mut self) -> Self {
        self.eos = None;
        self
    }

    pub fn failing_at(mut self, step: usize) -> Self {
        self.fail_at = Some(step);
        self
    }

    fn next_logits(&mut self) -> Result<Tensor> {
        if self.fail_at == Some(self.cursor) {
            bail!("scripted failure at step {}", self.cursor);
        }
        let token = self.script.get(self.cursor).copied().unwrap_or(EOS);
        self.cursor += 1;
        one_hot(token)
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
        self.eos
    }

    fn prefill(&mut self, input_ids: &[i64], _images: &Tensor) -> Result<Tensor> {
        self.calls
            .lock()
            .expect("calls mutex should not be poisoned")
            .prefills
            .push(input_ids.to_vec());
        self.next_logits()
    }

    fn decode_step(&mut self, token: u32) -> Result<Tensor> {
        self.calls
            .lock()
            .expect("calls mutex should not be poisoned")
            .decode_steps
            .push(token);
        self.next_logits()
    }

    fn reset(&mut self) {
        self.calls.lock().expect("calls mutex should not be poisoned").resets += 1;
    }
}
