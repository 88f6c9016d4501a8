use candle_transformers::generation::Sampling;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decoding parameters that map directly onto generation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParameters {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: Option<u64>,
    pub use_cache: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParametersPatch {
    pub max_new_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
    pub use_cache: Option<bool>,
}

impl Default for DecodeParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            temperature: 0.2,
            top_p: 1.0,
            seed: None,
            use_cache: true,
        }
    }
}

impl std::ops::AddAssign<&DecodeParametersPatch> for DecodeParameters {
    fn add_assign(&mut self, rhs: &DecodeParametersPatch) {
        if let Some(max_new_tokens) = rhs.max_new_tokens {
            self.max_new_tokens = max_new_tokens;
        }
        if let Some(temp) = rhs.temperature {
            self.temperature = temp;
        }
        if let Some(prob) = rhs.top_p {
            self.top_p = prob;
        }
        if let Some(seed) = rhs.seed {
            self.seed = Some(seed);
        }
        if let Some(use_cache) = rhs.use_cache {
            self.use_cache = use_cache;
        }
    }
}

impl std::ops::Add<&DecodeParametersPatch> for DecodeParameters {
    type Output = DecodeParameters;

    fn add(mut self, rhs: &DecodeParametersPatch) -> Self::Output {
        self += rhs;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("top_p must be within [0, 1], got {0}")]
    TopP(f64),
    #[error("temperature must be a non-negative number, got {0}")]
    Temperature(f64),
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("image input must not be empty")]
    EmptyImage,
}

impl DecodeParameters {
    pub fn validate(&self) -> Result<(), InputError> {
        if !self.top_p.is_finite() || !(0.0..=1.0).contains(&self.top_p) {
            return Err(InputError::TopP(self.top_p));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(InputError::Temperature(self.temperature));
        }
        Ok(())
    }

    /// Temperature 0 decodes greedily; top_p 1 disables the nucleus cut.
    /// An empty nucleus (top_p 0) still keeps the most likely token.
    pub fn sampling(&self) -> Sampling {
        if self.temperature <= 0.0 || self.top_p <= 0.0 {
            return Sampling::ArgMax;
        }
        if self.top_p < 1.0 {
            Sampling::TopP {
                p: self.top_p,
                temperature: self.temperature,
            }
        } else {
            Sampling::All {
                temperature: self.temperature,
            }
        }
    }
}
