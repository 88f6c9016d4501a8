pub mod model;
pub mod observer;
pub mod predictor;

pub use llava_predict_config::{AppConfig, InferenceSettings, ModelSettings};
pub use llava_predict_core::{
    DecodeParameters, FinishReason, GenerationOutcome, InputError,
    runtime::{DeviceKind, Precision},
};
pub use model::{LoadedModel, ModelLoader, ModelSource, load_tokenizer};
pub use observer::{NoopObserver, PredictorEvent, PredictorObserver};
pub use predictor::{BASE_WEIGHTS_SENTINEL, PredictRequest, Prediction, Predictor};
