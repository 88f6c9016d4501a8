pub mod conversation;
pub mod generation;
pub mod inference;
pub mod prompt_tokens;
pub mod reassembly;
pub mod runtime;
pub mod stopping;
pub mod streaming;
pub mod vision;

pub use conversation::{
    Conversation, DEFAULT_TEMPLATE, SeparatorStyle, get_conv_template, known_templates,
    render_single_turn,
};
pub use generation::{
    FinishReason, GenerationOutcome, GenerationRequest, VisionLanguageModel, generate,
};
pub use inference::{DecodeParameters, DecodeParametersPatch, InputError};
pub use prompt_tokens::{
    IMAGE_PLACEHOLDER, IMAGE_TOKEN_INDEX, PromptBuildOptions, PromptTokenSequence,
    tokenize_with_image_slots,
};
pub use reassembly::ChunkAssembler;
pub use runtime::{DeviceKind, Precision, prepare_device_and_dtype};
pub use stopping::KeywordsStoppingCriteria;
pub use streaming::{
    DEFAULT_STREAM_TIMEOUT, StreamStatus, StreamerSink, TextStream, TokenStreamer, text_stream,
};
pub use vision::{ClipImageProcessor, ImageProcessor, load_image};
