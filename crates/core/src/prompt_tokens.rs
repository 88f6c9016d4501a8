use anyhow::{Result, anyhow, ensure};
use tokenizers::Tokenizer;

pub const IMAGE_PLACEHOLDER: &str = "<image>";

/// Sentinel id spliced into the prompt where image features go.
pub const IMAGE_TOKEN_INDEX: i64 = -200;

pub const DEFAULT_BOS_TOKEN: &str = "<s>";

#[derive(Debug, Clone, Copy)]
pub struct PromptBuildOptions<'a> {
    pub placeholder: &'a str,
    pub image_token_index: i64,
    pub bos_token_id: Option<u32>,
}

impl<'a> PromptBuildOptions<'a> {
    pub fn for_tokenizer(tokenizer: &Tokenizer) -> Self {
        Self {
            placeholder: IMAGE_PLACEHOLDER,
            image_token_index: IMAGE_TOKEN_INDEX,
            bos_token_id: tokenizer.token_to_id(DEFAULT_BOS_TOKEN),
        }
    }

    pub fn with_bos(mut self, bos_token_id: Option<u32>) -> Self {
        self.bos_token_id = bos_token_id;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PromptTokenSequence {
    pub tokens: Vec<i64>,
    pub image_mask: Vec<u8>,
}

impl PromptTokenSequence {
    pub fn image_token_count(&self) -> usize {
        self.image_mask.iter().filter(|&&flag| flag != 0).count()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

pub fn image_slot_count(prompt: &str) -> usize {
    prompt.matches(IMAGE_PLACEHOLDER).count()
}

/// Tokenize `prompt`, replacing every placeholder with the image sentinel.
///
/// Each text segment is encoded with special tokens. When the first segment
/// starts with BOS, a single BOS is kept at the front and stripped from every
/// segment, so the sentinel never sits next to a stray BOS.
pub fn tokenize_with_image_slots(
    tokenizer: &Tokenizer,
    prompt: &str,
    options: PromptBuildOptions<'_>,
) -> Result<PromptTokenSequence> {
    let chunks = prompt
        .split(options.placeholder)
        .enumerate()
        .map(|(idx, segment)| {
            tokenizer
                .encode(segment, true)
                .map(|encoding| encoding.get_ids().to_vec())
                .map_err(|err| anyhow!("tokenization failed at segment {idx}: {err}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut tokens = Vec::new();
    let mut image_mask = Vec::new();
    let leading_bos = options
        .bos_token_id
        .filter(|bos| chunks.first().and_then(|first| first.first()) == Some(bos));
    if let Some(bos) = leading_bos {
        tokens.push(i64::from(bos));
        image_mask.push(0u8);
    }

    for (idx, chunk) in chunks.iter().enumerate() {
        if idx > 0 {
            tokens.push(options.image_token_index);
            image_mask.push(1u8);
        }
        let body = match (leading_bos, chunk.split_first()) {
            (Some(bos), Some((first, rest))) if *first == bos => rest,
            _ => chunk.as_slice(),
        };
        tokens.extend(body.iter().map(|&id| i64::from(id)));
        image_mask.extend(std::iter::repeat_n(0u8, body.len()));
    }

    ensure!(
        tokens.len() == image_mask.len(),
        "token/mask length mismatch: {} vs {}",
        tokens.len(),
        image_mask.len()
    );

    Ok(PromptTokenSequence { tokens, image_mask })
}
