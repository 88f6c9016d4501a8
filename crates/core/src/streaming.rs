//! Token-to-text streaming between the generation thread and the caller.
//!
//! The producer half ([`StreamerSink`]) receives token ids from the decode
//! loop and turns them into printable text fragments, holding back partial
//! words until a space, newline or CJK ideograph makes them safe to show.
//! The consumer half ([`TextStream`]) is a blocking iterator over those
//! fragments with a per-fragment timeout.

use std::{
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use tokenizers::Tokenizer;
use tracing::debug;

pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Open,
    /// The consumer went away; nothing more will be read.
    Closed,
}

/// Receiver of generated token ids.
pub trait TokenStreamer: Send {
    fn put(&mut self, ids: &[u32]) -> Result<StreamStatus>;
    fn end(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamMessage {
    Text(String),
    End,
}

pub fn text_stream(tokenizer: Arc<Tokenizer>, timeout: Duration) -> (StreamerSink, TextStream) {
    let (tx, rx) = mpsc::channel();
    let sink = StreamerSink {
        tokenizer,
        skip_prompt: true,
        next_tokens_are_prompt: true,
        token_cache: Vec::new(),
        print_len: 0,
        tx,
    };
    let stream = TextStream {
        rx,
        timeout,
        finished: false,
        ended_cleanly: false,
    };
    (sink, stream)
}

pub struct StreamerSink {
    tokenizer: Arc<Tokenizer>,
    skip_prompt: bool,
    next_tokens_are_prompt: bool,
    token_cache: Vec<u32>,
    print_len: usize,
    tx: Sender<StreamMessage>,
}

impl StreamerSink {
    pub fn with_skip_prompt(mut self, skip_prompt: bool) -> Self {
        self.skip_prompt = skip_prompt;
        self
    }

    fn decode_cache(&self) -> Result<String> {
        // Special tokens stay in the text so the caller can see the stop
        // sequence.
        self.tokenizer
            .decode(&self.token_cache, false)
            .map_err(|err| anyhow!("failed to decode streamed tokens: {err}"))
    }

    fn send(&self, message: StreamMessage) -> StreamStatus {
        match self.tx.send(message) {
            Ok(()) => StreamStatus::Open,
            Err(_) => StreamStatus::Closed,
        }
    }
}

impl TokenStreamer for StreamerSink {
    fn put(&mut self, ids: &[u32]) -> Result<StreamStatus> {
        if self.skip_prompt && self.next_tokens_are_prompt {
            self.next_tokens_are_prompt = false;
            return Ok(StreamStatus::Open);
        }

        self.token_cache.extend_from_slice(ids);
        let text = self.decode_cache()?;

        let printable = if text.ends_with('\n') {
            let printable = slice_between(&text, self.print_len, text.len()).to_owned();
            self.token_cache.clear();
            self.print_len = 0;
            printable
        } else if text.chars().last().is_some_and(is_cjk_char) {
            let printable = slice_between(&text, self.print_len, text.len()).to_owned();
            self.print_len += printable.len();
            printable
        } else {
            let word_end = text.rfind(' ').map_or(0, |idx| idx + 1);
            let printable = slice_between(&text, self.print_len, word_end).to_owned();
            self.print_len += printable.len();
            printable
        };

        Ok(self.send(StreamMessage::Text(printable)))
    }

    fn end(&mut self) -> Result<()> {
        let printable = if self.token_cache.is_empty() {
            String::new()
        } else {
            let text = self.decode_cache()?;
            slice_between(&text, self.print_len, text.len()).to_owned()
        };
        self.token_cache.clear();
        self.print_len = 0;
        self.next_tokens_are_prompt = true;

        if self.send(StreamMessage::Text(printable)) == StreamStatus::Closed
            || self.send(StreamMessage::End) == StreamStatus::Closed
        {
            debug!("text stream consumer dropped before end of generation");
        }
        Ok(())
    }
}

/// Consumer side of the stream. Yields fragments in order; an empty
/// fragment is possible and means "nothing printable yet".
pub struct TextStream {
    rx: Receiver<StreamMessage>,
    timeout: Duration,
    finished: bool,
    ended_cleanly: bool,
}

impl TextStream {
    /// True once the producer sent its end marker. False when the stream
    /// stopped because the producer vanished or timed out.
    pub fn ended_cleanly(&self) -> bool {
        self.ended_cleanly
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Iterator for TextStream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rx.recv_timeout(self.timeout) {
            Ok(StreamMessage::Text(text)) => Some(Ok(text)),
            Ok(StreamMessage::End) => {
                self.finished = true;
                self.ended_cleanly = true;
                None
            }
            Err(RecvTimeoutError::Timeout) => {
                self.finished = true;
                Some(Err(anyhow!(
                    "no generated text received within {:.1}s",
                    self.timeout.as_secs_f64()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                None
            }
        }
    }
}

/// Byte-range slice that tolerates offsets which no longer fall on a char
/// boundary (a re-decoded cache can shift earlier bytes).
fn slice_between(text: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }
    text.get(start..end).unwrap_or_default()
}

pub fn is_cjk_char(ch: char) -> bool {
    matches!(
        u32::from(ch),
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B820..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x2F800..=0x2FA1F
    )
}
