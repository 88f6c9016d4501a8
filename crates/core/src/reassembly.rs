/// Turns raw streamer fragments into the chunks shown to the caller.
///
/// The LLaMA tokenizer decodes the token before the stop sequence as a lone
/// `" "` fragment. That fragment is held back: it is glued onto the next
/// fragment, dropped when the next fragment carries the stop sequence, and
/// flushed on its own only if the stream ends right after it.
#[derive(Debug, Clone)]
pub struct ChunkAssembler {
    stop_str: String,
    pending_space: bool,
}

impl ChunkAssembler {
    pub fn new(stop_str: impl Into<String>) -> Self {
        Self {
            stop_str: stop_str.into(),
            pending_space: false,
        }
    }

    pub fn stop_str(&self) -> &str {
        &self.stop_str
    }

    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if fragment == " " {
            self.pending_space = true;
            return None;
        }

        let text = match fragment.strip_suffix(self.stop_str.as_str()) {
            Some(head) if !self.stop_str.is_empty() => {
                self.pending_space = false;
                head.trim().to_owned()
            }
            _ if self.pending_space => {
                self.pending_space = false;
                format!(" {fragment}")
            }
            _ => fragment.to_owned(),
        };

        (!text.is_empty()).then_some(text)
    }

    pub fn finish(&mut self) -> Option<String> {
        std::mem::take(&mut self.pending_space).then(|| " ".to_owned())
    }
}
