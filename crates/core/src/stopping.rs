use anyhow::{Result, anyhow, ensure};
use tokenizers::Tokenizer;
use tracing::debug;

/// Stops generation once any keyword shows up at the tail of the output.
///
/// Two checks run on every step: an exact id match against the keyword's
/// token sequence, then a textual match over the decoded tail (special
/// tokens skipped) for keywords that tokenize differently in context.
#[derive(Debug, Clone)]
pub struct KeywordsStoppingCriteria {
    keywords: Vec<String>,
    keyword_ids: Vec<Vec<u32>>,
    max_keyword_len: usize,
}

impl KeywordsStoppingCriteria {
    pub fn new(keywords: &[&str], tokenizer: &Tokenizer) -> Result<Self> {
        ensure!(!keywords.is_empty(), "at least one stop keyword is required");
        let mut keyword_ids = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let encoding = tokenizer
                .encode(*keyword, false)
                .map_err(|err| anyhow!("failed to tokenize stop keyword `{keyword}`: {err}"))?;
            keyword_ids.push(encoding.get_ids().to_vec());
        }
        let max_keyword_len = keyword_ids.iter().map(Vec::len).max().unwrap_or(0);
        Ok(Self {
            keywords: keywords.iter().map(|kw| (*kw).to_owned()).collect(),
            keyword_ids,
            max_keyword_len,
        })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// `generated` holds every token produced after the prompt.
    pub fn should_stop(&self, generated: &[u32], tokenizer: &Tokenizer) -> bool {
        for keyword in &self.keyword_ids {
            if !keyword.is_empty() && generated.ends_with(keyword) {
                return true;
            }
        }

        let offset = generated.len().min(self.max_keyword_len);
        if offset == 0 {
            return false;
        }
        let tail = &generated[generated.len() - offset..];
        match tokenizer.decode(tail, true) {
            Ok(text) => self.keywords.iter().any(|keyword| text.contains(keyword.as_str())),
            Err(err) => {
                debug!(?tail, "stop keyword check could not decode tail: {err}");
                false
            }
        }
    }
}
