//! Sub-word tokenization with character offsets

use rex_core::{RexError, Result};
use std::collections::HashMap;
use std::path::Path;

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";

/// A token and the characters `[start, end)` of the source text it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Tokenized text wrapped in `[CLS]` / `[SEP]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub tokens: Vec<String>,
    pub ids: Vec<usize>,
    /// Character span per token; special tokens have an empty span
    pub offsets: Vec<(usize, usize)>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn attention_mask(&self) -> Vec<bool> {
        vec![true; self.tokens.len()]
    }
}

/// Splits text into sub-word tokens and maps them to vocabulary ids
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    fn token_id(&self, token: &str) -> usize;

    /// Tokens only, without offsets
    fn tokenize_words(&self, text: &str) -> Vec<String> {
        self.tokenize(text).into_iter().map(|t| t.text).collect()
    }

    /// `[CLS] tokens [SEP]`, truncated to `max_len`
    fn encode(&self, text: &str, max_len: usize) -> Encoding {
        let mut tokens = vec![CLS_TOKEN.to_string()];
        let mut offsets = vec![(0, 0)];
        for token in self.tokenize(text) {
            tokens.push(token.text);
            offsets.push((token.start, token.end));
        }
        tokens.push(SEP_TOKEN.to_string());
        offsets.push((0, 0));
        tokens.truncate(max_len);
        offsets.truncate(max_len);
        let ids = tokens.iter().map(|t| self.token_id(t)).collect();
        Encoding {
            tokens,
            ids,
            offsets,
        }
    }
}

/// Lower-casing whitespace/punctuation tokenizer with a fixed vocabulary.
///
/// Words split on whitespace and around every punctuation character.
/// Unknown tokens map to `[UNK]`.
#[derive(Debug, Clone)]
pub struct BasicTokenizer {
    vocab: HashMap<String, usize>,
    lowercase: bool,
    unk_id: usize,
}

impl BasicTokenizer {
    /// Vocabulary in id order, one token per entry
    pub fn new<I, S>(tokens: I, lowercase: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vocab: HashMap<String, usize> = tokens
            .into_iter()
            .enumerate()
            .map(|(id, t)| (t.into(), id))
            .collect();
        let unk_id = vocab
            .get(UNK_TOKEN)
            .copied()
            .ok_or_else(|| RexError::Vocabulary(format!("tokenizer vocabulary lacks {UNK_TOKEN}")))?;
        Ok(Self {
            vocab,
            lowercase,
            unk_id,
        })
    }

    /// Read a `vocab.txt` file (one token per line, line number = id)
    pub fn from_vocab_file(path: impl AsRef<Path>, lowercase: bool) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RexError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::new(content.lines().map(str::trim_end), lowercase)
    }

    /// Special tokens followed by `words`, with `[unused0]..[unused99]` reserved
    pub fn with_words<'a>(words: impl IntoIterator<Item = &'a str>, lowercase: bool) -> Result<Self> {
        let mut tokens = vec![PAD_TOKEN.to_string()];
        tokens.extend((0..100).map(|i| format!("[unused{i}]")));
        tokens.extend([UNK_TOKEN, CLS_TOKEN, SEP_TOKEN].map(String::from));
        for w in words {
            let w = if lowercase { w.to_lowercase() } else { w.to_string() };
            if !tokens.contains(&w) {
                tokens.push(w);
            }
        }
        Self::new(tokens, lowercase)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.vocab.contains_key(token)
    }
}

impl Tokenizer for BasicTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut start = 0;

        let flush = |current: &mut String, start: usize, end: usize, tokens: &mut Vec<Token>| {
            if !current.is_empty() {
                tokens.push(Token {
                    text: std::mem::take(current),
                    start,
                    end,
                });
            }
        };

        let mut pos = 0;
        for ch in text.chars() {
            if ch.is_whitespace() {
                flush(&mut current, start, pos, &mut tokens);
            } else if ch.is_ascii_punctuation() || (!ch.is_alphanumeric() && !ch.is_whitespace()) {
                flush(&mut current, start, pos, &mut tokens);
                let text = if self.lowercase { ch.to_lowercase().collect() } else { ch.to_string() };
                tokens.push(Token {
                    text,
                    start: pos,
                    end: pos + 1,
                });
            } else {
                if current.is_empty() {
                    start = pos;
                }
                if self.lowercase {
                    current.extend(ch.to_lowercase());
                } else {
                    current.push(ch);
                }
            }
            pos += 1;
        }
        flush(&mut current, start, pos, &mut tokens);
        tokens
    }

    fn token_id(&self, token: &str) -> usize {
        self.vocab.get(token).copied().unwrap_or(self.unk_id)
    }
}

/// Character slice `[start, end)` of `text`
pub fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}
