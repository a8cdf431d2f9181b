//! Synthetic tweet generator

use crate::FilterSpec;
use bytes::Bytes;
use rand::Rng;
use serde::Serialize;

/// Fixed text in front of the chosen keyword
pub const MENTION_PREFIX: &str = "Someone just mentioned ";

/// A tweet as the v1.1 filter stream shaped it, cut down to its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tweet {
    pub text: String,
}

impl Tweet {
    /// Tweet mentioning `keyword`
    pub fn mention(keyword: &str) -> Self {
        let mut text = String::with_capacity(MENTION_PREFIX.len() + keyword.len());
        text.push_str(MENTION_PREFIX);
        text.push_str(keyword);
        Self { text }
    }

    /// The keyword after the fixed prefix
    pub fn keyword(&self) -> Option<&str> {
        self.text.strip_prefix(MENTION_PREFIX)
    }

    /// Serialize as one newline-terminated JSON line
    pub fn to_line(&self) -> serde_json::Result<Bytes> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(Bytes::from(buf))
    }
}

/// Build a tweet around a keyword drawn uniformly from `spec`.
///
/// `FilterSpec` is never empty, so there is no failure mode.
pub fn generate<R: Rng + ?Sized>(spec: &FilterSpec, rng: &mut R) -> Tweet {
    Tweet::mention(spec.choose(rng))
}
