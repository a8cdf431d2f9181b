//! Filter request parsing
//!
//! Form fields come from both the query string and the body. The body is
//! decoded whatever its Content-Type, and its values shadow the query's.

use rand::Rng;
use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;
use url::form_urlencoded;

/// Form field carrying the comma-separated keywords
pub const TRACK_FIELD: &str = "track";

/// Why a request's form could not be read
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    /// `%` not followed by two hex digits
    #[error("invalid URL escape {0:?}")]
    InvalidEscape(String),

    /// `;` is not a valid pair separator
    #[error("invalid semicolon separator in form")]
    Semicolon,

    /// Body larger than the configured limit
    #[error("form body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Body could not be read off the connection
    #[error("failed to read form body: {0}")]
    Body(String),
}

/// Decoded form fields, body pairs first then query pairs.
#[derive(Debug, Clone, Default)]
pub struct FormParams {
    pairs: Vec<(String, String)>,
}

impl FormParams {
    /// Parse the query string and body of a request
    pub fn parse(query: Option<&str>, body: &[u8]) -> Result<Self, FormError> {
        let mut pairs = decode(body)?;
        if let Some(query) = query {
            pairs.extend(decode(query.as_bytes())?);
        }
        Ok(Self { pairs })
    }

    /// First value of a field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value of a field, or `""` when absent
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Strictly validate then decode `application/x-www-form-urlencoded` text
fn decode(input: &[u8]) -> Result<Vec<(String, String)>, FormError> {
    validate(input)?;
    Ok(form_urlencoded::parse(input)
        .into_owned()
        .filter(|(k, v)| !(k.is_empty() && v.is_empty()))
        .collect())
}

fn validate(input: &[u8]) -> Result<(), FormError> {
    if input.contains(&b';') {
        return Err(FormError::Semicolon);
    }

    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' {
            let escape = input.get(i + 1..i + 3);
            match escape {
                Some(hex) if hex.iter().all(u8::is_ascii_hexdigit) => i += 3,
                _ => {
                    let end = (i + 3).min(input.len());
                    return Err(FormError::InvalidEscape(
                        String::from_utf8_lossy(&input[i..end]).into_owned(),
                    ));
                }
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Keywords a connection streams mentions of.
///
/// Built by splitting `track` on `,` with no trimming, case-folding or
/// deduplication. Splitting never yields an empty list: a missing or empty
/// `track` becomes a single empty keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    keywords: SmallVec<[String; 4]>,
}

impl FilterSpec {
    pub fn from_track(track: &str) -> Self {
        Self {
            keywords: track.split(',').map(str::to_string).collect(),
        }
    }

    /// Keywords from the `track` field of a parsed form
    pub fn from_form(form: &FormParams) -> Self {
        Self::from_track(form.value(TRACK_FIELD))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// True when there are no keywords
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Pick a keyword uniformly at random
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.keywords[rng.gen_range(0..self.keywords.len())]
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.keywords.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_track() {
        let spec = FilterSpec::from_track("cats,dogs");
        assert_eq!(spec.keywords(), &["cats", "dogs"]);
        assert_eq!(spec.len(), 2);
    }

    #[test]
    fn test_split_keeps_empty_and_whitespace() {
        let spec = FilterSpec::from_track("a,,b , a");
        assert_eq!(spec.keywords(), &["a", "", "b ", " a"]);
    }

    #[test]
    fn test_missing_track_is_single_empty_keyword() {
        let form = FormParams::parse(None, b"").unwrap();
        let spec = FilterSpec::from_form(&form);
        assert_eq!(spec.keywords(), &[""]);
        assert!(!spec.is_empty());
    }

    #[test]
    fn test_form_decoding() {
        let form = FormParams::parse(None, b"track=hello+world%2Cfoo&x=1").unwrap();
        assert_eq!(form.get("track"), Some("hello world,foo"));
        assert_eq!(form.get("x"), Some("1"));
        assert_eq!(form.get("y"), None);
        assert_eq!(form.value("y"), "");
    }

    #[test]
    fn test_body_shadows_query() {
        let form = FormParams::parse(Some("track=fromquery"), b"track=frombody").unwrap();
        assert_eq!(form.get("track"), Some("frombody"));

        let form = FormParams::parse(Some("track=fromquery"), b"").unwrap();
        assert_eq!(form.get("track"), Some("fromquery"));
    }

    #[test]
    fn test_invalid_escape() {
        assert_eq!(
            FormParams::parse(None, b"track=%zz").unwrap_err(),
            FormError::InvalidEscape("%zz".to_string())
        );
        assert!(matches!(
            FormParams::parse(None, b"track=abc%"),
            Err(FormError::InvalidEscape(_))
        ));
        assert!(matches!(
            FormParams::parse(Some("track=%4"), b""),
            Err(FormError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_semicolon_rejected() {
        assert_eq!(
            FormParams::parse(None, b"track=a;b").unwrap_err(),
            FormError::Semicolon
        );
    }

    #[test]
    fn test_non_form_body_is_tolerated() {
        let form = FormParams::parse(None, br#"{"track":"go"}"#).unwrap();
        assert_eq!(form.get("track"), None);
        assert!(!form.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(FilterSpec::from_track("cats,dogs").to_string(), "[cats dogs]");
    }
}
