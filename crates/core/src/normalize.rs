use crate::IngestError;
use regex::Regex;

const KEY_SEPARATORS: &str = r"[^A-Za-z'\-]+";

/// Canonical lookup keys for raw cell values.
///
/// Anything that is not an ASCII letter, apostrophe or hyphen becomes a
/// single space, including non-ASCII letters: `"Café-House's"` turns into
/// `"caf -house's"`.
#[derive(Debug, Clone)]
pub struct Normalizer {
    separators: Regex,
}

impl Normalizer {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            separators: Regex::new(KEY_SEPARATORS)?,
        })
    }

    pub fn key(&self, raw: &str) -> String {
        self.separators
            .replace_all(raw.trim(), " ")
            .trim()
            .to_lowercase()
    }
}

/// One-off normalization. Callers keying many values should hold a
/// [`Normalizer`].
pub fn normalize(raw: &str) -> Result<String, IngestError> {
    Ok(Normalizer::new()?.key(raw))
}
