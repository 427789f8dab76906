//! Textual matching against the canonical no-information phrase.

use lode_core::config::NoInfoConfig;

/// Compares distilled text to the canonical phrase after normalization:
/// surrounding whitespace trimmed, trailing full stops stripped, and
/// optionally case-folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoInfoMatcher {
    phrase: String,
    normalized_phrase: String,
    strip_suffixes: Vec<String>,
    case_fold: bool,
}

impl NoInfoMatcher {
    pub fn new(phrase: impl Into<String>, strip_suffixes: Vec<String>, case_fold: bool) -> Self {
        let phrase = phrase.into();
        let mut matcher = Self {
            normalized_phrase: String::new(),
            phrase,
            strip_suffixes: strip_suffixes.into_iter().filter(|s| !s.is_empty()).collect(),
            case_fold,
        };
        matcher.normalized_phrase = matcher.normalize(&matcher.phrase);
        matcher
    }

    pub fn from_config(config: &NoInfoConfig) -> Self {
        Self::new(
            config.phrase.clone(),
            config.strip_suffixes.clone(),
            config.case_fold,
        )
    }

    /// The phrase as configured, used to compute the reference embedding.
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut current = text.trim();
        loop {
            let stripped = self
                .strip_suffixes
                .iter()
                .find_map(|suffix| current.strip_suffix(suffix.as_str()));
            match stripped {
                Some(rest) => current = rest.trim_end(),
                None => break,
            }
        }
        if self.case_fold {
            current.to_lowercase()
        } else {
            current.to_string()
        }
    }

    /// True when `text` is the canonical phrase under normalization.
    pub fn is_exact(&self, text: &str) -> bool {
        self.normalize(text) == self.normalized_phrase
    }
}

impl Default for NoInfoMatcher {
    fn default() -> Self {
        Self::from_config(&NoInfoConfig::default())
    }
}
