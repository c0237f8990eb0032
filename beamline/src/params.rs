//! Search configuration
//!
//! Parsed from the `search` section of a generation config JSON file, or
//! built directly in code.

use serde::Deserialize;
use std::path::Path;

use crate::{Error, Result};

/// Immutable configuration for one decode run.
///
/// `batch_size * num_beams` sequence slots are allocated up front and stay
/// fixed for the run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchParams {
    /// Number of independent prompts
    pub batch_size: usize,

    /// Beams per prompt. 1 selects greedy decoding.
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,

    /// Vocabulary size (row width of the score matrix)
    pub vocab_size: usize,

    /// Maximum sequence length, prompt included
    pub max_length: usize,

    /// End of sequence token ID
    pub eos_token_id: i32,

    /// Token appended to sequences that already finished
    pub pad_token_id: i32,

    /// EOS is suppressed while sequences are shorter than this
    #[serde(default)]
    pub min_length: usize,

    /// CTRL-style repetition penalty, 1.0 disables it
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    /// Exponent applied to the hypothesis length when ranking finished beams
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,

    /// Stop a batch element as soon as `num_beams` hypotheses finished
    #[serde(default = "default_early_stopping")]
    pub early_stopping: bool,

    /// Sequences returned per prompt by `finalize`
    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: usize,
}

fn default_num_beams() -> usize {
    1
}

fn default_repetition_penalty() -> f32 {
    1.0
}

fn default_length_penalty() -> f32 {
    1.0
}

fn default_early_stopping() -> bool {
    true
}

fn default_num_return_sequences() -> usize {
    1
}

impl SearchParams {
    /// Greedy parameters with every optional knob at its default.
    #[must_use]
    pub fn new(
        batch_size: usize,
        vocab_size: usize,
        max_length: usize,
        eos_token_id: i32,
        pad_token_id: i32,
    ) -> Self {
        Self {
            batch_size,
            num_beams: default_num_beams(),
            vocab_size,
            max_length,
            eos_token_id,
            pad_token_id,
            min_length: 0,
            repetition_penalty: default_repetition_penalty(),
            length_penalty: default_length_penalty(),
            early_stopping: default_early_stopping(),
            num_return_sequences: default_num_return_sequences(),
        }
    }

    /// Set the beam count.
    #[must_use]
    pub fn with_num_beams(mut self, num_beams: usize) -> Self {
        self.num_beams = num_beams;
        self
    }

    /// Set the minimum length below which EOS is masked.
    #[must_use]
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Set the repetition penalty.
    #[must_use]
    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    /// Set the number of sequences returned per prompt.
    #[must_use]
    pub fn with_num_return_sequences(mut self, n: usize) -> Self {
        self.num_return_sequences = n;
        self
    }

    /// Parse from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the result fails
    /// [`SearchParams::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Number of sequence slots (`batch_size * num_beams`)
    #[must_use]
    pub fn batch_beam_size(&self) -> usize {
        self.batch_size * self.num_beams
    }

    /// Whether this configuration decodes with beam search
    #[must_use]
    pub fn is_beam_search(&self) -> bool {
        self.num_beams > 1
    }

    /// Check configuration values that are independent of any device.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first invalid field.
    #[allow(clippy::cast_sign_loss)]
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".into()));
        }
        if self.num_beams == 0 {
            return Err(Error::Config("num_beams must be > 0".into()));
        }
        if self.vocab_size == 0 {
            return Err(Error::Config("vocab_size must be > 0".into()));
        }
        if self.max_length == 0 {
            return Err(Error::Config("max_length must be > 0".into()));
        }
        // 2 * num_beams candidates must exist among num_beams * vocab_size.
        if self.num_beams > 1 && self.vocab_size < 2 {
            return Err(Error::Config(
                "beam search needs a vocabulary of at least 2 tokens".into(),
            ));
        }
        for (name, id) in [
            ("eos_token_id", self.eos_token_id),
            ("pad_token_id", self.pad_token_id),
        ] {
            if id < 0 || id as usize >= self.vocab_size {
                return Err(Error::Config(format!(
                    "{name} {id} outside vocabulary of size {}",
                    self.vocab_size
                )));
            }
        }
        if !(self.repetition_penalty.is_finite() && self.repetition_penalty > 0.0) {
            return Err(Error::Config(format!(
                "repetition_penalty must be finite and > 0, got {}",
                self.repetition_penalty
            )));
        }
        if self.num_return_sequences == 0 || self.num_return_sequences > self.num_beams {
            return Err(Error::Config(format!(
                "num_return_sequences must be in 1..={}, got {}",
                self.num_beams, self.num_return_sequences
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let json = r#"{
            "batch_size": 2,
            "vocab_size": 32000,
            "max_length": 64,
            "eos_token_id": 2,
            "pad_token_id": 0
        }"#;
        let params = SearchParams::from_json(json).unwrap();
        assert_eq!(params.num_beams, 1);
        assert_eq!(params.min_length, 0);
        assert!((params.repetition_penalty - 1.0).abs() < f32::EPSILON);
        assert!((params.length_penalty - 1.0).abs() < f32::EPSILON);
        assert!(params.early_stopping);
        assert_eq!(params.num_return_sequences, 1);
        assert_eq!(params.batch_beam_size(), 2);
        assert!(!params.is_beam_search());
    }

    #[test]
    fn test_params_beam_fields() {
        let json = r#"{
            "batch_size": 3,
            "num_beams": 4,
            "vocab_size": 100,
            "max_length": 20,
            "eos_token_id": 1,
            "pad_token_id": 1,
            "min_length": 5,
            "repetition_penalty": 1.3,
            "length_penalty": 0.8,
            "early_stopping": false,
            "num_return_sequences": 2
        }"#;
        let params = SearchParams::from_json(json).unwrap();
        assert_eq!(params.batch_beam_size(), 12);
        assert!(params.is_beam_search());
        assert_eq!(params.min_length, 5);
        assert!(!params.early_stopping);
        assert_eq!(params.num_return_sequences, 2);
    }

    #[test]
    fn test_params_missing_required_field() {
        let json = r#"{ "batch_size": 1, "vocab_size": 10 }"#;
        assert!(matches!(SearchParams::from_json(json), Err(Error::Json(_))));
    }

    #[test]
    fn test_validate_rejects_eos_outside_vocab() {
        let params = SearchParams::new(1, 10, 8, 10, 0);
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("eos_token_id"), "{err}");
    }

    #[test]
    fn test_validate_rejects_too_many_return_sequences() {
        let params = SearchParams::new(1, 10, 8, 0, 0)
            .with_num_beams(2)
            .with_num_return_sequences(3);
        assert!(matches!(params.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_penalty() {
        let params = SearchParams::new(1, 10, 8, 0, 0).with_repetition_penalty(0.0);
        assert!(params.validate().is_err());
        let params = SearchParams::new(1, 10, 8, 0, 0).with_repetition_penalty(f32::NAN);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_from_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("beamline-params-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("search.json");
        std::fs::write(
            &path,
            r#"{"batch_size":1,"num_beams":2,"vocab_size":10,"max_length":6,"eos_token_id":0,"pad_token_id":1}"#,
        )
        .unwrap();
        let params = SearchParams::from_file(&path).unwrap();
        assert_eq!(params.num_beams, 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_from_file_missing() {
        let err = SearchParams::from_file("/nonexistent/beamline/search.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
