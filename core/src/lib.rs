//! wordpredict-core
//!
//! Adaptive word prediction: tokenizer, n-gram language models with
//! recency-weighted learning, model composition, an on-disk model cache with
//! atomic saves, and the prediction engine tying them together.
//!
//! Public API:
//! - `tokenizer` - sentence splitting and text/context tokenization with spans
//! - `NGramModel` - unigram, dynamic, Kneser-Ney and recency-cached models
//! - `ModelComposer` - overlay and interpolation of several models
//! - `ModelCache` - model ids to loaded models, saving and recovery
//! - `PredictionEngine` - predict, learn and lookup over a set of models
//! - `AutoSaveScheduler` - background saving of modified user models
//! - `validate_file` - structural checks of `.lm` files
//! - `Config` - directories, auto-save timing and prediction defaults
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod error;
pub use error::{ConfigError, LoadError, ModelError, PredictError};

pub mod options;
pub use options::PredictOptions;

pub mod tokenizer;
pub use tokenizer::{split_sentences, split_tokens, tokenize_context, tokenize_sentence, tokenize_text, Span};

pub mod dictionary;
pub use dictionary::{Dictionary, WordId, CONTROL_WORDS};

pub mod trie;

pub mod ngram;
pub use ngram::{ModelKind, NGramEntry, NGramModel, PredictionChoice, RecencyConfig, Smoothing};

pub mod lmfile;
pub use lmfile::read_order;

pub mod validate;
pub use validate::{validate_file, ValidationError, ValidationErrorKind, ValidationReport};

pub mod composer;
pub use composer::{parse_lmdesc, Composition, ModelComposer};

pub mod cache;
pub use cache::{ModelCache, ModelClass, SharedModel};

pub mod autosave;
pub use autosave::AutoSaveScheduler;

pub mod engine;
pub use engine::{EngineState, LookupToken, PredictionEngine};

pub mod corpus;

/// Engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Directory of the read-only `lm:system:*` models
    pub system_model_dir: PathBuf,
    /// Directory of the learned `lm:user:*` models
    pub user_model_dir: PathBuf,

    // Auto-save
    /// Minimum time between two saves, 0 disables auto-saving
    pub auto_save_interval_secs: u64,
    /// How often the auto-save thread wakes up
    pub auto_save_tick_secs: u64,

    // Recency parameters applied to cached models before predicting
    pub recency_ratio: f64,
    pub recency_halflife: u32,
    pub recency_lambdas: Vec<f64>,

    /// Characters before the cursor considered by
    /// `PredictionEngine::get_last_context_fragment`
    pub context_fragment_chars: usize,
    /// Number of predictions callers ask for by default, -1 for all
    pub default_limit: i32,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        Self {
            system_model_dir: PathBuf::from("/usr/share/wordpredict/models"),
            user_model_dir: home.join(".local/share/wordpredict/models"),
            // save at most every 10 minutes, checked every 5 seconds
            auto_save_interval_secs: 600,
            auto_save_tick_secs: 5,
            // tuned for the user model's recency weighting
            recency_ratio: 0.811,
            recency_halflife: 96,
            recency_lambdas: vec![0.404, 0.831, 0.444],
            context_fragment_chars: 1024,
            default_limit: 20,
        }
    }
}

impl Config {
    /// Read and check a TOML config file; missing keys keep their defaults.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Write the config atomically, creating the parent directory.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_error)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_error)?;
        tmp.write_all(content.as_bytes()).map_err(io_error)?;
        tmp.persist(path).map_err(|e| io_error(e.error))?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        self.validate()?;
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the auto-save timing, the recency parameters and the
    /// prediction limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::InvalidValue { field, reason });

        if self.auto_save_interval_secs > 0 && self.auto_save_tick_secs == 0 {
            return invalid("auto_save_tick_secs", "must be positive while auto-saving");
        }
        if !(0.0..=1.0).contains(&self.recency_ratio) {
            return invalid("recency_ratio", "must be within [0, 1]");
        }
        if self.recency_halflife == 0 {
            return invalid("recency_halflife", "must be positive");
        }
        if self.recency_lambdas.iter().any(|l| !(0.0..=1.0).contains(l)) {
            return invalid("recency_lambdas", "must be within [0, 1]");
        }
        if self.default_limit < -1 {
            return invalid("default_limit", "must be -1 or a count");
        }
        Ok(())
    }
}

/// Character helpers for case and accent insensitive matching.
pub mod utils {
    use unicode_normalization::char::is_combining_mark;
    use unicode_normalization::UnicodeNormalization;

    /// Single-character lowercase; characters lowering to several keep
    /// their first one.
    pub fn to_lower(c: char) -> char {
        c.to_lowercase().next().unwrap_or(c)
    }

    /// Base character of `c` without combining marks, e.g. `é` -> `e`.
    pub fn remove_accent(c: char) -> char {
        std::iter::once(c)
            .nfd()
            .find(|d| !is_combining_mark(*d))
            .unwrap_or(c)
    }

    pub fn has_accent(c: char) -> bool {
        remove_accent(c) != c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_toml_roundtrip() {
        let mut config = Config::default();
        config.auto_save_interval_secs = 30;
        config.recency_lambdas = vec![0.5];

        let text = config.to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.auto_save_interval_secs, 30);
        assert_eq!(parsed.recency_lambdas, vec![0.5]);
        assert_eq!(parsed.user_model_dir, config.user_model_dir);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config = Config::from_toml_str("user_model_dir = \"/tmp/models\"").unwrap();
        assert_eq!(config.user_model_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.recency_halflife, 96);
        assert_eq!(config.context_fragment_chars, 1024);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let field_of = |text: &str| match Config::from_toml_str(text) {
            Err(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("unexpected result {other:?}"),
        };
        assert_eq!(field_of("recency_ratio = 1.5"), "recency_ratio");
        assert_eq!(field_of("recency_halflife = 0"), "recency_halflife");
        assert_eq!(field_of("recency_lambdas = [0.5, -0.1]"), "recency_lambdas");
        assert_eq!(field_of("auto_save_tick_secs = 0"), "auto_save_tick_secs");
        assert_eq!(field_of("default_limit = -2"), "default_limit");

        // no tick is needed when auto-saving is off
        let config = Config::from_toml_str("auto_save_interval_secs = 0\nauto_save_tick_secs = 0");
        assert!(config.is_ok());

        assert!(matches!(
            Config::from_toml_str("recency_halflife = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("wordpredict.toml");

        let mut config = Config::default();
        config.auto_save_tick_secs = 2;
        config.recency_ratio = 0.5;
        config.save_toml(&path).unwrap();

        let loaded = Config::load_toml(&path).unwrap();
        assert_eq!(loaded.auto_save_tick_secs, 2);
        assert_eq!(loaded.recency_ratio, 0.5);

        config.recency_ratio = -1.0;
        assert!(config.save_toml(&path).is_err());
        assert_eq!(Config::load_toml(&path).unwrap().recency_ratio, 0.5);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load_toml(&missing),
            Err(ConfigError::Io { path, .. }) if path == missing
        ));
    }

    #[test]
    fn accents_and_case() {
        use utils::*;
        assert_eq!(remove_accent('é'), 'e');
        assert_eq!(remove_accent('Å'), 'A');
        assert!(has_accent('ü'));
        assert!(!has_accent('u'));
        assert_eq!(to_lower('Ä'), 'ä');
        assert_eq!(to_lower('x'), 'x');
    }
}
