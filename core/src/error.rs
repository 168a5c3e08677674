//! Error types for model loading, caching and the prediction engine.
//!
//! Tokenizing and in-memory counting never fail; only the IO boundaries
//! (load, save, recovery) and engine lifecycle checks produce errors.
use std::path::PathBuf;
use thiserror::Error;

use crate::engine::EngineState;

/// Errors raised while reading a `.lm` file into a model.
#[derive(Debug, Error)]
pub enum LoadError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A data line carries fewer fields than its n-gram level requires.
    #[error("too few tokens for n-gram level {level}: line {line}, tokens found {found}/{expected}")]
    TooFewTokens {
        level: usize,
        line: usize,
        found: usize,
        expected: usize,
    },

    /// A data line has a count or time column that is not a number.
    #[error("invalid number '{value}' in line {line}")]
    BadNumber { line: usize, value: String },

    /// An `\N-grams:` section outside the declared order.
    #[error("unexpected n-gram section for level {level} in line {line}")]
    UnexpectedOrder { level: usize, line: usize },

    /// The header declares a higher order than the model kind supports.
    #[error("model order {found} exceeds the supported maximum of {max}")]
    UnsupportedOrder { found: usize, max: usize },

    /// The number of n-grams read differs from the header declaration.
    #[error("unexpected n-gram count for level {level}: expected {expected} n-grams, but read {read}")]
    CountMismatch {
        level: usize,
        expected: usize,
        read: usize,
    },

    /// The file ended before `\end\`.
    #[error("unexpected end of file")]
    UnexpectedEof,
}

/// Errors raised by the model cache and by model configuration.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The backing file of a system model does not exist.
    #[error("language model '{lmid}' not found at '{}'", path.display())]
    ModelNotFound { lmid: String, path: PathBuf },

    /// The model failed to load earlier; it is kept in memory but never saved.
    #[error("language model '{lmid}' failed to load, saving disabled: {message}")]
    ModelLoadError { lmid: String, message: String },

    /// Writing or renaming during a save failed.
    #[error("failed to save language model '{}': {source}", path.display())]
    ModelSaveError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The id names an unknown type or class.
    #[error("unknown {component} component '{value}' in lmid '{lmid}'")]
    UnknownLmid {
        lmid: String,
        component: &'static str,
        value: String,
    },

    /// The model kind does not implement the requested smoothing.
    #[error("smoothing '{smoothing}' is not supported by {kind} models")]
    UnsupportedSmoothing {
        kind: &'static str,
        smoothing: String,
    },

    /// IO error outside of the save sequence, e.g. while recovering a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading or writing a [`crate::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of its range.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

/// Errors returned by [`crate::PredictionEngine`].
#[derive(Debug, Error)]
pub enum PredictError {
    /// The operation is not valid in the engine's current lifecycle state.
    #[error("'{operation}' is not valid while the engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    /// Model cache error.
    #[error(transparent)]
    Model(#[from] ModelError),
}
