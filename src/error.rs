//! Error types shared by the pipeline components.

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::codec::SessionState;

/// Errors raised while driving a codec.
///
/// [`CodecError::is_fatal`] splits them into contract violations, which must
/// tear the session down, and per-call hiccups the codec loop may ride out.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A call was made on a session after `release()`.
    #[error("codec session already released")]
    Released,

    /// A lifecycle call arrived in a state that does not allow it.
    #[error("cannot {op} a codec session in state {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    /// A slot index that the codec never handed out (or already took back).
    #[error("invalid {kind} buffer index {index}")]
    InvalidBuffer { kind: &'static str, index: usize },

    /// The codec engine refused a call its own state machine does not allow.
    #[error("illegal codec call: {0}")]
    Illegal(String),

    /// The requested codec or parameter combination has no backend.
    #[error("unsupported codec: {0}")]
    Unsupported(String),

    /// The codec failed this call but remains usable.
    #[error("transient codec error: {0}")]
    Transient(String),

    /// Error reported by the wrapped codec implementation.
    #[error("codec backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl CodecError {
    /// Fatal errors terminate the codec loop without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::Released
                | CodecError::InvalidState { .. }
                | CodecError::InvalidBuffer { .. }
                | CodecError::Illegal(_)
                | CodecError::Unsupported(_)
        )
    }
}

/// Why an OPUS configuration frame could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpusConfigError {
    #[error("not an OPUS config frame (missing AOPUSHDR marker)")]
    NotConfigFrame,

    #[error("not enough data in OPUS {section} section: need {needed} bytes, {remaining} left")]
    Truncated {
        section: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("OPUS identification header is empty")]
    EmptyHeader,

    #[error("invalid block size in OPUS {section} section: {length}")]
    InvalidLength { section: &'static str, length: u64 },
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced when a pipeline cannot be started.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
