//! Crate error types.
//!
//! Stage-level problems never escape the stage controller as `Err`: they are
//! folded into [`Failure`] values carried by
//! [`StageResult::Failure`](crate::stage::StageResult). The enums here describe
//! the individual causes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::render::Locale;

/// Problems talking to the generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request could not be sent (DNS, connect, TLS, body encoding).
    #[error("request failed: {0}")]
    Request(String),
    /// The backend answered with a non-2xx status.
    #[error("HTTP error! status: {status}")]
    Status { status: u16, body: String },
    /// The response body failed while it was being read.
    #[error("stream read failed: {0}")]
    Read(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Request(e.to_string())
    }
}

/// Structural problems reported by a [`MarkupValidator`](crate::extract::MarkupValidator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkupError {
    #[error("document body is empty")]
    EmptyBody,
    #[error("unterminated tag starting at byte {offset}")]
    UnterminatedTag { offset: usize },
    #[error("unterminated comment starting at byte {offset}")]
    UnterminatedComment { offset: usize },
    #[error("<{name}> is never closed")]
    UnclosedRawText { name: String },
    #[error("closing tag </{name}> at byte {offset} has no matching open element")]
    UnmatchedClose { name: String, offset: usize },
}

/// Why the final payload could not be pulled out of the token text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no <final_output> block found in the response")]
    MissingOpen,
    #[error("<final_output> block is never closed")]
    MissingClose,
    #[error("malformed markup in <final_output>: {0}")]
    Invalid(#[from] MarkupError),
}

impl ExtractError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::MissingOpen | ExtractError::MissingClose => FailureKind::Extraction,
            ExtractError::Invalid(_) => FailureKind::Validation,
        }
    }
}

/// Orchestrator misuse: an operation was called in a phase that cannot
/// serve it. These are caller bugs, not stage failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("no topic has been started in this session")]
    NoTopic,
    #[error("no outline is waiting for confirmation")]
    NoOutline,
    #[error("operation not available in combined mode")]
    CombinedMode,
}

/// Configuration loading problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Terminal failure categories of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Stream could not be established, returned a non-success status, or
    /// broke while reading.
    Transport,
    /// The backend sent an explicit error payload mid-stream.
    Remote,
    /// The stream ended without a terminal marker.
    IncompleteStream,
    /// The terminal payload block was missing.
    Extraction,
    /// The terminal payload block was present but structurally invalid.
    Validation,
}

impl FailureKind {
    /// Extraction and validation both mean the model's output could not be
    /// parsed into an artifact.
    pub fn is_parse_error(self) -> bool {
        matches!(self, FailureKind::Extraction | FailureKind::Validation)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Transport => "transport",
            FailureKind::Remote => "remote",
            FailureKind::IncompleteStream => "incomplete_stream",
            FailureKind::Extraction => "extraction",
            FailureKind::Validation => "validation",
        };
        write!(f, "{s}")
    }
}

/// A typed stage failure with the message to surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(e: &GenerationError) -> Self {
        Self::new(FailureKind::Transport, e.to_string())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Remote, message)
    }

    pub fn incomplete_stream() -> Self {
        Self::new(
            FailureKind::IncompleteStream,
            "stream ended before the terminal marker",
        )
    }

    pub fn extraction(e: &ExtractError) -> Self {
        Self::new(e.kind(), e.to_string())
    }

    /// Message for the single error notification shown to the user.
    ///
    /// Backend-supplied text wins where there is one; otherwise the
    /// localized catalog text is used.
    pub fn user_message(&self, locale: Locale) -> String {
        match self.kind {
            FailureKind::Remote | FailureKind::Transport if !self.message.is_empty() => {
                self.message.clone()
            }
            FailureKind::Extraction | FailureKind::Validation => {
                locale.text(crate::render::Text::ParseError).to_string()
            }
            _ => locale.text(crate::render::Text::GenericError).to_string(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
