//! Error taxonomy shared by every stage of a request.
//!
//! Each variant knows its HTTP status. The wire code depends on which
//! endpoint reported it, see [`BrokerError::code`].

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Which endpoint a request came in on. The two endpoints shape their
/// envelopes differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `POST /api/analyze`
    Tx,
    /// `POST /api/analyze-block`
    Block,
}

pub const CODE_INVALID_INPUT: &str = "INVALID_INPUT";
pub const CODE_MISSING_FILES: &str = "MISSING_FILES";
pub const CODE_DUPLICATE_FILE: &str = "DUPLICATE_FILE";
pub const CODE_INVALID_MULTIPART: &str = "INVALID_MULTIPART";

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed or missing input. Raised before any scratch is allocated.
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    /// The engine executable could not be started.
    #[error("failed to spawn engine: {0}")]
    Spawn(String),

    /// The engine ran and exited unsuccessfully.
    #[error("engine exited with {}", exit_label(.exit_code))]
    EngineFailed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The engine did not finish in time and was killed.
    #[error("engine timed out after {0:?}")]
    Timeout(Duration),

    /// Exit 0, but stdout was not JSON.
    #[error("invalid JSON from engine: {reason}")]
    InvalidOutput { reason: String, raw: String },

    /// Exit 0 and valid JSON, but not a document this broker understands.
    #[error("unexpected engine protocol: {reason}")]
    Protocol { reason: String, raw: String },

    /// The output directory or one of its result files could not be read.
    #[error("failed to read engine output: {0}")]
    ReadOutput(String),

    /// Scratch filesystem fault unrelated to the engine.
    #[error("scratch I/O failed: {0}")]
    Io(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl BrokerError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::Io(format!("{context}: {err}"))
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Spawn(_)
            | Self::EngineFailed { .. }
            | Self::InvalidOutput { .. }
            | Self::Protocol { .. }
            | Self::ReadOutput(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code as it appears on the wire.
    #[must_use]
    pub const fn code(&self, mode: Mode) -> &'static str {
        match self {
            Self::Validation { code, .. } => *code,
            Self::Spawn(_) => "ENGINE_SPAWN_FAILED",
            Self::EngineFailed { .. } => match mode {
                Mode::Tx => "ENGINE_FAILED",
                Mode::Block => "BLOCK_PARSE_FAILED",
            },
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidOutput { .. } => "INVALID_ENGINE_OUTPUT",
            Self::Protocol { .. } => "UNEXPECTED_ENGINE_PROTOCOL",
            Self::ReadOutput(_) => "READ_OUTPUT_FAILED",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the caller is at fault.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_failed() -> BrokerError {
        BrokerError::EngineFailed {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "bad magic".to_string(),
        }
    }

    #[test]
    fn validation_is_bad_request() {
        let err = BrokerError::validation(CODE_MISSING_FILES, "need files");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(Mode::Block), "MISSING_FILES");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "need files");
    }

    #[test]
    fn engine_failure_code_depends_on_mode() {
        let err = engine_failed();
        assert_eq!(err.code(Mode::Tx), "ENGINE_FAILED");
        assert_eq!(err.code(Mode::Block), "BLOCK_PARSE_FAILED");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn timeout_is_gateway_timeout() {
        let err = BrokerError::Timeout(Duration::from_secs(5));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code(Mode::Tx), "TIMEOUT");
        assert_eq!(err.to_string(), "engine timed out after 5s");
    }

    #[test]
    fn exit_label_covers_signals() {
        assert_eq!(engine_failed().to_string(), "engine exited with status 1");
        let killed = BrokerError::EngineFailed {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(killed.to_string(), "engine exited with a signal");
    }

    #[test]
    fn protocol_and_parse_failures_are_distinct() {
        let parse = BrokerError::InvalidOutput {
            reason: "eof".to_string(),
            raw: "{".to_string(),
        };
        let protocol = BrokerError::Protocol {
            reason: "not an object".to_string(),
            raw: "[]".to_string(),
        };
        assert_ne!(parse.code(Mode::Tx), protocol.code(Mode::Tx));
    }

    #[test]
    fn io_error_carries_context() {
        let err = BrokerError::io("write input", std::io::Error::other("disk full"));
        assert_eq!(err.code(Mode::Block), "IO_ERROR");
        assert!(err.to_string().contains("write input: disk full"));
    }
}
