//! Maps results and errors onto the JSON envelopes clients branch on.
//!
//! Every error envelope carries `"ok": false`. The single-tx endpoint keeps
//! its flat legacy shape (`error` is a headline string); the block endpoint
//! nests `{code, message}` under `error`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::engine::protocol;
use crate::error::{BrokerError, Mode};

pub const ENGINE_FAILED_DEFAULT: &str = "Analyzer exited with error";

/// A successful analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisResult {
    /// The engine's stdout document.
    Single(Value),
    /// One document per result file, ordered by file name.
    Blocks(Vec<Value>),
}

impl AnalysisResult {
    pub fn into_body(self) -> Value {
        match self {
            Self::Single(doc) => doc,
            Self::Blocks(mut docs) if docs.len() == 1 => docs.remove(0),
            Self::Blocks(docs) => json!({ "ok": true, "blocks": docs }),
        }
    }
}

impl IntoResponse for AnalysisResult {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self.into_body())).into_response()
    }
}

/// An error as reported by one endpoint.
#[derive(Debug)]
pub struct ErrorResponse {
    pub mode: Mode,
    pub error: BrokerError,
}

impl ErrorResponse {
    pub fn new(mode: Mode, error: BrokerError) -> Self {
        Self { mode, error }
    }

    pub fn envelope(&self) -> Value {
        match self.mode {
            Mode::Tx => tx_envelope(&self.error),
            Mode::Block => block_envelope(&self.error),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.error.status_code(), Json(self.envelope())).into_response()
    }
}

fn tx_envelope(err: &BrokerError) -> Value {
    let code = err.code(Mode::Tx);
    match err {
        BrokerError::Validation { message, .. } => {
            json!({ "ok": false, "error": message, "code": code })
        }
        BrokerError::EngineFailed { stdout, stderr, .. } => {
            let mut body = json!({
                "ok": false,
                "error": "Analyzer failed",
                "code": code,
                "details": stderr,
            });
            if !stdout.is_empty() {
                body["raw_output"] = json!(stdout);
            }
            body
        }
        BrokerError::InvalidOutput { raw, .. } => json!({
            "ok": false,
            "error": "Invalid JSON from analyzer",
            "code": code,
            "raw_output": raw,
        }),
        BrokerError::Protocol { reason, raw } => json!({
            "ok": false,
            "error": "Unexpected analyzer protocol",
            "code": code,
            "details": reason,
            "raw_output": raw,
        }),
        BrokerError::Timeout(_) => json!({
            "ok": false,
            "error": "Analyzer timed out",
            "code": code,
            "details": err.to_string(),
        }),
        BrokerError::Spawn(_) | BrokerError::ReadOutput(_) | BrokerError::Io(_) => {
            json!({ "ok": false, "error": err.to_string(), "code": code })
        }
    }
}

fn block_envelope(err: &BrokerError) -> Value {
    let code = err.code(Mode::Block);
    let (message, raw_output) = match err {
        BrokerError::EngineFailed { stdout, stderr, .. } => {
            let message = if !stderr.is_empty() {
                stderr.clone()
            } else {
                protocol::error_message(stdout)
                    .unwrap_or_else(|| ENGINE_FAILED_DEFAULT.to_string())
            };
            (message, Some(stdout))
        }
        BrokerError::InvalidOutput { raw, .. } | BrokerError::Protocol { raw, .. } => {
            (err.to_string(), Some(raw))
        }
        _ => (err.to_string(), None),
    };

    let mut body = json!({
        "ok": false,
        "error": { "code": code, "message": message },
    });
    if let Some(raw) = raw_output.filter(|raw| !raw.is_empty()) {
        body["raw_output"] = json!(raw);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CODE_MISSING_FILES;
    use std::time::Duration;

    fn failed(stdout: &str, stderr: &str) -> BrokerError {
        BrokerError::EngineFailed {
            exit_code: Some(1),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn tx(err: BrokerError) -> Value {
        ErrorResponse::new(Mode::Tx, err).envelope()
    }

    fn block(err: BrokerError) -> Value {
        ErrorResponse::new(Mode::Block, err).envelope()
    }

    #[test]
    fn single_result_passes_through() {
        let doc = json!({"txid": "abc"});
        assert_eq!(AnalysisResult::Single(doc.clone()).into_body(), doc);
    }

    #[test]
    fn one_block_is_unwrapped() {
        let doc = json!({"ok": true, "block_header": {}});
        assert_eq!(AnalysisResult::Blocks(vec![doc.clone()]).into_body(), doc);
    }

    #[test]
    fn many_blocks_are_wrapped_in_order() {
        let body = AnalysisResult::Blocks(vec![json!({"n": 1}), json!({"n": 2})]).into_body();
        assert_eq!(body, json!({"ok": true, "blocks": [{"n": 1}, {"n": 2}]}));
    }

    #[test]
    fn zero_blocks_is_an_empty_collection() {
        let body = AnalysisResult::Blocks(Vec::new()).into_body();
        assert_eq!(body, json!({"ok": true, "blocks": []}));
    }

    #[test]
    fn tx_validation_envelope() {
        let err = BrokerError::validation("INVALID_INPUT", "Invalid input JSON");
        assert_eq!(
            tx(err),
            json!({"ok": false, "error": "Invalid input JSON", "code": "INVALID_INPUT"})
        );
    }

    #[test]
    fn tx_engine_failure_carries_stderr() {
        let body = tx(failed("", "prevouts count mismatch\n"));
        assert_eq!(body["error"], "Analyzer failed");
        assert_eq!(body["code"], "ENGINE_FAILED");
        assert_eq!(body["details"], "prevouts count mismatch\n");
        assert!(body.get("raw_output").is_none());
    }

    #[test]
    fn tx_engine_failure_attaches_stdout_when_present() {
        let body = tx(failed(r#"{"ok":false}"#, ""));
        assert_eq!(body["raw_output"], r#"{"ok":false}"#);
    }

    #[test]
    fn tx_invalid_output_keeps_raw_text() {
        let body = tx(BrokerError::InvalidOutput {
            reason: "eof".to_string(),
            raw: "not json".to_string(),
        });
        assert_eq!(body["error"], "Invalid JSON from analyzer");
        assert_eq!(body["code"], "INVALID_ENGINE_OUTPUT");
        assert_eq!(body["raw_output"], "not json");
    }

    #[test]
    fn tx_timeout_envelope() {
        let body = tx(BrokerError::Timeout(Duration::from_secs(3)));
        assert_eq!(body["code"], "TIMEOUT");
        assert_eq!(body["ok"], false);
    }

    #[test]
    fn block_failure_uses_stderr_verbatim() {
        assert_eq!(
            block(failed("", "bad magic")),
            json!({"ok": false, "error": {"code": "BLOCK_PARSE_FAILED", "message": "bad magic"}})
        );
    }

    #[test]
    fn block_failure_falls_back_to_engine_envelope() {
        let stdout = r#"{"ok":false,"error":{"code":"CLI_ERROR","message":"rev file truncated"}}"#;
        let body = block(failed(stdout, ""));
        assert_eq!(body["error"]["message"], "rev file truncated");
        assert_eq!(body["raw_output"], stdout);
    }

    #[test]
    fn block_failure_falls_back_to_default_message() {
        let body = block(failed("", ""));
        assert_eq!(body["error"]["message"], ENGINE_FAILED_DEFAULT);
        assert!(body.get("raw_output").is_none());
    }

    #[test]
    fn block_missing_files_envelope() {
        let body = block(BrokerError::validation(CODE_MISSING_FILES, "need files"));
        assert_eq!(
            body,
            json!({"ok": false, "error": {"code": "MISSING_FILES", "message": "need files"}})
        );
    }

    #[test]
    fn block_read_failure_envelope() {
        let body = block(BrokerError::ReadOutput("out: gone".to_string()));
        assert_eq!(body["error"]["code"], "READ_OUTPUT_FAILED");
        assert_eq!(body["error"]["message"], "failed to read engine output: out: gone");
    }

    #[test]
    fn status_follows_error_kind() {
        let response = ErrorResponse::new(Mode::Block, failed("", "x")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response =
            ErrorResponse::new(Mode::Tx, BrokerError::Timeout(Duration::from_secs(1))).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
