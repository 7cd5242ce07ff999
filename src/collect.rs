//! Turns what the engine left behind into JSON results.

use std::borrow::Cow;
use std::path::Path;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::warn;

use crate::engine::protocol;
use crate::error::BrokerError;

/// Parse the whole of a single-tx run's stdout as one document. On failure
/// the unparsed text is kept verbatim in the error. Stdout that is not valid
/// UTF-8 has its invalid sequences replaced by U+FFFD first, which is logged.
pub fn parse_document(stdout: &[u8]) -> Result<Value, BrokerError> {
    let raw = match String::from_utf8_lossy(stdout) {
        Cow::Borrowed(text) => text.to_string(),
        Cow::Owned(text) => {
            warn!(bytes = stdout.len(), "engine stdout is not valid UTF-8, invalid sequences replaced");
            text
        }
    };
    let doc: Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            return Err(BrokerError::InvalidOutput {
                reason: e.to_string(),
                raw,
            });
        }
    };
    protocol::check_document(&doc).map_err(|reason| BrokerError::Protocol { reason, raw })?;
    Ok(doc)
}

/// Read every result file in `dir`, ordered by file name.
pub async fn collect_results(dir: &Path) -> Result<Vec<Value>, BrokerError> {
    let read_dir_err = |e: std::io::Error| BrokerError::ReadOutput(format!("{}: {e}", dir.display()));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_err)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !protocol::is_result_file(&name) {
            continue;
        }
        if !entry.file_type().await.map_err(read_dir_err)?.is_file() {
            continue;
        }
        names.push(name);
    }
    names.sort();

    try_join_all(names.iter().map(|name| read_result(dir, name))).await
}

async fn read_result(dir: &Path, name: &str) -> Result<Value, BrokerError> {
    let raw = tokio::fs::read_to_string(dir.join(name))
        .await
        .map_err(|e| BrokerError::ReadOutput(format!("{name}: {e}")))?;
    let doc: Value =
        serde_json::from_str(&raw).map_err(|e| BrokerError::ReadOutput(format!("{name}: {e}")))?;
    protocol::check_document(&doc).map_err(|reason| BrokerError::Protocol {
        reason: format!("{name}: {reason}"),
        raw,
    })?;
    Ok(doc)
}
