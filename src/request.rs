//! Validation of incoming requests. Nothing here touches the filesystem:
//! a request is fully checked before any scratch is allocated.

use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{
    BrokerError, CODE_DUPLICATE_FILE, CODE_INVALID_INPUT, CODE_MISSING_FILES,
};

/// Message for every single-tx validation failure.
pub const INVALID_INPUT_MESSAGE: &str = "Invalid input JSON";

pub const MISSING_FILES_MESSAGE: &str = "blk, rev, and xor files are all required";

/// A validated analysis request.
#[derive(Debug, Clone)]
pub enum AnalysisRequest {
    SingleTx(TxRequest),
    BlockFiles(BlockFiles),
}

/// Body of `POST /api/analyze`. Fields beyond the known ones are kept and
/// handed to the engine untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    pub raw_tx: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevouts: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TxRequest {
    /// The engine's input file contents.
    pub fn to_input_json(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| BrokerError::Io(format!("serialize engine input: {e}")))
    }
}

/// The three companion files of a block analysis.
#[derive(Debug, Clone)]
pub struct BlockFiles {
    pub blk: Bytes,
    pub rev: Bytes,
    pub xor: Bytes,
}

fn invalid_input() -> BrokerError {
    BrokerError::validation(CODE_INVALID_INPUT, INVALID_INPUT_MESSAGE)
}

/// Validate a single-tx body. `raw_tx` must be a non-empty string,
/// `network` a string and `prevouts` an array when present.
pub fn parse_tx(body: &[u8]) -> Result<AnalysisRequest, BrokerError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| invalid_input())?;

    let has_raw_tx = value
        .get("raw_tx")
        .and_then(Value::as_str)
        .is_some_and(|raw| !raw.is_empty());
    if !has_raw_tx {
        return Err(invalid_input());
    }

    let request: TxRequest = serde_json::from_value(value).map_err(|_| invalid_input())?;
    Ok(AnalysisRequest::SingleTx(request))
}

/// Collects multipart parts of a block upload.
#[derive(Debug, Default)]
pub struct BlockUpload {
    blk: Option<Bytes>,
    rev: Option<Bytes>,
    xor: Option<Bytes>,
}

impl BlockUpload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a part with this name is one of ours.
    pub fn wants(name: &str) -> bool {
        matches!(name, "blk" | "rev" | "xor")
    }

    /// Record one part. Unknown names are ignored; a second part with the
    /// same name is rejected.
    pub fn add(&mut self, name: &str, data: Bytes) -> Result<(), BrokerError> {
        let slot = match name {
            "blk" => &mut self.blk,
            "rev" => &mut self.rev,
            "xor" => &mut self.xor,
            _ => return Ok(()),
        };
        if slot.is_some() {
            return Err(BrokerError::validation(
                CODE_DUPLICATE_FILE,
                format!("exactly one {name} file is allowed"),
            ));
        }
        *slot = Some(data);
        Ok(())
    }

    pub fn finish(self) -> Result<AnalysisRequest, BrokerError> {
        match (self.blk, self.rev, self.xor) {
            (Some(blk), Some(rev), Some(xor)) => {
                Ok(AnalysisRequest::BlockFiles(BlockFiles { blk, rev, xor }))
            }
            _ => Err(missing_files()),
        }
    }
}

pub fn missing_files() -> BrokerError {
    BrokerError::validation(CODE_MISSING_FILES, MISSING_FILES_MESSAGE)
}
