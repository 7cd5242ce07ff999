//! The broker↔engine contract.
//!
//! Single-tx mode: `<engine> <input.json>`, one JSON document on stdout.
//! Block mode: `<engine> --block <blk> <rev> <xor>`, zero or more
//! `*.json` documents written to `out/` under the engine's working
//! directory. Exit 0 means the output is authoritative; anything else is a
//! failure explained by stderr (or by an error envelope on stdout).

use std::ffi::OsString;
use std::path::Path;

use serde_json::Value;

/// Highest protocol revision this broker understands.
pub const PROTOCOL_VERSION: u64 = 1;

pub const BLOCK_FLAG: &str = "--block";

/// Results directory, relative to the engine's working directory.
pub const OUTPUT_DIR: &str = "out";

pub const RESULT_SUFFIX: &str = ".json";

/// Input file names inside a scratch directory.
pub const TX_INPUT_FILE: &str = "input.json";
pub const BLK_FILE: &str = "blk.dat";
pub const REV_FILE: &str = "rev.dat";
pub const XOR_FILE: &str = "xor.dat";

pub fn tx_args(input: &Path) -> Vec<OsString> {
    vec![input.as_os_str().to_owned()]
}

pub fn block_args(blk: &Path, rev: &Path, xor: &Path) -> Vec<OsString> {
    vec![
        OsString::from(BLOCK_FLAG),
        blk.as_os_str().to_owned(),
        rev.as_os_str().to_owned(),
        xor.as_os_str().to_owned(),
    ]
}

pub fn is_result_file(name: &str) -> bool {
    name.len() > RESULT_SUFFIX.len() && name.ends_with(RESULT_SUFFIX)
}

/// Check that a parsed document is something this broker can hand out.
/// Any JSON value passes through; only an object carrying a
/// `protocol_version` other than the supported one is rejected. Documents
/// without the field are revision 1.
pub fn check_document(doc: &Value) -> Result<(), String> {
    let Some(object) = doc.as_object() else {
        return Ok(());
    };
    match object.get("protocol_version") {
        None => Ok(()),
        Some(Value::Number(n)) if n.as_u64() == Some(PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(format!(
            "unsupported protocol_version {other} (supported: {PROTOCOL_VERSION})"
        )),
    }
}

/// The message of an engine error envelope
/// (`{"ok":false,"error":{"code":..,"message":..}}`), if stdout holds one.
pub fn error_message(stdout: &str) -> Option<String> {
    let doc: Value = serde_json::from_str(stdout).ok()?;
    if doc.get("ok").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    doc.get("error")?
        .get("message")?
        .as_str()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
