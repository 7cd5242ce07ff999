pub mod mock;
pub mod protocol;
pub mod subprocess;

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;

/// One request to run the engine.
#[derive(Debug, Clone)]
pub struct EngineCall {
    /// Contract arguments (see [`protocol`]).
    pub args: Vec<OsString>,
    /// Private working directory. The engine's relative `out/` lands here.
    pub work_dir: PathBuf,
    /// Where results are expected. Always inside `work_dir`.
    pub output_dir: PathBuf,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

/// A finished engine run. Only ever produced once per call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub argv: Vec<OsString>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// `Ok(self)` on exit 0, otherwise the failure with both streams attached.
    pub fn into_result(self) -> Result<Self, BrokerError> {
        if self.success() {
            return Ok(self);
        }
        Err(BrokerError::EngineFailed {
            exit_code: self.exit_code,
            stdout: self.stdout_text(),
            stderr: self.stderr_text(),
        })
    }
}

/// Runs the analysis engine. The broker only knows this trait.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn invoke(&self, call: &EngineCall) -> Result<Invocation, BrokerError>;
}
