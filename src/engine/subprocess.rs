use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Engine, EngineCall, Invocation};
use crate::error::BrokerError;

/// Environment variables passed through to the engine. Everything else is stripped.
const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TZ", "TMPDIR"];

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Runs the engine as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    executable: PathBuf,
    prefix_args: Vec<OsString>,
}

impl SubprocessEngine {
    /// `prefix_args` go before the contract arguments, e.g. a script path
    /// when `executable` is an interpreter.
    pub fn new(executable: impl Into<PathBuf>, prefix_args: Vec<OsString>) -> Self {
        Self {
            executable: resolve_executable(executable.into()),
            prefix_args,
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

/// The child runs in a different working directory, so a relative path
/// like `./analyzer` must be pinned to ours. Bare names are left for `PATH`.
fn resolve_executable(executable: PathBuf) -> PathBuf {
    if executable.is_relative() && executable.components().count() > 1 {
        std::path::absolute(&executable).unwrap_or(executable)
    } else {
        executable
    }
}

fn filtered_env() -> Vec<(String, String)> {
    SAFE_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|val| (key.to_string(), val)))
        .collect()
}

/// A running engine. Consumed by [`InvocationHandle::wait`], so it reports
/// completion exactly once.
#[derive(Debug)]
pub struct InvocationHandle {
    child: Child,
    argv: Vec<OsString>,
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
    started: Instant,
}

/// Start `executable` with `args` in `work_dir`. Both output streams are
/// drained in the background as chunks arrive. The child is killed if the
/// handle is dropped before it finishes.
pub fn spawn(
    executable: &Path,
    args: &[OsString],
    work_dir: &Path,
) -> Result<InvocationHandle, BrokerError> {
    let mut child = Command::new(executable)
        .args(args)
        .current_dir(work_dir)
        .env_clear()
        .envs(filtered_env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BrokerError::Spawn(format!("{}: {e}", executable.display())))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BrokerError::Spawn("engine stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BrokerError::Spawn("engine stderr was not captured".to_string()))?;

    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(executable.as_os_str().to_owned());
    argv.extend(args.iter().cloned());

    Ok(InvocationHandle {
        child,
        argv,
        stdout: accumulate(stdout),
        stderr: accumulate(stderr),
        started: Instant::now(),
    })
}

fn accumulate<R>(mut stream: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "engine stream read failed");
                    break;
                }
            }
        }
        buf
    })
}

impl InvocationHandle {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit and both streams to close. With a
    /// timeout, an overrunning child is killed and reaped and the call
    /// resolves to [`BrokerError::Timeout`].
    pub async fn wait(self, timeout: Option<Duration>) -> Result<Invocation, BrokerError> {
        let Self {
            mut child,
            argv,
            mut stdout,
            mut stderr,
            started,
        } = self;

        let finished = async {
            let status = child.wait().await;
            let out = (&mut stdout).await;
            let err = (&mut stderr).await;
            (status, out, err)
        };

        let waited = match timeout {
            Some(limit) => tokio::time::timeout(limit, finished).await.ok(),
            None => Some(finished.await),
        };

        let Some((status, out, err)) = waited else {
            let limit = timeout.unwrap_or_default();
            warn!(pid = ?child.id(), limit_secs = limit.as_secs(), "engine timed out, killing");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill engine");
            }
            stdout.abort();
            stderr.abort();
            return Err(BrokerError::Timeout(limit));
        };

        let status = status.map_err(|e| BrokerError::Io(format!("wait for engine: {e}")))?;
        let stdout = out.map_err(|e| BrokerError::Io(format!("collect engine stdout: {e}")))?;
        let stderr = err.map_err(|e| BrokerError::Io(format!("collect engine stderr: {e}")))?;

        Ok(Invocation {
            argv,
            stdout,
            stderr,
            exit_code: status.code(),
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait]
impl Engine for SubprocessEngine {
    async fn invoke(&self, call: &EngineCall) -> Result<Invocation, BrokerError> {
        let mut args = self.prefix_args.clone();
        args.extend(call.args.iter().cloned());

        info!(
            engine = %self.executable.display(),
            work_dir = %call.work_dir.display(),
            "spawning engine"
        );
        let handle = spawn(&self.executable, &args, &call.work_dir)?;
        let invocation = handle.wait(call.timeout).await?;

        info!(
            exit_code = ?invocation.exit_code,
            stdout_bytes = invocation.stdout.len(),
            stderr_bytes = invocation.stderr.len(),
            elapsed_ms = invocation.elapsed.as_millis() as u64,
            "engine finished"
        );
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_are_pinned() {
        let resolved = resolve_executable(PathBuf::from("./analyzer"));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("analyzer"));
    }

    #[test]
    fn bare_names_use_path_lookup() {
        assert_eq!(resolve_executable(PathBuf::from("sh")), PathBuf::from("sh"));
        assert_eq!(
            resolve_executable(PathBuf::from("/bin/sh")),
            PathBuf::from("/bin/sh")
        );
    }

    #[test]
    fn env_is_allow_listed() {
        let env = filtered_env();
        assert!(env.iter().all(|(k, _)| SAFE_ENV_VARS.contains(&k.as_str())));
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = spawn(Path::new("/nonexistent/analyzer"), &[], dir.path()).unwrap_err();
        assert!(matches!(err, BrokerError::Spawn(ref m) if m.contains("/nonexistent/analyzer")));
    }
}
