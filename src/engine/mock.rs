use std::ffi::OsString;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Engine, EngineCall, Invocation};
use crate::error::BrokerError;

/// What a [`MockEngine`] does for one call.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Written into the call's output directory before returning.
    pub files: Vec<(String, Vec<u8>)>,
    pub delay: Option<Duration>,
}

impl MockReply {
    /// Exit 0 with no output.
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
            files: Vec::new(),
            delay: None,
        }
    }

    /// Exit 0 with `stdout`.
    pub fn stdout(stdout: &str) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            ..Self::ok()
        }
    }

    /// Exit `code` with `stderr`.
    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.as_bytes().to_vec(),
            ..Self::ok()
        }
    }

    pub fn with_file(mut self, name: &str, contents: &str) -> Self {
        self.files
            .push((name.to_string(), contents.as_bytes().to_vec()));
        self
    }

    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.as_bytes().to_vec();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type ReplyFn = dyn Fn(&EngineCall) -> MockReply + Send + Sync;

enum Script {
    Sequence(Vec<MockReply>),
    Dynamic(Box<ReplyFn>),
}

/// A scripted engine for tests. Records every call it receives.
pub struct MockEngine {
    script: Script,
    index: AtomicUsize,
    calls: Mutex<Vec<EngineCall>>,
}

impl MockEngine {
    /// Returns `replies` in order, then fails.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self::with_script(Script::Sequence(replies))
    }

    /// Computes each reply from the call.
    pub fn from_fn<F>(reply: F) -> Self
    where
        F: Fn(&EngineCall) -> MockReply + Send + Sync + 'static,
    {
        Self::with_script(Script::Dynamic(Box::new(reply)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            index: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn invoke(&self, call: &EngineCall) -> Result<Invocation, BrokerError> {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call.clone());

        let reply = match &self.script {
            Script::Sequence(replies) => replies.get(i).cloned().ok_or_else(|| {
                BrokerError::Spawn(format!("MockEngine: no more replies (called {} times)", i + 1))
            })?,
            Script::Dynamic(reply) => reply(call),
        };

        if let Some(delay) = reply.delay {
            if let Some(limit) = call.timeout
                && delay > limit
            {
                tokio::time::sleep(limit).await;
                return Err(BrokerError::Timeout(limit));
            }
            tokio::time::sleep(delay).await;
        }

        for (name, contents) in &reply.files {
            tokio::fs::write(call.output_dir.join(name), contents)
                .await
                .map_err(|e| BrokerError::io("mock engine write", e))?;
        }

        let mut argv = vec![OsString::from("mock-engine")];
        argv.extend(call.args.iter().cloned());

        Ok(Invocation {
            argv,
            stdout: reply.stdout,
            stderr: reply.stderr,
            exit_code: reply.exit_code,
            elapsed: reply.delay.unwrap_or_default(),
        })
    }
}
