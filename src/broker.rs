//! One request end to end: allocate scratch, materialize inputs, run the
//! engine, collect its output, release scratch.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::collect;
use crate::config::BrokerConfig;
use crate::engine::protocol::{self, BLK_FILE, REV_FILE, TX_INPUT_FILE, XOR_FILE};
use crate::engine::subprocess::SubprocessEngine;
use crate::engine::{Engine, EngineCall, Invocation};
use crate::envelope::AnalysisResult;
use crate::error::BrokerError;
use crate::request::{AnalysisRequest, BlockFiles, TxRequest};
use crate::scratch::{ScratchManager, ScratchSpace};

pub struct Broker {
    engine: Arc<dyn Engine>,
    scratch: ScratchManager,
    timeout: Option<Duration>,
}

impl Broker {
    pub fn new(engine: Arc<dyn Engine>, scratch: ScratchManager, timeout: Option<Duration>) -> Self {
        Self {
            engine,
            scratch,
            timeout,
        }
    }

    /// A broker driving the real engine binary.
    pub fn from_config(config: &BrokerConfig) -> Self {
        let engine = SubprocessEngine::new(&config.engine_path, config.engine_args.clone());
        Self::new(
            Arc::new(engine),
            ScratchManager::new(&config.scratch_root),
            config.engine_timeout,
        )
    }

    pub fn scratch(&self) -> &ScratchManager {
        &self.scratch
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResult, BrokerError> {
        match request {
            AnalysisRequest::SingleTx(tx) => self.analyze_tx(&tx).await,
            AnalysisRequest::BlockFiles(files) => self.analyze_block(&files).await,
        }
    }

    async fn analyze_tx(&self, tx: &TxRequest) -> Result<AnalysisResult, BrokerError> {
        let space = self.scratch.allocate("tx").await?;
        let outcome = self.run_tx(&space, tx).await;
        space.release().await;
        outcome
    }

    async fn analyze_block(&self, files: &BlockFiles) -> Result<AnalysisResult, BrokerError> {
        let space = self.scratch.allocate("block").await?;
        let outcome = self.run_block(&space, files).await;
        space.release().await;
        outcome
    }

    async fn run_tx(&self, space: &ScratchSpace, tx: &TxRequest) -> Result<AnalysisResult, BrokerError> {
        let input = space.materialize(TX_INPUT_FILE, &tx.to_input_json()?).await?;
        let invocation = self.invoke(space, protocol::tx_args(&input)).await?;
        collect::parse_document(&invocation.stdout).map(AnalysisResult::Single)
    }

    async fn run_block(
        &self,
        space: &ScratchSpace,
        files: &BlockFiles,
    ) -> Result<AnalysisResult, BrokerError> {
        let blk = space.materialize(BLK_FILE, &files.blk).await?;
        let rev = space.materialize(REV_FILE, &files.rev).await?;
        let xor = space.materialize(XOR_FILE, &files.xor).await?;

        self.invoke(space, protocol::block_args(&blk, &rev, &xor)).await?;

        let docs = collect::collect_results(&space.output_dir()).await?;
        if docs.is_empty() {
            warn!(dir = %space.path().display(), "engine succeeded without writing any results");
        }
        Ok(AnalysisResult::Blocks(docs))
    }

    async fn invoke(&self, space: &ScratchSpace, args: Vec<OsString>) -> Result<Invocation, BrokerError> {
        let call = EngineCall {
            args,
            work_dir: space.path().to_path_buf(),
            output_dir: space.output_dir(),
            timeout: self.timeout,
        };
        let invocation = self.engine.invoke(&call).await?;
        if !invocation.success() {
            warn!(
                exit_code = ?invocation.exit_code,
                stderr = %invocation.stderr_text().trim_end(),
                "engine failed"
            );
        }
        invocation.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, MockReply};
    use crate::request::parse_tx;
    use axum::body::Bytes;
    use serde_json::json;

    fn broker(engine: Arc<MockEngine>, root: &std::path::Path) -> Broker {
        Broker::new(engine, ScratchManager::new(root), None)
    }

    fn block_files() -> AnalysisRequest {
        AnalysisRequest::BlockFiles(BlockFiles {
            blk: Bytes::from_static(b"blk"),
            rev: Bytes::from_static(b"rev"),
            xor: Bytes::from_static(b"xor"),
        })
    }

    #[tokio::test]
    async fn tx_input_is_materialized_for_the_engine() {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::from_fn(|call| {
            let input = std::fs::read_to_string(&call.args[0]).unwrap();
            MockReply::stdout(&input)
        }));
        let broker = broker(engine.clone(), root.path());

        let request = parse_tx(br#"{"raw_tx":"0200","network":"mainnet"}"#).unwrap();
        let result = broker.analyze(request).await.unwrap();

        assert_eq!(
            result,
            AnalysisResult::Single(json!({"raw_tx": "0200", "network": "mainnet"}))
        );
        let call = &engine.calls()[0];
        assert!(call.work_dir.starts_with(root.path()));
        assert!(call.output_dir.starts_with(&call.work_dir));
    }

    #[tokio::test]
    async fn block_args_follow_contract() {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::new(vec![MockReply::ok().with_file("a.json", "{}")]));
        let broker = broker(engine.clone(), root.path());

        broker.analyze(block_files()).await.unwrap();

        let call = &engine.calls()[0];
        assert_eq!(call.args[0], "--block");
        assert!(std::path::Path::new(&call.args[1]).ends_with(BLK_FILE));
        assert!(std::path::Path::new(&call.args[2]).ends_with(REV_FILE));
        assert!(std::path::Path::new(&call.args[3]).ends_with(XOR_FILE));
    }

    #[tokio::test]
    async fn scratch_is_released_on_success_and_failure() {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::new(vec![
            MockReply::stdout(r#"{"ok":true}"#),
            MockReply::failure(1, "boom"),
            MockReply::stdout("garbage"),
        ]));
        let broker = broker(engine, root.path());

        for _ in 0..3 {
            let request = parse_tx(br#"{"raw_tx":"02"}"#).unwrap();
            let _ = broker.analyze(request).await;
            assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        }
    }

    #[tokio::test]
    async fn timeout_is_passed_to_the_engine() {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::new(vec![
            MockReply::stdout("{}").with_delay(Duration::from_secs(10)),
        ]));
        let broker = Broker::new(
            engine,
            ScratchManager::new(root.path()),
            Some(Duration::from_millis(20)),
        );

        let request = parse_tx(br#"{"raw_tx":"02"}"#).unwrap();
        let err = broker.analyze(request).await.unwrap_err();
        assert!(matches!(err, BrokerError::Timeout(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn concurrent_block_requests_get_private_output_dirs() {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::from_fn(|call| {
            let tag = std::fs::read_to_string(&call.args[1]).unwrap();
            MockReply::ok()
                .with_file(&format!("{tag}.json"), &json!({ "tag": tag }).to_string())
                .with_delay(Duration::from_millis(50))
        }));
        let broker = broker(engine.clone(), root.path());

        let request = |tag: &'static str| {
            AnalysisRequest::BlockFiles(BlockFiles {
                blk: Bytes::from_static(tag.as_bytes()),
                rev: Bytes::from_static(b"rev"),
                xor: Bytes::from_static(b"xor"),
            })
        };
        let (a, b) = tokio::join!(broker.analyze(request("a")), broker.analyze(request("b")));

        assert_eq!(a.unwrap(), AnalysisResult::Blocks(vec![json!({"tag": "a"})]));
        assert_eq!(b.unwrap(), AnalysisResult::Blocks(vec![json!({"tag": "b"})]));
        let calls = engine.calls();
        assert_ne!(calls[0].output_dir, calls[1].output_dir);
    }
}
