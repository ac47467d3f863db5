//! The session object: configuration, executor, and the current batch.

use crate::batch::Batch;
use crate::call::ApiCall;
use crate::entity::{Entity, EntityModel};
use crate::error::{BridgeError, BridgeResult};
use crate::executor::{BatchExecutor, BatchSummary};
use crate::transport::{ReqwestTransport, RetryTransport, Transport};
use crate::types::{BridgeConfig, ResponseEntry};
use log::info;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;

struct ContextShared {
    config: Arc<BridgeConfig>,
    executor: BatchExecutor,
    current: Mutex<Batch>,
    runtime: OnceLock<BlockingRuntime>,
}

/// Runtime behind the blocking entry points. Shut down in the background on
/// drop, so the last context may be released inside async code.
struct BlockingRuntime(Option<Runtime>);

impl Drop for BlockingRuntime {
    fn drop(&mut self) {
        if let Some(rt) = self.0.take() {
            rt.shutdown_background();
        }
    }
}

/// Cheap-to-clone handle on one sharebridge session.
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("site_url", &self.shared.config.site_url)
            .field("preferred_dialect", &self.shared.config.preferred_dialect)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(config: BridgeConfig, transport: Arc<dyn Transport>) -> BridgeResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            shared: Arc::new(ContextShared {
                executor: BatchExecutor::new(transport, config.clone()),
                config,
                current: Mutex::new(Batch::new()),
                runtime: OnceLock::new(),
            }),
        })
    }

    /// Context over HTTP with a bearer token; retries when `max_retries > 0`.
    pub fn connect(config: BridgeConfig, access_token: &str) -> BridgeResult<Self> {
        let http = ReqwestTransport::new(&config, access_token)?;
        let transport: Arc<dyn Transport> = if config.max_retries > 0 {
            Arc::new(RetryTransport::new(http, config.max_retries))
        } else {
            Arc::new(http)
        };
        info!("connected to {}", config.site_url);
        Self::new(config, transport)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.shared.executor
    }

    /// A new, unloaded root entity bound to this context.
    pub fn create<T: EntityModel>(&self) -> T {
        T::from_ref(Entity::new_ref(T::metadata(), Some(self.clone())))
    }

    pub fn new_batch(&self) -> Batch {
        Batch::new()
    }

    /// The session's current unit of work. Do not hold the guard across `.await`.
    pub fn current_batch(&self) -> MutexGuard<'_, Batch> {
        self.shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn execute(&self, batch: &mut Batch) -> BridgeResult<BatchSummary> {
        self.execute_with_cancel(batch, &CancellationToken::new()).await
    }

    pub async fn execute_with_cancel(&self, batch: &mut Batch, cancel: &CancellationToken) -> BridgeResult<BatchSummary> {
        batch.execute(&self.shared.executor, cancel).await
    }

    /// Execute the current batch and start a fresh one.
    pub async fn execute_current(&self) -> BridgeResult<BatchSummary> {
        let mut batch = std::mem::take(&mut *self.current_batch());
        self.execute(&mut batch).await
    }

    pub fn execute_blocking(&self, batch: &mut Batch) -> BridgeResult<BatchSummary> {
        self.block_on(self.execute(batch))?
    }

    pub fn execute_current_blocking(&self) -> BridgeResult<BatchSummary> {
        self.block_on(self.execute_current())?
    }

    /// Send one call outside any batch.
    pub async fn request(&self, call: ApiCall) -> BridgeResult<ResponseEntry> {
        self.shared
            .executor
            .send_single(call, &CancellationToken::new())
            .await
    }

    pub fn request_blocking(&self, call: ApiCall) -> BridgeResult<ResponseEntry> {
        self.block_on(self.request(call))?
    }

    /// Drive `fut` on the context's own runtime from synchronous code.
    pub(crate) fn block_on<F: Future>(&self, fut: F) -> BridgeResult<F::Output> {
        if Handle::try_current().is_ok() {
            return Err(BridgeError::internal(
                "blocking call made inside an async runtime; use the async variant",
            ));
        }
        Ok(self.runtime()?.block_on(fut))
    }

    fn runtime(&self) -> BridgeResult<&Runtime> {
        if let Some(rt) = self.shared.runtime.get().and_then(|r| r.0.as_ref()) {
            return Ok(rt);
        }
        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to start runtime: {}", e)))?;
        // A concurrent caller may have set it first; its runtime wins.
        let _ = self.shared.runtime.set(BlockingRuntime(Some(rt)));
        self.shared
            .runtime
            .get()
            .and_then(|r| r.0.as_ref())
            .ok_or_else(|| BridgeError::internal("runtime unavailable"))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeErrorKind;
    use crate::testing::{config, graph_batch_body, ScriptedTransport, TestItem};
    use crate::types::Dialect;
    use reqwest::Method;
    use serde_json::json;

    fn context() -> (Context, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(graph_batch_body(&[("1", 200, json!({"ok": 1}))]))
        }));
        (Context::new(config(), transport.clone()).unwrap(), transport)
    }

    #[test]
    fn test_new_validates_config() {
        let transport = Arc::new(ScriptedTransport::new(|_| unreachable!()));
        let err = Context::new(BridgeConfig::default(), transport).unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::InvalidArgument);
    }

    #[test]
    fn test_create_binds_context() {
        let (ctx, _) = context();
        let item: TestItem = ctx.create();
        assert!(item.context().is_some());
    }

    #[tokio::test]
    async fn test_execute_current_swaps_in_fresh_batch() {
        let (ctx, transport) = context();
        let handle = ctx
            .current_batch()
            .add_raw(ApiCall::raw(Dialect::Graph, Method::GET, "me"))
            .unwrap();
        let first_id = ctx.current_batch().id();
        let summary = ctx.execute_current().await.unwrap();
        assert_eq!(summary.batch_id, first_id);
        assert!(handle.result().await.is_ok());
        assert!(ctx.current_batch().is_empty());
        assert_ne!(ctx.current_batch().id(), first_id);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_blocking_execute_outside_runtime() {
        let (ctx, transport) = context();
        let mut batch = ctx.new_batch();
        let handle = batch.add_raw(ApiCall::raw(Dialect::Graph, Method::GET, "me")).unwrap();
        let summary = ctx.execute_blocking(&mut batch).unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(handle.blocking_result().is_ok());
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_drop_in_async_code_after_blocking_use() {
        let (ctx, transport) = context();
        assert!(ctx.request_blocking(ApiCall::raw(Dialect::Graph, Method::GET, "me")).is_ok());

        let rt = Builder::new_multi_thread().worker_threads(1).enable_all().build().unwrap();
        rt.block_on(async move {
            assert!(ctx.request(ApiCall::raw(Dialect::Graph, Method::GET, "me")).await.is_ok());
            drop(ctx);
        });
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_blocking_inside_runtime_is_refused() {
        let (ctx, transport) = context();
        let mut batch = ctx.new_batch();
        let err = ctx.execute_blocking(&mut batch).unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::Internal);
        assert!(transport.requests().is_empty());
        assert!(!batch.is_executed());
    }
}
