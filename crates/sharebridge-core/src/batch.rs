//! Batches of pending calls and the handles that resolve when they execute.
//!
//! A [`Batch`] is built up sequentially by one caller flow (`add` takes
//! `&mut self`); share one across threads only behind a lock, as
//! [`crate::context::Context::current_batch`] does.

use crate::call::ApiCall;
use crate::error::{BridgeError, BridgeResult};
use crate::executor::{BatchExecutor, BatchSummary};
use crate::types::ResponseEntry;
use std::fmt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Completion = Box<dyn FnOnce(BridgeResult<ResponseEntry>) + Send>;

/// One queued call and the completion that routes its result to its handle.
pub struct PendingCall {
    call: ApiCall,
    completion: Completion,
}

impl PendingCall {
    pub fn call(&self) -> &ApiCall {
        &self.call
    }

    /// Deliver the result. Consumes the call so it resolves exactly once.
    pub fn complete(self, result: BridgeResult<ResponseEntry>) {
        (self.completion)(result)
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall").field("call", &self.call).finish()
    }
}

/// Ordered, single-use queue of calls.
pub struct Batch {
    id: Uuid,
    calls: Vec<PendingCall>,
    executed: bool,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            calls: Vec::new(),
            executed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub fn calls(&self) -> impl Iterator<Item = &ApiCall> {
        self.calls.iter().map(PendingCall::call)
    }

    /// Queue `call`; `continuation` turns its response into the handle's value.
    pub fn add<T, F>(&mut self, call: ApiCall, continuation: F) -> BridgeResult<CallHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(BridgeResult<ResponseEntry>) -> BridgeResult<T> + Send + 'static,
    {
        if self.executed {
            return Err(BridgeError::already_executed(&self.id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        let completion: Completion = Box::new(move |result| {
            // The handle may have been dropped; nobody is waiting then.
            let _ = tx.send(continuation(result));
        });
        self.calls.push(PendingCall { call, completion });
        Ok(CallHandle { rx })
    }

    /// Queue `call` and hand back the raw response entry.
    pub fn add_raw(&mut self, call: ApiCall) -> BridgeResult<CallHandle<ResponseEntry>> {
        self.add(call, |result| result)
    }

    /// Dispatch every queued call. A batch executes at most once.
    pub async fn execute(&mut self, executor: &BatchExecutor, cancel: &CancellationToken) -> BridgeResult<BatchSummary> {
        if self.executed {
            return Err(BridgeError::already_executed(&self.id.to_string()));
        }
        self.executed = true;
        let calls = std::mem::take(&mut self.calls);
        executor.dispatch(self.id, calls, cancel).await
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("calls", &self.calls.len())
            .field("executed", &self.executed)
            .finish()
    }
}

/// Resolves with a call's typed result once its batch has executed.
///
/// If the batch is dropped without executing, the handle resolves `Canceled`.
pub struct CallHandle<T> {
    rx: oneshot::Receiver<BridgeResult<T>>,
}

impl<T> CallHandle<T> {
    /// A handle that is already resolved.
    pub fn ready(value: BridgeResult<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { rx }
    }

    fn dropped() -> BridgeError {
        BridgeError::canceled("batch was dropped before the call completed")
    }

    pub async fn result(self) -> BridgeResult<T> {
        self.rx.await.unwrap_or_else(|_| Err(Self::dropped()))
    }

    /// `None` while the batch has not executed yet.
    pub fn try_result(&mut self) -> Option<BridgeResult<T>> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Self::dropped())),
        }
    }

    /// Wait from synchronous code. Refuses to run inside an async runtime.
    pub fn blocking_result(self) -> BridgeResult<T> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BridgeError::internal(
                "blocking_result called inside an async runtime; await result() instead",
            ));
        }
        self.rx.blocking_recv().unwrap_or_else(|_| Err(Self::dropped()))
    }
}

impl<T> fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle").finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeErrorKind;
    use crate::testing::{config, graph_batch_body, ScriptedTransport};
    use crate::types::{Dialect, Payload};
    use reqwest::Method;
    use std::sync::Arc;

    fn get(url: &str) -> ApiCall {
        ApiCall::raw(Dialect::Graph, Method::GET, url)
    }

    #[tokio::test]
    async fn test_handles_resolve_after_execute() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(graph_batch_body(&[("1", 200, serde_json::json!({"n": 1})), ("2", 200, serde_json::json!({"n": 2}))]))
        }));
        let executor = BatchExecutor::new(transport.clone(), config());

        let mut batch = Batch::new();
        let mut first = batch
            .add(get("a"), |r| Ok(r?.json().and_then(|v| v["n"].as_i64())))
            .unwrap();
        let second = batch.add_raw(get("b")).unwrap();
        assert!(first.try_result().is_none());
        assert_eq!(batch.len(), 2);

        let summary = batch.execute(&executor, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.physical_requests, 1);
        assert_eq!(first.try_result().unwrap().unwrap(), Some(1));
        assert_eq!(second.result().await.unwrap().payload, Payload::Json(serde_json::json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_executed_batch_rejects_add_and_execute() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(graph_batch_body(&[("1", 204, serde_json::Value::Null)]))
        }));
        let executor = BatchExecutor::new(transport.clone(), config());
        let mut batch = Batch::new();
        batch.add_raw(get("a")).unwrap();
        batch.execute(&executor, &CancellationToken::new()).await.unwrap();

        let err = batch.add_raw(get("b")).unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::BatchAlreadyExecuted);
        let err = batch.execute(&executor, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::BatchAlreadyExecuted);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_dropped_batch_cancels_handles() {
        let mut batch = Batch::new();
        let handle = batch.add_raw(get("a")).unwrap();
        drop(batch);
        let err = tokio_test::block_on(handle.result()).unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn test_blocking_result_outside_runtime() {
        let handle = CallHandle::ready(Ok(5));
        assert_eq!(handle.blocking_result().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_blocking_result_inside_runtime_is_refused() {
        let handle = CallHandle::ready(Ok(5));
        assert_eq!(handle.blocking_result().unwrap_err().kind, BridgeErrorKind::Internal);
    }
}
