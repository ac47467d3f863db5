//! Dispatches batches: partition by dialect, chunk by provider limit, send
//! one physical request per chunk, and route each sub-response back.

use crate::batch::PendingCall;
use crate::call::ApiCall;
use crate::demux;
use crate::envelope;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::Transport;
use crate::types::{BridgeConfig, Dialect, Payload, ResponseEntry, TransportResponse};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome counts for one executed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub physical_requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
}

#[derive(Default)]
struct GroupOutcome {
    physical_requests: usize,
    succeeded: usize,
    failed: usize,
    canceled: usize,
    integrity: Option<BridgeError>,
}

#[derive(Clone)]
pub struct BatchExecutor {
    transport: Arc<dyn Transport>,
    config: Arc<BridgeConfig>,
}

impl fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("site_url", &self.config.site_url)
            .finish_non_exhaustive()
    }
}

impl BatchExecutor {
    pub fn new(transport: Arc<dyn Transport>, config: impl Into<Arc<BridgeConfig>>) -> Self {
        Self {
            transport,
            config: config.into(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run `calls` and resolve every one of them exactly once.
    ///
    /// Returns `Err` only for a protocol-integrity failure; every call has
    /// still been resolved by then.
    pub async fn dispatch(
        &self,
        batch_id: Uuid,
        calls: Vec<PendingCall>,
        cancel: &CancellationToken,
    ) -> BridgeResult<BatchSummary> {
        let total = calls.len();
        let (rest, graph): (Vec<_>, Vec<_>) = calls
            .into_iter()
            .partition(|c| c.call().dialect() == Dialect::Rest);

        let groups = [(Dialect::Rest, rest), (Dialect::Graph, graph)]
            .into_iter()
            .filter(|(_, calls)| !calls.is_empty())
            .map(|(dialect, calls)| self.run_group(dialect, calls, cancel));
        let outcomes = join_all(groups).await;

        let mut summary = BatchSummary {
            batch_id,
            ..Default::default()
        };
        let mut integrity = None;
        for outcome in outcomes {
            summary.physical_requests += outcome.physical_requests;
            summary.succeeded += outcome.succeeded;
            summary.failed += outcome.failed;
            summary.canceled += outcome.canceled;
            integrity = integrity.or(outcome.integrity);
        }
        info!(
            "batch {}: {} calls in {} requests ({} ok, {} failed, {} canceled)",
            batch_id,
            total,
            summary.physical_requests,
            summary.succeeded,
            summary.failed,
            summary.canceled
        );
        match integrity {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    async fn run_group(&self, dialect: Dialect, mut calls: Vec<PendingCall>, cancel: &CancellationToken) -> GroupOutcome {
        let limit = self.config.max_batch_size(dialect);
        let mut outcome = GroupOutcome::default();

        while !calls.is_empty() {
            let remainder = calls.split_off(limit.min(calls.len()));
            let chunk = std::mem::replace(&mut calls, remainder);

            if let Some(err) = &outcome.integrity {
                outcome.failed += fail_all(chunk, err);
                continue;
            }
            if cancel.is_cancelled() {
                outcome.canceled += fail_all(chunk, &canceled(dialect));
                continue;
            }

            let request = {
                let refs: Vec<&ApiCall> = chunk.iter().map(PendingCall::call).collect();
                envelope::encode(dialect, &self.config, &refs)
            };
            let request = match request {
                Ok(r) => r,
                Err(e) => {
                    outcome.failed += fail_all(chunk, &e.with_dialect(dialect));
                    continue;
                }
            };

            debug!("{} batch: sending {} calls to {}", dialect, chunk.len(), request.url);
            outcome.physical_requests += 1;
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    outcome.canceled += fail_all(chunk, &canceled(dialect));
                    continue;
                }
                r = self.transport.send(request) => r,
            };

            let response = match response.and_then(|r| check_status(dialect, r)) {
                Ok(r) => r,
                Err(e) => {
                    warn!("{} batch request failed: {}", dialect, e);
                    outcome.failed += fail_all(chunk, &e.with_dialect(dialect));
                    continue;
                }
            };

            match demux::demux(dialect, &response, chunk.len()) {
                Ok(entries) => {
                    for (pending, entry) in chunk.into_iter().zip(entries) {
                        let result = demux::settle(dialect, entry);
                        if result.is_ok() {
                            outcome.succeeded += 1;
                        } else {
                            outcome.failed += 1;
                        }
                        pending.complete(result);
                    }
                }
                Err(e) => {
                    warn!("{} batch response rejected: {}", dialect, e);
                    outcome.failed += fail_all(chunk, &e);
                    outcome.integrity = Some(e);
                }
            }
        }
        outcome
    }

    /// The single-call path: one plain HTTP request, no envelope.
    pub async fn send_single(&self, call: ApiCall, cancel: &CancellationToken) -> BridgeResult<ResponseEntry> {
        if cancel.is_cancelled() {
            return Err(canceled(call.dialect()));
        }
        let dialect = call.dialect();
        let request = call.to_transport(&self.config)?;
        debug!("{} {} {}", dialect, request.method, request.url);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(canceled(dialect)),
            r = self.transport.send(request) => r.map_err(|e| e.with_dialect(dialect))?,
        };

        let payload = Payload::from_body(response.header("content-type"), &response.body);
        let mut entry = ResponseEntry::new(0, response.status, payload);
        entry.headers = response.headers;
        demux::settle(dialect, entry)
    }
}

fn canceled(dialect: Dialect) -> BridgeError {
    BridgeError::canceled("batch was canceled").with_dialect(dialect)
}

/// A failed top-level status fails the whole chunk as a transport error.
fn check_status(dialect: Dialect, response: TransportResponse) -> BridgeResult<TransportResponse> {
    if response.is_success() {
        return Ok(response);
    }
    let mut text = response.text();
    text.truncate(200);
    Err(BridgeError::transport(format!("{} $batch request failed: {}", dialect, text))
        .with_status(response.status))
}

fn fail_all(chunk: Vec<PendingCall>, err: &BridgeError) -> usize {
    let n = chunk.len();
    for pending in chunk {
        pending.complete(Err(err.clone()));
    }
    n
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
