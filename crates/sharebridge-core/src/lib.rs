//! # sharebridge-core
//!
//! Request construction, batching and response mapping for SharePoint REST
//! and Microsoft Graph.
//!
//! | Module | Role |
//! |---|---|
//! | `metadata` | Entity metadata registry and URL template resolution |
//! | `call` | Pure call builder (`ApiCall`, actions, quote escaping) |
//! | `batch` | Ordered single-use batches and their `CallHandle`s |
//! | `executor` | Dialect partitioning, chunking, cancellation |
//! | `envelope` | REST multipart and Graph JSON `$batch` formats |
//! | `demux` | Pairing sub-responses with calls, service errors |
//! | `materializer` | Applying payloads, navigation cache, detach |
//! | `operations` | `PreparedCall` with async, batched and blocking styles |
//! | `transport` | `Transport` trait, reqwest and retry implementations |
//! | `context` | Session: config, executor, current batch |

pub mod batch;
pub mod call;
pub mod context;
pub mod demux;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod materializer;
pub mod metadata;
pub mod operations;
pub mod transport;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{Batch, CallHandle};
pub use call::{ActionCall, ApiCall, CallTarget, Operation};
pub use context::Context;
pub use entity::{Entity, EntityModel, EntityRef, ModelCollection, Navigation, NavigationState};
pub use error::{BridgeError, BridgeErrorKind, BridgeResult};
pub use executor::BatchSummary;
pub use metadata::{EntityMetadata, FieldDef, NavigationDef};
pub use operations::{EntityOperations, PreparedCall};
pub use transport::{ReqwestTransport, RetryTransport, Transport};
pub use types::{BridgeConfig, Dialect, Payload, ResponseEntry, TransportRequest, TransportResponse};
pub use value::{FieldKind, FieldValue};
