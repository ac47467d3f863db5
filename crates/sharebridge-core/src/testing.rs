//! Test fixtures: a scripted transport, batch response builders and two
//! small entity models.

use crate::entity::{EntityModel, EntityRef};
use crate::error::BridgeResult;
use crate::metadata::{self, EntityMetadata, FieldDef, NavigationDef};
use crate::transport::Transport;
use crate::types::{BridgeConfig, TransportRequest, TransportResponse};
use crate::value::FieldKind;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

pub fn config() -> BridgeConfig {
    BridgeConfig::for_site("https://contoso.sharepoint.com/sites/dev")
}

type Script = Box<dyn Fn(&TransportRequest) -> BridgeResult<TransportResponse> + Send + Sync>;

/// Answers each request with a closure and records what was sent.
pub struct ScriptedTransport {
    script: Script,
    delay: Option<Duration>,
    sent: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&TransportRequest) -> BridgeResult<TransportResponse> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> BridgeResult<TransportResponse> {
        self.sent.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(&request)
    }
}

/// Graph `$batch` response with `(id, status, body)` entries in the given order.
pub fn graph_batch_body(entries: &[(&str, u16, Value)]) -> TransportResponse {
    let responses: Vec<Value> = entries
        .iter()
        .map(|(id, status, body)| {
            json!({
                "id": id,
                "status": status,
                "headers": {"Content-Type": "application/json"},
                "body": body,
            })
        })
        .collect();
    TransportResponse::new(200, serde_json::to_vec(&json!({ "responses": responses })).unwrap())
        .with_header("Content-Type", "application/json")
}

/// REST multipart response with one part per `(status, body)`.
pub fn rest_batch_body(entries: &[(u16, Option<Value>)]) -> TransportResponse {
    let mut out = String::new();
    for (status, body) in entries {
        out.push_str("--batchresponse_1\r\n");
        out.push_str("Content-Type: application/http\r\n");
        out.push_str("Content-Transfer-Encoding: binary\r\n\r\n");
        out.push_str(&format!("HTTP/1.1 {} Whatever\r\n", status));
        out.push_str("CONTENT-TYPE: application/json;odata=verbose;charset=utf-8\r\n\r\n");
        if let Some(body) = body {
            out.push_str(&body.to_string());
            out.push_str("\r\n");
        }
    }
    out.push_str("--batchresponse_1--\r\n");
    TransportResponse::new(200, out).with_header("Content-Type", "multipart/mixed; boundary=batchresponse_1")
}

/// A list item: both dialects, Graph names differ.
pub struct TestItem(EntityRef);

impl EntityModel for TestItem {
    const TYPE_NAME: &'static str = "Test.Item";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .rest_entity_type("SP.ListItem")
            .rest_uri("_api/web/lists(guid'{Parent.Id}')/items({Id})")
            .rest_get("_api/web/lists(guid'{Parent.Id}')/items")
            .graph_uri("lists/{Parent.Id}/items/{Id}")
            .graph_get("lists/{Parent.Id}/items")
            .field(FieldDef::new("Id", FieldKind::Int).graph_name("id"))
            .field(FieldDef::new("Title", FieldKind::Text).graph_name("displayName"))
            .field(FieldDef::new("Flagged", FieldKind::Bool).rest_only())
            .field(FieldDef::new("Size", FieldKind::Int).graph_name("size"))
    }

    fn from_ref(entity: EntityRef) -> Self {
        TestItem(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

/// A list: REST only, with an items collection and an owner.
pub struct TestList(EntityRef);

impl EntityModel for TestList {
    const TYPE_NAME: &'static str = "Test.List";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .rest_uri("_api/web/lists(guid'{Id}')")
            .field(FieldDef::new("Id", FieldKind::Guid))
            .field(FieldDef::new("Title", FieldKind::Text))
            .navigation(NavigationDef::collection("Items", metadata::of::<TestItem>).graph_name("items"))
            .navigation(
                NavigationDef::entity("Owner", metadata::of::<TestItem>)
                    .rest_name("Author")
                    .rest_get("_api/web/lists(guid'{Id}')/Author"),
            )
    }

    fn from_ref(entity: EntityRef) -> Self {
        TestList(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}
