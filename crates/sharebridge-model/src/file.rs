//! `SP.File`: properties, the `ListItemAllFields` navigation, and the file
//! actions (publish, checkout, checkin, recycle, copy, move).
//!
//! Files are addressed through SharePoint REST only; every action forces
//! that dialect.

use crate::list_item::ListItem;
use crate::types::{CheckOutType, CheckinType, CustomizedPageStatus, ListPageRenderType, MoveOperations, WireEnum};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use sharebridge_core::entity::{self, EntityModel, EntityRef};
use sharebridge_core::metadata::{self, EntityMetadata, FieldDef, NavigationDef};
use sharebridge_core::operations::{self, PreparedCall};
use sharebridge_core::{materializer, ActionCall, BridgeError, BridgeResult, CallTarget, Dialect, FieldKind, ResponseEntry};
use uuid::Uuid;

/// A document in a folder or library.
#[derive(Debug, Clone)]
pub struct File(EntityRef);

impl EntityModel for File {
    const TYPE_NAME: &'static str = "SP.File";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("UniqueId")
            .rest_entity_type("SP.File")
            .rest_uri("_api/Web/getFileById('{Id}')")
            .rest_get("_api/Web/getFolderById('{Parent.Id}')/Files")
            .field(FieldDef::new("CheckInComment", FieldKind::Text).rest_only())
            .field(FieldDef::new("CheckOutType", FieldKind::Enum(CheckOutType::NAMES)).rest_only())
            .field(FieldDef::new("ContentTag", FieldKind::Text).rest_only())
            .field(FieldDef::new("CustomizedPageStatus", FieldKind::Enum(CustomizedPageStatus::NAMES)).rest_only())
            .field(FieldDef::new("ETag", FieldKind::Text).rest_only())
            .field(FieldDef::new("Exists", FieldKind::Bool).rest_only())
            .field(FieldDef::new("IrmEnabled", FieldKind::Bool).rest_only())
            .field(FieldDef::new("Length", FieldKind::Int).rest_only())
            .field(FieldDef::new("LinkingUri", FieldKind::Text).rest_only())
            .field(FieldDef::new("LinkingUrl", FieldKind::Text).rest_only())
            .field(FieldDef::new("ListId", FieldKind::Guid).rest_only())
            .field(FieldDef::new("MajorVersion", FieldKind::Int).rest_only())
            .field(FieldDef::new("MinorVersion", FieldKind::Int).rest_only())
            .field(FieldDef::new("Name", FieldKind::Text).rest_only())
            .field(FieldDef::new("PageRenderType", FieldKind::Enum(ListPageRenderType::NAMES)).rest_only())
            .field(FieldDef::new("ServerRelativeUrl", FieldKind::Text).rest_only())
            .field(FieldDef::new("SiteId", FieldKind::Guid).rest_only())
            .field(FieldDef::new("TimeCreated", FieldKind::DateTime).rest_only())
            .field(FieldDef::new("TimeLastModified", FieldKind::DateTime).rest_only())
            .field(FieldDef::new("Title", FieldKind::Text).rest_only())
            .field(FieldDef::new("UIVersion", FieldKind::Int).rest_only())
            .field(FieldDef::new("UIVersionLabel", FieldKind::Text).rest_only())
            .field(FieldDef::new("UniqueId", FieldKind::Guid).rest_only())
            .field(FieldDef::new("WebId", FieldKind::Guid).rest_only())
            .navigation(
                NavigationDef::entity("ListItemAllFields", metadata::of::<ListItem>)
                    .rest_get("_api/Web/getFileById('{Id}')/ListItemAllFields"),
            )
    }

    fn from_ref(entity: EntityRef) -> Self {
        File(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

/// Result of [`File::recycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum RecycleOutcome {
    /// The file is in the recycle bin under this item id.
    Recycled { recycle_bin_item_id: Uuid },
    /// The service answered with success but without a recycle-bin id.
    Unconfirmed,
}

impl RecycleOutcome {
    fn from_response(entry: &ResponseEntry) -> Self {
        let id = entry
            .json()
            .and_then(|body| {
                body.get("d")
                    .and_then(|d| d.get("Recycle"))
                    .or_else(|| body.get("value"))
            })
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        match id {
            Some(recycle_bin_item_id) => RecycleOutcome::Recycled { recycle_bin_item_id },
            None => RecycleOutcome::Unconfirmed,
        }
    }

    pub fn recycle_bin_item_id(&self) -> Option<Uuid> {
        match self {
            RecycleOutcome::Recycled { recycle_bin_item_id } => Some(*recycle_bin_item_id),
            RecycleOutcome::Unconfirmed => None,
        }
    }
}

impl File {
    // ─── Properties ──────────────────────────────────────────────────

    pub fn unique_id(&self) -> BridgeResult<Option<Uuid>> {
        entity::read(&self.0).get_guid("UniqueId")
    }

    pub fn name(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Name")
    }

    pub fn title(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Title")
    }

    pub fn set_title(&self, title: &str) -> BridgeResult<()> {
        entity::write(&self.0).set("Title", title)
    }

    pub fn server_relative_url(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("ServerRelativeUrl")
    }

    pub fn list_id(&self) -> BridgeResult<Option<Uuid>> {
        entity::read(&self.0).get_guid("ListId")
    }

    /// Size in bytes.
    pub fn length(&self) -> BridgeResult<Option<i64>> {
        entity::read(&self.0).get_i64("Length")
    }

    pub fn major_version(&self) -> BridgeResult<Option<i64>> {
        entity::read(&self.0).get_i64("MajorVersion")
    }

    pub fn minor_version(&self) -> BridgeResult<Option<i64>> {
        entity::read(&self.0).get_i64("MinorVersion")
    }

    pub fn ui_version_label(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("UIVersionLabel")
    }

    pub fn check_in_comment(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("CheckInComment")
    }

    pub fn check_out_type(&self) -> BridgeResult<Option<CheckOutType>> {
        CheckOutType::from_field(entity::read(&self.0).get("CheckOutType")?)
    }

    pub fn customized_page_status(&self) -> BridgeResult<Option<CustomizedPageStatus>> {
        CustomizedPageStatus::from_field(entity::read(&self.0).get("CustomizedPageStatus")?)
    }

    pub fn page_render_type(&self) -> BridgeResult<Option<ListPageRenderType>> {
        ListPageRenderType::from_field(entity::read(&self.0).get("PageRenderType")?)
    }

    pub fn exists(&self) -> BridgeResult<Option<bool>> {
        entity::read(&self.0).get_bool("Exists")
    }

    pub fn time_last_modified(&self) -> BridgeResult<Option<DateTime<Utc>>> {
        entity::read(&self.0).get_datetime("TimeLastModified")
    }

    // ─── Navigation ──────────────────────────────────────────────────

    /// The list item holding this file's metadata, not loaded until requested.
    pub fn list_item_all_fields(&self) -> BridgeResult<ListItem> {
        crate::child_of(self, "ListItemAllFields")
    }

    pub fn load_list_item_all_fields(&self) -> PreparedCall<ListItem> {
        operations::load_navigation(&self.0, "ListItemAllFields").map(|nav| {
            nav.as_entity()
                .cloned()
                .map(ListItem::from_ref)
                .ok_or_else(|| BridgeError::internal("ListItemAllFields is not an entity"))
        })
    }

    // ─── Actions ─────────────────────────────────────────────────────

    fn action(&self, action: ActionCall) -> PreparedCall<ResponseEntry> {
        debug!("{}: {}", Self::TYPE_NAME, action.name());
        operations::invoke_action(CallTarget::Entity(self.0.clone()), action.dialect(Dialect::Rest))
    }

    fn unit(&self, action: ActionCall) -> PreparedCall<()> {
        self.action(action).map(|_| Ok(()))
    }

    /// Publish a major version.
    pub fn publish(&self, comment: &str) -> PreparedCall<()> {
        self.unit(ActionCall::post("publish").text("comment", comment))
    }

    pub fn unpublish(&self, comment: &str) -> PreparedCall<()> {
        self.unit(ActionCall::post("unpublish").text("comment", comment))
    }

    pub fn checkout(&self) -> PreparedCall<()> {
        self.unit(ActionCall::post("checkout"))
    }

    pub fn undo_checkout(&self) -> PreparedCall<()> {
        self.unit(ActionCall::post("undoCheckout"))
    }

    pub fn checkin(&self, comment: &str, checkin_type: CheckinType) -> PreparedCall<()> {
        self.unit(
            ActionCall::post("checkin")
                .text("comment", comment)
                .enumeration("checkintype", checkin_type),
        )
    }

    /// Move the file to the recycle bin. On a confirmed recycle the file
    /// also leaves the collection it was loaded into.
    pub fn recycle(&self) -> PreparedCall<RecycleOutcome> {
        let entity = self.0.clone();
        self.action(ActionCall::post("recycle")).map(move |entry| {
            let outcome = RecycleOutcome::from_response(&entry);
            match outcome {
                RecycleOutcome::Recycled { recycle_bin_item_id } => {
                    materializer::detach(&entity);
                    debug!("recycled file as {}", recycle_bin_item_id);
                }
                RecycleOutcome::Unconfirmed => {
                    warn!("recycle succeeded without a recycle bin id; file left in place");
                }
            }
            Ok(outcome)
        })
    }

    /// Copy to a server-relative destination URL.
    pub fn copy_to(&self, destination: &str, overwrite: bool) -> PreparedCall<()> {
        self.unit(
            ActionCall::post("copyTo")
                .required_text("strNewUrl", destination)
                .boolean("bOverWrite", overwrite),
        )
    }

    /// Move to a server-relative destination URL.
    pub fn move_to(&self, destination: &str, flags: MoveOperations) -> PreparedCall<()> {
        self.unit(
            ActionCall::post("moveTo")
                .required_text("newUrl", destination)
                .enumeration("flags", flags),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, FixedTransport};
    use serde_json::json;
    use sharebridge_core::{BridgeErrorKind, EntityOperations};

    const FILE_ID: &str = "0b1e2a3c-4d5e-4f60-8a7b-9c0d1e2f3a4b";

    fn file(transport: std::sync::Arc<FixedTransport>) -> File {
        crate::with_key(&context(transport), Uuid::parse_str(FILE_ID).unwrap()).unwrap()
    }

    fn file_url(suffix: &str) -> String {
        format!(
            "https://contoso.sharepoint.com/sites/dev/_api/Web/getFileById('{}'){}",
            FILE_ID, suffix
        )
    }

    #[tokio::test]
    async fn test_checkin_url() {
        let transport = FixedTransport::new(200, json!({"d": {"CheckIn": null}}));
        let file = file(transport.clone());
        file.checkin("fixed 'typo'", CheckinType::Major).run().await.unwrap();
        let sent = transport.last();
        assert_eq!(sent.method.as_str(), "POST");
        assert_eq!(sent.url, file_url("/checkin(comment='fixed%20''typo''',checkintype=1)"));
    }

    #[tokio::test]
    async fn test_publish_with_empty_comment() {
        let transport = FixedTransport::new(200, json!({}));
        let file = file(transport.clone());
        file.publish("").run().await.unwrap();
        assert_eq!(transport.last().url, file_url("/publish(comment='')"));
    }

    #[tokio::test]
    async fn test_checkout_and_undo() {
        let transport = FixedTransport::new(200, json!({}));
        let file = file(transport.clone());
        file.checkout().run().await.unwrap();
        assert_eq!(transport.last().url, file_url("/checkout"));
        file.undo_checkout().run().await.unwrap();
        assert_eq!(transport.last().url, file_url("/undoCheckout"));
    }

    #[tokio::test]
    async fn test_copy_and_move_arguments() {
        let transport = FixedTransport::new(200, json!({}));
        let file = file(transport.clone());
        file.copy_to("/sites/dev/Shared Documents/b.docx", true).run().await.unwrap();
        assert_eq!(
            transport.last().url,
            file_url("/copyTo(strNewUrl='%2Fsites%2Fdev%2FShared%20Documents%2Fb.docx',bOverWrite=true)")
        );
        file.move_to("/sites/dev/x.docx", MoveOperations::OVERWRITE | MoveOperations::ALLOW_BROKEN_THICKETS)
            .run()
            .await
            .unwrap();
        assert_eq!(
            transport.last().url,
            file_url("/moveTo(newUrl='%2Fsites%2Fdev%2Fx.docx',flags=9)")
        );
    }

    #[tokio::test]
    async fn test_empty_destination_rejected_without_io() {
        let transport = FixedTransport::new(200, json!({}));
        let file = file(transport.clone());
        let err = file.copy_to("", false).run().await.unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::InvalidArgument);
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_recycle_without_id_is_unconfirmed() {
        let transport = FixedTransport::new(200, json!({"d": {}}));
        let file = file(transport);
        let outcome = file.recycle().run().await.unwrap();
        assert_eq!(outcome, RecycleOutcome::Unconfirmed);
        assert_eq!(outcome.recycle_bin_item_id(), None);
    }

    #[tokio::test]
    async fn test_load_maps_enums_and_int64() {
        let transport = FixedTransport::new(
            200,
            json!({"d": {
                "__metadata": {"type": "SP.File"},
                "UniqueId": FILE_ID,
                "Name": "report.docx",
                "Length": "48213",
                "CheckOutType": 2,
                "PageRenderType": 12,
                "TimeLastModified": "2024-03-01T10:15:00Z"
            }}),
        );
        let file = file(transport.clone());
        file.load().run().await.unwrap();
        assert_eq!(transport.last().url, file_url(""));
        assert_eq!(file.name().unwrap().as_deref(), Some("report.docx"));
        assert_eq!(file.length().unwrap(), Some(48213));
        assert_eq!(file.check_out_type().unwrap(), Some(CheckOutType::None));
        assert_eq!(file.page_render_type().unwrap(), Some(ListPageRenderType::Modern));
        assert!(file.time_last_modified().unwrap().is_some());
        assert_eq!(file.title().unwrap_err().kind, BridgeErrorKind::NotLoaded);
    }

    #[tokio::test]
    async fn test_list_item_all_fields_navigation() {
        let transport = FixedTransport::new(200, json!({"d": {"Id": 14, "Title": "Report"}}));
        let file = file(transport.clone());
        let item = file.load_list_item_all_fields().run().await.unwrap();
        assert_eq!(transport.last().url, file_url("/ListItemAllFields"));
        assert_eq!(item.id().unwrap(), Some(14));
        let again = file.list_item_all_fields().unwrap();
        assert!(std::sync::Arc::ptr_eq(again.entity(), item.entity()));
    }
}
