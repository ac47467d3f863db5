//! `SP.ListItem`, reached through a file's `ListItemAllFields`.

use chrono::{DateTime, Utc};
use sharebridge_core::entity::{self, EntityModel, EntityRef};
use sharebridge_core::metadata::{EntityMetadata, FieldDef};
use sharebridge_core::{BridgeResult, FieldKind};
use uuid::Uuid;

/// A list item. Its list is taken from the owning file's `ListId`.
#[derive(Debug, Clone)]
pub struct ListItem(EntityRef);

impl EntityModel for ListItem {
    const TYPE_NAME: &'static str = "SP.ListItem";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .rest_entity_type("SP.ListItem")
            .rest_uri("_api/Web/Lists(guid'{Parent.ListId}')/items({Id})")
            .graph_uri("sites/{hostname}:{serverrelativepath}:/lists/{Parent.ListId}/items/{Id}")
            .field(FieldDef::new("Id", FieldKind::Int).graph_name("id"))
            .field(FieldDef::new("Title", FieldKind::Text).rest_only())
            .field(FieldDef::new("GUID", FieldKind::Guid).rest_only())
            .field(FieldDef::new("ContentTypeId", FieldKind::Text).rest_only())
            .field(FieldDef::new("FileSystemObjectType", FieldKind::Int).rest_only())
            .field(FieldDef::new("AuthorId", FieldKind::Int).rest_only())
            .field(FieldDef::new("EditorId", FieldKind::Int).rest_only())
            .field(FieldDef::new("Created", FieldKind::DateTime).graph_name("createdDateTime"))
            .field(FieldDef::new("Modified", FieldKind::DateTime).graph_name("lastModifiedDateTime"))
            .field(FieldDef::new("WebUrl", FieldKind::Text).graph_only().graph_name("webUrl"))
    }

    fn from_ref(entity: EntityRef) -> Self {
        ListItem(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

impl ListItem {
    pub fn id(&self) -> BridgeResult<Option<i64>> {
        entity::read(&self.0).get_i64("Id")
    }

    pub fn title(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Title")
    }

    pub fn set_title(&self, title: &str) -> BridgeResult<()> {
        entity::write(&self.0).set("Title", title)
    }

    pub fn guid(&self) -> BridgeResult<Option<Uuid>> {
        entity::read(&self.0).get_guid("GUID")
    }

    pub fn content_type_id(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("ContentTypeId")
    }

    pub fn created(&self) -> BridgeResult<Option<DateTime<Utc>>> {
        entity::read(&self.0).get_datetime("Created")
    }

    pub fn modified(&self) -> BridgeResult<Option<DateTime<Utc>>> {
        entity::read(&self.0).get_datetime("Modified")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::File;
    use crate::testing::{context, FixedTransport};
    use serde_json::json;
    use sharebridge_core::{materializer, Dialect, EntityOperations};

    #[tokio::test]
    async fn test_title_update_falls_back_to_rest_merge() {
        let transport = FixedTransport::new(204, json!(null));
        let ctx = context(transport.clone());
        let file: File = ctx.create();
        materializer::apply(
            file.entity(),
            &json!({"d": {
                "UniqueId": "0b1e2a3c-4d5e-4f60-8a7b-9c0d1e2f3a4b",
                "ListId": "c5b1f0f2-8a55-4a32-9d3e-3f5f2d1c0b9a",
                "ListItemAllFields": {"Id": 3, "Title": "Old"}
            }}),
            Dialect::Rest,
        )
        .unwrap();

        let item = file.list_item_all_fields().unwrap();
        assert_eq!(item.title().unwrap().as_deref(), Some("Old"));
        item.set_title("New").unwrap();
        item.update().run().await.unwrap();

        let sent = transport.last();
        assert_eq!(sent.method.as_str(), "POST");
        assert_eq!(sent.header("X-HTTP-Method"), Some("MERGE"));
        assert_eq!(
            sent.url,
            "https://contoso.sharepoint.com/sites/dev/_api/Web/Lists(guid'c5b1f0f2-8a55-4a32-9d3e-3f5f2d1c0b9a')/items(3)"
        );
        assert_eq!(sent.body_text(), r#"{"Title":"New"}"#);
    }
}
