//! `SP.FieldNumber`, a number site column.

use sharebridge_core::entity::{self, EntityModel, EntityRef};
use sharebridge_core::metadata::{EntityMetadata, FieldDef};
use sharebridge_core::{BridgeResult, FieldKind};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FieldNumber(EntityRef);

impl EntityModel for FieldNumber {
    const TYPE_NAME: &'static str = "SP.FieldNumber";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .rest_entity_type("SP.FieldNumber")
            .rest_uri("_api/Web/Fields/getById(guid'{Id}')")
            .rest_get("_api/Web/Fields")
            .field(FieldDef::new("Id", FieldKind::Guid).rest_only())
            .field(FieldDef::new("Title", FieldKind::Text).rest_only())
            .field(FieldDef::new("InternalName", FieldKind::Text).rest_only())
            .field(FieldDef::new("Group", FieldKind::Text).rest_only())
            .field(FieldDef::new("Required", FieldKind::Bool).rest_only())
            .field(FieldDef::new("DisplayFormat", FieldKind::Int).rest_only())
            .field(FieldDef::new("ShowAsPercentage", FieldKind::Bool).rest_only())
            .field(FieldDef::new("MinimumValue", FieldKind::Float).rest_only())
            .field(FieldDef::new("MaximumValue", FieldKind::Float).rest_only())
    }

    fn from_ref(entity: EntityRef) -> Self {
        FieldNumber(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

impl FieldNumber {
    pub fn id(&self) -> BridgeResult<Option<Uuid>> {
        entity::read(&self.0).get_guid("Id")
    }

    pub fn title(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Title")
    }

    pub fn internal_name(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("InternalName")
    }

    /// Number of decimals shown; `-1` lets SharePoint decide.
    pub fn display_format(&self) -> BridgeResult<Option<i64>> {
        entity::read(&self.0).get_i64("DisplayFormat")
    }

    pub fn set_display_format(&self, decimals: i64) -> BridgeResult<()> {
        entity::write(&self.0).set("DisplayFormat", decimals)
    }

    pub fn show_as_percentage(&self) -> BridgeResult<Option<bool>> {
        entity::read(&self.0).get_bool("ShowAsPercentage")
    }

    pub fn set_show_as_percentage(&self, value: bool) -> BridgeResult<()> {
        entity::write(&self.0).set("ShowAsPercentage", value)
    }

    pub fn minimum_value(&self) -> BridgeResult<Option<f64>> {
        entity::read(&self.0).get_f64("MinimumValue")
    }

    pub fn maximum_value(&self) -> BridgeResult<Option<f64>> {
        entity::read(&self.0).get_f64("MaximumValue")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, FixedTransport};
    use crate::web::Web;
    use serde_json::{json, Value};
    use sharebridge_core::EntityOperations;

    const FIELD_ID: &str = "5e2b4a19-71c3-4c8e-9f0a-2d6b8e1f3c57";

    #[tokio::test]
    async fn test_update_sends_only_changed_fields() {
        let transport = FixedTransport::new(204, Value::Null);
        let web = Web::of(&context(transport.clone()));
        let field = web.field_by_id(Uuid::parse_str(FIELD_ID).unwrap()).unwrap();
        field.set_show_as_percentage(true).unwrap();
        field.set_display_format(2).unwrap();
        field.update().run().await.unwrap();

        let sent = transport.last();
        assert_eq!(
            sent.url,
            format!("https://contoso.sharepoint.com/sites/dev/_api/Web/Fields/getById(guid'{}')", FIELD_ID)
        );
        assert_eq!(sent.header("X-HTTP-Method"), Some("MERGE"));
        let body: Value = serde_json::from_str(&sent.body_text()).unwrap();
        assert_eq!(body, json!({"DisplayFormat": 2, "ShowAsPercentage": true}));
        assert!(!entity::read(field.entity()).has_changes());
    }

    #[tokio::test]
    async fn test_load_number_settings() {
        let transport = FixedTransport::new(
            200,
            json!({"d": {"Id": FIELD_ID, "Title": "Budget", "DisplayFormat": 0, "ShowAsPercentage": false, "MinimumValue": "1.5"}}),
        );
        let web = Web::of(&context(transport));
        let field = web.field_by_id(Uuid::parse_str(FIELD_ID).unwrap()).unwrap();
        field.load().run().await.unwrap();
        assert_eq!(field.title().unwrap().as_deref(), Some("Budget"));
        assert_eq!(field.display_format().unwrap(), Some(0));
        assert_eq!(field.show_as_percentage().unwrap(), Some(false));
        assert_eq!(field.minimum_value().unwrap(), Some(1.5));
    }
}
