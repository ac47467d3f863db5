//! `SP.Folder` and its `Files` and `Folders` collections.

use crate::file::File;
use chrono::{DateTime, Utc};
use sharebridge_core::entity::{self, EntityModel, EntityRef, ModelCollection};
use sharebridge_core::metadata::{self, EntityMetadata, FieldDef, NavigationDef};
use sharebridge_core::{BridgeResult, FieldKind};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Folder(EntityRef);

impl EntityModel for Folder {
    const TYPE_NAME: &'static str = "SP.Folder";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("UniqueId")
            .rest_entity_type("SP.Folder")
            .rest_uri("_api/Web/getFolderById('{Id}')")
            .rest_get("_api/Web/Folders")
            .field(FieldDef::new("UniqueId", FieldKind::Guid).rest_only())
            .field(FieldDef::new("Name", FieldKind::Text).rest_only())
            .field(FieldDef::new("ServerRelativeUrl", FieldKind::Text).rest_only())
            .field(FieldDef::new("ItemCount", FieldKind::Int).rest_only())
            .field(FieldDef::new("Exists", FieldKind::Bool).rest_only())
            .field(FieldDef::new("WelcomePage", FieldKind::Text).rest_only())
            .field(FieldDef::new("TimeCreated", FieldKind::DateTime).rest_only())
            .field(FieldDef::new("TimeLastModified", FieldKind::DateTime).rest_only())
            .navigation(NavigationDef::collection("Files", metadata::of::<File>))
            .navigation(
                NavigationDef::collection("Folders", metadata::of::<Folder>)
                    .rest_get("_api/Web/getFolderById('{Id}')/Folders"),
            )
    }

    fn from_ref(entity: EntityRef) -> Self {
        Folder(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

impl Folder {
    pub fn unique_id(&self) -> BridgeResult<Option<Uuid>> {
        entity::read(&self.0).get_guid("UniqueId")
    }

    pub fn name(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Name")
    }

    pub fn server_relative_url(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("ServerRelativeUrl")
    }

    pub fn item_count(&self) -> BridgeResult<Option<i64>> {
        entity::read(&self.0).get_i64("ItemCount")
    }

    pub fn time_last_modified(&self) -> BridgeResult<Option<DateTime<Utc>>> {
        entity::read(&self.0).get_datetime("TimeLastModified")
    }

    /// Files in this folder; call `load()` on the collection to fetch them.
    pub fn files(&self) -> BridgeResult<ModelCollection<File>> {
        crate::collection_of(self, "Files")
    }

    pub fn folders(&self) -> BridgeResult<ModelCollection<Folder>> {
        crate::collection_of(self, "Folders")
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
