//! `SP.Web`: the site itself and URL based lookups of files and folders.

use crate::field::FieldNumber;
use crate::file::File;
use crate::folder::Folder;
use chrono::{DateTime, Utc};
use log::debug;
use sharebridge_core::entity::{self, Entity, EntityModel, EntityRef};
use sharebridge_core::metadata::{EntityMetadata, FieldDef};
use sharebridge_core::operations::{self, PreparedCall};
use sharebridge_core::{
    materializer, ActionCall, BridgeError, BridgeResult, CallTarget, Context, Dialect, FieldKind, ResponseEntry,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Web(EntityRef);

impl EntityModel for Web {
    const TYPE_NAME: &'static str = "SP.Web";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .rest_entity_type("SP.Web")
            .rest_uri("_api/Web")
            .graph_uri("sites/{hostname}:{serverrelativepath}")
            .field(FieldDef::new("Id", FieldKind::Guid).rest_only())
            .field(FieldDef::new("Title", FieldKind::Text).graph_name("displayName"))
            .field(FieldDef::new("Description", FieldKind::Text).graph_name("description"))
            .field(FieldDef::new("Url", FieldKind::Text).graph_name("webUrl"))
            .field(FieldDef::new("ServerRelativeUrl", FieldKind::Text).rest_only())
            .field(FieldDef::new("Language", FieldKind::Int).rest_only())
            .field(FieldDef::new("Created", FieldKind::DateTime).graph_name("createdDateTime"))
            .field(FieldDef::new("LastItemModifiedDate", FieldKind::DateTime).graph_name("lastModifiedDateTime"))
    }

    fn from_ref(entity: EntityRef) -> Self {
        Web(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

impl Web {
    /// The web of `ctx`'s site, not loaded yet.
    pub fn of(ctx: &Context) -> Self {
        ctx.create()
    }

    pub fn id(&self) -> BridgeResult<Option<Uuid>> {
        entity::read(&self.0).get_guid("Id")
    }

    pub fn title(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Title")
    }

    pub fn set_title(&self, title: &str) -> BridgeResult<()> {
        entity::write(&self.0).set("Title", title)
    }

    pub fn description(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Description")
    }

    pub fn url(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Url")
    }

    pub fn created(&self) -> BridgeResult<Option<DateTime<Utc>>> {
        entity::read(&self.0).get_datetime("Created")
    }

    // ─── Lookups ─────────────────────────────────────────────────────

    /// Fetch a file by its server-relative URL, e.g. `/sites/dev/Shared Documents/a.docx`.
    pub fn get_file_by_server_relative_url(&self, url: &str) -> PreparedCall<File> {
        self.lookup("getFileByServerRelativePath", url)
    }

    pub fn get_folder_by_server_relative_url(&self, url: &str) -> PreparedCall<Folder> {
        self.lookup("getFolderByServerRelativePath", url)
    }

    fn lookup<T: EntityModel>(&self, action: &str, url: &str) -> PreparedCall<T> {
        let context = entity::read(&self.0).context().cloned();
        let call = ActionCall::get(action)
            .required_text("decodedUrl", url)
            .dialect(Dialect::Rest);
        operations::invoke_action(CallTarget::Entity(self.0.clone()), call)
            .map(move |entry| materialize::<T>(context, &entry))
    }

    /// A file whose unique id is known; nothing is fetched until `load()`.
    pub fn file_by_id(&self, id: Uuid) -> BridgeResult<File> {
        crate::with_key(&self.bound_context()?, id)
    }

    pub fn folder_by_id(&self, id: Uuid) -> BridgeResult<Folder> {
        crate::with_key(&self.bound_context()?, id)
    }

    pub fn field_by_id(&self, id: Uuid) -> BridgeResult<FieldNumber> {
        crate::with_key(&self.bound_context()?, id)
    }

    fn bound_context(&self) -> BridgeResult<Context> {
        self.context()
            .ok_or_else(|| BridgeError::missing_context("web is not bound to a context"))
    }
}

/// A new `T` bound to `context`, filled from a REST entity payload.
fn materialize<T: EntityModel>(context: Option<Context>, entry: &ResponseEntry) -> BridgeResult<T> {
    let body = entry
        .json()
        .ok_or_else(|| BridgeError::serialization(format!("expected a JSON {} payload", T::TYPE_NAME)))?;
    let entity = Entity::new_ref(T::metadata(), context);
    materializer::apply(&entity, body, Dialect::Rest)?;
    debug!("materialized {} from lookup", T::TYPE_NAME);
    Ok(T::from_ref(entity))
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
