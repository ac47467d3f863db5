//! # sharebridge-model
//!
//! Typed SharePoint entities on top of `sharebridge-core`.
//!
//! | Module | Entities |
//! |---|---|
//! | `web` | `Web`, file and folder lookups by URL |
//! | `folder` | `Folder` and its `Files` |
//! | `file` | `File` with publish, checkout, checkin, recycle, copy and move |
//! | `list_item` | `ListItem` |
//! | `field` | `FieldNumber` |
//! | `taxonomy` | `TermGroup`, `TermSet`, `Term`, `TermCollection` |
//!
//! Every operation returns a [`PreparedCall`](sharebridge_core::PreparedCall),
//! so it can be awaited, queued on a batch, or run from synchronous code.

pub mod field;
pub mod file;
pub mod folder;
pub mod list_item;
pub mod taxonomy;
pub mod types;
pub mod web;

pub use field::FieldNumber;
pub use file::{File, RecycleOutcome};
pub use folder::Folder;
pub use list_item::ListItem;
pub use taxonomy::{TermCollection, Term, TermGroup, TermSet};
pub use types::{CheckOutType, CheckinType, CustomizedPageStatus, ListPageRenderType, MoveOperations, WireEnum};
pub use web::Web;

use sharebridge_core::entity::{self, EntityModel, ModelCollection};
use sharebridge_core::{materializer, BridgeError, BridgeResult, Context, FieldValue};

/// The collection behind navigation `name` of `owner`, created on first use.
pub(crate) fn collection_of<T: EntityModel>(owner: &impl EntityModel, name: &str) -> BridgeResult<ModelCollection<T>> {
    let nav = materializer::instantiate_navigation(owner.entity(), name)?;
    nav.as_collection()
        .cloned()
        .map(ModelCollection::from_ref)
        .ok_or_else(|| BridgeError::internal(format!("{} is not a collection", name)))
}

/// The entity behind navigation `name` of `owner`, created on first use.
pub(crate) fn child_of<T: EntityModel>(owner: &impl EntityModel, name: &str) -> BridgeResult<T> {
    let nav = materializer::instantiate_navigation(owner.entity(), name)?;
    nav.as_entity()
        .cloned()
        .map(T::from_ref)
        .ok_or_else(|| BridgeError::internal(format!("{} is not an entity", name)))
}

/// An entity bound to `ctx` whose key is already known, with no pending changes.
pub(crate) fn with_key<T: EntityModel>(ctx: &Context, key: impl Into<FieldValue>) -> BridgeResult<T> {
    let model: T = ctx.create();
    let field = T::metadata()
        .key_field()
        .ok_or_else(|| BridgeError::internal(format!("{} has no key", T::TYPE_NAME)))?;
    {
        let mut guard = entity::write(model.entity());
        guard.set(field, key)?;
        guard.clear_changes();
    }
    Ok(model)
}
