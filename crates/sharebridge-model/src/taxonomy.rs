//! The Graph term store: groups, term sets and terms.
//!
//! Term store entities exist only in Microsoft Graph. A term set reached
//! through `TermGroup::sets` answers `group()` with that same group.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sharebridge_core::entity::{self, EntityCollection, EntityModel, EntityRef, ModelCollection};
use sharebridge_core::metadata::{self, EntityMetadata, FieldDef, NavigationDef};
use sharebridge_core::operations::{self, PreparedCall};
use sharebridge_core::{materializer, BridgeError, BridgeResult, Context, EntityOperations, FieldKind, FieldValue};
use std::ops::Deref;

// ═══════════════════════════════════════════════════════════════════════
//  Localized values
// ═══════════════════════════════════════════════════════════════════════

/// One label of a term in one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedLabel {
    pub name: String,
    pub language_tag: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedDescription {
    pub description: String,
    pub language_tag: String,
}

/// A loaded JSON array field, or an empty list when it was never loaded.
fn json_list<T: for<'de> Deserialize<'de>>(entity: &EntityRef, field: &str) -> BridgeResult<Vec<T>> {
    match entity::read(entity).loaded_value(field) {
        Some(FieldValue::Json(v @ Value::Array(_))) => Ok(serde_json::from_value(v.clone())?),
        Some(FieldValue::Null) | None => Ok(Vec::new()),
        Some(other) => Err(BridgeError::serialization(format!("{} is not a list: {}", field, other))),
    }
}

fn set_json_list<T: Serialize>(entity: &EntityRef, field: &str, items: &[T]) -> BridgeResult<()> {
    let value = serde_json::to_value(items)?;
    entity::write(entity).set(field, FieldValue::Json(value))
}

// ═══════════════════════════════════════════════════════════════════════
//  TermGroup
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TermGroup(EntityRef);

impl EntityModel for TermGroup {
    const TYPE_NAME: &'static str = "Taxonomy.TermGroup";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .graph_uri("termStore/groups/{Id}")
            .graph_get("termStore/groups")
            .field(FieldDef::new("Id", FieldKind::Text).graph_only().graph_name("id"))
            .field(FieldDef::new("Name", FieldKind::Text).graph_only().graph_name("displayName"))
            .field(FieldDef::new("Description", FieldKind::Text).graph_only().graph_name("description"))
            .field(FieldDef::new("Scope", FieldKind::Text).graph_only().graph_name("scope"))
            .field(FieldDef::new("CreatedDateTime", FieldKind::DateTime).graph_only().graph_name("createdDateTime"))
            .navigation(
                NavigationDef::collection("Sets", metadata::of::<TermSet>)
                    .graph_name("sets")
                    .graph_get("termStore/groups/{Id}/sets"),
            )
    }

    fn from_ref(entity: EntityRef) -> Self {
        TermGroup(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

impl TermGroup {
    /// Every group of the term store; call `load()` to fetch them.
    pub fn all(ctx: &Context) -> ModelCollection<TermGroup> {
        ModelCollection::from_ref(EntityCollection::new(Self::metadata(), Some(ctx.clone())).into_ref())
    }

    pub fn by_id(ctx: &Context, id: &str) -> BridgeResult<TermGroup> {
        crate::with_key(ctx, id)
    }

    pub fn id(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Id")
    }

    pub fn name(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Name")
    }

    pub fn description(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Description")
    }

    pub fn sets(&self) -> BridgeResult<ModelCollection<TermSet>> {
        crate::collection_of(self, "Sets")
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  TermSet
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TermSet(EntityRef);

impl EntityModel for TermSet {
    const TYPE_NAME: &'static str = "Taxonomy.TermSet";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .graph_uri("termStore/sets/{Id}")
            .graph_get("termStore/groups/{Parent.Id}/sets")
            .field(FieldDef::new("Id", FieldKind::Text).graph_only().graph_name("id"))
            .field(FieldDef::new("Description", FieldKind::Text).graph_only().graph_name("description"))
            .field(FieldDef::new("LocalizedNames", FieldKind::Json).graph_only().graph_name("localizedNames"))
            .field(FieldDef::new("CreatedDateTime", FieldKind::DateTime).graph_only().graph_name("createdDateTime"))
            .navigation(
                NavigationDef::collection("Children", metadata::of::<Term>)
                    .graph_name("children")
                    .graph_get("termStore/sets/{Id}/children"),
            )
            .navigation(
                NavigationDef::entity("Group", metadata::of::<TermGroup>)
                    .graph_name("parentGroup")
                    .graph_get("termStore/sets/{Id}/parentGroup"),
            )
    }

    fn from_ref(entity: EntityRef) -> Self {
        TermSet(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

impl TermSet {
    pub fn by_id(ctx: &Context, id: &str) -> BridgeResult<TermSet> {
        crate::with_key(ctx, id)
    }

    pub fn id(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Id")
    }

    pub fn description(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Description")
    }

    pub fn created(&self) -> BridgeResult<Option<DateTime<Utc>>> {
        entity::read(&self.0).get_datetime("CreatedDateTime")
    }

    /// Top-level terms of the set.
    pub fn children(&self) -> BridgeResult<TermCollection> {
        crate::collection_of(self, "Children").map(TermCollection)
    }

    /// The group this set belongs to.
    ///
    /// When the set was loaded through a group's `sets`, that group is
    /// returned. It is not stored in the set's navigation cache, so the
    /// group and its sets do not own each other.
    pub fn group(&self) -> BridgeResult<TermGroup> {
        match self.owning_group() {
            Some(group) => Ok(group),
            None => crate::child_of(self, "Group"),
        }
    }

    /// Like [`TermSet::group`], fetching the group only when it is not
    /// already known.
    pub fn load_group(&self) -> PreparedCall<TermGroup> {
        if let Some(group) = self.owning_group() {
            return PreparedCall::done(self.context(), Ok(group));
        }
        operations::load_navigation(&self.0, "Group").map(|nav| {
            nav.as_entity()
                .cloned()
                .map(TermGroup::from_ref)
                .ok_or_else(|| BridgeError::internal("Group is not an entity"))
        })
    }

    fn owning_group(&self) -> Option<TermGroup> {
        let parent = entity::read(&self.0).parent()?;
        let is_group = entity::read(&parent).type_name() == TermGroup::TYPE_NAME;
        is_group.then(|| TermGroup::from_ref(parent))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Term
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Term(EntityRef);

impl EntityModel for Term {
    const TYPE_NAME: &'static str = "Taxonomy.Term";

    fn describe() -> EntityMetadata {
        EntityMetadata::new(Self::TYPE_NAME)
            .key("Id")
            .graph_uri("termStore/sets/{Parent.Id}/terms/{Id}")
            .graph_get("termStore/sets/{Parent.Id}/children")
            .graph_add("termStore/sets/{Parent.Id}/children")
            .field(FieldDef::new("Id", FieldKind::Text).graph_only().graph_name("id"))
            .field(FieldDef::new("Labels", FieldKind::Json).graph_only().graph_name("labels"))
            .field(FieldDef::new("Descriptions", FieldKind::Json).graph_only().graph_name("descriptions"))
            .field(FieldDef::new("CreatedDateTime", FieldKind::DateTime).graph_only().graph_name("createdDateTime"))
            .field(
                FieldDef::new("LastModifiedDateTime", FieldKind::DateTime)
                    .graph_only()
                    .graph_name("lastModifiedDateTime"),
            )
    }

    fn from_ref(entity: EntityRef) -> Self {
        Term(entity)
    }

    fn entity(&self) -> &EntityRef {
        &self.0
    }
}

impl Term {
    pub fn id(&self) -> BridgeResult<Option<String>> {
        entity::read(&self.0).get_text("Id")
    }

    /// Labels as loaded or added locally; empty when never loaded.
    pub fn labels(&self) -> BridgeResult<Vec<LocalizedLabel>> {
        json_list(&self.0, "Labels")
    }

    pub fn descriptions(&self) -> BridgeResult<Vec<LocalizedDescription>> {
        json_list(&self.0, "Descriptions")
    }

    /// The default label's name in `language_tag`.
    pub fn default_label(&self, language_tag: &str) -> BridgeResult<Option<String>> {
        Ok(self
            .labels()?
            .into_iter()
            .find(|l| l.is_default && l.language_tag.eq_ignore_ascii_case(language_tag))
            .map(|l| l.name))
    }

    /// Add a label, and optionally a description, for one language.
    ///
    /// A new default label replaces the previous default of that language.
    /// The change is local until `add()` or `update()` runs.
    pub fn add_label_and_description(
        &self,
        label: &str,
        language_tag: &str,
        is_default: bool,
        description: Option<&str>,
    ) -> BridgeResult<()> {
        if label.trim().is_empty() {
            return Err(BridgeError::invalid_argument("term label must not be empty"));
        }
        if language_tag.trim().is_empty() {
            return Err(BridgeError::invalid_argument("language tag must not be empty"));
        }

        let mut labels = self.labels()?;
        if is_default {
            for existing in labels
                .iter_mut()
                .filter(|l| l.language_tag.eq_ignore_ascii_case(language_tag))
            {
                existing.is_default = false;
            }
        }
        labels.push(LocalizedLabel {
            name: label.to_string(),
            language_tag: language_tag.to_string(),
            is_default,
        });
        set_json_list(&self.0, "Labels", &labels)?;

        if let Some(description) = description {
            let mut descriptions = self.descriptions()?;
            descriptions.push(LocalizedDescription {
                description: description.to_string(),
                language_tag: language_tag.to_string(),
            });
            set_json_list(&self.0, "Descriptions", &descriptions)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  TermCollection
// ═══════════════════════════════════════════════════════════════════════

/// The terms of a term set, with `add` for new terms.
#[derive(Clone)]
pub struct TermCollection(ModelCollection<Term>);

impl Deref for TermCollection {
    type Target = ModelCollection<Term>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TermCollection {
    /// Create a term whose default label is `name` in the configured
    /// default language.
    ///
    /// An empty name fails before any request is built. If the add fails
    /// remotely the new term leaves the collection again.
    pub fn add(&self, name: &str, description: Option<&str>) -> PreparedCall<Term> {
        let context = self.0.context();
        if name.trim().is_empty() {
            return PreparedCall::done(context, Err(BridgeError::invalid_argument("term name must not be empty")));
        }
        let Some(ctx) = context else {
            return PreparedCall::done(
                None,
                Err(BridgeError::missing_context("term collection is not bound to a context")),
            );
        };

        let language = ctx.config().default_language.clone();
        let term = self.0.create();
        if let Err(e) = term.add_label_and_description(name, &language, true, description) {
            materializer::detach(term.entity());
            return PreparedCall::done(Some(ctx), Err(e));
        }
        debug!("adding term '{}' ({})", name, language);

        let prepared = term.add();
        if prepared.call().is_none() {
            // Never sent; drop the term this call created.
            materializer::detach(term.entity());
        }
        let created = term.clone();
        prepared.map(move |()| Ok(created))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
