//! Entity metadata: endpoint templates, key field, field/wire-name mappings
//! and navigation declarations, plus the process-wide registry and the URL
//! template resolver.
//!
//! Metadata for a type is computed once, on first use, under the registry's
//! write guard and published as an `Arc`. Readers only take the read guard.

use crate::entity::{Entity, EntityModel, EntityRef};
use crate::error::{BridgeError, BridgeResult};
use crate::types::Dialect;
use crate::value::FieldKind;
use lazy_static::lazy_static;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

// ═══════════════════════════════════════════════════════════════════════
//  Declarations
// ═══════════════════════════════════════════════════════════════════════

/// How a field is named on the wire in one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireName {
    /// Same as the model field name.
    Same,
    Renamed(&'static str),
    /// The dialect does not expose this field.
    Absent,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub rest: WireName,
    pub graph: WireName,
}

impl FieldDef {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            rest: WireName::Same,
            graph: WireName::Same,
        }
    }

    pub fn rest_name(mut self, wire: &'static str) -> Self {
        self.rest = WireName::Renamed(wire);
        self
    }

    pub fn graph_name(mut self, wire: &'static str) -> Self {
        self.graph = WireName::Renamed(wire);
        self
    }

    pub fn rest_only(mut self) -> Self {
        self.graph = WireName::Absent;
        self
    }

    pub fn graph_only(mut self) -> Self {
        self.rest = WireName::Absent;
        self
    }

    pub fn wire_name(&self, dialect: Dialect) -> Option<&'static str> {
        let wire = match dialect {
            Dialect::Rest => self.rest,
            Dialect::Graph => self.graph,
        };
        match wire {
            WireName::Same => Some(self.name),
            WireName::Renamed(w) => Some(w),
            WireName::Absent => None,
        }
    }
}

/// URL templates for one dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointTemplates {
    /// Addresses one instance.
    pub uri: Option<String>,
    /// Addresses the collection that contains instances.
    pub get: Option<String>,
    /// Target for creating instances; falls back to `get`.
    pub add: Option<String>,
}

impl EndpointTemplates {
    pub fn is_empty(&self) -> bool {
        self.uri.is_none() && self.get.is_none() && self.add.is_none()
    }
}

/// A child entity or collection reachable from an entity.
#[derive(Debug, Clone)]
pub struct NavigationDef {
    pub name: &'static str,
    pub target: fn() -> Arc<EntityMetadata>,
    pub collection: bool,
    pub rest: WireName,
    pub graph: WireName,
    /// Load URL, resolved against the owning entity.
    pub rest_get: Option<String>,
    pub graph_get: Option<String>,
}

impl NavigationDef {
    pub fn entity(name: &'static str, target: fn() -> Arc<EntityMetadata>) -> Self {
        Self {
            name,
            target,
            collection: false,
            rest: WireName::Same,
            graph: WireName::Same,
            rest_get: None,
            graph_get: None,
        }
    }

    pub fn collection(name: &'static str, target: fn() -> Arc<EntityMetadata>) -> Self {
        Self {
            collection: true,
            ..Self::entity(name, target)
        }
    }

    pub fn graph_name(mut self, wire: &'static str) -> Self {
        self.graph = WireName::Renamed(wire);
        self
    }

    pub fn rest_name(mut self, wire: &'static str) -> Self {
        self.rest = WireName::Renamed(wire);
        self
    }

    pub fn rest_get(mut self, template: impl Into<String>) -> Self {
        self.rest_get = Some(template.into());
        self
    }

    pub fn graph_get(mut self, template: impl Into<String>) -> Self {
        self.graph_get = Some(template.into());
        self
    }

    pub fn wire_name(&self, dialect: Dialect) -> Option<&'static str> {
        let wire = match dialect {
            Dialect::Rest => self.rest,
            Dialect::Graph => self.graph,
        };
        match wire {
            WireName::Same => Some(self.name),
            WireName::Renamed(w) => Some(w),
            WireName::Absent => None,
        }
    }

    pub fn get_template(&self, dialect: Dialect) -> Option<&str> {
        match dialect {
            Dialect::Rest => self.rest_get.as_deref(),
            Dialect::Graph => self.graph_get.as_deref(),
        }
    }
}

/// Everything needed to address and map one entity type.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    type_name: &'static str,
    key_field: Option<&'static str>,
    rest_entity_type: Option<&'static str>,
    rest: EndpointTemplates,
    graph: EndpointTemplates,
    fields: Vec<FieldDef>,
    navigations: Vec<NavigationDef>,
}

impl EntityMetadata {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            key_field: None,
            rest_entity_type: None,
            rest: EndpointTemplates::default(),
            graph: EndpointTemplates::default(),
            fields: Vec::new(),
            navigations: Vec::new(),
        }
    }

    pub fn key(mut self, field: &'static str) -> Self {
        self.key_field = Some(field);
        self
    }

    /// `__metadata.type` sent with verbose REST create bodies.
    pub fn rest_entity_type(mut self, name: &'static str) -> Self {
        self.rest_entity_type = Some(name);
        self
    }

    pub fn rest_uri(mut self, template: impl Into<String>) -> Self {
        self.rest.uri = Some(template.into());
        self
    }

    pub fn rest_get(mut self, template: impl Into<String>) -> Self {
        self.rest.get = Some(template.into());
        self
    }

    pub fn rest_add(mut self, template: impl Into<String>) -> Self {
        self.rest.add = Some(template.into());
        self
    }

    pub fn graph_uri(mut self, template: impl Into<String>) -> Self {
        self.graph.uri = Some(template.into());
        self
    }

    pub fn graph_get(mut self, template: impl Into<String>) -> Self {
        self.graph.get = Some(template.into());
        self
    }

    pub fn graph_add(mut self, template: impl Into<String>) -> Self {
        self.graph.add = Some(template.into());
        self
    }

    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    pub fn navigation(mut self, def: NavigationDef) -> Self {
        self.navigations.push(def);
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn key_field(&self) -> Option<&'static str> {
        self.key_field
    }

    pub fn key_index(&self) -> Option<usize> {
        self.key_field.and_then(|k| self.field_index(k))
    }

    pub fn rest_type(&self) -> Option<&'static str> {
        self.rest_entity_type
    }

    pub fn templates(&self, dialect: Dialect) -> &EndpointTemplates {
        match dialect {
            Dialect::Rest => &self.rest,
            Dialect::Graph => &self.graph,
        }
    }

    pub fn supports(&self, dialect: Dialect) -> bool {
        !self.templates(dialect).is_empty()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field slot for a wire property name.
    pub fn field_for_wire(&self, dialect: Dialect, wire: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.wire_name(dialect) == Some(wire))
            .or_else(|| {
                self.fields.iter().position(|f| {
                    f.wire_name(dialect)
                        .map_or(false, |w| w.eq_ignore_ascii_case(wire))
                })
            })
    }

    pub fn navigations(&self) -> &[NavigationDef] {
        &self.navigations
    }

    pub fn navigation_def(&self, name: &str) -> Option<&NavigationDef> {
        self.navigations.iter().find(|n| n.name == name)
    }

    pub fn navigation_for_wire(&self, dialect: Dialect, wire: &str) -> Option<&NavigationDef> {
        self.navigations
            .iter()
            .find(|n| n.wire_name(dialect).map_or(false, |w| w.eq_ignore_ascii_case(wire)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Registry
// ═══════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref REGISTRY: RwLock<HashMap<&'static str, Arc<EntityMetadata>>> =
        RwLock::new(HashMap::new());
}

/// Metadata for `T`, computing and publishing it on first use.
pub fn of<T: EntityModel>() -> Arc<EntityMetadata> {
    if let Some(meta) = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(T::TYPE_NAME)
    {
        return meta.clone();
    }

    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    // Another writer may have won the race.
    if let Some(meta) = registry.get(T::TYPE_NAME) {
        return meta.clone();
    }
    let meta = Arc::new(T::describe());
    debug!(
        "registered metadata for {} ({} fields, {} navigations)",
        T::TYPE_NAME,
        meta.fields.len(),
        meta.navigations.len()
    );
    registry.insert(T::TYPE_NAME, meta.clone());
    meta
}

/// Publish metadata built at runtime. The first registration for a name wins.
pub fn register(meta: EntityMetadata) -> Arc<EntityMetadata> {
    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    registry
        .entry(meta.type_name)
        .or_insert_with(|| Arc::new(meta))
        .clone()
}

pub fn lookup(type_name: &str) -> BridgeResult<Arc<EntityMetadata>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(type_name)
        .cloned()
        .ok_or_else(|| BridgeError::not_registered(format!("no metadata registered for {}", type_name)))
}

// ═══════════════════════════════════════════════════════════════════════
//  Template resolution
// ═══════════════════════════════════════════════════════════════════════

/// What a template is resolved against.
pub enum TemplateScope<'a> {
    /// One instance; `{Parent..}` walks its parent chain.
    Entity(&'a Entity),
    /// A collection owned by `parent`; every entity placeholder must start
    /// with `Parent`.
    Collection { parent: Option<EntityRef> },
}

/// Substitute `{..}` placeholders in `template`.
///
/// `{Id}` is the key, `{Field}` a loaded field, `{Parent.X}` walks up the
/// parent chain, and anything else is looked up (case-insensitively) in
/// `tokens`. An unloaded or null value is a `MissingContext` error.
pub fn resolve_template(
    template: &str,
    scope: &TemplateScope<'_>,
    tokens: &HashMap<String, String>,
) -> BridgeResult<String> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            BridgeError::invalid_argument(format!("unterminated placeholder in '{}'", template))
        })?;
        let name = &after[..close];
        let value = resolve_placeholder(name, scope, tokens).ok_or_else(|| {
            BridgeError::missing_context(format!(
                "cannot resolve {{{}}} in '{}'",
                name, template
            ))
        })?;
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_placeholder(
    name: &str,
    scope: &TemplateScope<'_>,
    tokens: &HashMap<String, String>,
) -> Option<String> {
    let segments: Vec<&str> = name.split('.').collect();
    let from_entity = match scope {
        TemplateScope::Entity(entity) => resolve_path(Some(entity), entity.parent(), &segments),
        TemplateScope::Collection { parent } => resolve_path(None, parent.clone(), &segments),
    };
    from_entity.or_else(|| {
        if segments.len() == 1 {
            tokens.get(&name.to_lowercase()).cloned()
        } else {
            None
        }
    })
}

fn resolve_path(entity: Option<&Entity>, parent: Option<EntityRef>, segments: &[&str]) -> Option<String> {
    match segments {
        [] => None,
        ["Parent", tail @ ..] => {
            let parent = parent?;
            let guard = parent.read().unwrap_or_else(PoisonError::into_inner);
            resolve_path(Some(&guard), guard.parent(), tail)
        }
        [field] => {
            let entity = entity?;
            let value = if *field == "Id" {
                entity.key()
            } else {
                entity.loaded_value(field)
            };
            value.and_then(|v| v.to_path_segment())
        }
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityModel, EntityRef};
    use crate::error::BridgeErrorKind;
    use crate::materializer;
    use crate::testing::{TestItem, TestList};
    use crate::value::FieldValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DESCRIBE_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct Counted(EntityRef);

    impl EntityModel for Counted {
        const TYPE_NAME: &'static str = "Test.Counted";

        fn describe() -> EntityMetadata {
            DESCRIBE_CALLS.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            EntityMetadata::new(Self::TYPE_NAME).key("Id")
        }

        fn from_ref(entity: EntityRef) -> Self {
            Counted(entity)
        }

        fn entity(&self) -> &EntityRef {
            &self.0
        }
    }

    #[test]
    fn test_metadata_computed_once_under_contention() {
        let handles: Vec<_> = (0..8).map(|_| std::thread::spawn(of::<Counted>)).collect();
        let metas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(DESCRIBE_CALLS.load(Ordering::SeqCst), 1);
        assert!(metas.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_lookup_unknown_type() {
        let err = lookup("Nope.Nothing").unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::NotRegistered);
        of::<TestItem>();
        assert!(lookup(TestItem::TYPE_NAME).is_ok());
    }

    #[test]
    fn test_wire_names() {
        let meta = of::<TestItem>();
        let title = meta.field_def("Title").unwrap();
        assert_eq!(title.wire_name(Dialect::Rest), Some("Title"));
        assert_eq!(title.wire_name(Dialect::Graph), Some("displayName"));
        assert_eq!(meta.field_for_wire(Dialect::Graph, "displayName"), meta.field_index("Title"));
        assert_eq!(meta.field_for_wire(Dialect::Rest, "title"), meta.field_index("Title"));
        assert!(meta.field_for_wire(Dialect::Rest, "Unknown").is_none());
    }

    #[test]
    fn test_declared_fields_and_navigations_are_found_by_name() {
        let meta = EntityMetadata::new("Test.Declared")
            .key("Id")
            .field(FieldDef::new("Id", FieldKind::Int))
            .navigation(NavigationDef::entity("Owner", of::<TestItem>).rest_get("x/{Id}/Owner"));
        assert_eq!(meta.field_def("Id").map(|f| f.kind), Some(FieldKind::Int));
        assert!(meta.field_def("Missing").is_none());
        let owner = meta.navigation_def("Owner").unwrap();
        assert!(!owner.collection);
        assert_eq!(owner.get_template(Dialect::Rest), Some("x/{Id}/Owner"));
        assert!(meta.navigation_def("Items").is_none());
    }

    #[test]
    fn test_resolve_own_key_and_field() {
        let mut entity = Entity::new(of::<TestItem>(), None);
        entity.set("Id", FieldValue::Int(7)).unwrap();
        entity.set("Title", FieldValue::from("a b")).unwrap();
        let url = resolve_template(
            "_api/items({Id})?t={Title}",
            &TemplateScope::Entity(&entity),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(url, "_api/items(7)?t=a b");
    }

    #[test]
    fn test_resolve_parent_chain_and_tokens() {
        let list = Entity::new_ref(of::<TestList>(), None);
        list.write().unwrap().set("Id", FieldValue::Guid(uuid::Uuid::nil())).unwrap();
        let items = materializer::instantiate_navigation(&list, "Items").unwrap();
        let coll = items.as_collection().unwrap().clone();
        let item = materializer::create_in_collection(&coll);
        item.write().unwrap().set("Id", FieldValue::Int(3)).unwrap();

        let mut tokens = HashMap::new();
        tokens.insert("hostname".to_string(), "contoso.sharepoint.com".to_string());
        let guard = item.read().unwrap();
        let url = resolve_template(
            "sites/{hostname}/lists/{Parent.Id}/items/{Id}",
            &TemplateScope::Entity(&guard),
            &tokens,
        )
        .unwrap();
        assert_eq!(
            url,
            "sites/contoso.sharepoint.com/lists/00000000-0000-0000-0000-000000000000/items/3"
        );

        let coll_url = resolve_template(
            "lists/{Parent.Id}/items",
            &TemplateScope::Collection { parent: Some(list.clone()) },
            &tokens,
        )
        .unwrap();
        assert!(coll_url.ends_with("0000/items"));
    }

    #[test]
    fn test_unloaded_placeholder_is_missing_context() {
        let entity = Entity::new(of::<TestItem>(), None);
        let err = resolve_template("items({Id})", &TemplateScope::Entity(&entity), &HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::MissingContext);

        let mut entity = Entity::new(of::<TestItem>(), None);
        entity.set("Title", FieldValue::Null).unwrap();
        let err = resolve_template("x/{Title}", &TemplateScope::Entity(&entity), &HashMap::new())
            .unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::MissingContext);

        let err = resolve_template(
            "x/{Parent.Id}",
            &TemplateScope::Collection { parent: None },
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::MissingContext);
    }
}
