//! Entities, collections and the navigation property cache.
//!
//! An [`Entity`] stores its fields as a `Vec<FieldValue>` indexed by the
//! field's position in its [`EntityMetadata`], with parallel `loaded` and
//! `changed` flags. Parents and collection membership are weak
//! back-references; children are owned through the navigation cache.

use crate::context::Context;
use crate::error::{BridgeError, BridgeResult};
use crate::metadata::{EntityMetadata, FieldDef};
use crate::value::FieldValue;
use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use uuid::Uuid;

pub type EntityRef = Arc<RwLock<Entity>>;
pub type CollectionRef = Arc<RwLock<EntityCollection>>;

// ═══════════════════════════════════════════════════════════════════════
//  Navigation cache
// ═══════════════════════════════════════════════════════════════════════

/// Load state of one navigation property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationState {
    Uninstantiated,
    Instantiated,
    Loaded,
}

/// A cached navigation child.
#[derive(Clone)]
pub enum Navigation {
    Entity(EntityRef),
    Collection(CollectionRef),
}

impl Navigation {
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Navigation::Entity(e) => Some(e),
            Navigation::Collection(_) => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionRef> {
        match self {
            Navigation::Collection(c) => Some(c),
            Navigation::Entity(_) => None,
        }
    }

    /// Same cached child (pointer identity).
    pub fn same_as(&self, other: &Navigation) -> bool {
        match (self, other) {
            (Navigation::Entity(a), Navigation::Entity(b)) => Arc::ptr_eq(a, b),
            (Navigation::Collection(a), Navigation::Collection(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn is_loaded(&self) -> bool {
        match self {
            Navigation::Entity(e) => read(e).has_loaded_fields(),
            Navigation::Collection(c) => c.read().unwrap_or_else(PoisonError::into_inner).is_loaded(),
        }
    }
}

impl fmt::Debug for Navigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Navigation::Entity(_) => write!(f, "Navigation::Entity"),
            Navigation::Collection(_) => write!(f, "Navigation::Collection"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Entity
// ═══════════════════════════════════════════════════════════════════════

pub struct Entity {
    meta: Arc<EntityMetadata>,
    values: Vec<FieldValue>,
    loaded: Vec<bool>,
    changed: Vec<bool>,
    parent: Weak<RwLock<Entity>>,
    membership: Weak<RwLock<EntityCollection>>,
    navigations: HashMap<&'static str, Navigation>,
    context: Option<Context>,
}

impl Entity {
    pub fn new(meta: Arc<EntityMetadata>, context: Option<Context>) -> Self {
        let n = meta.fields().len();
        Self {
            meta,
            values: vec![FieldValue::Null; n],
            loaded: vec![false; n],
            changed: vec![false; n],
            parent: Weak::new(),
            membership: Weak::new(),
            navigations: HashMap::new(),
            context,
        }
    }

    pub fn new_ref(meta: Arc<EntityMetadata>, context: Option<Context>) -> EntityRef {
        Arc::new(RwLock::new(Self::new(meta, context)))
    }

    pub fn meta(&self) -> &Arc<EntityMetadata> {
        &self.meta
    }

    pub fn type_name(&self) -> &'static str {
        self.meta.type_name()
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Context) {
        self.context = Some(context);
    }

    /// Key value, once assigned.
    pub fn key(&self) -> Option<&FieldValue> {
        let idx = self.meta.key_index()?;
        if self.loaded[idx] && !self.values[idx].is_null() {
            Some(&self.values[idx])
        } else {
            None
        }
    }

    pub fn is_loaded(&self, field: &str) -> bool {
        self.meta
            .field_index(field)
            .map_or(false, |idx| self.loaded[idx])
    }

    pub fn has_loaded_fields(&self) -> bool {
        self.loaded.iter().any(|l| *l)
    }

    pub fn loaded_fields(&self) -> Vec<&'static str> {
        self.meta
            .fields()
            .iter()
            .zip(&self.loaded)
            .filter(|(_, loaded)| **loaded)
            .map(|(f, _)| f.name)
            .collect()
    }

    /// Value of a loaded field, `None` when not loaded or unknown.
    pub fn loaded_value(&self, field: &str) -> Option<&FieldValue> {
        let idx = self.meta.field_index(field)?;
        if self.loaded[idx] {
            Some(&self.values[idx])
        } else {
            None
        }
    }

    /// Value of a field; `NotLoaded` when it was never fetched or set.
    pub fn get(&self, field: &str) -> BridgeResult<&FieldValue> {
        let idx = self.index_of(field)?;
        if self.loaded[idx] {
            Ok(&self.values[idx])
        } else {
            Err(BridgeError::not_loaded(self.type_name(), field))
        }
    }

    pub fn get_text(&self, field: &str) -> BridgeResult<Option<String>> {
        self.get(field).map(|v| v.as_str().map(String::from))
    }

    pub fn get_bool(&self, field: &str) -> BridgeResult<Option<bool>> {
        self.get(field).map(FieldValue::as_bool)
    }

    pub fn get_i64(&self, field: &str) -> BridgeResult<Option<i64>> {
        self.get(field).map(FieldValue::as_i64)
    }

    pub fn get_f64(&self, field: &str) -> BridgeResult<Option<f64>> {
        self.get(field).map(FieldValue::as_f64)
    }

    pub fn get_guid(&self, field: &str) -> BridgeResult<Option<Uuid>> {
        self.get(field).map(FieldValue::as_guid)
    }

    pub fn get_datetime(&self, field: &str) -> BridgeResult<Option<DateTime<Utc>>> {
        self.get(field).map(FieldValue::as_datetime)
    }

    pub fn get_json(&self, field: &str) -> BridgeResult<Option<serde_json::Value>> {
        self.get(field).map(|v| v.as_json().cloned())
    }

    /// Set a field locally and mark it changed.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> BridgeResult<()> {
        let idx = self.index_of(field)?;
        let value = value.into();
        if Some(idx) == self.meta.key_index() {
            if let Some(current) = self.key() {
                if *current != value {
                    return Err(BridgeError::invalid_argument(format!(
                        "{}: key {} cannot change once assigned",
                        self.type_name(),
                        field
                    )));
                }
            }
        }
        self.values[idx] = value;
        self.loaded[idx] = true;
        self.changed[idx] = true;
        Ok(())
    }

    /// Store a server-provided value. A differing key is kept as-is.
    pub(crate) fn load_value(&mut self, idx: usize, value: FieldValue) {
        if Some(idx) == self.meta.key_index() {
            if let Some(current) = self.key() {
                if *current != value {
                    warn!(
                        "{}: ignoring key change from {} to {}",
                        self.type_name(),
                        current,
                        value
                    );
                    return;
                }
            }
        }
        self.values[idx] = value;
        self.loaded[idx] = true;
        self.changed[idx] = false;
    }

    pub fn has_changes(&self) -> bool {
        self.changed.iter().any(|c| *c)
    }

    pub fn changed_fields(&self) -> Vec<(&FieldDef, &FieldValue)> {
        self.meta
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| self.changed[*i])
            .map(|(i, f)| (f, &self.values[i]))
            .collect()
    }

    pub fn clear_changes(&mut self) {
        self.changed.iter_mut().for_each(|c| *c = false);
    }

    pub fn parent(&self) -> Option<EntityRef> {
        self.parent.upgrade()
    }

    pub(crate) fn set_parent(&mut self, parent: &EntityRef) {
        self.parent = Arc::downgrade(parent);
    }

    pub fn membership(&self) -> Option<CollectionRef> {
        self.membership.upgrade()
    }

    pub(crate) fn set_membership(&mut self, collection: Weak<RwLock<EntityCollection>>) {
        self.membership = collection;
    }

    pub fn navigation(&self, name: &str) -> Option<Navigation> {
        self.navigations.get(name).cloned()
    }

    pub fn navigation_state(&self, name: &str) -> NavigationState {
        match self.navigations.get(name) {
            None => NavigationState::Uninstantiated,
            Some(nav) if nav.is_loaded() => NavigationState::Loaded,
            Some(_) => NavigationState::Instantiated,
        }
    }

    pub(crate) fn insert_navigation(&mut self, name: &'static str, nav: Navigation) -> Navigation {
        self.navigations.entry(name).or_insert(nav).clone()
    }

    fn index_of(&self, field: &str) -> BridgeResult<usize> {
        self.meta.field_index(field).ok_or_else(|| {
            BridgeError::invalid_argument(format!("{} has no field {}", self.type_name(), field))
        })
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.type_name())
            .field("key", &self.key())
            .field("loaded", &self.loaded_fields())
            .finish()
    }
}

/// Read guard that tolerates poisoning.
pub fn read(entity: &EntityRef) -> std::sync::RwLockReadGuard<'_, Entity> {
    entity.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write guard that tolerates poisoning.
pub fn write(entity: &EntityRef) -> std::sync::RwLockWriteGuard<'_, Entity> {
    entity.write().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════
//  Collections
// ═══════════════════════════════════════════════════════════════════════

pub struct EntityCollection {
    item_meta: Arc<EntityMetadata>,
    parent: Weak<RwLock<Entity>>,
    property: Option<&'static str>,
    items: Vec<EntityRef>,
    loaded: bool,
    context: Option<Context>,
}

impl EntityCollection {
    pub fn new(item_meta: Arc<EntityMetadata>, context: Option<Context>) -> Self {
        Self {
            item_meta,
            parent: Weak::new(),
            property: None,
            items: Vec::new(),
            loaded: false,
            context,
        }
    }

    pub(crate) fn owned_by(mut self, parent: &EntityRef, property: &'static str) -> Self {
        self.parent = Arc::downgrade(parent);
        self.property = Some(property);
        self
    }

    pub fn into_ref(self) -> CollectionRef {
        Arc::new(RwLock::new(self))
    }

    pub fn item_meta(&self) -> &Arc<EntityMetadata> {
        &self.item_meta
    }

    pub fn parent(&self) -> Option<EntityRef> {
        self.parent.upgrade()
    }

    /// Name of the navigation property on the parent that owns this collection.
    pub fn property(&self) -> Option<&'static str> {
        self.property
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn items(&self) -> &[EntityRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn set_loaded(&mut self) {
        self.loaded = true;
    }

    pub fn find_by_key(&self, key: &FieldValue) -> Option<EntityRef> {
        self.items
            .iter()
            .find(|e| read(e).key() == Some(key))
            .cloned()
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.items.iter().any(|e| Arc::ptr_eq(e, entity))
    }

    pub(crate) fn push(&mut self, entity: EntityRef) {
        self.items.push(entity);
    }

    pub(crate) fn remove(&mut self, entity: &EntityRef) -> bool {
        let before = self.items.len();
        self.items.retain(|e| !Arc::ptr_eq(e, entity));
        before != self.items.len()
    }
}

impl fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCollection")
            .field("type", &self.item_meta.type_name())
            .field("property", &self.property)
            .field("len", &self.items.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Typed models
// ═══════════════════════════════════════════════════════════════════════

/// A strongly typed wrapper over an [`EntityRef`].
///
/// `describe` must not call [`crate::metadata::of`]; navigation targets refer
/// to other types through function pointers that are resolved lazily.
pub trait EntityModel: Sized + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn describe() -> EntityMetadata;

    fn from_ref(entity: EntityRef) -> Self;

    fn entity(&self) -> &EntityRef;

    fn metadata() -> Arc<EntityMetadata> {
        crate::metadata::of::<Self>()
    }

    /// Detached instance, not attached to any context.
    fn new_detached() -> Self {
        Self::from_ref(Entity::new_ref(Self::metadata(), None))
    }

    fn context(&self) -> Option<Context> {
        read(self.entity()).context().cloned()
    }
}

/// Typed view over an [`EntityCollection`].
///
/// The view holds its owning entity strongly, so `{Parent..}` placeholders
/// keep resolving while the view is alive even if every other handle to the
/// owner is gone. The owner caches the inner collection, never the view.
pub struct ModelCollection<T> {
    inner: CollectionRef,
    owner: Option<EntityRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ModelCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            owner: self.owner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: EntityModel> ModelCollection<T> {
    pub fn from_ref(inner: CollectionRef) -> Self {
        let owner = inner.read().unwrap_or_else(PoisonError::into_inner).parent();
        Self {
            inner,
            owner,
            _marker: PhantomData,
        }
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.inner
    }

    fn guard(&self) -> std::sync::RwLockReadGuard<'_, EntityCollection> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn items(&self) -> Vec<T> {
        self.guard().items().iter().cloned().map(T::from_ref).collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.guard().is_loaded()
    }

    pub fn find(&self, key: impl Into<FieldValue>) -> Option<T> {
        self.guard().find_by_key(&key.into()).map(T::from_ref)
    }

    pub fn parent(&self) -> Option<EntityRef> {
        self.owner.clone()
    }

    pub fn context(&self) -> Option<Context> {
        self.guard().context().cloned()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
