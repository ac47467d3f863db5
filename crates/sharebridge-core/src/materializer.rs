//! Writes parsed wire payloads onto entities and manages navigation children
//! and collection membership.

use crate::entity::{self, Entity, EntityCollection, CollectionRef, EntityRef, Navigation};
use crate::error::{BridgeError, BridgeResult};
use crate::metadata::NavigationDef;
use crate::types::Dialect;
use crate::value::FieldValue;
use log::{debug, warn};
use serde_json::Value;
use std::sync::{Arc, PoisonError};

/// Strip the dialect envelope around a single-entity payload.
pub fn unwrap_entity(payload: &Value) -> &Value {
    match payload.get("d") {
        Some(inner) => inner,
        None => payload,
    }
}

/// Items of a collection payload: `d.results`, `d` (array), `value`, or a bare array.
pub fn unwrap_items(payload: &Value) -> Option<&Vec<Value>> {
    let inner = unwrap_entity(payload);
    inner
        .get("results")
        .and_then(Value::as_array)
        .or_else(|| inner.get("value").and_then(Value::as_array))
        .or_else(|| inner.as_array())
}

fn is_annotation(key: &str) -> bool {
    key == "__metadata" || key.starts_with("@odata") || key.starts_with("odata.")
}

fn is_deferred(value: &Value) -> bool {
    value.get("__deferred").is_some()
}

/// Apply an entity payload. Unknown wire properties are ignored.
pub fn apply(entity: &EntityRef, payload: &Value, dialect: Dialect) -> BridgeResult<()> {
    let body = unwrap_entity(payload);
    let obj = body.as_object().ok_or_else(|| {
        BridgeError::serialization(format!("expected an object payload, got {}", body))
    })?;

    let mut nested: Vec<(&'static str, &Value)> = Vec::new();
    {
        let mut guard = entity::write(entity);
        let meta = guard.meta().clone();
        for (wire, value) in obj {
            if is_annotation(wire) {
                continue;
            }
            if let Some(idx) = meta.field_for_wire(dialect, wire) {
                let def = &meta.fields()[idx];
                match FieldValue::from_wire(def.kind, value) {
                    Ok(v) => guard.load_value(idx, v),
                    Err(e) => warn!("{}.{}: dropped value: {}", meta.type_name(), def.name, e),
                }
            } else if let Some(nav) = meta.navigation_for_wire(dialect, wire) {
                if !is_deferred(value) && !value.is_null() {
                    nested.push((nav.name, value));
                }
            } else {
                debug!("{}: ignoring unknown property {}", meta.type_name(), wire);
            }
        }
    }

    // Children are applied without holding the parent's lock.
    for (name, value) in nested {
        match instantiate_navigation(entity, name)? {
            Navigation::Entity(child) => apply(&child, value, dialect)?,
            Navigation::Collection(coll) => apply_collection(&coll, value, dialect)?,
        }
    }
    Ok(())
}

/// Apply a collection payload, merging into existing members by key.
pub fn apply_collection(collection: &CollectionRef, payload: &Value, dialect: Dialect) -> BridgeResult<()> {
    let items = unwrap_items(payload).ok_or_else(|| {
        BridgeError::serialization("expected a collection payload".to_string())
    })?;

    let meta = collection
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .item_meta()
        .clone();
    let key_def = meta.key_index().map(|i| &meta.fields()[i]);

    for item in items {
        let body = unwrap_entity(item);
        let existing = key_def.and_then(|def| {
            let wire = def.wire_name(dialect)?;
            let raw = body.get(wire)?;
            let key = FieldValue::from_wire(def.kind, raw).ok()?;
            collection
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .find_by_key(&key)
        });
        let target = match existing {
            Some(e) => e,
            None => create_in_collection(collection),
        };
        apply(&target, body, dialect)?;
    }

    collection
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .set_loaded();
    Ok(())
}

/// The navigation child for `name`, created from metadata on first access.
pub fn instantiate_navigation(entity: &EntityRef, name: &str) -> BridgeResult<Navigation> {
    instantiate_navigation_with(entity, name, |def, owner| {
        let guard = entity::read(owner);
        let target = (def.target)();
        let context = guard.context().cloned();
        if def.collection {
            Navigation::Collection(
                EntityCollection::new(target, context)
                    .owned_by(owner, def.name)
                    .into_ref(),
            )
        } else {
            let mut child = Entity::new(target, context);
            child.set_parent(owner);
            Navigation::Entity(Arc::new(std::sync::RwLock::new(child)))
        }
    })
}

/// Like [`instantiate_navigation`] with a caller-supplied factory.
///
/// Returns the cached child unchanged if one exists; the factory only runs
/// on first access.
pub fn instantiate_navigation_with<F>(entity: &EntityRef, name: &str, factory: F) -> BridgeResult<Navigation>
where
    F: FnOnce(&NavigationDef, &EntityRef) -> Navigation,
{
    let def = {
        let guard = entity::read(entity);
        if let Some(existing) = guard.navigation(name) {
            return Ok(existing);
        }
        guard.meta().navigation_def(name).cloned().ok_or_else(|| {
            BridgeError::not_registered(format!(
                "{} has no navigation property {}",
                guard.type_name(),
                name
            ))
        })?
    };

    let child = factory(&def, entity);
    Ok(entity::write(entity).insert_navigation(def.name, child))
}

/// Create a new member of `collection`, parented to the collection's owner.
pub fn create_in_collection(collection: &CollectionRef) -> EntityRef {
    let mut guard = collection.write().unwrap_or_else(PoisonError::into_inner);
    let mut child = Entity::new(guard.item_meta().clone(), guard.context().cloned());
    if let Some(parent) = guard.parent() {
        child.set_parent(&parent);
    }
    child.set_membership(Arc::downgrade(collection));
    let child = Arc::new(std::sync::RwLock::new(child));
    guard.push(child.clone());
    child
}

/// Remove `entity` from the collection it belongs to. No-op without one.
pub fn detach(entity: &EntityRef) -> bool {
    let membership = {
        let mut guard = entity::write(entity);
        let coll = guard.membership();
        guard.set_membership(std::sync::Weak::new());
        coll
    };
    match membership {
        Some(coll) => {
            let removed = coll.write().unwrap_or_else(PoisonError::into_inner).remove(entity);
            if removed {
                debug!("detached {} from its collection", entity::read(entity).type_name());
            }
            removed
        }
        None => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{read, EntityModel, NavigationState};
    use crate::error::BridgeErrorKind;
    use crate::testing::{TestItem, TestList};
    use serde_json::json;

    #[test]
    fn test_apply_rest_verbose_payload() {
        let item = TestItem::new_detached();
        let payload = json!({
            "d": {
                "__metadata": {"type": "SP.ListItem"},
                "Id": 4,
                "Title": "Quarterly",
                "Flagged": true,
                "BrandNewServerField": "ignored"
            }
        });
        apply(item.entity(), &payload, Dialect::Rest).unwrap();
        let guard = read(item.entity());
        assert_eq!(guard.key(), Some(&FieldValue::Int(4)));
        assert_eq!(guard.get_text("Title").unwrap().as_deref(), Some("Quarterly"));
        assert_eq!(guard.get_bool("Flagged").unwrap(), Some(true));
        assert!(!guard.is_loaded("Size"));
    }

    #[test]
    fn test_apply_graph_renamed_fields() {
        let item = TestItem::new_detached();
        apply(
            item.entity(),
            &json!({"@odata.context": "x", "id": 2, "displayName": "Doc"}),
            Dialect::Graph,
        )
        .unwrap();
        assert_eq!(read(item.entity()).get_text("Title").unwrap().as_deref(), Some("Doc"));
    }

    #[test]
    fn test_malformed_value_is_skipped() {
        let item = TestItem::new_detached();
        apply(item.entity(), &json!({"Id": 1, "Size": {"bad": true}}), Dialect::Rest).unwrap();
        let guard = read(item.entity());
        assert!(guard.is_loaded("Id"));
        assert!(!guard.is_loaded("Size"));
    }

    #[test]
    fn test_non_object_payload_fails() {
        let item = TestItem::new_detached();
        let err = apply(item.entity(), &json!([1, 2]), Dialect::Rest).unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::Serialization);
    }

    #[test]
    fn test_instantiate_navigation_is_idempotent() {
        let list = TestList::new_detached();
        assert_eq!(
            read(list.entity()).navigation_state("Items"),
            NavigationState::Uninstantiated
        );
        let first = instantiate_navigation(list.entity(), "Items").unwrap();
        let second = instantiate_navigation(list.entity(), "Items").unwrap();
        assert!(first.same_as(&second));
        assert_eq!(
            read(list.entity()).navigation_state("Items"),
            NavigationState::Instantiated
        );

        let coll = first.as_collection().unwrap();
        let owner = coll.read().unwrap().parent().unwrap();
        assert!(Arc::ptr_eq(&owner, list.entity()));
    }

    #[test]
    fn test_factory_runs_only_once() {
        let list = TestList::new_detached();
        let mut calls = 0;
        for _ in 0..2 {
            instantiate_navigation_with(list.entity(), "Owner", |def, owner| {
                calls += 1;
                let mut e = Entity::new((def.target)(), None);
                e.set_parent(owner);
                Navigation::Entity(Arc::new(std::sync::RwLock::new(e)))
            })
            .unwrap();
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unknown_navigation_is_not_registered() {
        let list = TestList::new_detached();
        let err = instantiate_navigation(list.entity(), "Nope").unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::NotRegistered);
    }

    #[test]
    fn test_expanded_collection_becomes_loaded() {
        let list = TestList::new_detached();
        let payload = json!({
            "d": {
                "Id": "6f1c2a8e-0000-4000-8000-000000000001",
                "Items": {"results": [{"Id": 1, "Title": "a"}, {"Id": 2, "Title": "b"}]},
                "Author": {"__deferred": {"uri": "x"}}
            }
        });
        apply(list.entity(), &payload, Dialect::Rest).unwrap();
        let guard = read(list.entity());
        assert_eq!(guard.navigation_state("Items"), NavigationState::Loaded);
        assert_eq!(guard.navigation_state("Owner"), NavigationState::Uninstantiated);
        let items = guard.navigation("Items").unwrap();
        let coll = items.as_collection().unwrap().read().unwrap();
        assert_eq!(coll.len(), 2);
    }

    #[test]
    fn test_collection_reload_merges_by_key() {
        let list = TestList::new_detached();
        let nav = instantiate_navigation(list.entity(), "Items").unwrap();
        let coll = nav.as_collection().unwrap().clone();
        apply_collection(&coll, &json!({"value": [{"id": 1, "displayName": "a"}]}), Dialect::Graph).unwrap();
        let first = coll.read().unwrap().items()[0].clone();
        apply_collection(
            &coll,
            &json!({"value": [{"id": 1, "displayName": "a2"}, {"id": 5}]}),
            Dialect::Graph,
        )
        .unwrap();
        let guard = coll.read().unwrap();
        assert_eq!(guard.len(), 2);
        assert!(Arc::ptr_eq(&guard.items()[0], &first));
        assert_eq!(read(&first).get_text("Title").unwrap().as_deref(), Some("a2"));
    }

    #[test]
    fn test_detach() {
        let list = TestList::new_detached();
        let nav = instantiate_navigation(list.entity(), "Items").unwrap();
        let coll = nav.as_collection().unwrap().clone();
        let a = create_in_collection(&coll);
        let b = create_in_collection(&coll);
        assert!(detach(&a));
        assert!(!detach(&a));
        let guard = coll.read().unwrap();
        assert_eq!(guard.len(), 1);
        assert!(guard.contains(&b));

        let loose = TestItem::new_detached();
        assert!(!detach(loose.entity()));
    }
}
