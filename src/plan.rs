//! Attribute-level planning against a resource schema.

use serde_json::{Map, Value};

use crate::schema::Block;
use crate::types::{AttributeChange, PlanResult};

/// Plan the transition from `prior` to `proposed` for a resource described by
/// `block`.
///
/// * No prior state: every non-null proposed attribute is added.
/// * Null proposal: every prior attribute is removed.
/// * Otherwise: differing attributes are modified; a difference in a
///   `force_new` attribute requires replacement. Computed attributes left null
///   in the proposal keep their prior value unless the resource is replaced.
pub fn plan(block: &Block, prior: Option<&Value>, proposed: Value) -> PlanResult {
    let prior = prior.filter(|p| !p.is_null());

    let Some(prior) = prior else {
        let changes = object_entries(&proposed)
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| AttributeChange::added(k.clone(), v.clone()))
            .collect();
        return PlanResult::with_changes(proposed, changes, false);
    };

    if proposed.is_null() {
        let changes = object_entries(prior)
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
            .collect();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let empty = Map::new();
    let before = prior.as_object().unwrap_or(&empty);
    let mut planned = proposed.as_object().cloned().unwrap_or_default();

    let mut changes = Vec::new();
    let mut requires_replace = false;
    for key in union_keys(before, &planned) {
        if is_computed(block, &key) && planned.get(&key).map_or(true, Value::is_null) {
            continue;
        }
        let old = before.get(&key).unwrap_or(&Value::Null);
        let new = planned.get(&key).unwrap_or(&Value::Null);
        if old == new {
            continue;
        }
        requires_replace |= forces_replacement(block, &key, old, new);
        changes.push(change(&key, old, new));
    }

    if !requires_replace {
        for (key, value) in before {
            if is_computed(block, key) && planned.get(key).map_or(true, Value::is_null) {
                planned.insert(key.clone(), value.clone());
            }
        }
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

fn object_entries(value: &Value) -> impl Iterator<Item = (&String, &Value)> {
    value.as_object().into_iter().flat_map(|m| m.iter())
}

fn union_keys(a: &Map<String, Value>, b: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = a.keys().chain(b.keys()).cloned().collect();
    keys.sort();
    keys.dedup();
    keys
}

fn change(key: &str, old: &Value, new: &Value) -> AttributeChange {
    match (old.is_null(), new.is_null()) {
        (true, _) => AttributeChange::added(key, new.clone()),
        (_, true) => AttributeChange::removed(key, old.clone()),
        _ => AttributeChange::modified(key, old.clone(), new.clone()),
    }
}

/// Computed-only attributes; optional+computed ones count when left unset.
fn is_computed(block: &Block, key: &str) -> bool {
    block
        .attributes
        .get(key)
        .is_some_and(|attr| attr.flags.computed && !attr.flags.required)
}

fn forces_replacement(block: &Block, key: &str, old: &Value, new: &Value) -> bool {
    if let Some(attr) = block.attributes.get(key) {
        return attr.force_new;
    }
    let Some(nested) = block.blocks.get(key) else {
        return false;
    };
    // Single nested blocks are objects; compare their attributes one by one.
    match (old.as_object(), new.as_object()) {
        (Some(old), Some(new)) => union_keys(old, new).iter().any(|k| {
            let a = old.get(k).unwrap_or(&Value::Null);
            let b = new.get(k).unwrap_or(&Value::Null);
            a != b && forces_replacement(&nested.block, k, a, b)
        }),
        _ => nested.block.attributes.values().any(|attr| attr.force_new),
    }
}
