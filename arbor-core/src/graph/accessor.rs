//! Value Accessor
//!
//! Resolves paths against a `serde_json::Value` tree. Lookups are total: a
//! path that runs through a missing or primitive intermediate resolves to
//! `None` instead of failing.
//!
//! Array containers consult their identity table first when addressed with a
//! [`PathKey::Field`], so an element can be reached through its `id`, `_id`
//! or `__id` even after it moved.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::node::{PathKey, Segment};

/// Fields checked, in order, for an array element's identity.
pub const ID_FIELDS: [&str; 3] = ["id", "_id", "__id"];

/// The identity field carried by `element`, if any.
pub(crate) fn id_field(element: &Value) -> Option<&'static str> {
    let object = element.as_object()?;
    ID_FIELDS.into_iter().find(|field| object.contains_key(*field))
}

/// The identity of `element` under `field`, as a lookup string.
pub(crate) fn identity(element: &Value, field: &str) -> Option<String> {
    match element.get(field)? {
        Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

/// Build the identity table of an array: identity to index.
pub(crate) fn identity_table(items: &[Value]) -> Option<HashMap<String, usize>> {
    let field = id_field(items.first()?)?;
    Some(
        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| identity(item, field).map(|id| (id, index)))
            .collect(),
    )
}

/// Whether a value has children.
pub(crate) fn is_container(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Object(_) | Value::Array(_)))
}

/// Map a key onto an array position.
pub(crate) fn resolve_index(key: &PathKey, ids: Option<&HashMap<String, usize>>) -> Option<usize> {
    match key {
        PathKey::Index(index) => Some(*index),
        PathKey::Field(field) => ids
            .and_then(|ids| ids.get(field))
            .copied()
            .or_else(|| key.as_index()),
    }
}

/// The child of `container` at `key`.
pub(crate) fn child_value<'a>(
    container: &'a Value,
    key: &PathKey,
    ids: Option<&HashMap<String, usize>>,
) -> Option<&'a Value> {
    match container {
        Value::Object(map) => map.get(&key.to_string()),
        Value::Array(items) => items.get(resolve_index(key, ids)?),
        _ => None,
    }
}

pub(crate) fn child_value_mut<'a>(
    container: &'a mut Value,
    key: &PathKey,
    ids: Option<&HashMap<String, usize>>,
) -> Option<&'a mut Value> {
    match container {
        Value::Object(map) => map.get_mut(&key.to_string()),
        Value::Array(items) => items.get_mut(resolve_index(key, ids)?),
        _ => None,
    }
}

/// Why a slot could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotError {
    /// The container is a primitive, or the key is not an array position.
    NotAContainer,

    /// The array cannot grow to hold this position.
    OutOfRange(usize),
}

/// Store `value` at `key`, or clear the slot when `value` is `None`.
///
/// Returns the previous occupant. Cleared array slots become `null` so the
/// positions of later elements do not shift. Writing past the end pads the
/// gap with `null`, and fails instead of aborting when the array cannot
/// grow that far.
pub(crate) fn replace_child(
    container: &mut Value,
    key: &PathKey,
    ids: Option<&HashMap<String, usize>>,
    value: Option<Value>,
) -> Result<Option<Value>, SlotError> {
    match container {
        Value::Object(map) => {
            let field = key.to_string();
            Ok(match value {
                Some(value) => map.insert(field, value),
                None => map.remove(&field),
            })
        }
        Value::Array(items) => {
            let index = resolve_index(key, ids).ok_or(SlotError::NotAContainer)?;
            match value {
                Some(value) if index < items.len() => {
                    Ok(Some(std::mem::replace(&mut items[index], value)))
                }
                Some(value) => {
                    let additional = (index - items.len())
                        .checked_add(1)
                        .ok_or(SlotError::OutOfRange(index))?;
                    items
                        .try_reserve(additional)
                        .map_err(|_| SlotError::OutOfRange(index))?;
                    items.resize(index, Value::Null);
                    items.push(value);
                    Ok(None)
                }
                None if index < items.len() => {
                    Ok(Some(std::mem::replace(&mut items[index], Value::Null)))
                }
                None => Ok(None),
            }
        }
        _ => Err(SlotError::NotAContainer),
    }
}

/// Walk `segments` from `root`.
pub(crate) fn resolve<'a>(root: Option<&'a Value>, segments: &[Segment<'_>]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root?, |value, segment| child_value(value, segment.key, segment.ids))
}

/// Walk `segments` from `root` for writing, creating empty objects for
/// missing intermediates.
///
/// On failure returns how many segments were walked successfully, and why
/// the next one could not be.
pub(crate) fn container_mut<'a>(
    root: &'a mut Option<Value>,
    segments: &[Segment<'_>],
) -> Result<&'a mut Value, (usize, SlotError)> {
    let mut current = root.get_or_insert_with(|| Value::Object(Map::new()));
    for (depth, segment) in segments.iter().enumerate() {
        if child_value(current, segment.key, segment.ids).is_none() {
            let empty = Some(Value::Object(Map::new()));
            replace_child(current, segment.key, segment.ids, empty)
                .map_err(|error| (depth, error))?;
        }
        current = child_value_mut(current, segment.key, segment.ids)
            .ok_or((depth, SlotError::NotAContainer))?;
    }
    Ok(current)
}

/// The keys of a container, in iteration order.
pub(crate) fn keys(value: Option<&Value>) -> Vec<PathKey> {
    match value {
        Some(Value::Object(map)) => map.keys().map(PathKey::from).collect(),
        Some(Value::Array(items)) => (0..items.len()).map(PathKey::Index).collect(),
        _ => Vec::new(),
    }
}

/// The entries of a container, keyed the way nodes are keyed.
pub(crate) fn entries(value: Option<&Value>) -> Vec<(PathKey, &Value)> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (PathKey::from(key), value))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, value)| (PathKey::Index(index), value))
            .collect(),
        _ => Vec::new(),
    }
}

/// Whether `value` is an array whose length differs from `previous`.
pub(crate) fn array_resized(value: Option<&Value>, previous: Option<&Value>) -> bool {
    match value {
        Some(Value::Array(items)) => {
            previous.and_then(Value::as_array).map(Vec::len) != Some(items.len())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seg<'a>(key: &'a PathKey, ids: Option<&'a HashMap<String, usize>>) -> Segment<'a> {
        Segment { key, ids }
    }

    #[test]
    fn resolves_nested_paths() {
        let tree = json!({ "a": { "list": [10, 20, 30] } });
        let a = PathKey::from("a");
        let list = PathKey::from("list");
        let second = PathKey::Index(1);

        let value = resolve(Some(&tree), &[seg(&a, None), seg(&list, None), seg(&second, None)]);
        assert_eq!(value, Some(&json!(20)));
    }

    #[test]
    fn missing_intermediates_resolve_to_none() {
        let tree = json!({ "a": null });
        let a = PathKey::from("a");
        let b = PathKey::from("b");
        let c = PathKey::from("c");

        assert_eq!(resolve(Some(&tree), &[seg(&a, None), seg(&b, None)]), None);
        assert_eq!(resolve(Some(&tree), &[seg(&c, None), seg(&b, None)]), None);
        assert_eq!(resolve(None, &[seg(&a, None)]), None);
    }

    #[test]
    fn identity_field_preference() {
        assert_eq!(id_field(&json!({ "_id": 1, "__id": 2 })), Some("_id"));
        assert_eq!(id_field(&json!({ "id": null })), Some("id"));
        assert_eq!(id_field(&json!({ "name": "x" })), None);
        assert_eq!(id_field(&json!(3)), None);
    }

    #[test]
    fn field_keys_on_arrays_use_identity_table() {
        let items = json!([{ "id": "x" }, { "id": "y" }]);
        let ids = identity_table(items.as_array().unwrap()).unwrap();

        let by_id = PathKey::from("y");
        assert_eq!(child_value(&items, &by_id, Some(&ids)), Some(&json!({ "id": "y" })));

        // Without a matching identity the field is parsed as an index.
        let literal = PathKey::from("0");
        assert_eq!(child_value(&items, &literal, Some(&ids)), Some(&json!({ "id": "x" })));

        // Index keys never consult the table.
        let numeric = json!([{ "id": 1 }, { "id": 0 }]);
        let ids = identity_table(numeric.as_array().unwrap()).unwrap();
        assert_eq!(
            child_value(&numeric, &PathKey::Index(0), Some(&ids)),
            Some(&json!({ "id": 1 }))
        );
    }

    #[test]
    fn replace_child_in_objects_and_arrays() {
        let a = PathKey::from("a");
        let mut object = json!({ "a": 1 });
        assert_eq!(replace_child(&mut object, &a, None, Some(json!(2))), Ok(Some(json!(1))));
        assert_eq!(replace_child(&mut object, &a, None, None), Ok(Some(json!(2))));
        assert_eq!(object, json!({}));

        let mut array = json!([1]);
        assert_eq!(replace_child(&mut array, &PathKey::Index(2), None, Some(json!(3))), Ok(None));
        assert_eq!(array, json!([1, null, 3]));
        assert_eq!(replace_child(&mut array, &PathKey::Index(0), None, None), Ok(Some(json!(1))));
        assert_eq!(array, json!([null, null, 3]));

        let mut primitive = json!(5);
        assert_eq!(
            replace_child(&mut primitive, &a, None, Some(json!(1))),
            Err(SlotError::NotAContainer)
        );
    }

    #[test]
    fn replace_child_rejects_unreachable_indices() {
        let mut array = json!([1]);
        let huge = PathKey::Index(usize::MAX);

        assert_eq!(
            replace_child(&mut array, &huge, None, Some(json!(2))),
            Err(SlotError::OutOfRange(usize::MAX))
        );
        assert_eq!(array, json!([1]));
    }

    #[test]
    fn container_mut_creates_intermediates() {
        let mut root = Some(json!({}));
        let a = PathKey::from("a");
        let b = PathKey::from("b");

        let container = container_mut(&mut root, &[seg(&a, None), seg(&b, None)]).unwrap();
        container.as_object_mut().unwrap().insert("c".into(), json!(1));

        assert_eq!(root, Some(json!({ "a": { "b": { "c": 1 } } })));
    }

    #[test]
    fn container_mut_stops_at_primitives() {
        let mut root = Some(json!({ "a": 5 }));
        let a = PathKey::from("a");
        let b = PathKey::from("b");

        assert_eq!(
            container_mut(&mut root, &[seg(&a, None), seg(&b, None)]).err(),
            Some((1, SlotError::NotAContainer))
        );
    }

    #[test]
    fn detects_resized_arrays() {
        assert!(array_resized(Some(&json!([1, 2])), Some(&json!([1]))));
        assert!(array_resized(Some(&json!([])), None));
        assert!(!array_resized(Some(&json!([1])), Some(&json!([2]))));
        assert!(!array_resized(Some(&json!({})), None));
    }
}
