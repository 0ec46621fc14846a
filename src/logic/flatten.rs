//! Projection of stored items into the external JSON shape.

use serde_json::{Map, Value};

use crate::logic::order_key::decode_order_key;
use crate::model::{ExpandedItem, Id, Item, Relation};

/// Key the resolved relations are attached under. Payload fields must not
/// use it; if one does, the expansion map replaces it.
pub const EXPANDED_KEY: &str = "_expanded";

/// Envelope fields plus payload, payload winning on conflict.
pub fn flatten_row(item: &Item) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("id".to_string(), Value::String(item.id.to_string()));
    out.insert(
        "collection".to_string(),
        Value::String(item.collection.clone()),
    );
    out.insert("parent_id".to_string(), optional_id(item.parent_id));
    out.insert("owner_id".to_string(), optional_id(item.owner_id));
    out.insert(
        "order_key".to_string(),
        item.order_key
            .as_deref()
            .map(|key| Value::String(decode_order_key(key)))
            .unwrap_or(Value::Null),
    );
    out.insert(
        "created_at".to_string(),
        Value::String(item.created_at.to_rfc3339()),
    );
    out.insert(
        "updated_at".to_string(),
        Value::String(item.updated_at.to_rfc3339()),
    );
    for (key, value) in &item.data {
        out.insert(key.clone(), value.clone());
    }
    out
}

pub fn flatten_item(expanded: &ExpandedItem) -> Value {
    let mut out = flatten_row(&expanded.item);
    if let Some(relations) = &expanded.expanded {
        let nested: Map<String, Value> = relations
            .iter()
            .map(|(key, relation)| (key.clone(), flatten_relation(relation)))
            .collect();
        out.insert(EXPANDED_KEY.to_string(), Value::Object(nested));
    }
    Value::Object(out)
}

fn flatten_relation(relation: &Relation) -> Value {
    match relation {
        Relation::One(Some(item)) => flatten_item(item),
        Relation::One(None) => Value::Null,
        Relation::Many(items) => Value::Array(items.iter().map(flatten_item).collect()),
    }
}

fn optional_id(id: Option<Id>) -> Value {
    id.map(|id| Value::String(id.to_string()))
        .unwrap_or(Value::Null)
}
