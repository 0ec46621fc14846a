use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::Error;
use crate::logic::filter::PayloadFilter;
use crate::model::Id;

/// A stored row of the generic item table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Id,
    pub tenant_id: Id,
    pub collection: String,
    pub parent_id: Option<Id>,
    pub owner_id: Option<Id>,
    /// Encoded form, see `logic::order_key`.
    pub order_key: Option<String>,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for insert and full replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewItem {
    pub parent_id: Option<Id>,
    pub owner_id: Option<Id>,
    pub order_key: Option<String>,
    pub data: Map<String, Value>,
}

/// Validated partial update. `None` leaves a field untouched, `Some(None)`
/// clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub parent_id: Option<Option<Id>>,
    pub owner_id: Option<Option<Id>>,
    pub order_key: Option<Option<String>>,
    /// Shallow-merged into the stored payload.
    pub data: Option<Map<String, Value>>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.parent_id.is_none()
            && self.owner_id.is_none()
            && self.order_key.is_none()
            && self.data.is_none()
    }
}

/// Request body for create and replace.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    #[serde(default)]
    pub parent_id: Option<Id>,
    #[serde(default)]
    pub owner_id: Option<Id>,
    #[serde(default)]
    pub order_key: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Request body for merge updates. Absent and `null` are distinct here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatchInput {
    #[serde(default, deserialize_with = "present")]
    pub parent_id: Option<Option<Id>>,
    #[serde(default, deserialize_with = "present")]
    pub owner_id: Option<Option<Id>>,
    #[serde(default, deserialize_with = "present")]
    pub order_key: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub data: Option<Value>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Columns a listing may be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    Id,
    ParentId,
    OwnerId,
    OrderKey,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl OrderBy {
    pub fn column(&self) -> &'static str {
        match self {
            OrderBy::Id => "id",
            OrderBy::ParentId => "parent_id",
            OrderBy::OwnerId => "owner_id",
            OrderBy::OrderKey => "order_key",
            OrderBy::CreatedAt => "created_at",
            OrderBy::UpdatedAt => "updated_at",
        }
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(OrderBy::Id),
            "parent_id" => Ok(OrderBy::ParentId),
            "owner_id" => Ok(OrderBy::OwnerId),
            "order_key" => Ok(OrderBy::OrderKey),
            "created_at" => Ok(OrderBy::CreatedAt),
            "updated_at" => Ok(OrderBy::UpdatedAt),
            other => Err(Error::BadRequest(format!(
                "Cannot order by '{}'; expected one of \
                 id, parent_id, owner_id, order_key, created_at, updated_at",
                other
            ))),
        }
    }
}

/// Query string accepted by the list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub parent_id: Option<String>,
    pub owner_id: Option<String>,
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub expand: Option<String>,
}

/// Resolved listing constraints handed to the store.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub parent_id: Option<Id>,
    pub owner_id: Option<Id>,
    pub filter: PayloadFilter,
    pub order_by: OrderBy,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemPage {
    pub data: Vec<Value>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub ids: Vec<Id>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_input_distinguishes_null_from_absent() {
        let patch: ItemPatchInput =
            serde_json::from_value(json!({ "parentId": null, "data": { "a": 1 } })).unwrap();
        assert_eq!(patch.parent_id, Some(None));
        assert_eq!(patch.owner_id, None);
        assert_eq!(patch.order_key, None);
        assert_eq!(patch.data, Some(json!({ "a": 1 })));

        let empty: ItemPatchInput = serde_json::from_value(json!({})).unwrap();
        assert!(empty.parent_id.is_none() && empty.data.is_none());
    }

    #[test]
    fn order_by_uses_an_allow_list() {
        assert_eq!("order_key".parse::<OrderBy>().unwrap(), OrderBy::OrderKey);
        assert_eq!(OrderBy::default().column(), "created_at");
        assert!(matches!(
            "created_at; DROP TABLE items".parse::<OrderBy>(),
            Err(Error::BadRequest(_))
        ));
    }
}
