//! Item operations as the HTTP layer sees them: request bodies in, flattened
//! items out. Validation, order-key encoding and reference checks live here;
//! the store only ever sees well-formed input.

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::logic::expand::{parse_expand, Expander};
use crate::logic::filter::PayloadFilter;
use crate::logic::flatten::flatten_item;
use crate::logic::order_key::encode_order_key;
use crate::model::{
    parse_id, DeleteOutcome, ExpandedItem, Id, ItemInput, ItemPage, ItemPatch, ItemPatchInput,
    ListOptions, ListQuery, NewItem, OrderBy, Pagination,
};
use crate::store::traits::Store;

pub const DEFAULT_PAGE_SIZE: i64 = 25;
pub const MAX_PAGE_SIZE: i64 = 1000;
pub const MAX_BATCH_SIZE: usize = 100;

/// Result of a create call, shaped like the request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    One(Value),
    Many(Vec<Value>),
}

impl Created {
    pub fn into_value(self) -> Value {
        match self {
            Created::One(item) => item,
            Created::Many(items) => Value::Array(items),
        }
    }
}

fn item_not_found() -> Error {
    Error::NotFound("Item".to_string())
}

/// Path ids that are not UUIDs cannot name a row.
fn path_id(raw: &str) -> Result<Id> {
    parse_id(raw).ok_or_else(item_not_found)
}

fn query_id(name: &str, raw: Option<&str>) -> Result<Option<Id>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_id(raw)
            .map(Some)
            .ok_or_else(|| Error::BadRequest(format!("{} must be a UUID", name))),
    }
}

fn list_options(query: &ListQuery) -> Result<ListOptions> {
    let filter = match query.filter.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => PayloadFilter::compile(text)?,
        _ => PayloadFilter::default(),
    };
    let order_by = match query.order_by.as_deref() {
        Some(column) => column.parse::<OrderBy>()?,
        None => OrderBy::default(),
    };
    let limit = match query.limit {
        Some(limit) if limit > 0 => limit.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    };

    Ok(ListOptions {
        parent_id: query_id("parentId", query.parent_id.as_deref())?,
        owner_id: query_id("ownerId", query.owner_id.as_deref())?,
        filter,
        order_by,
        limit,
        offset: query.offset.unwrap_or(0).max(0),
    })
}

fn payload(data: Option<Value>, required: bool) -> Result<Map<String, Value>> {
    match data {
        Some(Value::Object(map)) => Ok(map),
        None | Some(Value::Null) if !required => Ok(Map::new()),
        None | Some(Value::Null) => Err(Error::InvalidItem("data is required".to_string())),
        Some(_) => Err(Error::InvalidItem("data must be an object".to_string())),
    }
}

/// serde would otherwise read a JSON array positionally into the input struct.
fn object_body(body: Value) -> Result<Value> {
    match body {
        body @ Value::Object(_) => Ok(body),
        _ => Err(Error::InvalidItem("item must be a JSON object".to_string())),
    }
}

fn new_item(body: Value, data_required: bool) -> Result<NewItem> {
    let input: ItemInput = serde_json::from_value(object_body(body)?)
        .map_err(|e| Error::InvalidItem(e.to_string()))?;
    Ok(NewItem {
        parent_id: input.parent_id,
        owner_id: input.owner_id,
        order_key: input.order_key.as_ref().and_then(encode_order_key),
        data: payload(input.data, data_required)?,
    })
}

fn item_patch(body: Value) -> Result<ItemPatch> {
    let input: ItemPatchInput = serde_json::from_value(object_body(body)?)
        .map_err(|e| Error::InvalidItem(e.to_string()))?;
    let data = match input.data {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => return Err(Error::InvalidItem("data must be an object".to_string())),
    };
    Ok(ItemPatch {
        parent_id: input.parent_id,
        owner_id: input.owner_id,
        order_key: input.order_key.as_ref().map(encode_order_key),
        data,
    })
}

fn reject_self_reference(id: Id, parent_id: Option<Id>, owner_id: Option<Id>) -> Result<()> {
    if parent_id == Some(id) || owner_id == Some(id) {
        return Err(Error::InvalidItem(
            "an item cannot be its own parent or owner".to_string(),
        ));
    }
    Ok(())
}

/// Every referenced id must name an item of the same tenant. One lookup for
/// the whole call; foreign and missing ids get the same message.
async fn ensure_references<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    references: Vec<Id>,
) -> Result<()> {
    let ids: Vec<Id> = references.into_iter().unique().collect();
    if ids.is_empty() {
        return Ok(());
    }
    let found = store.fetch_by_ids(tenant_id, &ids).await?;
    match ids
        .iter()
        .find(|id| !found.iter().any(|item| item.id == **id && item.tenant_id == tenant_id))
    {
        Some(missing) => Err(Error::InvalidItem(format!(
            "referenced item {} does not exist",
            missing
        ))),
        None => Ok(()),
    }
}

pub async fn list_items<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    collection: &str,
    query: &ListQuery,
) -> Result<ItemPage> {
    let options = list_options(query)?;
    let items = store.list_items(tenant_id, collection, &options).await?;
    let ops = parse_expand(query.expand.as_deref().unwrap_or(""));
    let data: Vec<Value> = Expander::expand(store, tenant_id, items, &ops)
        .await?
        .iter()
        .map(flatten_item)
        .collect();

    Ok(ItemPage {
        pagination: Pagination {
            limit: options.limit,
            offset: options.offset,
            count: data.len(),
        },
        data,
    })
}

pub async fn get_item<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    collection: &str,
    id: &str,
    expand: Option<&str>,
) -> Result<Value> {
    let id = path_id(id)?;
    let item = store
        .get_item(tenant_id, collection, id)
        .await?
        .ok_or_else(item_not_found)?;
    let ops = parse_expand(expand.unwrap_or(""));
    let expanded = Expander::expand(store, tenant_id, vec![item], &ops).await?;
    expanded
        .first()
        .map(flatten_item)
        .ok_or_else(item_not_found)
}

/// Create one item from an object body, or a batch from an array body. A batch
/// is validated in full before anything is written.
pub async fn create_items<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    collection: &str,
    body: Value,
) -> Result<Created> {
    let (items, single) = match body {
        Value::Array(entries) => {
            if entries.is_empty() {
                return Err(Error::InvalidItem("no items supplied".to_string()));
            }
            if entries.len() > MAX_BATCH_SIZE {
                return Err(Error::TooManyItems {
                    max: MAX_BATCH_SIZE,
                    got: entries.len(),
                });
            }
            let items = entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| {
                    new_item(entry, true).map_err(|e| match e {
                        Error::InvalidItem(reason) => {
                            Error::InvalidItem(format!("item {}: {}", index, reason))
                        }
                        other => other,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            (items, false)
        }
        body @ Value::Object(_) => (vec![new_item(body, false)?], true),
        _ => {
            return Err(Error::InvalidItem(
                "body must be an object or an array of objects".to_string(),
            ))
        }
    };

    ensure_references(
        store,
        tenant_id,
        items
            .iter()
            .flat_map(|item| [item.parent_id, item.owner_id])
            .flatten()
            .collect(),
    )
    .await?;

    let created = store.insert_items(tenant_id, collection, items).await?;
    let mut flattened: Vec<Value> = created
        .into_iter()
        .map(|item| flatten_item(&ExpandedItem::plain(item)))
        .collect();

    if single {
        flattened
            .pop()
            .map(Created::One)
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("insert returned no rows")))
    } else {
        Ok(Created::Many(flattened))
    }
}

/// Overwrite every mutable field; an absent `data` clears the payload.
pub async fn replace_item<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    collection: &str,
    id: &str,
    body: Value,
) -> Result<Value> {
    let id = path_id(id)?;
    let item = new_item(body, false)?;
    reject_self_reference(id, item.parent_id, item.owner_id)?;
    ensure_references(
        store,
        tenant_id,
        [item.parent_id, item.owner_id].into_iter().flatten().collect(),
    )
    .await?;

    let replaced = store
        .replace_item(tenant_id, collection, id, item)
        .await?
        .ok_or_else(item_not_found)?;
    Ok(flatten_item(&ExpandedItem::plain(replaced)))
}

/// Touch only the supplied fields; `data` is merged one level deep.
pub async fn update_item<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    collection: &str,
    id: &str,
    body: Value,
) -> Result<Value> {
    let id = path_id(id)?;
    let patch = item_patch(body)?;
    if patch.is_empty() {
        return Err(Error::NoFields);
    }
    let parent_id = patch.parent_id.flatten();
    let owner_id = patch.owner_id.flatten();
    reject_self_reference(id, parent_id, owner_id)?;
    ensure_references(
        store,
        tenant_id,
        [parent_id, owner_id].into_iter().flatten().collect(),
    )
    .await?;

    let updated = store
        .update_item(tenant_id, collection, id, patch)
        .await?
        .ok_or_else(item_not_found)?;
    Ok(flatten_item(&ExpandedItem::plain(updated)))
}

/// Delete one item, or with `cascade` the item and all of its descendants.
/// Only a cascade reports what it removed.
pub async fn delete_item<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    collection: &str,
    id: &str,
    cascade: bool,
) -> Result<Option<DeleteOutcome>> {
    let id = path_id(id)?;
    if !cascade {
        return if store.delete_item(tenant_id, collection, id).await? {
            Ok(None)
        } else {
            Err(item_not_found())
        };
    }

    let ids = store
        .delete_item_cascade(tenant_id, collection, id)
        .await?
        .ok_or_else(item_not_found)?;
    log::info!(
        "Cascade delete of {}/{} removed {} items",
        collection,
        id,
        ids.len()
    );
    Ok(Some(DeleteOutcome {
        deleted: ids.len(),
        ids,
    }))
}
