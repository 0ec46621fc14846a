//! Relationship expansion.
//!
//! [`parse_expand`] turns the `expand` query parameter into a forest of
//! [`ExpandOp`]s and [`Expander::expand`] resolves them against the store. Every
//! op costs one batched lookup for the whole item set it applies to, and nested
//! ops recurse on the resolved set, so `children:columns.children:cards` is two
//! queries however many boards, columns and cards there are.

use std::collections::HashMap;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use itertools::Itertools;

use crate::error::Result;
use crate::model::{ExpandOp, ExpandedItem, Id, Item, Relation};
use crate::store::traits::ItemLookup;

const CHILDREN_PREFIX: &str = "children:";

/// Parse `parent,owner.parent,children:cards` style expansion text.
///
/// Specs are comma separated and each dot nests the rest of the chain under
/// the step before it. Blank specs are skipped. Unrecognised steps are kept as
/// [`ExpandOp::Unknown`] and resolve to nothing.
pub fn parse_expand(text: &str) -> Vec<ExpandOp> {
    text.split(',')
        .map(str::trim)
        .filter(|spec| !spec.is_empty())
        .map(parse_chain)
        .collect()
}

fn parse_chain(chain: &str) -> ExpandOp {
    match chain.split_once('.') {
        Some((step, rest)) => {
            let rest = rest.trim();
            let nested = if rest.is_empty() {
                Vec::new()
            } else {
                vec![parse_chain(rest)]
            };
            parse_step(step.trim()).with_nested(nested)
        }
        None => parse_step(chain.trim()),
    }
}

fn parse_step(step: &str) -> ExpandOp {
    match step {
        "parent" => ExpandOp::parent(),
        "owner" => ExpandOp::owner(),
        _ => match step.strip_prefix(CHILDREN_PREFIX) {
            Some(collection) if !collection.is_empty() => ExpandOp::children(collection),
            _ => ExpandOp::Unknown {
                name: step.to_string(),
                nested: Vec::new(),
            },
        },
    }
}

/// One relation resolved for the item at `index` of the current level.
struct Attachment {
    index: usize,
    key: String,
    relation: Relation,
}

pub struct Expander;

impl Expander {
    /// Resolve `ops` for `items`, all within `tenant_id`.
    ///
    /// With no ops the items come back plain. Otherwise every item is
    /// annotated, even if none of its relations resolved.
    pub async fn expand<S: ItemLookup + ?Sized>(
        store: &S,
        tenant_id: Id,
        items: Vec<Item>,
        ops: &[ExpandOp],
    ) -> Result<Vec<ExpandedItem>> {
        if ops.is_empty() || items.is_empty() {
            return Ok(items.into_iter().map(ExpandedItem::plain).collect());
        }
        Self::expand_level(store, tenant_id, items, ops).await
    }

    fn expand_level<'a, S: ItemLookup + ?Sized>(
        store: &'a S,
        tenant_id: Id,
        items: Vec<Item>,
        ops: &'a [ExpandOp],
    ) -> BoxFuture<'a, Result<Vec<ExpandedItem>>> {
        async move {
            // Sibling ops share nothing, so their lookups run concurrently.
            let resolved = try_join_all(
                ops.iter()
                    .map(|op| Self::resolve(store, tenant_id, &items, op)),
            )
            .await?;

            let mut expanded: Vec<ExpandedItem> =
                items.into_iter().map(ExpandedItem::annotated).collect();
            // Applied in op order: a later op wins a key collision.
            for attachment in resolved.into_iter().flatten() {
                expanded[attachment.index].attach(attachment.key, attachment.relation);
            }
            Ok(expanded)
        }
        .boxed()
    }

    async fn resolve<S: ItemLookup + ?Sized>(
        store: &S,
        tenant_id: Id,
        items: &[Item],
        op: &ExpandOp,
    ) -> Result<Vec<Attachment>> {
        match op {
            ExpandOp::Parent { nested } => {
                Self::resolve_reference(store, tenant_id, items, "parent", |i| i.parent_id, nested)
                    .await
            }
            ExpandOp::Owner { nested } => {
                Self::resolve_reference(store, tenant_id, items, "owner", |i| i.owner_id, nested)
                    .await
            }
            ExpandOp::Children { collection, nested } => {
                Self::resolve_children(store, tenant_id, items, collection, nested).await
            }
            ExpandOp::Unknown { name, .. } => {
                log::debug!("Ignoring unknown expand step '{}'", name);
                Ok(Vec::new())
            }
        }
    }

    /// Run `nested` over a freshly fetched set, or hand it back plain.
    async fn descend<S: ItemLookup + ?Sized>(
        store: &S,
        tenant_id: Id,
        found: Vec<Item>,
        nested: &[ExpandOp],
    ) -> Result<Vec<ExpandedItem>> {
        if nested.is_empty() || found.is_empty() {
            Ok(found.into_iter().map(ExpandedItem::plain).collect())
        } else {
            Self::expand_level(store, tenant_id, found, nested).await
        }
    }

    async fn resolve_reference<S: ItemLookup + ?Sized>(
        store: &S,
        tenant_id: Id,
        items: &[Item],
        key: &str,
        link: fn(&Item) -> Option<Id>,
        nested: &[ExpandOp],
    ) -> Result<Vec<Attachment>> {
        let ids: Vec<Id> = items.iter().filter_map(link).unique().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let found: Vec<Item> = store
            .fetch_by_ids(tenant_id, &ids)
            .await?
            .into_iter()
            .filter(|item| item.tenant_id == tenant_id)
            .collect();
        let by_id: HashMap<Id, ExpandedItem> = Self::descend(store, tenant_id, found, nested)
            .await?
            .into_iter()
            .map(|expanded| (expanded.item.id, expanded))
            .collect();

        Ok(items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let id = link(item)?;
                Some(Attachment {
                    index,
                    key: key.to_string(),
                    relation: Relation::One(by_id.get(&id).cloned().map(Box::new)),
                })
            })
            .collect())
    }

    async fn resolve_children<S: ItemLookup + ?Sized>(
        store: &S,
        tenant_id: Id,
        items: &[Item],
        collection: &str,
        nested: &[ExpandOp],
    ) -> Result<Vec<Attachment>> {
        let parent_ids: Vec<Id> = items.iter().map(|item| item.id).unique().collect();
        let children: Vec<Item> = store
            .fetch_children(tenant_id, collection, &parent_ids)
            .await?
            .into_iter()
            .filter(|item| item.tenant_id == tenant_id)
            .collect();

        // Groups keep the store's order-key order.
        let mut groups: HashMap<Id, Vec<ExpandedItem>> = HashMap::new();
        for child in Self::descend(store, tenant_id, children, nested).await? {
            if let Some(parent_id) = child.item.parent_id {
                groups.entry(parent_id).or_default().push(child);
            }
        }

        Ok(items
            .iter()
            .enumerate()
            .map(|(index, item)| Attachment {
                index,
                key: collection.to_string(),
                relation: Relation::Many(groups.get(&item.id).cloned().unwrap_or_default()),
            })
            .collect())
    }
}
