//! In-process store used by the test suites and by `database.in_memory`.
//!
//! Mirrors the Postgres store's observable behaviour: tenant scoping, listing
//! order (nulls last, ties broken by insertion order), shallow payload merge
//! and atomic cascade deletes.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::logic::cascade::DescendantWalk;
use crate::model::{
    generate_id, generate_token, ApiToken, AuthContext, Id, Item, ItemPatch, ListOptions, NewItem,
    OrderBy, Tenant, TenantTokens, User,
};
use crate::store::traits::{ItemLookup, ItemStore, TenantStore, UserStore};

#[derive(Debug, Clone)]
struct StoredItem {
    seq: u64,
    item: Item,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    tenants: HashMap<Id, Tenant>,
    tokens: Vec<ApiToken>,
    items: HashMap<Id, StoredItem>,
    users: HashMap<Id, User>,
}

impl State {
    fn tenant_items(&self, tenant_id: Id) -> impl Iterator<Item = &StoredItem> {
        self.items
            .values()
            .filter(move |stored| stored.item.tenant_id == tenant_id)
    }

    fn scoped_mut(&mut self, tenant_id: Id, collection: &str, id: Id) -> Option<&mut Item> {
        self.items
            .get_mut(&id)
            .map(|stored| &mut stored.item)
            .filter(|item| item.tenant_id == tenant_id && item.collection == collection)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Ascending with `None` after every value.
fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_by(order_by: OrderBy, a: &StoredItem, b: &StoredItem) -> Ordering {
    let (x, y) = (&a.item, &b.item);
    let primary = match order_by {
        OrderBy::Id => x.id.cmp(&y.id),
        OrderBy::ParentId => nulls_last(x.parent_id, y.parent_id),
        OrderBy::OwnerId => nulls_last(x.owner_id, y.owner_id),
        OrderBy::OrderKey => nulls_last(x.order_key.as_deref(), y.order_key.as_deref()),
        OrderBy::CreatedAt => x.created_at.cmp(&y.created_at),
        OrderBy::UpdatedAt => x.updated_at.cmp(&y.updated_at),
    };
    primary.then(a.seq.cmp(&b.seq))
}

fn sorted(mut items: Vec<StoredItem>, order_by: OrderBy) -> Vec<Item> {
    items.sort_by(|a, b| compare_by(order_by, a, b));
    items.into_iter().map(|stored| stored.item).collect()
}

#[async_trait::async_trait]
impl ItemLookup for MemoryStore {
    async fn fetch_by_ids(&self, tenant_id: Id, ids: &[Id]) -> Result<Vec<Item>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.items.get(id))
            .filter(|stored| stored.item.tenant_id == tenant_id)
            .map(|stored| stored.item.clone())
            .collect())
    }

    async fn fetch_children(
        &self,
        tenant_id: Id,
        collection: &str,
        parent_ids: &[Id],
    ) -> Result<Vec<Item>> {
        let state = self.state.read();
        let children = state
            .tenant_items(tenant_id)
            .filter(|stored| {
                stored.item.collection == collection
                    && stored
                        .item
                        .parent_id
                        .map_or(false, |parent| parent_ids.contains(&parent))
            })
            .cloned()
            .collect();
        Ok(sorted(children, OrderBy::OrderKey))
    }
}

#[async_trait::async_trait]
impl ItemStore for MemoryStore {
    async fn list_items(
        &self,
        tenant_id: Id,
        collection: &str,
        options: &ListOptions,
    ) -> Result<Vec<Item>> {
        let state = self.state.read();
        let matching = state
            .tenant_items(tenant_id)
            .filter(|stored| {
                let item = &stored.item;
                item.collection == collection
                    && options.parent_id.map_or(true, |p| item.parent_id == Some(p))
                    && options.owner_id.map_or(true, |o| item.owner_id == Some(o))
                    && options.filter.matches(&item.data)
            })
            .cloned()
            .collect();

        Ok(sorted(matching, options.order_by)
            .into_iter()
            .skip(options.offset.max(0) as usize)
            .take(options.limit.max(0) as usize)
            .collect())
    }

    async fn get_item(&self, tenant_id: Id, collection: &str, id: Id) -> Result<Option<Item>> {
        let state = self.state.read();
        Ok(state
            .items
            .get(&id)
            .map(|stored| &stored.item)
            .filter(|item| item.tenant_id == tenant_id && item.collection == collection)
            .cloned())
    }

    async fn insert_items(
        &self,
        tenant_id: Id,
        collection: &str,
        items: Vec<NewItem>,
    ) -> Result<Vec<Item>> {
        let mut state = self.state.write();
        let mut created = Vec::with_capacity(items.len());
        for new in items {
            let now = Utc::now();
            let item = Item {
                id: generate_id(),
                tenant_id,
                collection: collection.to_string(),
                parent_id: new.parent_id,
                owner_id: new.owner_id,
                order_key: new.order_key,
                data: new.data,
                created_at: now,
                updated_at: now,
            };
            state.next_seq += 1;
            let seq = state.next_seq;
            state.items.insert(
                item.id,
                StoredItem {
                    seq,
                    item: item.clone(),
                },
            );
            created.push(item);
        }
        Ok(created)
    }

    async fn replace_item(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
        new: NewItem,
    ) -> Result<Option<Item>> {
        let mut state = self.state.write();
        Ok(state.scoped_mut(tenant_id, collection, id).map(|item| {
            item.parent_id = new.parent_id;
            item.owner_id = new.owner_id;
            item.order_key = new.order_key;
            item.data = new.data;
            item.updated_at = Utc::now();
            item.clone()
        }))
    }

    async fn update_item(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
        patch: ItemPatch,
    ) -> Result<Option<Item>> {
        let mut state = self.state.write();
        Ok(state.scoped_mut(tenant_id, collection, id).map(|item| {
            if let Some(parent_id) = patch.parent_id {
                item.parent_id = parent_id;
            }
            if let Some(owner_id) = patch.owner_id {
                item.owner_id = owner_id;
            }
            if let Some(order_key) = patch.order_key {
                item.order_key = order_key;
            }
            if let Some(data) = patch.data {
                item.data.extend(data);
            }
            item.updated_at = Utc::now();
            item.clone()
        }))
    }

    async fn delete_item(&self, tenant_id: Id, collection: &str, id: Id) -> Result<bool> {
        let mut state = self.state.write();
        if state.scoped_mut(tenant_id, collection, id).is_none() {
            return Ok(false);
        }
        state.items.remove(&id);
        Ok(true)
    }

    async fn delete_item_cascade(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
    ) -> Result<Option<Vec<Id>>> {
        // The write lock is held for the whole walk, so the delete is atomic.
        let mut state = self.state.write();
        if state.scoped_mut(tenant_id, collection, id).is_none() {
            return Ok(None);
        }

        let mut walk = DescendantWalk::new(id);
        while !walk.is_done() {
            let frontier = walk.frontier();
            let children: Vec<Id> = state
                .tenant_items(tenant_id)
                .filter(|stored| {
                    stored
                        .item
                        .parent_id
                        .map_or(false, |parent| frontier.contains(&parent))
                })
                .map(|stored| stored.item.id)
                .collect();
            walk.advance(children)?;
        }

        let ids = walk.into_ids();
        for id in &ids {
            state.items.remove(id);
        }
        Ok(Some(ids))
    }

    async fn list_all_items(&self, tenant_id: Id) -> Result<Vec<Item>> {
        let state = self.state.read();
        let mut items: Vec<StoredItem> = state.tenant_items(tenant_id).cloned().collect();
        items.sort_by(|a, b| {
            a.item
                .collection
                .cmp(&b.item.collection)
                .then(a.seq.cmp(&b.seq))
        });
        Ok(items.into_iter().map(|stored| stored.item).collect())
    }
}

#[async_trait::async_trait]
impl TenantStore for MemoryStore {
    async fn create_tenant(&self, name: &str) -> Result<(Tenant, TenantTokens)> {
        let mut state = self.state.write();
        let now = Utc::now();
        let tenant = Tenant {
            id: generate_id(),
            name: name.to_string(),
            created_at: now,
        };
        let read_only = generate_token();
        let read_write = generate_token();
        for (token, can_write) in [(&read_only, false), (&read_write, true)] {
            state.tokens.push(ApiToken {
                token: token.clone(),
                tenant_id: tenant.id,
                can_read: true,
                can_write,
                created_at: now,
            });
        }
        state.tenants.insert(tenant.id, tenant.clone());

        Ok((
            tenant,
            TenantTokens {
                read_only: Some(read_only),
                read_write: Some(read_write),
            },
        ))
    }

    async fn get_tenant(&self, id: Id) -> Result<Option<Tenant>> {
        Ok(self.state.read().tenants.get(&id).cloned())
    }

    async fn authenticate(&self, token: &str) -> Result<Option<AuthContext>> {
        let state = self.state.read();
        Ok(state
            .tokens
            .iter()
            .find(|t| t.token == token)
            .map(|t| AuthContext {
                tenant_id: t.tenant_id,
                can_read: t.can_read,
                can_write: t.can_write,
            }))
    }

    async fn tenant_tokens(&self, tenant_id: Id) -> Result<TenantTokens> {
        let state = self.state.read();
        let tokens = state
            .tokens
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect();
        Ok(TenantTokens::from_tokens(tokens))
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, tenant_id: Id, email: &str, password_hash: &str) -> Result<User> {
        let mut state = self.state.write();
        if state
            .users
            .values()
            .any(|u| u.tenant_id == tenant_id && u.email == email)
        {
            return Err(Error::Conflict("Email already exists".to_string()));
        }
        let user = User {
            id: generate_id(),
            tenant_id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            active: true,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, tenant_id: Id, email: &str) -> Result<Option<User>> {
        let state = self.state.read();
        Ok(state
            .users
            .values()
            .find(|u| u.tenant_id == tenant_id && u.email == email)
            .cloned())
    }

    async fn set_user_password(
        &self,
        tenant_id: Id,
        id: Id,
        password_hash: &str,
    ) -> Result<Option<User>> {
        let mut state = self.state.write();
        Ok(state
            .users
            .get_mut(&id)
            .filter(|u| u.tenant_id == tenant_id)
            .map(|u| {
                u.password_hash = password_hash.to_string();
                u.clone()
            }))
    }

    async fn delete_user(&self, tenant_id: Id, id: Id) -> Result<bool> {
        let mut state = self.state.write();
        let owned = state
            .users
            .get(&id)
            .map_or(false, |u| u.tenant_id == tenant_id);
        if owned {
            state.users.remove(&id);
        }
        Ok(owned)
    }

    async fn list_users(&self, tenant_id: Id) -> Result<Vec<User>> {
        let state = self.state.read();
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(users)
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Flip a user's `active` flag. Users are created active.
    pub fn set_user_active(&self, id: Id, active: bool) -> bool {
        let mut state = self.state.write();
        match state.users.get_mut(&id) {
            Some(user) => {
                user.active = active;
                true
            }
            None => false,
        }
    }
}
