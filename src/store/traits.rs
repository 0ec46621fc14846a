use crate::error::Result;
use crate::model::{
    AuthContext, Id, Item, ItemPatch, ListOptions, NewItem, Tenant, TenantTokens, User,
};

/// The batched reads the expand executor is built on. Each call is one round
/// trip regardless of how many ids it carries.
#[async_trait::async_trait]
pub trait ItemLookup: Send + Sync {
    /// Items of `tenant_id` whose id is in `ids`, in no particular order.
    async fn fetch_by_ids(&self, tenant_id: Id, ids: &[Id]) -> Result<Vec<Item>>;
    /// Items of `tenant_id` in `collection` whose parent is in `parent_ids`,
    /// ordered by order key ascending with unkeyed items last.
    async fn fetch_children(
        &self,
        tenant_id: Id,
        collection: &str,
        parent_ids: &[Id],
    ) -> Result<Vec<Item>>;
}

/// Tenant-scoped CRUD over the generic item table. Rows outside `tenant_id`
/// are never read or written; they look exactly like missing rows.
#[async_trait::async_trait]
pub trait ItemStore: ItemLookup {
    async fn list_items(
        &self,
        tenant_id: Id,
        collection: &str,
        options: &ListOptions,
    ) -> Result<Vec<Item>>;
    async fn get_item(&self, tenant_id: Id, collection: &str, id: Id) -> Result<Option<Item>>;
    /// Insert all items or none.
    async fn insert_items(
        &self,
        tenant_id: Id,
        collection: &str,
        items: Vec<NewItem>,
    ) -> Result<Vec<Item>>;
    async fn replace_item(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
        item: NewItem,
    ) -> Result<Option<Item>>;
    async fn update_item(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
        patch: ItemPatch,
    ) -> Result<Option<Item>>;
    async fn delete_item(&self, tenant_id: Id, collection: &str, id: Id) -> Result<bool>;
    /// Delete an item and every descendant in one atomic step. Returns the
    /// deleted ids (root first), or `None` if the root does not exist.
    async fn delete_item_cascade(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
    ) -> Result<Option<Vec<Id>>>;
    /// Every item of the tenant, by collection then creation time.
    async fn list_all_items(&self, tenant_id: Id) -> Result<Vec<Item>>;
}

#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    /// Create a tenant with one read-only and one read-write token.
    async fn create_tenant(&self, name: &str) -> Result<(Tenant, TenantTokens)>;
    async fn get_tenant(&self, id: Id) -> Result<Option<Tenant>>;
    async fn authenticate(&self, token: &str) -> Result<Option<AuthContext>>;
    async fn tenant_tokens(&self, tenant_id: Id) -> Result<TenantTokens>;
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` if the email is taken within the tenant.
    async fn create_user(&self, tenant_id: Id, email: &str, password_hash: &str) -> Result<User>;
    async fn find_user_by_email(&self, tenant_id: Id, email: &str) -> Result<Option<User>>;
    async fn set_user_password(
        &self,
        tenant_id: Id,
        id: Id,
        password_hash: &str,
    ) -> Result<Option<User>>;
    async fn delete_user(&self, tenant_id: Id, id: Id) -> Result<bool>;
    async fn list_users(&self, tenant_id: Id) -> Result<Vec<User>>;
}

pub trait Store: ItemStore + TenantStore + UserStore + Send + Sync {}

impl<T: ItemStore + TenantStore + UserStore + Send + Sync> Store for T {}
