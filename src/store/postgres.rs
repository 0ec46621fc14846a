use anyhow::Context;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::logic::cascade::DescendantWalk;
use crate::model::{
    generate_id, generate_token, ApiToken, AuthContext, Id, Item, ItemPatch, ListOptions, NewItem,
    OrderBy, Tenant, TenantTokens, User,
};
use crate::store::traits::{ItemLookup, ItemStore, TenantStore, UserStore};

const ITEM_COLUMNS: &str =
    "id, tenant_id, collection, parent_id, owner_id, order_key, data, created_at, updated_at";

const USER_COLUMNS: &str = "id, tenant_id, email, password_hash, active, created_at";

/// Children of the frontier, locked so a concurrent re-parent either lands
/// before the walk sees the row or waits for the delete to commit.
const DESCENDANTS_SQL: &str =
    "SELECT id FROM items WHERE tenant_id = $1 AND parent_id = ANY($2) FOR UPDATE";

static SHARED: OnceCell<PostgresStore> = OnceCell::const_new();

/// Initialise `cell` at most once. Concurrent callers wait on the same `init`;
/// an `init` that fails leaves the cell empty for the next caller.
async fn init_once<T, F, Fut>(cell: &OnceCell<T>, init: F) -> Result<T>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    Ok(cell.get_or_try_init(init).await?.clone())
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// The process-wide store. The first caller connects and migrates; later
    /// callers share that pool whatever arguments they pass.
    pub async fn shared(database_url: &str, max_connections: u32) -> Result<Self> {
        init_once(&SHARED, || async move {
            let store = Self::new(database_url, max_connections).await?;
            store.migrate().await?;
            Ok(store)
        })
        .await
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations applied");
        Ok(())
    }
}

fn item_from_row(row: &PgRow) -> Result<Item> {
    let Json(data): Json<Map<String, Value>> = row.try_get("data")?;
    Ok(Item {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        collection: row.try_get("collection")?,
        parent_id: row.try_get("parent_id")?,
        owner_id: row.try_get("owner_id")?,
        order_key: row.try_get("order_key")?,
        data,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn items_from_rows(rows: &[PgRow]) -> Result<Vec<Item>> {
    rows.iter().map(item_from_row).collect()
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

/// `ORDER BY` clause for a listing. Order keys compare bytewise so the padded
/// integer encoding sorts numerically regardless of the database locale.
fn order_clause(order_by: OrderBy) -> String {
    let column = match order_by {
        OrderBy::OrderKey => "order_key COLLATE \"C\"",
        other => other.column(),
    };
    format!(" ORDER BY {} ASC NULLS LAST, created_at ASC, id ASC", column)
}

#[async_trait::async_trait]
impl ItemLookup for PostgresStore {
    async fn fetch_by_ids(&self, tenant_id: Id, ids: &[Id]) -> Result<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM items WHERE tenant_id = $1 AND id = ANY($2)",
            ITEM_COLUMNS
        ))
        .bind(tenant_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch items by id")?;

        items_from_rows(&rows)
    }

    async fn fetch_children(
        &self,
        tenant_id: Id,
        collection: &str,
        parent_ids: &[Id],
    ) -> Result<Vec<Item>> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM items \
             WHERE tenant_id = $1 AND collection = $2 AND parent_id = ANY($3){}",
            ITEM_COLUMNS,
            order_clause(OrderBy::OrderKey)
        ))
        .bind(tenant_id)
        .bind(collection)
        .bind(parent_ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch child items")?;

        items_from_rows(&rows)
    }
}

#[async_trait::async_trait]
impl ItemStore for PostgresStore {
    async fn list_items(
        &self,
        tenant_id: Id,
        collection: &str,
        options: &ListOptions,
    ) -> Result<Vec<Item>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM items WHERE tenant_id = ",
            ITEM_COLUMNS
        ));
        query.push_bind(tenant_id);
        query.push(" AND collection = ");
        query.push_bind(collection);
        if let Some(parent_id) = options.parent_id {
            query.push(" AND parent_id = ");
            query.push_bind(parent_id);
        }
        if let Some(owner_id) = options.owner_id {
            query.push(" AND owner_id = ");
            query.push_bind(owner_id);
        }
        options.filter.push_sql(&mut query);
        query.push(order_clause(options.order_by));
        query.push(" LIMIT ");
        query.push_bind(options.limit);
        query.push(" OFFSET ");
        query.push_bind(options.offset);

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list items")?;

        items_from_rows(&rows)
    }

    async fn get_item(&self, tenant_id: Id, collection: &str, id: Id) -> Result<Option<Item>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM items WHERE tenant_id = $1 AND collection = $2 AND id = $3",
            ITEM_COLUMNS
        ))
        .bind(tenant_id)
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch item")?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn insert_items(
        &self,
        tenant_id: Id,
        collection: &str,
        items: Vec<NewItem>,
    ) -> Result<Vec<Item>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Id> = items.iter().map(|_| generate_id()).collect();

        let mut query = QueryBuilder::<Postgres>::new(
            "INSERT INTO items (id, tenant_id, collection, parent_id, owner_id, order_key, data) ",
        );
        query.push_values(ids.iter().zip(items), |mut row, (id, item)| {
            row.push_bind(*id)
                .push_bind(tenant_id)
                .push_bind(collection)
                .push_bind(item.parent_id)
                .push_bind(item.owner_id)
                .push_bind(item.order_key)
                .push_bind(Json(item.data));
        });
        query.push(" RETURNING ");
        query.push(ITEM_COLUMNS);

        // A single statement: either every row lands or none does.
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to insert items")?;

        let mut created = items_from_rows(&rows)?;
        created.sort_by_key(|item| ids.iter().position(|id| *id == item.id));
        Ok(created)
    }

    async fn replace_item(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
        item: NewItem,
    ) -> Result<Option<Item>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE items
            SET parent_id = $4, owner_id = $5, order_key = $6, data = $7,
                updated_at = clock_timestamp()
            WHERE tenant_id = $1 AND collection = $2 AND id = $3
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(tenant_id)
        .bind(collection)
        .bind(id)
        .bind(item.parent_id)
        .bind(item.owner_id)
        .bind(item.order_key)
        .bind(Json(item.data))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to replace item")?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn update_item(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
        patch: ItemPatch,
    ) -> Result<Option<Item>> {
        let mut query =
            QueryBuilder::<Postgres>::new("UPDATE items SET updated_at = clock_timestamp()");
        if let Some(parent_id) = patch.parent_id {
            query.push(", parent_id = ");
            query.push_bind(parent_id);
        }
        if let Some(owner_id) = patch.owner_id {
            query.push(", owner_id = ");
            query.push_bind(owner_id);
        }
        if let Some(order_key) = patch.order_key {
            query.push(", order_key = ");
            query.push_bind(order_key);
        }
        if let Some(data) = patch.data {
            // jsonb || replaces top-level keys and keeps the rest.
            query.push(", data = data || ");
            query.push_bind(Json(data));
        }
        query.push(" WHERE tenant_id = ");
        query.push_bind(tenant_id);
        query.push(" AND collection = ");
        query.push_bind(collection);
        query.push(" AND id = ");
        query.push_bind(id);
        query.push(" RETURNING ");
        query.push(ITEM_COLUMNS);

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .context("Failed to update item")?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn delete_item(&self, tenant_id: Id, collection: &str, id: Id) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM items WHERE tenant_id = $1 AND collection = $2 AND id = $3")
                .bind(tenant_id)
                .bind(collection)
                .bind(id)
                .execute(&self.pool)
                .await
                .context("Failed to delete item")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_item_cascade(
        &self,
        tenant_id: Id,
        collection: &str,
        id: Id,
    ) -> Result<Option<Vec<Id>>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin cascade delete")?;

        let root = sqlx::query(
            "SELECT id FROM items \
             WHERE tenant_id = $1 AND collection = $2 AND id = $3 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock item for cascade delete")?;

        if root.is_none() {
            return Ok(None);
        }

        // Descendants may live in any collection of the tenant.
        let mut walk = DescendantWalk::new(id);
        while !walk.is_done() {
            let children: Vec<Id> = sqlx::query_scalar(DESCENDANTS_SQL)
            .bind(tenant_id)
            .bind(walk.frontier())
            .fetch_all(&mut *tx)
            .await
            .context("Failed to collect descendants")?;
            walk.advance(children)?;
        }
        let ids = walk.into_ids();

        sqlx::query("DELETE FROM items WHERE tenant_id = $1 AND id = ANY($2)")
            .bind(tenant_id)
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .context("Failed to delete item subtree")?;

        tx.commit()
            .await
            .context("Failed to commit cascade delete")?;

        log::debug!("Cascade delete of {} removed {} items", id, ids.len());
        Ok(Some(ids))
    }

    async fn list_all_items(&self, tenant_id: Id) -> Result<Vec<Item>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM items WHERE tenant_id = $1 ORDER BY collection, created_at, id",
            ITEM_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to export items")?;

        items_from_rows(&rows)
    }
}

#[async_trait::async_trait]
impl TenantStore for PostgresStore {
    async fn create_tenant(&self, name: &str) -> Result<(Tenant, TenantTokens)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin tenant creation")?;

        let row = sqlx::query(
            "INSERT INTO tenants (id, name) VALUES ($1, $2) RETURNING id, name, created_at",
        )
        .bind(generate_id())
        .bind(name)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to create tenant")?;
        let tenant = Tenant {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        };

        let read_only = generate_token();
        let read_write = generate_token();
        for (token, can_write) in [(&read_only, false), (&read_write, true)] {
            sqlx::query(
                "INSERT INTO api_tokens (token, tenant_id, can_read, can_write) \
                 VALUES ($1, $2, TRUE, $3)",
            )
            .bind(token)
            .bind(tenant.id)
            .bind(can_write)
            .execute(&mut *tx)
            .await
            .context("Failed to issue tenant token")?;
        }

        tx.commit()
            .await
            .context("Failed to commit tenant creation")?;

        Ok((
            tenant,
            TenantTokens {
                read_only: Some(read_only),
                read_write: Some(read_write),
            },
        ))
    }

    async fn get_tenant(&self, id: Id) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT id, name, created_at FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tenant")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Tenant {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn authenticate(&self, token: &str) -> Result<Option<AuthContext>> {
        let row = sqlx::query(
            "SELECT tenant_id, can_read, can_write FROM api_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up API token")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(AuthContext {
            tenant_id: row.try_get("tenant_id")?,
            can_read: row.try_get("can_read")?,
            can_write: row.try_get("can_write")?,
        }))
    }

    async fn tenant_tokens(&self, tenant_id: Id) -> Result<TenantTokens> {
        let rows = sqlx::query(
            "SELECT token, tenant_id, can_read, can_write, created_at \
             FROM api_tokens WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list API tokens")?;

        let tokens = rows
            .iter()
            .map(|row| {
                Ok(ApiToken {
                    token: row.try_get("token")?,
                    tenant_id: row.try_get("tenant_id")?,
                    can_read: row.try_get("can_read")?,
                    can_write: row.try_get("can_write")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TenantTokens::from_tokens(tokens))
    }
}

#[async_trait::async_trait]
impl UserStore for PostgresStore {
    async fn create_user(&self, tenant_id: Id, email: &str, password_hash: &str) -> Result<User> {
        let result = sqlx::query(&format!(
            "INSERT INTO _users (id, tenant_id, email, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(generate_id())
        .bind(tenant_id)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => user_from_row(&row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::Conflict("Email already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user_by_email(&self, tenant_id: Id, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM _users WHERE tenant_id = $1 AND email = $2",
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn set_user_password(
        &self,
        tenant_id: Id,
        id: Id,
        password_hash: &str,
    ) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "UPDATE _users SET password_hash = $3 WHERE tenant_id = $1 AND id = $2 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .bind(id)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update user password")?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn delete_user(&self, tenant_id: Id, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM _users WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete user")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self, tenant_id: Id) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM _users WHERE tenant_id = $1 ORDER BY created_at, email",
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        rows.iter().map(user_from_row).collect()
    }
}
