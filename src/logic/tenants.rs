use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::logic::order_key::decode_order_key;
use crate::model::{Backup, BackupItem, Id, NewTenant, Onboarding, BACKUP_VERSION};
use crate::store::traits::Store;

/// Create a tenant and hand back its first pair of tokens.
pub async fn onboard<S: Store + ?Sized>(store: &S, request: NewTenant) -> Result<Onboarding> {
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::BadRequest("Name is required".to_string()))?;

    let (tenant, tokens) = store.create_tenant(name).await?;
    log::info!("Onboarded tenant {} ({})", tenant.name, tenant.id);
    Ok(Onboarding { tenant, tokens })
}

/// Everything a tenant owns, grouped by collection.
pub async fn export_backup<S: Store + ?Sized>(store: &S, tenant_id: Id) -> Result<Backup> {
    let tenant = store
        .get_tenant(tenant_id)
        .await?
        .ok_or_else(|| Error::NotFound("Tenant".to_string()))?;

    let mut collections: BTreeMap<String, Vec<BackupItem>> = BTreeMap::new();
    for item in store.list_all_items(tenant_id).await? {
        collections
            .entry(item.collection)
            .or_default()
            .push(BackupItem {
                id: item.id,
                parent_id: item.parent_id,
                owner_id: item.owner_id,
                order_key: item.order_key.as_deref().map(decode_order_key),
                data: item.data,
                created_at: item.created_at,
                updated_at: item.updated_at,
            });
    }
    let users = store.list_users(tenant_id).await?;

    log::info!(
        "Exported {} collections and {} users for tenant {}",
        collections.len(),
        users.len(),
        tenant_id
    );
    Ok(Backup {
        version: BACKUP_VERSION,
        exported_at: Utc::now(),
        tenant,
        collections,
        users,
    })
}
