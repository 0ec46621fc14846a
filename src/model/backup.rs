use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::{Id, Tenant, User};

pub const BACKUP_VERSION: &str = "1.0";

/// One item as exported: envelope and payload kept apart, order key decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupItem {
    pub id: Id,
    pub parent_id: Option<Id>,
    pub owner_id: Option<Id>,
    pub order_key: Option<String>,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Backup {
    pub version: &'static str,
    pub exported_at: DateTime<Utc>,
    pub tenant: Tenant,
    pub collections: BTreeMap<String, Vec<BackupItem>>,
    #[serde(rename = "_users")]
    pub users: Vec<User>,
}
