use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Id;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Id,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub tenant_id: Id,
    pub can_read: bool,
    pub can_write: bool,
    pub created_at: DateTime<Utc>,
}

/// The read-only and read-write tokens currently issued to a tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantTokens {
    pub read_only: Option<String>,
    pub read_write: Option<String>,
}

impl TenantTokens {
    /// Pick the newest token of each kind.
    pub fn from_tokens(mut tokens: Vec<ApiToken>) -> Self {
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            read_only: tokens
                .iter()
                .find(|t| t.can_read && !t.can_write)
                .map(|t| t.token.clone()),
            read_write: tokens
                .iter()
                .find(|t| t.can_read && t.can_write)
                .map(|t| t.token.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTenant {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Onboarding {
    pub tenant: Tenant,
    pub tokens: TenantTokens,
}

/// Who is calling and what they may do, resolved from a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub tenant_id: Id,
    pub can_read: bool,
    pub can_write: bool,
}

impl AuthContext {
    pub fn require_read(&self) -> Result<()> {
        if self.can_read {
            Ok(())
        } else {
            Err(Error::Forbidden("Read not allowed".to_string()))
        }
    }

    pub fn require_write(&self) -> Result<()> {
        if self.can_write {
            Ok(())
        } else {
            Err(Error::Forbidden("Write not allowed".to_string()))
        }
    }
}
