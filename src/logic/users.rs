use anyhow::Context;

use crate::error::{Error, Result};
use crate::model::{parse_id, Credentials, Id, PasswordChange, User};
use crate::store::traits::Store;

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

fn user_not_found() -> Error {
    Error::NotFound("User".to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn email_and_password(credentials: Credentials) -> Result<(String, String)> {
    match (non_blank(credentials.email), non_blank(credentials.password)) {
        (Some(email), Some(password)) => Ok((email.trim().to_string(), password)),
        _ => Err(Error::BadRequest(
            "Email and password are required".to_string(),
        )),
    }
}

/// Runs on the blocking pool.
async fn hash_password(password: String) -> Result<String> {
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, HASH_COST))
        .await
        .context("Password hashing task failed")?
        .context("Failed to hash password")?;
    Ok(hash)
}

async fn verify_password(password: String, hash: String) -> Result<bool> {
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("Password verification task failed")?
        // A malformed stored hash cannot match anything.
        .unwrap_or(false);
    Ok(matches)
}

pub async fn create_user<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    credentials: Credentials,
) -> Result<User> {
    let (email, password) = email_and_password(credentials)?;
    let hash = hash_password(password).await?;
    store.create_user(tenant_id, &email, &hash).await
}

pub async fn sign_in<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    credentials: Credentials,
) -> Result<User> {
    let (email, password) = email_and_password(credentials)?;
    let invalid = || Error::Unauthorized("Invalid email or password".to_string());

    let user = store
        .find_user_by_email(tenant_id, &email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(invalid());
    }
    if !user.active {
        return Err(Error::Forbidden("Account is disabled".to_string()));
    }

    log::debug!("User {} signed in", user.id);
    Ok(user)
}

pub async fn change_password<S: Store + ?Sized>(
    store: &S,
    tenant_id: Id,
    id: &str,
    change: PasswordChange,
) -> Result<User> {
    let id = parse_id(id).ok_or_else(user_not_found)?;
    let password = non_blank(change.password)
        .ok_or_else(|| Error::BadRequest("Password is required".to_string()))?;
    let hash = hash_password(password).await?;
    store
        .set_user_password(tenant_id, id, &hash)
        .await?
        .ok_or_else(user_not_found)
}

pub async fn delete_user<S: Store + ?Sized>(store: &S, tenant_id: Id, id: &str) -> Result<()> {
    let id = parse_id(id).ok_or_else(user_not_found)?;
    if store.delete_user(tenant_id, id).await? {
        Ok(())
    } else {
        Err(user_not_found())
    }
}
