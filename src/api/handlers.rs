use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::logic::{items, tenants, users};
use crate::model::{
    AuthContext, Backup, Credentials, ItemPage, ListQuery, NewTenant, Onboarding, PasswordChange,
    TenantTokens, User,
};
use crate::store::traits::Store;

pub type AppState<S> = Arc<S>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `{ "data": ... }` envelope used by every single-resource response.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Json<Self> {
        Json(Self { data })
    }
}

#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub tokens: TenantTokens,
}

#[derive(Debug, Deserialize)]
pub struct ExpandQuery {
    pub expand: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub cascade: bool,
}

/// Malformed bodies and query strings are client errors in our own format.
fn body<T>(payload: std::result::Result<RequestJson<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|RequestJson(value)| value)
        .map_err(|rejection| Error::BadRequest(rejection.body_text()))
}

fn query<T>(params: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| Error::BadRequest(rejection.body_text()))
}

// Tenants and tokens

pub async fn create_tenant<S: Store + 'static>(
    State(store): State<AppState<S>>,
    payload: std::result::Result<RequestJson<NewTenant>, JsonRejection>,
) -> Result<(StatusCode, Json<Onboarding>)> {
    let onboarding = tenants::onboard(store.as_ref(), body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(onboarding)))
}

pub async fn get_tokens<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
) -> Result<Json<TokensResponse>> {
    auth.require_write()?;
    let tokens = store.tenant_tokens(auth.tenant_id).await?;
    Ok(Json(TokensResponse { tokens }))
}

pub async fn export_backup<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
) -> Result<Json<Backup>> {
    auth.require_write()?;
    Ok(Json(
        tenants::export_backup(store.as_ref(), auth.tenant_id).await?,
    ))
}

// Items

pub async fn list_items<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path(collection): Path<String>,
    params: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ItemPage>> {
    auth.require_read()?;
    let params = query(params)?;
    let page = items::list_items(store.as_ref(), auth.tenant_id, &collection, &params).await?;
    Ok(Json(page))
}

pub async fn create_items<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path(collection): Path<String>,
    payload: std::result::Result<RequestJson<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<DataResponse<Value>>)> {
    auth.require_write()?;
    let created =
        items::create_items(store.as_ref(), auth.tenant_id, &collection, body(payload)?).await?;
    Ok((StatusCode::CREATED, DataResponse::new(created.into_value())))
}

pub async fn get_item<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path((collection, id)): Path<(String, String)>,
    params: std::result::Result<Query<ExpandQuery>, QueryRejection>,
) -> Result<Json<DataResponse<Value>>> {
    auth.require_read()?;
    let params = query(params)?;
    let item = items::get_item(
        store.as_ref(),
        auth.tenant_id,
        &collection,
        &id,
        params.expand.as_deref(),
    )
    .await?;
    Ok(DataResponse::new(item))
}

pub async fn replace_item<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path((collection, id)): Path<(String, String)>,
    payload: std::result::Result<RequestJson<Value>, JsonRejection>,
) -> Result<Json<DataResponse<Value>>> {
    auth.require_write()?;
    let item =
        items::replace_item(store.as_ref(), auth.tenant_id, &collection, &id, body(payload)?)
            .await?;
    Ok(DataResponse::new(item))
}

pub async fn update_item<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path((collection, id)): Path<(String, String)>,
    payload: std::result::Result<RequestJson<Value>, JsonRejection>,
) -> Result<Json<DataResponse<Value>>> {
    auth.require_write()?;
    let item =
        items::update_item(store.as_ref(), auth.tenant_id, &collection, &id, body(payload)?)
            .await?;
    Ok(DataResponse::new(item))
}

pub async fn delete_item<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path((collection, id)): Path<(String, String)>,
    params: std::result::Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<Response> {
    auth.require_write()?;
    let params = query(params)?;
    let outcome =
        items::delete_item(store.as_ref(), auth.tenant_id, &collection, &id, params.cascade)
            .await?;
    Ok(match outcome {
        Some(outcome) => Json(outcome).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

// Users

pub async fn create_user<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    payload: std::result::Result<RequestJson<Credentials>, JsonRejection>,
) -> Result<(StatusCode, Json<DataResponse<User>>)> {
    auth.require_write()?;
    let user = users::create_user(store.as_ref(), auth.tenant_id, body(payload)?).await?;
    Ok((StatusCode::CREATED, DataResponse::new(user)))
}

pub async fn change_password<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path(id): Path<String>,
    payload: std::result::Result<RequestJson<PasswordChange>, JsonRejection>,
) -> Result<Json<DataResponse<User>>> {
    auth.require_write()?;
    let user =
        users::change_password(store.as_ref(), auth.tenant_id, &id, body(payload)?).await?;
    Ok(DataResponse::new(user))
}

pub async fn delete_user<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require_write()?;
    users::delete_user(store.as_ref(), auth.tenant_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Any valid token may sign users in; no capability is required.
pub async fn sign_in<S: Store + 'static>(
    State(store): State<AppState<S>>,
    auth: AuthContext,
    payload: std::result::Result<RequestJson<Credentials>, JsonRejection>,
) -> Result<Json<DataResponse<User>>> {
    let user = users::sign_in(store.as_ref(), auth.tenant_id, body(payload)?).await?;
    Ok(DataResponse::new(user))
}

pub async fn not_found() -> Error {
    Error::NotFound("Route".to_string())
}
