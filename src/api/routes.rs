use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<Arc<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Tenant onboarding and token lookup
        .route(
            "/_tokens",
            post(handlers::create_tenant::<S>).get(handlers::get_tokens::<S>),
        )
        .route("/_backup", get(handlers::export_backup::<S>))
        // Application users
        .route("/_users", post(handlers::create_user::<S>))
        .route(
            "/_users/:id",
            patch(handlers::change_password::<S>).delete(handlers::delete_user::<S>),
        )
        .route("/_signin", post(handlers::sign_in::<S>))
        // Generic collections
        .route(
            "/:collection",
            get(handlers::list_items::<S>).post(handlers::create_items::<S>),
        )
        .route(
            "/:collection/:id",
            get(handlers::get_item::<S>)
                .put(handlers::replace_item::<S>)
                .patch(handlers::update_item::<S>)
                .delete(handlers::delete_item::<S>),
        )
        .fallback(handlers::not_found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router().with_state(Arc::new(MemoryStore::new()))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Onboard a tenant and return its (read-only, read-write) tokens.
    async fn onboard(app: &Router, name: &str) -> (String, String) {
        let body = Some(json!({ "name": name }));
        let (status, body) = send(app, Method::POST, "/_tokens", None, body).await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["tokens"]["readOnly"].as_str().unwrap().to_string(),
            body["tokens"]["readWrite"].as_str().unwrap().to_string(),
        )
    }

    #[test]
    fn router_builds_over_the_memory_store() {
        let store = Arc::new(MemoryStore::new());
        let _router: Router = create_router::<MemoryStore>().with_state(store);
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
    }

    #[tokio::test]
    async fn tokens_gate_reads_and_writes() {
        let app = app();
        let (read_only, read_write) = onboard(&app, "acme").await;
        let read_only = Some(read_only.as_str());
        let read_write = Some(read_write.as_str());
        let item = Some(json!({ "data": { "title": "x" } }));

        let (status, body) = send(&app, Method::POST, "/notes", None, item.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], json!("Missing token"));

        let (status, _) = send(&app, Method::POST, "/notes", Some("nope"), item.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, Method::POST, "/notes", read_only, item.clone()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], json!("Write not allowed"));

        let (status, created) = send(&app, Method::POST, "/notes", read_write, item).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["data"]["title"], json!("x"));

        let (status, page) = send(&app, Method::GET, "/notes", read_only, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            page["pagination"],
            json!({ "limit": 25, "offset": 0, "count": 1 })
        );

        let (status, body) = send(&app, Method::GET, "/_tokens", read_write, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tokens"]["readOnly"], json!(read_only));
    }

    #[tokio::test]
    async fn item_lifecycle_over_http() {
        let app = app();
        let (_, token) = onboard(&app, "acme").await;
        let token = Some(token.as_str());

        let body = Some(json!({ "data": { "name": "b" } }));
        let (_, board) = send(&app, Method::POST, "/boards", token, body).await;
        let board_id = board["data"]["id"].as_str().unwrap().to_string();
        let (status, _) = send(
            &app,
            Method::POST,
            "/columns",
            token,
            Some(json!([
                { "parentId": board_id, "orderKey": 10, "data": { "name": "done" } },
                { "parentId": board_id, "orderKey": 2, "data": { "name": "todo" } }
            ])),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let uri = format!("/boards/{}?expand=children:columns", board_id);
        let (status, body) = send(&app, Method::GET, &uri, token, None).await;
        assert_eq!(status, StatusCode::OK);
        let columns = body["data"]["_expanded"]["columns"].as_array().unwrap();
        assert_eq!(columns[0]["name"], json!("todo"));
        assert_eq!(columns[1]["order_key"], json!("10"));

        let uri = format!("/boards/{}", board_id);
        let (status, body) = send(&app, Method::PATCH, &uri, token, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("No fields to update"));

        let uri = format!("/boards/{}?cascade=true", board_id);
        let (status, body) = send(&app, Method::DELETE, &uri, token, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], json!(3));

        let (status, body) = send(&app, Method::DELETE, &uri, token, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("Item not found"));
    }

    #[tokio::test]
    async fn client_errors_use_the_error_envelope() {
        let app = app();
        let (_, token) = onboard(&app, "acme").await;
        let token = Some(token.as_str());

        let uri = "/notes?filter=%7Bbad";
        let (status, body) = send(&app, Method::GET, uri, token, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON filter"));

        let (status, _) = send(&app, Method::GET, "/notes?orderBy=data", token, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::GET, "/notes?limit=many", token, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send(&app, Method::POST, "/_tokens", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::GET, "/a/b/c", token, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_item_query_strings_use_the_error_envelope() {
        let app = app();
        let (_, token) = onboard(&app, "acme").await;
        let token = Some(token.as_str());

        let body = Some(json!({ "data": { "title": "x" } }));
        let (_, note) = send(&app, Method::POST, "/notes", token, body).await;
        let id = note["data"]["id"].as_str().unwrap().to_string();

        let uri = format!("/notes/{}?cascade=yes", id);
        let (status, body) = send(&app, Method::DELETE, &uri, token, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let uri = format!("/notes/{}", id);
        let (status, _) = send(&app, Method::GET, &uri, token, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn users_sign_in_with_any_token() {
        let app = app();
        let (read_only, read_write) = onboard(&app, "acme").await;
        let read_only = Some(read_only.as_str());
        let read_write = Some(read_write.as_str());
        let credentials = json!({ "email": "ann@example.com", "password": "pw" });

        let body = Some(credentials.clone());
        let (status, body) = send(&app, Method::POST, "/_users", read_write, body).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"].get("password_hash").is_none());

        let body = Some(credentials.clone());
        let (status, body) = send(&app, Method::POST, "/_users", read_write, body).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], json!("Email already exists"));

        let body = Some(credentials);
        let (status, body) = send(&app, Method::POST, "/_signin", read_only, body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["email"], json!("ann@example.com"));

        let wrong = Some(json!({ "email": "ann@example.com", "password": "nope" }));
        let (status, _) = send(&app, Method::POST, "/_signin", read_only, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
