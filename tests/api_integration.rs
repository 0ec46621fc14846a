use coll_db_rust::api::routes::create_router;
use coll_db_rust::store::MemoryStore;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

// Test client wrapper for making API calls as one tenant
struct TestClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token: None,
        }
    }

    fn with_token(&self, token: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token.to_string()),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn post(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.request(reqwest::Method::POST, path).json(&json).send().await
    }

    async fn put(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.request(reqwest::Method::PUT, path).json(&json).send().await
    }

    async fn patch(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.request(reqwest::Method::PATCH, path).json(&json).send().await
    }

    async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.request(reqwest::Method::GET, path).send().await
    }

    async fn delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.request(reqwest::Method::DELETE, path).send().await
    }
}

/// Serve the API over an in-memory store on an ephemeral port.
async fn spawn_server() -> TestClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = create_router().with_state(Arc::new(MemoryStore::new()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestClient::new(format!("http://{}", address))
}

/// Onboard a tenant, returning clients for its read-only and read-write tokens.
async fn onboard(client: &TestClient, name: &str) -> (TestClient, TestClient) {
    let response = client.post("/_tokens", json!({ "name": name })).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["tenant"]["name"], json!(name));
    (
        client.with_token(body["tokens"]["readOnly"].as_str().unwrap()),
        client.with_token(body["tokens"]["readWrite"].as_str().unwrap()),
    )
}

async fn create(client: &TestClient, collection: &str, body: Value) -> Value {
    let response = client.post(&format!("/{}", collection), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    body["data"].clone()
}

fn id_of(item: &Value) -> String {
    item["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_kanban_board_workflow() {
    let server = spawn_server().await;
    let (reader, writer) = onboard(&server, "kanban").await;

    let owner = create(&writer, "people", json!({ "data": { "name": "Ann" } })).await;
    let board = create(
        &writer,
        "boards",
        json!({ "ownerId": id_of(&owner), "data": { "name": "Roadmap" } }),
    )
    .await;
    assert_eq!(board["owner_id"], json!(id_of(&owner)));
    assert_eq!(board["parent_id"], Value::Null);

    let columns = create(
        &writer,
        "columns",
        json!([
            { "parentId": id_of(&board), "orderKey": "2", "data": { "name": "Doing" } },
            { "parentId": id_of(&board), "orderKey": "1", "data": { "name": "Todo" } },
            { "parentId": id_of(&board), "orderKey": "10", "data": { "name": "Done" } }
        ]),
    )
    .await;
    let columns = columns.as_array().unwrap().clone();
    assert_eq!(columns.len(), 3);
    // Batch responses keep request order
    assert_eq!(columns[0]["name"], json!("Doing"));

    let todo = id_of(&columns[1]);
    for (key, title) in [(3, "c"), (1, "a"), (2, "b")] {
        create(
            &writer,
            "cards",
            json!({ "parentId": todo, "orderKey": key, "data": { "title": title, "done": false } }),
        )
        .await;
    }

    // Children come back in order-key order, nested two levels deep
    let path = format!(
        "/boards/{}?expand=owner,children:columns.children:cards",
        id_of(&board)
    );
    let response = reader.get(&path).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let expanded = &body["data"]["_expanded"];
    assert_eq!(expanded["owner"]["name"], json!("Ann"));
    let names: Vec<&str> = expanded["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|column| column["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Todo", "Doing", "Done"]);
    let cards = expanded["columns"][0]["_expanded"]["cards"].as_array().unwrap();
    let titles: Vec<&str> = cards.iter().map(|c| c["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["a", "b", "c"]);
    assert_eq!(expanded["columns"][1]["_expanded"]["cards"], json!([]));

    // Each card can reach its board through parent.parent
    let response = reader
        .get(&format!("/cards?parentId={}&expand=parent.parent", todo))
        .await
        .unwrap();
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["pagination"]["count"], json!(3));
    for card in page["data"].as_array().unwrap() {
        let parent = &card["_expanded"]["parent"];
        assert_eq!(parent["name"], json!("Todo"));
        assert_eq!(parent["_expanded"]["parent"]["name"], json!("Roadmap"));
    }

    // Filter on payload fields
    let filter = "%7B%22title%22%3A%22b%22%7D";
    let response = reader
        .get(&format!("/cards?filter={}", filter))
        .await
        .unwrap();
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
    assert_eq!(page["data"][0]["title"], json!("b"));

    // Cascade removes the board, its columns and their cards
    let response = writer
        .delete(&format!("/boards/{}?cascade=true", id_of(&board)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["deleted"], json!(7));

    let response = reader.get("/cards").await.unwrap();
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["data"], json!([]));
    let response = reader.get("/people").await.unwrap();
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["pagination"]["count"], json!(1));
}

#[tokio::test]
async fn test_replace_and_merge_updates() {
    let server = spawn_server().await;
    let (_, writer) = onboard(&server, "notes").await;

    let note = create(
        &writer,
        "notes",
        json!({ "orderKey": 5, "data": { "title": "draft", "tags": ["a"] } }),
    )
    .await;
    let path = format!("/notes/{}", id_of(&note));

    let response = writer
        .patch(&path, json!({ "data": { "title": "final" } }))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["title"], json!("final"));
    assert_eq!(body["data"]["tags"], json!(["a"]));
    assert_eq!(body["data"]["order_key"], json!("5"));

    let response = writer
        .put(&path, json!({ "data": { "body": "text" } }))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["body"], json!("text"));
    assert!(body["data"].get("title").is_none());

    let response = writer.delete(&path).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = writer.get(&path).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let server = spawn_server().await;
    let (_, acme) = onboard(&server, "acme").await;
    let (_, globex) = onboard(&server, "globex").await;

    let secret = create(&acme, "docs", json!({ "data": { "secret": true } })).await;
    let path = format!("/docs/{}", id_of(&secret));

    let response = globex.get(&path).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = globex
        .patch(&path, json!({ "data": { "secret": false } }))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = globex.delete(&path).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Another tenant's item cannot be used as a parent either
    let response = globex
        .post("/docs", json!({ "parentId": id_of(&secret), "data": {} }))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = globex.get("/docs").await.unwrap();
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["data"], json!([]));

    let response = acme.get(&path).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_users_and_backup() {
    let server = spawn_server().await;
    let (reader, writer) = onboard(&server, "shop").await;

    let credentials = json!({ "email": "ann@example.com", "password": "first" });
    let response = writer.post("/_users", credentials.clone()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let user: Value = response.json().await.unwrap();
    let user_id = user["data"]["id"].as_str().unwrap().to_string();

    let response = reader.post("/_users", credentials.clone()).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = writer
        .patch(&format!("/_users/{}", user_id), json!({ "password": "second" }))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = reader.post("/_signin", credentials).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = reader
        .post(
            "/_signin",
            json!({ "email": "ann@example.com", "password": "second" }),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    create(&writer, "products", json!({ "data": { "sku": "x1" } })).await;

    let response = reader.get("/_backup").await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = writer.get("/_backup").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let backup: Value = response.json().await.unwrap();
    assert_eq!(backup["tenant"]["name"], json!("shop"));
    assert_eq!(backup["collections"]["products"][0]["data"]["sku"], json!("x1"));
    assert_eq!(backup["_users"][0]["email"], json!("ann@example.com"));

    let response = writer
        .delete(&format!("/_users/{}", user_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = writer
        .delete(&format!("/_users/{}", user_id))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
