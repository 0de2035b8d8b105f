//! End-to-end: REST calls over real HTTP and live delivery over the gateway.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use kumas_api::state::AppStateInner;
use kumas_api::tokens::TokenKeys;
use kumas_db::Database;
use kumas_gateway::dispatcher::Dispatcher;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the server on a random port with an in-memory store.
async fn start_test_server() -> SocketAddr {
    let upload_dir = std::env::temp_dir().join(format!("kumas-e2e-{}", uuid::Uuid::new_v4()));
    let state = AppStateInner::new(
        Database::open_in_memory().expect("Failed to open DB"),
        Dispatcher::new(),
        TokenKeys::new("e2e-access", "e2e-refresh"),
        upload_dir,
    );
    let app = kumas_server::build_router(state, "/api");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct TestUser {
    id: i64,
    token: String,
}

async fn register_and_login(client: &reqwest::Client, addr: SocketAddr, email: &str, name: &str) -> TestUser {
    let resp = client
        .post(format!("http://{addr}/api/users"))
        .json(&json!({ "email": email, "password": "hunter2", "name": name, "gender": "M" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let id = body["result"]["id"].as_i64().unwrap();

    let resp = client
        .post(format!("http://{addr}/api/auth/login"))
        .json(&json!({ "email": email, "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let token = body["result"]["accessToken"].as_str().unwrap().to_string();

    TestUser { id, token }
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/gateway?token={token}"))
        .await
        .expect("gateway connect failed");
    ws
}

/// Next JSON text frame, or `None` if nothing arrives in time.
async fn next_event(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_message_flow_over_gateway() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();
    let u1 = register_and_login(&client, addr, "user1@kumas.dev", "heungbu").await;
    let u2 = register_and_login(&client, addr, "user2@kumas.dev", "nolbu").await;
    let u3 = register_and_login(&client, addr, "user3@kumas.dev", "dokkaebi").await;

    let mut u2_ws = connect(addr, &u2.token).await;
    let mut u3_ws = connect(addr, &u3.token).await;
    let hello = next_event(&mut u2_ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(hello["type"], "Hello");
    next_event(&mut u3_ws, Duration::from_secs(2)).await.unwrap();

    // open the chat; the target hears about it
    let resp = client
        .post(format!("http://{addr}/api/chats"))
        .bearer_auth(&u1.token)
        .json(&json!({ "targetId": u2.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let chat_id = body["result"]["id"].as_i64().unwrap();

    let announced = next_event(&mut u2_ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(announced["type"], "ChatCreate");
    assert_eq!(announced["data"]["chat"]["id"], chat_id);

    // opening again returns the same chat
    let resp = client
        .post(format!("http://{addr}/api/chats"))
        .bearer_auth(&u1.token)
        .json(&json!({ "targetId": u2.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["id"], chat_id);

    // send
    let resp = client
        .post(format!("http://{addr}/api/chats/{chat_id}/messages"))
        .bearer_auth(&u1.token)
        .json(&json!({ "content": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let message_id = body["result"]["id"].as_i64().unwrap();

    let pushed = next_event(&mut u2_ws, Duration::from_secs(2)).await.unwrap();
    assert_eq!(pushed["type"], "MessageCreate");
    assert_eq!(pushed["data"]["message"]["id"], message_id);
    assert_eq!(pushed["data"]["message"]["content"], "hi");
    assert!(next_event(&mut u3_ws, Duration::from_millis(300)).await.is_none());

    // outsiders can neither read nor write
    let resp = client
        .get(format!("http://{addr}/api/chats/{chat_id}/messages"))
        .bearer_auth(&u3.token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let resp = client
        .post(format!("http://{addr}/api/chats/{chat_id}/messages"))
        .bearer_auth(&u3.token)
        .json(&json!({ "content": "psst" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // delete, then delete again
    let url = format!("http://{addr}/api/chats/{chat_id}/messages/{message_id}");
    let resp = client.delete(&url).bearer_auth(&u1.token).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client.delete(&url).bearer_auth(&u1.token).send().await.unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .get(format!("http://{addr}/api/chats/{chat_id}/messages"))
        .bearer_auth(&u2.token)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let page = body["result"].as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["deleted"], true);
    assert!(page[0]["content"].is_null());
    assert!(page[0]["image"].is_null());
}

#[tokio::test]
async fn test_gateway_requires_valid_token() {
    let addr = start_test_server().await;

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/api/gateway?token=garbage")).await;
    assert!(result.is_err());

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/api/gateway")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_message_to_offline_member_still_succeeds() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();
    let u1 = register_and_login(&client, addr, "user1@kumas.dev", "heungbu").await;
    let u2 = register_and_login(&client, addr, "user2@kumas.dev", "nolbu").await;

    let mut ws = connect(addr, &u2.token).await;
    next_event(&mut ws, Duration::from_secs(2)).await.unwrap();
    drop(ws);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // delivery to a user with no live connection still succeeds for the sender
    let resp = client
        .post(format!("http://{addr}/api/chats"))
        .bearer_auth(&u1.token)
        .json(&json!({ "targetId": u2.id }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let chat_id = body["result"]["id"].as_i64().unwrap();

    let resp = client
        .post(format!("http://{addr}/api/chats/{chat_id}/messages"))
        .bearer_auth(&u1.token)
        .json(&json!({ "content": "anyone?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}
