//! HTTP 接口测试：用 tower oneshot 直接驱动 Router

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{FaultyStore, RecordingChannel};
use salesbee::cache::DisabledCache;
use salesbee::config::AppConfig;
use salesbee::integrations::whatsapp::{create_router, WhatsappState};
use salesbee::llm::MockLlmClient;
use salesbee::store::Store;
use salesbee::AppBuilder;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    tracker: TaskTracker,
    store: Arc<FaultyStore>,
    channel: Arc<RecordingChannel>,
}

async fn test_app() -> TestApp {
    let mut config = AppConfig::default();
    config.app.environment = "test".into();

    let store = Arc::new(FaultyStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let components = AppBuilder::new(config)
        .with_store(store.clone())
        .with_cache(Arc::new(DisabledCache))
        .with_llm(Arc::new(MockLlmClient::replying("Welcome to the shop!")))
        .with_channel(channel.clone())
        .with_system_prompt("You are SalesBot.")
        .build()
        .await
        .unwrap();

    let tracker = TaskTracker::new();
    let router = create_router(Arc::new(WhatsappState::new(components, tracker.clone())));
    TestApp {
        router,
        tracker,
        store,
        channel,
    }
}

fn form_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/whatsapp")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = test_app().await;

    let resp = app.router.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "healthy");

    let resp = app.router.oneshot(get("/health")).await.unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["environment"], "test");
    assert_eq!(body["services"]["whatsapp_api"], "connected");
    assert_eq!(body["services"]["store"], "connected");
    assert_eq!(body["llm_usage"]["model"], "mock");
    assert_eq!(body["llm_usage"]["total_tokens"], 0);
}

#[tokio::test]
async fn test_health_reports_token_usage_after_a_message() {
    let app = test_app().await;
    app.router
        .clone()
        .oneshot(form_request("From=whatsapp%3A%2B1555&Body=Hi+there&MessageSid=SM5"))
        .await
        .unwrap();
    app.tracker.close();
    app.tracker.wait().await;

    let body = json_body(app.router.oneshot(get("/health")).await.unwrap()).await;
    // "Welcome to the shop!" 按空白分词
    assert_eq!(body["llm_usage"]["completion_tokens"], 4);
    let prompt = body["llm_usage"]["prompt_tokens"].as_u64().unwrap();
    assert!(prompt > 0);
    assert_eq!(body["llm_usage"]["total_tokens"].as_u64().unwrap(), prompt + 4);
}

#[tokio::test]
async fn test_get_webhook_is_static_ack() {
    let app = test_app().await;
    let resp = app.router.oneshot(get("/webhooks/whatsapp")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "ok");
    assert_eq!(app.store.inner.counts().await, (0, 0, 0, 0));
}

#[tokio::test]
async fn test_post_webhook_acks_and_processes() {
    let app = test_app().await;

    let resp = app
        .router
        .oneshot(form_request(
            "From=whatsapp%3A%2B254712345678&Body=Hi&MessageSid=SM123&AccountSid=AC1",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");

    app.tracker.close();
    app.tracker.wait().await;

    assert_eq!(app.store.inner.counts().await, (1, 1, 2, 0));
    assert_eq!(
        app.channel.sent(),
        vec![("+254712345678".to_string(), "Welcome to the shop!".to_string())]
    );
}

#[tokio::test]
async fn test_post_webhook_acks_even_when_store_fails() {
    let app = test_app().await;
    app.store.fail_on("find_customer");

    let resp = app
        .router
        .oneshot(form_request("From=whatsapp%3A%2B1555&Body=Hi&MessageSid=SM1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    app.tracker.close();
    app.tracker.wait().await;
    assert_eq!(app.channel.sent().len(), 1);
}

#[tokio::test]
async fn test_empty_body_is_skipped() {
    let app = test_app().await;

    let resp = app
        .router
        .oneshot(form_request("From=whatsapp%3A%2B1555&Body=&MessageSid=SM1"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    app.tracker.close();
    app.tracker.wait().await;
    assert_eq!(app.store.inner.counts().await, (0, 0, 0, 0));
    assert!(app.channel.sent().is_empty());
}

#[tokio::test]
async fn test_dashboard_lists() {
    let app = test_app().await;
    app.router
        .clone()
        .oneshot(form_request("From=whatsapp%3A%2B1555&Body=Hi&MessageSid=SM1"))
        .await
        .unwrap();
    app.tracker.close();
    app.tracker.wait().await;

    let customers = json_body(app.router.clone().oneshot(get("/api/customers")).await.unwrap()).await;
    assert_eq!(customers.as_array().unwrap().len(), 1);
    assert_eq!(customers[0]["whatsapp_number"], "+1555");

    let conversations =
        json_body(app.router.clone().oneshot(get("/api/conversations?limit=5")).await.unwrap()).await;
    let conversation_id = conversations[0]["id"].as_str().unwrap().to_string();
    assert_eq!(conversations[0]["status"], "active");

    let uri = format!("/api/conversations/{}/messages", conversation_id);
    let messages = json_body(app.router.clone().oneshot(get(&uri)).await.unwrap()).await;
    let directions: Vec<_> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["direction"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(directions, vec!["inbound", "outbound"]);

    let orders = json_body(app.router.oneshot(get("/api/orders")).await.unwrap()).await;
    assert!(orders.as_array().unwrap().is_empty());
    assert!(app.store.list_orders(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dashboard_store_error_is_500() {
    let app = test_app().await;
    app.store.fail_on("list");

    let resp = app.router.oneshot(get("/api/customers")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("injected"));
}
