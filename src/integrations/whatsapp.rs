//! WhatsApp（Twilio）Webhook 与后台只读接口
//!
//! - `POST /webhooks/whatsapp`：Twilio 表单（From / Body / MessageSid），后台任务处理，立即回 `OK`
//! - `GET /webhooks/whatsapp`：静态确认，不做处理
//! - `GET /`、`GET /health`：静态健康信息（非实时探测）与累计 token 用量
//! - `GET /api/*`：后台面板读取客户、会话、消息、订单

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::task::TaskTracker;

use crate::app::AppComponents;
use crate::core::StoreError;
use crate::pipeline::InboundMessage;

const SERVICE_NAME: &str = "WhatsApp AI Sales Agent";
const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// 服务状态
pub struct WhatsappState {
    pub components: AppComponents,
    /// 跟踪正在处理的消息，关闭时等待其完成
    pub tracker: TaskTracker,
}

impl WhatsappState {
    pub fn new(components: AppComponents, tracker: TaskTracker) -> Self {
        Self { components, tracker }
    }
}

/// Twilio 入站表单（只取用到的字段）
#[derive(Debug, Default, Deserialize)]
pub struct TwilioInbound {
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// 后台接口的存储错误：未找到 404，非法输入 400，其余 500
struct ApiError(StoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("Dashboard query failed: {}", self.0);
        let status = match self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

/// 创建路由
pub fn create_router(state: Arc<WhatsappState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhooks/whatsapp", get(webhook_verify).post(webhook_receive))
        .route("/api/customers", get(list_customers))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id/messages", get(conversation_messages))
        .route("/api/orders", get(list_orders))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<Arc<WhatsappState>>) -> Json<serde_json::Value> {
    let llm = &state.components.llm;
    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    Json(json!({
        "status": "healthy",
        "environment": state.components.config.app.environment,
        "services": {
            "whatsapp_api": "connected",
            "store": "connected",
            "llm": "connected",
            "cache": "connected",
        },
        "llm_usage": {
            "model": llm.model(),
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": total_tokens,
        }
    }))
}

/// GET /webhooks/whatsapp - Twilio 只用 POST，这里仅作确认
async fn webhook_verify() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "message": "Twilio uses POST for webhooks"}))
}

/// POST /webhooks/whatsapp - 接收消息，后台处理
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    Form(form): Form<TwilioInbound>,
) -> impl IntoResponse {
    let preview: String = form.body.chars().take(50).collect();
    tracing::info!(
        message_sid = %form.message_sid,
        "Received message from {}: {}",
        form.from,
        preview
    );

    if form.from.trim().is_empty() || form.body.trim().is_empty() {
        tracing::warn!(message_sid = %form.message_sid, "Empty sender or body, skipping");
    } else {
        let pipeline = state.components.pipeline.clone();
        let inbound = InboundMessage::new(form.from, form.body, form.message_sid);
        state.tracker.spawn(async move {
            pipeline.handle(&inbound).await;
        });
    }

    ([(header::CONTENT_TYPE, "text/plain")], "OK")
}

async fn list_customers(
    State(state): State<Arc<WhatsappState>>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.components.store.list_customers(q.limit()).await?))
}

async fn list_conversations(
    State(state): State<Arc<WhatsappState>>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.components.store.list_conversations(q.limit()).await?))
}

async fn conversation_messages(
    State(state): State<Arc<WhatsappState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.components.store.conversation_messages(&id).await?))
}

async fn list_orders(
    State(state): State<Arc<WhatsappState>>,
    Query(q): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.components.store.list_orders(q.limit()).await?))
}
