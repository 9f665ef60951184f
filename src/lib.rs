//! SalesBee - WhatsApp AI 销售助理
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与启动校验
//! - **core**: 错误分类、优雅关闭
//! - **observability**: 日志初始化
//! - **cache**: TTL 缓存（进程内 / 网络 / 禁用）
//! - **store**: 客户、会话、消息、订单的持久化（SQLite / 内存）
//! - **identity** / **thread**: 客户身份与活跃会话解析
//! - **history**: 消息追加与有界历史读取
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / OpenRouter / Mock）
//! - **responder**: 提示词组装与兜底回复
//! - **order**: 从回复中提取订单并建单
//! - **channel**: 出站投递（Twilio WhatsApp）
//! - **pipeline**: 入站消息编排状态机
//! - **integrations**: Webhook 与后台只读接口
//! - **app**: 组件装配

pub mod app;
pub mod cache;
pub mod channel;
pub mod config;
pub mod core;
pub mod history;
pub mod identity;
pub mod integrations;
pub mod llm;
pub mod observability;
pub mod order;
pub mod pipeline;
pub mod responder;
pub mod store;
pub mod thread;

pub use app::{AppBuilder, AppComponents};
pub use pipeline::{InboundMessage, Pipeline, PipelineReport, Stage};
