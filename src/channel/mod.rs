//! 消息渠道：出站投递
//!
//! `Channel` 只负责把文本（可附媒体）发给某个地址并返回投递 ID；失败即 DeliveryError，
//! 是否重试由调用方决定（pipeline 不重试）。

pub mod twilio;

use async_trait::async_trait;

use crate::core::DeliveryError;
use crate::identity::CHANNEL_PREFIX;

pub use twilio::TwilioChannel;

#[async_trait]
pub trait Channel: Send + Sync {
    /// 发送文本，返回投递 ID
    async fn send_text(&self, to: &str, body: &str) -> Result<String, DeliveryError>;

    /// 发送带媒体的消息（body 作为说明文字）
    async fn send_media(&self, to: &str, body: &str, media_url: &str)
        -> Result<String, DeliveryError>;

    fn name(&self) -> &str;
}

/// 确保地址带渠道前缀
pub fn with_channel_prefix(address: &str) -> String {
    let address = address.trim();
    if address.starts_with(CHANNEL_PREFIX) {
        address.to_string()
    } else {
        format!("{}{}", CHANNEL_PREFIX, address)
    }
}

/// 按字符数切分（不会切断多字节字符）
pub fn split_body(body: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || body.chars().count() <= max_chars {
        return vec![body.to_string()];
    }
    body.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}
