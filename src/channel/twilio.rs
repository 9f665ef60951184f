//! Twilio WhatsApp 渠道
//!
//! `POST {api_base}/Accounts/{sid}/Messages.json`，表单字段 From / To / Body / MediaUrl，Basic 鉴权。
//! 响应 JSON 中的 `sid` 即投递 ID。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{split_body, with_channel_prefix, Channel};
use crate::config::ChannelSection;
use crate::core::{ConfigError, DeliveryError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

pub struct TwilioChannel {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    max_body_chars: usize,
}

impl TwilioChannel {
    pub fn new(
        api_base: &str,
        account_sid: &str,
        auth_token: &str,
        from_number: &str,
        max_body_chars: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
            from_number: with_channel_prefix(from_number),
            max_body_chars,
        }
    }

    pub fn from_config(cfg: &ChannelSection) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        if cfg.account_sid.is_none() {
            missing.push("channel.account_sid".to_string());
        }
        if cfg.auth_token.is_none() {
            missing.push("channel.auth_token".to_string());
        }
        if cfg.from_number.is_none() {
            missing.push("channel.from_number".to_string());
        }
        match (&cfg.account_sid, &cfg.auth_token, &cfg.from_number) {
            (Some(sid), Some(token), Some(from)) => Ok(Self::new(
                &cfg.api_base,
                sid,
                token,
                from,
                cfg.max_body_chars,
            )),
            _ => Err(ConfigError::Missing(missing)),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", self.api_base, self.account_sid)
    }

    async fn post(&self, to: &str, body: &str, media_url: Option<&str>) -> Result<String, DeliveryError> {
        let mut form = vec![
            ("From", self.from_number.as_str()),
            ("To", to),
            ("Body", body),
        ];
        if let Some(url) = media_url {
            form.push(("MediaUrl", url));
        }

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let resource: MessageResource = resp
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(format!("invalid response: {}", e)))?;
        Ok(resource.sid)
    }
}

#[async_trait]
impl Channel for TwilioChannel {
    async fn send_text(&self, to: &str, body: &str) -> Result<String, DeliveryError> {
        let to = with_channel_prefix(to);
        let mut last_sid = String::new();
        for chunk in split_body(body, self.max_body_chars) {
            last_sid = self.post(&to, &chunk, None).await?;
        }
        tracing::info!("Message sent to {}: SID {}", to, last_sid);
        Ok(last_sid)
    }

    async fn send_media(&self, to: &str, body: &str, media_url: &str) -> Result<String, DeliveryError> {
        let to = with_channel_prefix(to);
        let sid = self.post(&to, body, Some(media_url)).await?;
        tracing::info!("Media message sent to {}: SID {}", to, sid);
        Ok(sid)
    }

    fn name(&self) -> &str {
        "twilio"
    }
}
