//! Telegram gateway — Bot API actions plus the long-poll event source.
//!
//! Actions (`editMessageText`, `deleteMessage`, `forwardMessage`,
//! `copyMessage`) are plain JSON POSTs with a bounded request timeout.
//! The event source long-polls `getUpdates` for `channel_post` /
//! `edited_channel_post`, filters to the configured channels, and surfaces
//! the result as a stream of `MessageEvent`s.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::pipeline::types::{ChannelId, EventKind, MessageEvent};

/// Bounded wait for platform action calls.
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Long-poll window for getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Backoff after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Stream of observed channel posts.
pub type EventStream = UnboundedReceiverStream<MessageEvent>;

/// Telegram gateway — connects to the Bot API.
pub struct TelegramGateway {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramGateway {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// POST one Bot API method and classify any failure.
    async fn call(
        &self,
        channel: &ChannelId,
        message_id: i64,
        method: &str,
        body: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .timeout(ACTION_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status().as_u16();
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Other(format!("{method} returned unparseable body: {e}")))?;

        if data
            .get("ok")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(());
        }

        Err(classify_api(channel, message_id, status, &data))
    }

    /// Verify the bot token against `getMe`.
    pub async fn health_check(&self) -> Result<(), GatewayError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .timeout(ACTION_TIMEOUT)
            .send()
            .await
            .map_err(classify_transport)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::Other(format!(
                "getMe returned {}",
                resp.status()
            )))
        }
    }

    /// Start long-polling for posts in the given channels.
    ///
    /// The poll loop runs until the returned stream is dropped. Poll
    /// failures back off and retry; they never end the loop.
    pub fn updates(&self, channels: Vec<ChannelId>) -> EventStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = self.api_url("getUpdates");
        let monitored: Vec<(ChannelId, String)> = channels
            .into_iter()
            .map(|c| {
                let norm = normalize_channel(c.as_str());
                (c, norm)
            })
            .collect();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            info!(
                channels = monitored.len(),
                "Telegram gateway polling for channel posts"
            );

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["channel_post", "edited_channel_post"],
                });

                let resp = match client
                    .post(&url)
                    .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
                    .json(&body)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    warn!("Telegram getUpdates returned no result array");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    let Some(event) = event_from_update(update, &monitored) else {
                        continue;
                    };

                    debug!(
                        channel = %event.channel,
                        message_id = event.message_id,
                        kind = event.kind.label(),
                        "Observed channel post"
                    );

                    if tx.send(event).is_err() {
                        info!("Event consumer dropped; stopping Telegram poll loop");
                        return;
                    }
                }
            }
        });

        UnboundedReceiverStream::new(rx)
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn edit_message(
        &self,
        channel: &ChannelId,
        message_id: i64,
        text: &str,
    ) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "chat_id": chat_ref(channel),
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        self.call(channel, message_id, "editMessageText", body).await
    }

    async fn delete_message(
        &self,
        channel: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "chat_id": chat_ref(channel),
            "message_id": message_id,
        });
        self.call(channel, message_id, "deleteMessage", body).await
    }

    async fn forward_message(
        &self,
        from: &ChannelId,
        to: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "chat_id": chat_ref(to),
            "from_chat_id": chat_ref(from),
            "message_id": message_id,
        });
        self.call(from, message_id, "forwardMessage", body).await
    }

    async fn copy_message(
        &self,
        from: &ChannelId,
        to: &ChannelId,
        message_id: i64,
    ) -> Result<(), GatewayError> {
        let body = serde_json::json!({
            "chat_id": chat_ref(to),
            "from_chat_id": chat_ref(from),
            "message_id": message_id,
        });
        self.call(from, message_id, "copyMessage", body).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Bot API accepts numeric chat ids as numbers and usernames as strings.
fn chat_ref(channel: &ChannelId) -> serde_json::Value {
    match channel.as_str().parse::<i64>() {
        Ok(n) => serde_json::json!(n),
        Err(_) => serde_json::json!(channel.as_str()),
    }
}

/// Configured channel string → comparable form (`@` stripped, lowercased).
fn normalize_channel(id: &str) -> String {
    id.trim().trim_start_matches('@').to_lowercase()
}

fn classify_transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout {
            timeout: ACTION_TIMEOUT,
        }
    } else {
        GatewayError::Other(e.to_string())
    }
}

/// Map a Bot API error response onto the gateway classification.
fn classify_api(
    channel: &ChannelId,
    message_id: i64,
    status: u16,
    body: &serde_json::Value,
) -> GatewayError {
    let code = body
        .get("error_code")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(status as u64);
    let description = body
        .get("description")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    match code {
        429 => {
            let retry_after = body
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(serde_json::Value::as_u64)
                .map(Duration::from_secs);
            GatewayError::RateLimited {
                channel: channel.to_string(),
                retry_after,
            }
        }
        403 => GatewayError::Forbidden {
            channel: channel.to_string(),
            reason: description,
        },
        404 => GatewayError::NotFound {
            channel: channel.to_string(),
            message_id,
        },
        _ if description.to_lowercase().contains("not found") => GatewayError::NotFound {
            channel: channel.to_string(),
            message_id,
        },
        _ => GatewayError::Other(format!("[{code}] {description}")),
    }
}

/// Map one getUpdates entry to a `MessageEvent` for a monitored channel.
///
/// Non-text posts and posts in unmonitored chats yield `None`. The event
/// carries the channel identity in its configured form.
fn event_from_update(
    update: &serde_json::Value,
    monitored: &[(ChannelId, String)],
) -> Option<MessageEvent> {
    let (msg, kind) = if let Some(m) = update.get("channel_post") {
        (m, EventKind::New)
    } else if let Some(m) = update.get("edited_channel_post") {
        (m, EventKind::Edited)
    } else {
        return None;
    };

    let chat = msg.get("chat")?;
    let username = chat
        .get("username")
        .and_then(serde_json::Value::as_str)
        .map(str::to_lowercase);
    let chat_id = chat
        .get("id")
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string());

    let channel = monitored
        .iter()
        .find(|(_, norm)| {
            username.as_deref() == Some(norm.as_str()) || chat_id.as_deref() == Some(norm.as_str())
        })
        .map(|(c, _)| c.clone())?;

    let message_id = msg.get("message_id").and_then(serde_json::Value::as_i64)?;
    let text = msg.get("text").and_then(serde_json::Value::as_str)?;
    let received_at = msg
        .get("date")
        .and_then(serde_json::Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    Some(MessageEvent {
        channel,
        message_id,
        text: text.to_string(),
        received_at,
        kind,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn monitored(ids: &[&str]) -> Vec<(ChannelId, String)> {
        ids.iter()
            .map(|id| (ChannelId::from(*id), normalize_channel(id)))
            .collect()
    }

    #[test]
    fn api_url_embeds_token_and_method() {
        let gw = TelegramGateway::new(SecretString::from("123:ABC"));
        assert_eq!(
            gw.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
        assert_eq!(
            gw.api_url("editMessageText"),
            "https://api.telegram.org/bot123:ABC/editMessageText"
        );
    }

    #[test]
    fn chat_ref_numeric_vs_username() {
        assert_eq!(chat_ref(&ChannelId::from("-1001234")), serde_json::json!(-1001234));
        assert_eq!(chat_ref(&ChannelId::from("@shop")), serde_json::json!("@shop"));
    }

    #[test]
    fn normalize_strips_at_and_case() {
        assert_eq!(normalize_channel("@Shop"), "shop");
        assert_eq!(normalize_channel("  @shop "), "shop");
        assert_eq!(normalize_channel("-1001234"), "-1001234");
    }

    // ── Error classification ────────────────────────────────────────

    #[test]
    fn classify_rate_limited_with_retry_after() {
        let body = serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 7",
            "parameters": {"retry_after": 7}
        });
        let err = classify_api(&ChannelId::from("@shop"), 1, 429, &body);
        match err {
            GatewayError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn classify_forbidden() {
        let body = serde_json::json!({
            "ok": false,
            "error_code": 403,
            "description": "Forbidden: bot is not a member of the channel"
        });
        let err = classify_api(&ChannelId::from("@shop"), 1, 403, &body);
        assert_eq!(err.kind(), "forbidden");
    }

    #[test]
    fn classify_not_found_by_description() {
        let body = serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: message to delete not found"
        });
        let err = classify_api(&ChannelId::from("@shop"), 7, 400, &body);
        assert!(err.is_not_found());
    }

    #[test]
    fn classify_other_keeps_description() {
        let body = serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: message is not modified"
        });
        let err = classify_api(&ChannelId::from("@shop"), 7, 400, &body);
        assert_eq!(err.kind(), "other");
        assert!(err.to_string().contains("message is not modified"));
    }

    #[test]
    fn classify_falls_back_to_http_status() {
        let body = serde_json::json!({"ok": false});
        let err = classify_api(&ChannelId::from("@shop"), 7, 404, &body);
        assert!(err.is_not_found());
    }

    // ── Update mapping ──────────────────────────────────────────────

    fn channel_post_update(chat: serde_json::Value, edited: bool) -> serde_json::Value {
        let msg = serde_json::json!({
            "message_id": 42,
            "chat": chat,
            "date": 1722500000,
            "text": "🛒 SKU-42 new item"
        });
        if edited {
            serde_json::json!({"update_id": 100, "edited_channel_post": msg})
        } else {
            serde_json::json!({"update_id": 100, "channel_post": msg})
        }
    }

    #[test]
    fn maps_channel_post_to_new_event() {
        let update = channel_post_update(
            serde_json::json!({"id": -1001, "username": "shop", "type": "channel"}),
            false,
        );
        let event = event_from_update(&update, &monitored(&["@shop"])).unwrap();
        assert_eq!(event.channel, ChannelId::from("@shop"));
        assert_eq!(event.message_id, 42);
        assert_eq!(event.kind, EventKind::New);
        assert_eq!(event.text, "🛒 SKU-42 new item");
        assert_eq!(event.received_at.timestamp(), 1722500000);
    }

    #[test]
    fn maps_edited_channel_post_to_edited_event() {
        let update = channel_post_update(
            serde_json::json!({"id": -1001, "username": "shop", "type": "channel"}),
            true,
        );
        let event = event_from_update(&update, &monitored(&["@shop"])).unwrap();
        assert_eq!(event.kind, EventKind::Edited);
    }

    #[test]
    fn matches_channel_by_numeric_id() {
        let update = channel_post_update(
            serde_json::json!({"id": -1001234, "type": "channel"}),
            false,
        );
        let event = event_from_update(&update, &monitored(&["-1001234"])).unwrap();
        assert_eq!(event.channel, ChannelId::from("-1001234"));
    }

    #[test]
    fn ignores_unmonitored_channel() {
        let update = channel_post_update(
            serde_json::json!({"id": -9, "username": "other", "type": "channel"}),
            false,
        );
        assert!(event_from_update(&update, &monitored(&["@shop"])).is_none());
    }

    #[test]
    fn ignores_non_text_post() {
        let update = serde_json::json!({
            "update_id": 100,
            "channel_post": {
                "message_id": 42,
                "chat": {"id": -1001, "username": "shop"},
                "date": 1722500000,
                "photo": []
            }
        });
        assert!(event_from_update(&update, &monitored(&["@shop"])).is_none());
    }

    #[test]
    fn ignores_non_channel_update() {
        let update = serde_json::json!({
            "update_id": 100,
            "message": {
                "message_id": 42,
                "chat": {"id": 5, "username": "shop"},
                "date": 1722500000,
                "text": "dm"
            }
        });
        assert!(event_from_update(&update, &monitored(&["@shop"])).is_none());
    }

    // ── Network error paths (no server behind the fake token) ───────

    #[tokio::test]
    async fn edit_against_unreachable_api_classifies_as_gateway_error() {
        let gw = TelegramGateway::new(SecretString::from("fake-token"));
        let result = gw
            .edit_message(&ChannelId::from("@shop"), 1, "text")
            .await;
        assert!(result.is_err());
    }
}
