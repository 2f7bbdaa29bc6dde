//! Telegram Bot API transport.
//!
//! Files go out through `sendDocument` as a streamed multipart upload so the
//! progress tracker sees every chunk. Targets are resolved with `getChat`.
//! Pointing `api_url` at a self-hosted Bot API server lifts the 50 MB cap of
//! the public endpoint.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use relay_core::DeliveryTarget;
use tokio::io::{AsyncRead, ReadBuf};

use crate::caption::truncate_caption;
use crate::progress::ProgressTracker;
use crate::traits::{DeliveryError, DeliveryTransport, Upload};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Marker Telegram puts in the description when a file reference went stale.
const FILE_REFERENCE_EXPIRED: &str = "FILE_REFERENCE_EXPIRED";

/// Sends files via the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramTransport {
    bot_token: String,
    api_url: String,
    client: reqwest::Client,
}

impl TelegramTransport {
    /// Creates a new `TelegramTransport` from configuration values.
    ///
    /// If `bot_token` starts with `${`, the value between `${` and `}` is
    /// resolved as an environment variable name. Returns
    /// [`DeliveryError::Config`] if the token is empty or the env var is missing.
    pub fn from_config(bot_token: String, api_url: String) -> Result<Self, DeliveryError> {
        let resolved_token = if bot_token.starts_with("${") {
            let var_name = bot_token
                .strip_prefix("${")
                .and_then(|s| s.strip_suffix('}'))
                .ok_or_else(|| {
                    DeliveryError::Config(format!("Malformed env var reference: {bot_token}"))
                })?;
            std::env::var(var_name).map_err(|_| {
                DeliveryError::Config(format!("Environment variable '{var_name}' is not set"))
            })?
        } else {
            bot_token
        };

        if resolved_token.is_empty() {
            return Err(DeliveryError::Config(
                "Telegram bot token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            bot_token: resolved_token,
            api_url: api_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, DeliveryError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let resp_body: serde_json::Value = response.json().await?;
        interpret_response(status, resp_body)
    }

    /// Returns the bot's username via `getMe`.
    pub async fn identify(&self) -> Result<String, DeliveryError> {
        let me = self.call("getMe", serde_json::json!({})).await?;
        let username = me
            .get("username")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| me.get("id").map(|v| v.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Ok(username)
    }
}

/// Map a Bot API response to its `result` or a typed error.
pub(crate) fn interpret_response(
    status: u16,
    body: serde_json::Value,
) -> Result<serde_json::Value, DeliveryError> {
    if body.get("ok") == Some(&serde_json::Value::Bool(true)) {
        return Ok(body
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null));
    }

    let description = body
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Telegram API error");

    if description.to_uppercase().contains(FILE_REFERENCE_EXPIRED) {
        return Err(DeliveryError::FileReferenceExpired);
    }

    // Handle rate limiting (HTTP 429).
    if status == 429 {
        let retry_after = body
            .get("parameters")
            .and_then(|p| p.get("retry_after"))
            .and_then(|v| v.as_u64())
            .unwrap_or(30);
        return Err(DeliveryError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    let code = body
        .get("error_code")
        .and_then(|v| v.as_i64())
        .unwrap_or(status as i64);

    Err(DeliveryError::Api {
        code,
        description: description.to_string(),
    })
}

/// Numeric ids go to the API as integers, everything else as a string.
fn chat_id_value(channel: &str) -> serde_json::Value {
    let trimmed = channel.trim();
    match trimmed.parse::<i64>() {
        Ok(id) => serde_json::Value::from(id),
        Err(_) => serde_json::Value::String(trimmed.to_string()),
    }
}

fn parse_chat(chat: &serde_json::Value) -> Option<DeliveryTarget> {
    Some(DeliveryTarget {
        chat_id: chat.get("id")?.as_i64()?,
        title: chat.get("title").and_then(|v| v.as_str()).map(str::to_string),
        username: chat
            .get("username")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[async_trait::async_trait]
impl DeliveryTransport for TelegramTransport {
    async fn resolve_target(&self, channel: &str) -> Result<DeliveryTarget, DeliveryError> {
        let chat = match self
            .call("getChat", serde_json::json!({ "chat_id": chat_id_value(channel) }))
            .await
        {
            Ok(chat) => chat,
            Err(DeliveryError::Api { description, .. }) => {
                return Err(DeliveryError::TargetNotFound(format!(
                    "{channel}: {description}"
                )));
            }
            Err(e) => return Err(e),
        };

        parse_chat(&chat).ok_or_else(|| {
            DeliveryError::TargetNotFound(format!("{channel}: malformed getChat response"))
        })
    }

    async fn send_file(
        &self,
        target: &DeliveryTarget,
        upload: &Upload,
        progress: &ProgressTracker,
    ) -> Result<(), DeliveryError> {
        let file = tokio::fs::File::open(&upload.path).await?;
        let stream = ProgressStream {
            file,
            buf: vec![0u8; UPLOAD_CHUNK_BYTES],
            progress: progress.clone(),
        };

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            upload.size_bytes,
        )
        .file_name(upload.file_name.clone());

        let form = reqwest::multipart::Form::new()
            .text("chat_id", target.chat_id.to_string())
            .text("caption", truncate_caption(&upload.caption).to_string())
            .part("document", part);

        tracing::debug!(
            chat_id = target.chat_id,
            file = %upload.file_name,
            bytes = upload.size_bytes,
            "Sending Telegram document"
        );

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let resp_body: serde_json::Value = response.json().await?;
        interpret_response(status, resp_body)?;

        tracing::info!(chat_id = target.chat_id, file = %upload.file_name, "Telegram document sent");
        Ok(())
    }

    fn transport_name(&self) -> &str {
        "telegram"
    }
}

/// File body that reports each chunk it hands to the HTTP client.
struct ProgressStream {
    file: tokio::fs::File,
    buf: Vec<u8>,
    progress: ProgressTracker,
}

impl Stream for ProgressStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut read_buf = ReadBuf::new(&mut this.buf);
        match Pin::new(&mut this.file).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    return Poll::Ready(None);
                }
                let chunk = Bytes::copy_from_slice(filled);
                this.progress.advance(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
        }
    }
}
