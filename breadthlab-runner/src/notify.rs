//! Markdown notifications to a chat webhook.
//!
//! The payload is the WeChat-Work robot format
//! (`{"msgtype": "markdown", "markdown": {"content": ...}}`); the reply's
//! `errcode` must be zero.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use breadthlab_core::data::{RetryPolicy, Retryable};

use crate::config::NotifySection;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook unreachable: {0}")]
    Network(String),

    #[error("webhook returned HTTP {status}")]
    Http { status: u16 },

    #[error("webhook rejected the message: errcode {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("failed to build webhook client: {0}")]
    Client(String),
}

impl Retryable for NotifyError {
    fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Network(_) => true,
            NotifyError::Http { status } => *status >= 500 || *status == 429,
            NotifyError::Rejected { .. } | NotifyError::Client(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
    retry: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            retry,
        })
    }

    /// Notifier for the configured webhook; `None` when no URL is set.
    pub fn from_config(config: &NotifySection) -> Result<Option<Self>, NotifyError> {
        match config.webhook_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Self::new(
                url,
                Duration::from_millis(config.timeout_ms),
                config.retry,
            )
            .map(Some),
            _ => {
                info!("no webhook configured; notification skipped");
                Ok(None)
            }
        }
    }

    pub fn send_markdown(&self, content: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "msgtype": "markdown",
            "markdown": { "content": content },
        });

        self.retry.run("webhook", |_| {
            let resp = self
                .client
                .post(&self.url)
                .json(&body)
                .send()
                .map_err(|e| NotifyError::Network(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(NotifyError::Http {
                    status: status.as_u16(),
                });
            }

            // Some receivers answer with an empty body.
            let text = resp
                .text()
                .map_err(|e| NotifyError::Network(e.to_string()))?;
            if let Ok(reply) = serde_json::from_str::<WebhookReply>(&text) {
                if reply.errcode != 0 {
                    return Err(NotifyError::Rejected {
                        code: reply.errcode,
                        message: reply.errmsg,
                    });
                }
            }
            Ok(())
        })?;

        info!(bytes = content.len(), "webhook notification sent");
        Ok(())
    }
}
