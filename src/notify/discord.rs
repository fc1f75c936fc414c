use super::{Notifier, OperatorAlert};
use crate::article::{truncate_chars, Article};
use crate::delivery::DeliverySink;
use crate::resilience::Severity;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Discord incoming-webhook client. Used both for article delivery and for
/// operator alerts (usually with two different webhook URLs).
#[derive(Clone)]
pub struct DiscordWebhook {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordWebhook {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn post(&self, payload: &WebhookPayload) -> Result<()> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("Discord webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("Discord webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[async_trait]
impl Notifier for DiscordWebhook {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn notify(&self, alert: &OperatorAlert) -> Result<()> {
        let mut description = alert.message.clone();
        for (k, v) in &alert.fields {
            description.push_str(&format!("\n**{k}:** {v}"));
        }
        let content = alert.is_urgent().then(|| "@here".to_string());
        let embed = Embed {
            title: truncate_chars(&alert.title, 256),
            description: truncate_chars(&description, 4000),
            url: None,
            color: Some(severity_color(alert.severity)),
            timestamp: Some(alert.timestamp.to_rfc3339()),
            footer: Some(Footer {
                text: format!("severity: {}", alert.severity),
            }),
        };
        self.post(&WebhookPayload {
            content,
            embeds: vec![embed],
        })
        .await
    }
}

#[async_trait]
impl DeliverySink for DiscordWebhook {
    async fn deliver(&self, article: &Article) -> Result<()> {
        let mut footer = article.source.clone();
        if let Some(score) = article.relevance_score {
            footer.push_str(&format!(" · relevance {score}"));
        }
        let embed = Embed {
            title: truncate_chars(&article.title, 256),
            description: truncate_chars(&article.description, 300),
            url: (!article.link.is_empty()).then(|| article.link.clone()),
            color: Some(0x5865F2),
            timestamp: Some(article.published_at.to_rfc3339()),
            footer: Some(Footer { text: footer }),
        };
        self.post(&WebhookPayload {
            content: None,
            embeds: vec![embed],
        })
        .await
    }

    async fn notice(&self, text: &str) -> Result<()> {
        self.post(&WebhookPayload {
            content: Some(text.to_string()),
            embeds: Vec::new(),
        })
        .await
    }
}

fn severity_color(s: Severity) -> u32 {
    match s {
        Severity::Low => 0x95A5A6,
        Severity::Medium => 0xF1C40F,
        Severity::High => 0xE67E22,
        Severity::Critical => 0xE74C3C,
    }
}

#[derive(Serialize)]
struct Footer {
    text: String,
}

#[derive(Serialize)]
struct Embed {
    title: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<Footer>,
}

#[derive(Serialize)]
struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    embeds: Vec<Embed>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article() -> Article {
        Article {
            title: "OpenAI ships a new model".into(),
            link: "https://news.test/a".into(),
            description: "Details".into(),
            published_at: Utc::now(),
            author: String::new(),
            categories: vec![],
            source: "News".into(),
            origin_url: "https://news.test/rss".into(),
            relevance_score: Some(40),
        }
    }

    #[tokio::test]
    async fn delivers_article_as_embed() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "embeds": [{"title": "OpenAI ships a new model", "url": "https://news.test/a"}]
            })))
            .with_status(204)
            .create_async()
            .await;

        let hook = DiscordWebhook::new(format!("{}/hook", server.url()));
        hook.deliver(&article()).await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let hook = DiscordWebhook::new(format!("{}/hook", server.url())).with_retries(2);
        let err = hook.notice("No matching articles found.").await.unwrap_err();
        assert!(err.to_string().contains("HTTP error"));
        m.assert_async().await;
    }
}
