//! Webhooks – Benachrichtigung externer Endpunkte bei `publish`
//!
//! Jeder Webhook eines Topics bekommt pro Nachricht einen POST mit
//! `{topic, message}`. Zustellung ist best effort: Fehler werden geloggt,
//! der Absender merkt davon nichts.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};

/// Nutzlast eines Webhook-POST
#[derive(Debug, Clone, Serialize)]
pub struct WebhookNachricht {
    pub topic: String,
    pub message: String,
}

/// Registrierte Webhooks, indiziert nach Topic
#[derive(Clone)]
pub struct Webhooks {
    inner: Arc<WebhooksInner>,
}

struct WebhooksInner {
    http: reqwest::Client,
    hooks: DashMap<String, Vec<reqwest::Url>>,
}

impl Webhooks {
    pub fn neu(timeout: Duration) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::intern(format!("HTTP-Client: {e}")))?;
        Ok(Self {
            inner: Arc::new(WebhooksInner {
                http,
                hooks: DashMap::new(),
            }),
        })
    }

    /// Registriert einen Webhook fuer ein Topic
    ///
    /// Nur `http`/`https`-URLs werden angenommen; doppelte Eintraege nicht.
    pub fn registrieren(&self, topic: &str, webhook: &str) -> RelayResult<()> {
        if topic.trim().is_empty() {
            return Err(RelayError::parameter("topic fehlt"));
        }
        let url = reqwest::Url::parse(webhook)
            .map_err(|e| RelayError::parameter(format!("webhook ist keine URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::parameter(format!(
                "webhook-Schema nicht unterstuetzt: {}",
                url.scheme()
            )));
        }

        let mut urls = self.inner.hooks.entry(topic.to_string()).or_default();
        if !urls.contains(&url) {
            tracing::info!(topic = %topic, webhook = %url, "Webhook registriert");
            urls.push(url);
        }
        Ok(())
    }

    /// Webhooks eines Topics
    pub fn fuer_topic(&self, topic: &str) -> Vec<reqwest::Url> {
        self.inner
            .hooks
            .get(topic)
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    /// Startet je Webhook des Topics einen POST im Hintergrund
    ///
    /// Gibt die Anzahl gestarteter Zustellungen zurueck.
    pub fn benachrichtigen(&self, topic: &str, message: &str) -> usize {
        let urls = self.fuer_topic(topic);
        for url in &urls {
            let http = self.inner.http.clone();
            let url = url.clone();
            let nutzlast = WebhookNachricht {
                topic: topic.to_string(),
                message: message.to_string(),
            };
            tokio::spawn(async move {
                match http.post(url.clone()).json(&nutzlast).send().await {
                    Ok(antwort) if antwort.status().is_success() => {
                        tracing::debug!(webhook = %url, "Webhook zugestellt");
                    }
                    Ok(antwort) => {
                        tracing::warn!(webhook = %url, status = %antwort.status(), "Webhook abgelehnt");
                    }
                    Err(e) => {
                        tracing::warn!(webhook = %url, fehler = %e, "Webhook nicht erreichbar");
                    }
                }
            });
        }
        urls.len()
    }
}
