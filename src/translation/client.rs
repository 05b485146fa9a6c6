//! Online translation provider client.

use crate::config::TranslationConfig;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single translation request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// Transient failure (connection, timeout, 5xx, rate limit); worth retrying.
    #[error("Network error: {0}")]
    Network(String),

    /// Permanent failure (unsupported language, bad request, malformed reply).
    #[error("Provider error: {0}")]
    Provider(String),
}

impl TranslateError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranslateError::Network(_))
    }
}

impl From<TranslateError> for AppError {
    fn from(e: TranslateError) -> Self {
        match e {
            TranslateError::Network(msg) => AppError::Network(msg),
            TranslateError::Provider(msg) => AppError::Provider(msg),
        }
    }
}

/// A translation backend.
pub trait Translator: Send + Sync + 'static {
    /// Translate `text` into `target_lang`.
    fn translate(
        &self,
        text: &str,
        target_lang: &str,
    ) -> impl Future<Output = std::result::Result<String, TranslateError>> + Send;
}

/// Check a BCP-47-ish language code: `fr`, `deu`, `pt-BR`, `zh-Hant`.
pub fn validate_language(lang: &str) -> std::result::Result<(), TranslateError> {
    let mut parts = lang.splitn(2, '-');
    let primary = parts.next().unwrap_or("");
    let primary_ok = (2..=3).contains(&primary.len()) && primary.bytes().all(|b| b.is_ascii_alphabetic());
    let region_ok = parts
        .next()
        .is_none_or(|r| (2..=8).contains(&r.len()) && r.bytes().all(|b| b.is_ascii_alphanumeric()));

    if primary_ok && region_ok {
        Ok(())
    } else {
        Err(TranslateError::Provider(format!(
            "Unsupported language code: {:?}",
            lang
        )))
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Client for a LibreTranslate-compatible HTTP endpoint.
#[derive(Clone, Debug)]
pub struct HttpTranslator {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpTranslator {
    /// Create a client from configuration.
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        tracing::debug!(endpoint = %config.endpoint, "creating HttpTranslator");

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }
}

impl Translator for HttpTranslator {
    #[tracing::instrument(level = "debug", skip(self, text), fields(chars = text.len()))]
    async fn translate(
        &self,
        text: &str,
        target_lang: &str,
    ) -> std::result::Result<String, TranslateError> {
        let body = TranslateRequest {
            q: text,
            source: "auto",
            target: target_lang,
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslateError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TranslateError::Network(format!("Provider returned {}", status)));
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(TranslateError::Provider(format!("{}: {}", status, detail.trim())));
        }

        let parsed: TranslateResponse = resp
            .json()
            .await
            .map_err(|e| TranslateError::Provider(format!("Malformed response: {}", e)))?;
        Ok(parsed.translated_text)
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Cap for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TranslationConfig::default())
    }
}

impl From<&TranslationConfig> for RetryPolicy {
    fn from(config: &TranslationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Wraps a translator with validation and bounded retries.
pub struct RetryingTranslator<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Translator> RetryingTranslator<T> {
    /// Wrap `inner` with the given policy.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped translator.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Translator> Translator for RetryingTranslator<T> {
    async fn translate(
        &self,
        text: &str,
        target_lang: &str,
    ) -> std::result::Result<String, TranslateError> {
        validate_language(target_lang)?;
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let mut attempt = 1;
        loop {
            match self.inner.translate(text, target_lang).await {
                Ok(translated) => return Ok(translated),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::debug!(attempt, delay = ?delay, error = %e, "Retrying translation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(attempt, lang = target_lang, error = %e, "Translation failed");
                    return Err(e);
                }
            }
        }
    }
}
