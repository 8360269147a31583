use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::api::ClassifyRequest;

/// Turns a reply into a gesture category.
#[async_trait]
pub trait GestureClassifier: Send + Sync {
    async fn classify(&self, text: &str, labels: &[String]) -> anyhow::Result<String>;
}

/// Reply of `POST /classify`.  Only `label` is required; `labels` is
/// sent by this crate's own service but not by every implementation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifyResponse {
    pub label: String,
    #[serde(default)]
    pub scores: Vec<f32>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

/// HTTP client for the local `POST /classify` service.
pub struct GestureClient {
    http: Client,
    endpoint: Url,
}

impl GestureClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("invalid classifier URL {base_url:?}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("classify")?;
        let http = Client::builder().timeout(timeout).build()?;
        Ok(GestureClient { http, endpoint })
    }

    /// Full response including the score vector.
    pub async fn classify_full(&self, text: &str, labels: &[String]) -> anyhow::Result<ClassifyResponse> {
        let body = ClassifyRequest {
            text: text.to_string(),
            labels: labels.to_vec(),
        };
        let response = self.http
            .post(self.endpoint.clone())
            .json(&body)
            .send().await
            .with_context(|| format!("classifier unreachable at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("classifier returned {}: {}", status, text);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl GestureClassifier for GestureClient {
    async fn classify(&self, text: &str, labels: &[String]) -> anyhow::Result<String> {
        let result = self.classify_full(text, labels).await?;
        if !labels.iter().any(|l| l.trim() == result.label) {
            anyhow::bail!("classifier answered {:?}, not one of the candidates", result.label);
        }
        Ok(result.label)
    }
}
