//! Gemini `generateContent` REST client.
//!
//! One blocking request per turn, the whole conversation is resent each
//! time:
//!
//! ```text
//!  ShowRunner                       Gemini
//!  ──────────  ──POST──────────▶  ┌──────────────────────────────┐
//!   history    systemInstruction   │ /v1beta/models/{m}           │
//!              + contents[]        │      :generateContent        │
//!  ◀── reply ─ candidates[0] ───── └──────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{ Deserialize, Serialize };
use std::time::Duration;
use tracing::debug;

// ═══════════════════════════════════════════════════════════════════════
//  Conversation model
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// System instruction plus the alternating user/model history.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub system: Option<String>,
    pub turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new(system: impl Into<String>) -> Self {
        let system = system.into();
        Conversation {
            system: if system.trim().is_empty() {
                None
            } else {
                Some(system)
            },
            turns: Vec::new(),
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: ChatRole::User,
            content: text.into(),
        });
    }

    pub fn push_model(&mut self, text: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: ChatRole::Model,
            content: text.into(),
        });
    }

    /// Drop the most recent turn (used when the LLM call failed).
    pub fn pop_last(&mut self) -> Option<ChatTurn> {
        self.turns.pop()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Anything that can continue a conversation with one reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn reply(&self, conversation: &Conversation) -> anyhow::Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
//  Wire types
// ═══════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<ChatRole>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl<'a> GenerateRequest<'a> {
    fn from_conversation(conversation: &'a Conversation) -> Self {
        GenerateRequest {
            system_instruction: conversation.system.as_deref().map(|s| Content {
                role: None,
                parts: vec![Part { text: s }],
            }),
            contents: conversation.turns
                .iter()
                .map(|t| Content {
                    role: Some(t.role),
                    parts: vec![Part { text: &t.content }],
                })
                .collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Client
// ═══════════════════════════════════════════════════════════════════════

pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(GeminiClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn reply(&self, conversation: &Conversation) -> anyhow::Result<String> {
        if conversation.is_empty() {
            anyhow::bail!("conversation has no turns");
        }
        let body = GenerateRequest::from_conversation(conversation);

        let response = self.http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send().await
            .map_err(|e| anyhow::anyhow!("Gemini request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini returned {}: {}", status, text);
        }

        let parsed: GenerateResponse = response.json().await?;
        let reply: String = parsed.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c|
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect()
            )
            .unwrap_or_default();
        let reply = reply.trim().to_string();

        debug!(model = %self.model, turns = conversation.len(), len = reply.len(), "Gemini reply");

        if reply.is_empty() {
            anyhow::bail!("Gemini returned no text");
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn conversation() -> Conversation {
        let mut c = Conversation::new("You are a pilot.");
        c.push_user("How do planes fly?");
        c
    }

    #[tokio::test]
    async fn test_reply_joins_parts_and_trims() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-test:generateContent")
                .header("x-goog-api-key", "k")
                .json_body(
                    json!({
                    "systemInstruction": {"parts": [{"text": "You are a pilot."}]},
                    "contents": [{"role": "user", "parts": [{"text": "How do planes fly?"}]}]
                })
                );
            then.status(200).json_body(
                json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"text": " Mostly "}, {"text": "optimism. "}
                ]}}]
            })
            );
        }).await;

        let client = GeminiClient::new(server.base_url(), "gemini-test", "k").unwrap();
        let reply = client.reply(&conversation()).await.unwrap();
        mock.assert_async().await;
        assert_eq!(reply, "Mostly optimism.");
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST);
            then.status(429).body("quota exhausted");
        }).await;

        let client = GeminiClient::new(server.base_url(), "m", "k").unwrap();
        let err = client.reply(&conversation()).await.unwrap_err();
        assert!(err.to_string().contains("quota exhausted"), "{err}");
    }

    #[tokio::test]
    async fn test_empty_candidates_is_error() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({"candidates": []}));
        }).await;

        let client = GeminiClient::new(server.base_url(), "m", "k").unwrap();
        assert!(client.reply(&conversation()).await.is_err());
    }

    #[test]
    fn test_history_roles_serialize_lowercase() {
        let mut c = Conversation::new("");
        c.push_user("hi");
        c.push_model("hello");
        let body = serde_json::to_value(GenerateRequest::from_conversation(&c)).unwrap();
        assert!(body.get("systemInstruction").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn test_pop_last() {
        let mut c = conversation();
        assert_eq!(c.pop_last().unwrap().role, ChatRole::User);
        assert!(c.is_empty());
    }
}
