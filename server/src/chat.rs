//! Gemini chat proxy
//!
//! Builds the conversation (farming system prompt, acknowledgement, the
//! last few history turns, the new message) and extracts the first
//! candidate's text from the reply.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_MODEL: &str = "gemini-2.0-flash";

/// History turns forwarded upstream
pub const HISTORY_LIMIT: usize = 6;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const SYSTEM_PROMPT: &str = "You are GeoCrop AI Assistant, a helpful farming and agriculture expert. You help farmers with:
- Crop recommendations based on soil and weather conditions
- Pest and disease identification and treatment
- Irrigation and water management advice
- Fertilizer recommendations
- Seasonal planting guides
- Weather impact on crops
- Soil health improvement tips
- Market trends and crop pricing

Keep responses concise, practical, and farmer-friendly. Use simple language.
If asked about non-farming topics, politely redirect to agriculture-related help.
Format responses with bullet points when listing multiple items.
Include emojis occasionally to make responses engaging.";

const ACKNOWLEDGEMENT: &str =
    "I understand. I am GeoCrop AI Assistant, ready to help with farming and agriculture questions.";

#[derive(Error, Debug)]
pub enum ChatError {
    /// Upstream refused the key (403 or a key reported as leaked)
    #[error("API key issue. Please contact administrator to update the Gemini API key.")]
    KeyRejected,

    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("No response generated")]
    EmptyReply,

    #[error("Request timed out. Please try again.")]
    Timeout,

    #[error("{0}")]
    Request(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Request(err.to_string())
        }
    }
}

/// One prior turn as sent by the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

/// Conversation sent to Gemini
///
/// `assistant` turns become `model`; every other role is sent as `user`.
pub fn build_contents(history: &[ChatMessage], message: &str) -> Vec<Content> {
    let mut contents = vec![
        Content::new("user", SYSTEM_PROMPT),
        Content::new("model", ACKNOWLEDGEMENT),
    ];

    let recent = &history[history.len().saturating_sub(HISTORY_LIMIT)..];
    for turn in recent {
        let role = if turn.role == "assistant" { "model" } else { "user" };
        contents.push(Content::new(role, &turn.content));
    }

    contents.push(Content::new("user", message));
    contents
}

/// Text of the first part of the first candidate, if non-empty
pub fn extract_reply(response: &Value) -> Option<String> {
    response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Map a failed upstream response to an error
pub fn upstream_error(status: u16, body: &Value) -> ChatError {
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("API request failed")
        .to_string();

    if status == StatusCode::FORBIDDEN.as_u16() || message.to_lowercase().contains("leaked") {
        ChatError::KeyRejected
    } else {
        ChatError::Upstream { status, message }
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// `None` when no key is configured
    pub fn new(api_key: Option<String>) -> Result<Option<Self>, ChatError> {
        let Some(api_key) = api_key.filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Some(Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            model: GEMINI_MODEL.to_string(),
        }))
    }

    pub async fn chat(&self, history: &[ChatMessage], message: &str) -> Result<String, ChatError> {
        let url = format!(
            "{}/v1/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({
            "contents": build_contents(history, message),
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 1024
            }
        });

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let err = upstream_error(status.as_u16(), &value);
            error!("Gemini API error: {} - {}", status, err);
            return Err(err);
        }

        extract_reply(&value).ok_or(ChatError::EmptyReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.into(),
            content: content.into(),
        }
    }

    #[test]
    fn test_build_contents_keeps_last_six_turns() {
        let history: Vec<_> = (0..8)
            .map(|i| turn(if i % 2 == 0 { "user" } else { "assistant" }, &format!("m{}", i)))
            .collect();

        let contents = build_contents(&history, "When should I sow wheat?");

        assert_eq!(contents.len(), 2 + 6 + 1);
        assert_eq!(contents[0].parts[0].text, SYSTEM_PROMPT);
        assert_eq!(contents[1].role, "model");
        assert_eq!(contents[2].parts[0].text, "m2");
        assert_eq!(contents[2].role, "user");
        assert_eq!(contents[3].role, "model");
        assert_eq!(contents[8].parts[0].text, "When should I sow wheat?");
    }

    #[test]
    fn test_unknown_roles_are_sent_as_user() {
        let contents = build_contents(&[turn("system", "hi")], "x");
        assert_eq!(contents[2].role, "user");
    }

    #[test]
    fn test_extract_reply() {
        let reply = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Sow in November." }] } }]
        });
        assert_eq!(extract_reply(&reply).as_deref(), Some("Sow in November."));

        assert_eq!(extract_reply(&json!({ "candidates": [] })), None);
        let empty = json!({ "candidates": [{ "content": { "parts": [{ "text": "" }] } }] });
        assert_eq!(extract_reply(&empty), None);
    }

    #[test]
    fn test_upstream_error_mapping() {
        assert!(matches!(
            upstream_error(403, &Value::Null),
            ChatError::KeyRejected
        ));

        let leaked = json!({ "error": { "message": "Your API key was reported as leaked." } });
        assert!(matches!(upstream_error(400, &leaked), ChatError::KeyRejected));

        let quota = json!({ "error": { "message": "Quota exceeded" } });
        match upstream_error(429, &quota) {
            ChatError::Upstream { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Quota exceeded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_client_requires_key() {
        assert!(GeminiClient::new(None).unwrap().is_none());
        assert!(GeminiClient::new(Some(String::new())).unwrap().is_none());
    }
}
