//! REST API module
//!
//! This module handles the durable side of the chat backend including:
//! - Fetching the full message list of a conversation
//! - Persisting a new message and returning the confirmed copy
//! - Listing the user's conversations with their latest message
//!
//! Every call carries the bearer token. A `401` answer maps to
//! `Error::Unauthorized` so the caller can invalidate its session.

use crate::storage::{Chat, Message};
use crate::{Error, Result};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use tracing::{debug, warn};

/// Durable message store as seen by the session
///
/// Implemented by `RestClient`; tests substitute in-memory fakes.
pub trait ChatApi: Send + Sync + 'static {
    /// All messages of a conversation, in server order
    fn fetch_messages(&self, chat_id: &str) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Persist a message and return the server-confirmed copy
    fn send_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// Conversations of the local user
    fn fetch_conversations(&self) -> impl Future<Output = Result<Vec<Chat>>> + Send;
}

/// `ChatApi` over HTTP
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl RestClient {
    /// Create a client for the given API base URL (e.g. `http://localhost:5000/api`)
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("API base URL '{}' cannot hold paths", base_url)));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
        })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append percent-encoded path segments to the base URL
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("API base URL '{}' cannot hold paths", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Map the status line, then decode the JSON body
    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("API answered 401 for {}", response.url());
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            let url = response.url().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{} answered {}: {}", url, status, body.trim())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Protocol(format!("Response is not JSON: {}", e)))
    }

    async fn get_list<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Vec<T>> {
        let url = self.endpoint(segments)?;
        debug!("GET {}", url);

        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let body = Self::read_json(response).await?;
        Ok(decode_list(body, segments.join("/").as_str()))
    }
}

/// Decode an array body entry by entry
///
/// A non-array body yields an empty list; entries that fail to decode are
/// skipped. Both are logged.
fn decode_list<T: DeserializeOwned>(body: Value, what: &str) -> Vec<T> {
    let entries = match body {
        Value::Array(entries) => entries,
        other => {
            warn!("Expected a list from {}, got {}", what, kind_of(&other));
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed entry {} from {}: {}", index, what, e);
                None
            }
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl ChatApi for RestClient {
    async fn fetch_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.get_list(&["conversations", chat_id, "messages"]).await
    }

    async fn send_message(&self, chat_id: &str, content: &str) -> Result<Message> {
        let url = self.endpoint(&["messages"])?;
        debug!("POST {} for conversation {}", url, chat_id);

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({ "content": content, "chatId": chat_id }))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        serde_json::from_value(body)
            .map_err(|e| Error::Protocol(format!("Confirmed message is malformed: {}", e)))
    }

    async fn fetch_conversations(&self) -> Result<Vec<Chat>> {
        self.get_list(&["conversations"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_and_encodes_segments() {
        let client = RestClient::new("http://localhost:5000/api/", "t").expect("Failed to create client");

        let url = client
            .endpoint(&["conversations", "c 1/x", "messages"])
            .expect("Failed to build endpoint");
        assert_eq!(url.as_str(), "http://localhost:5000/api/conversations/c%201%2Fx/messages");

        let client = RestClient::new("http://localhost:5000/api", "t").expect("Failed to create client");
        let url = client.endpoint(&["messages"]).expect("Failed to build endpoint");
        assert_eq!(url.as_str(), "http://localhost:5000/api/messages");
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(RestClient::new("not a url", "t"), Err(Error::Config(_))));
        assert!(matches!(RestClient::new("mailto:a@b.lk", "t"), Err(Error::Config(_))));
    }

    #[test]
    fn test_decode_list_skips_bad_entries() {
        let body = serde_json::json!([
            {"_id": "m1", "content": "a", "sender": "u1", "chat": "c1", "createdAt": "2024-03-01T10:00:00Z"},
            {"_id": "m2"},
            {"_id": "m3", "content": "c", "sender": "u2", "chat": "c1", "createdAt": "2024-03-01T10:01:00Z"}
        ]);

        let messages: Vec<Message> = decode_list(body, "test");
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[test]
    fn test_decode_list_non_array_is_empty() {
        let messages: Vec<Message> = decode_list(serde_json::json!({"error": "nope"}), "test");
        assert!(messages.is_empty());
    }
}
