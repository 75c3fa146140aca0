//! HTTP client for the Anthropic Messages API.
//!
//! [`MessagesApi`] is the seam the gateway talks through; [`AnthropicClient`] is
//! the reqwest implementation. Streaming responses are parsed as SSE and each
//! `data` payload decoded into a typed [`StreamEvent`]. An upstream `error`
//! event is turned into an `Err` item so callers see one failure channel.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::credentials::CredentialSet;
use crate::error::UpstreamError;
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, MessagesResponse, StreamEvent};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

pub type EventStream = BoxStream<'static, Result<StreamEvent, UpstreamError>>;

#[async_trait]
pub trait MessagesApi: Send + Sync {
    async fn create_message(
        &self,
        req: &MessagesRequest,
        credentials: &CredentialSet,
    ) -> Result<MessagesResponse, UpstreamError>;

    /// Open a streaming call. Errors before the first event (bad status,
    /// connection refused) are returned here; later ones arrive as stream items.
    async fn stream_message(
        &self,
        req: &MessagesRequest,
        credentials: &CredentialSet,
    ) -> Result<EventStream, UpstreamError>;
}

#[derive(Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    async fn send(
        &self,
        req: &MessagesRequest,
        credentials: &CredentialSet,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = self.messages_url();
        tracing::debug!(%url, model = %req.model, stream = req.stream, "POST upstream");

        let response = self
            .client
            .post(&url)
            .headers(credentials.headers().clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(req)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), body = %truncate(&body, 300), "Upstream returned an error");
        Err(classify_error_body(status.as_u16(), &body))
    }
}

#[async_trait]
impl MessagesApi for AnthropicClient {
    async fn create_message(
        &self,
        req: &MessagesRequest,
        credentials: &CredentialSet,
    ) -> Result<MessagesResponse, UpstreamError> {
        let body = self.send(req, credentials).await?.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            UpstreamError::Decode(format!(
                "failed to parse Messages response: {e}. Body: {}",
                truncate(&String::from_utf8_lossy(&body), 300)
            ))
        })
    }

    async fn stream_message(
        &self,
        req: &MessagesRequest,
        credentials: &CredentialSet,
    ) -> Result<EventStream, UpstreamError> {
        let response = self.send(req, credentials).await?;
        let events = response.bytes_stream().eventsource().map(|item| match item {
            Ok(event) => parse_event(&event.data),
            Err(e) => Err(UpstreamError::Transport(e.to_string())),
        });
        Ok(events.boxed())
    }
}

/// Decode one SSE `data` payload. An `error` event becomes an `Err`.
pub fn parse_event(data: &str) -> Result<StreamEvent, UpstreamError> {
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent::Error { error }) => Err(UpstreamError::from_stream_error(&error.error_type, error.message)),
        Ok(event) => Ok(event),
        Err(e) => Err(UpstreamError::Decode(format!(
            "unparseable stream event: {e}. Data: {}",
            truncate(data, 200)
        ))),
    }
}

fn classify_error_body(status: u16, body: &str) -> UpstreamError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("Anthropic API returned status {status}: {}", truncate(body, 500)));
    UpstreamError::from_status(status, message)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{Delta, Message, MessageContent, Role};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(stream: bool) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 64,
            system: None,
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            temperature: None,
            top_p: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream,
        }
    }

    fn message_body() -> serde_json::Value {
        json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Hello"}],
            "model": "claude-sonnet-4-5-20250929",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 3, "output_tokens": 1}
        })
    }

    #[tokio::test]
    async fn test_create_message_sends_raw_key_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-api03-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({"stream": false, "max_tokens": 64})))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = AnthropicClient::new(reqwest::Client::new(), server.uri());
        let creds = CredentialSet::new("sk-ant-api03-test").unwrap();
        let resp = client.create_message(&request(false), &creds).await.unwrap();
        assert_eq!(resp.id, "msg_1");
        assert_eq!(resp.usage.output_tokens, 1);
    }

    #[tokio::test]
    async fn test_subscription_token_uses_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("authorization", "Bearer sk-ant-oat01-test"))
            .and(header("x-app", "cli"))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = AnthropicClient::new(reqwest::Client::new(), format!("{}/", server.uri()));
        let creds = CredentialSet::new("sk-ant-oat01-test").unwrap();
        tokio_test::assert_ok!(client.create_message(&request(false), &creds).await);
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "type": "error",
                "error": {"type": "authentication_error", "message": "invalid x-api-key"}
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(reqwest::Client::new(), server.uri());
        let creds = CredentialSet::new("sk-ant-api03-bad").unwrap();
        let err = client.create_message(&request(false), &creds).await.unwrap_err();
        assert_eq!(
            err,
            UpstreamError::Unauthorized {
                message: "invalid x-api-key".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_non_json_error_body_falls_back_to_raw_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(reqwest::Client::new(), server.uri());
        let creds = CredentialSet::new("sk-ant-api03-test").unwrap();
        match client.create_message(&request(false), &creds).await {
            Err(UpstreamError::Api { status, message }) => {
                assert_eq!(status, 503);
                assert!(message.contains("upstream unavailable"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_events_are_decoded_in_order() {
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_s\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude-sonnet-4-5-20250929\",\"usage\":{\"input_tokens\":1,\"output_tokens\":0}}}\n\n",
            "event: ping\n",
            "data: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = AnthropicClient::new(reqwest::Client::new(), server.uri());
        let creds = CredentialSet::new("sk-ant-api03-test").unwrap();
        let events: Vec<_> = client
            .stream_message(&request(true), &creds)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], Ok(StreamEvent::MessageStart { message }) if message.id == "msg_s"));
        assert!(matches!(&events[1], Ok(StreamEvent::Ping)));
        assert!(matches!(
            &events[2],
            Ok(StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text }, .. }) if text == "Hi"
        ));
        assert_eq!(
            events[3],
            Err(UpstreamError::Api {
                status: 529,
                message: "Overloaded".to_string()
            })
        );
    }

    #[test]
    fn test_parse_event_auth_error() {
        let err = parse_event(r#"{"type":"error","error":{"type":"authentication_error","message":"token expired"}}"#)
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_parse_event_garbage() {
        assert!(matches!(parse_event("{not json"), Err(UpstreamError::Decode(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 100), "short");
    }
}
