//! The gateway: admits an inbound Chat Completions call, translates it, forwards
//! it upstream and translates the answer back.
//!
//! Each call is one sequential flow. The only shared mutable state is the
//! credential snapshot in [`CredentialStore`]. A call may refresh that snapshot
//! and retry at most once, and only when the upstream rejected the credential.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;

use crate::client::{EventStream, MessagesApi};
use crate::config::ProxyConfig;
use crate::credentials::{CredentialSet, CredentialStore};
use crate::error::{GatewayError, ProxyError, Result, UpstreamError};
use crate::logging::{LogLevel, SharedLogger};
use crate::models;
use crate::translate::anthropic_types::MessagesRequest;
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse, ModelList,
};
use crate::translate::request::openai_to_anthropic;
use crate::translate::response::anthropic_to_openai;
use crate::translate::streaming::StreamTranslator;

/// One item of the outbound SSE body.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Chunk(ChatCompletionChunk),
    /// Terminal error chunk; always followed by [`SseFrame::Done`].
    Error(ChatErrorResponse),
    Done,
}

impl SseFrame {
    /// The `data:` payload for this frame.
    pub fn data(&self) -> String {
        match self {
            SseFrame::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
            SseFrame::Error(err) => serde_json::to_string(err).unwrap_or_default(),
            SseFrame::Done => "[DONE]".to_string(),
        }
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = SseFrame> + Send>>;

pub enum Completion {
    Json(ChatCompletionResponse),
    Stream(SseStream),
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Json(resp) => f.debug_tuple("Json").field(resp).finish(),
            Completion::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    default_model: Arc<str>,
    aliases: Arc<HashMap<String, String>>,
    local_token: Arc<str>,
    credentials: CredentialStore,
    upstream: Arc<dyn MessagesApi>,
    logger: SharedLogger,
}

impl Gateway {
    /// Fails if the config has no local token; callers generate one first.
    pub fn new(
        config: &ProxyConfig,
        credentials: CredentialStore,
        upstream: Arc<dyn MessagesApi>,
        logger: SharedLogger,
    ) -> Result<Self> {
        let local_token = config
            .local_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProxyError::config("local_token is not set"))?;

        Ok(Self {
            default_model: Arc::from(config.default_model.as_str()),
            aliases: Arc::new(config.models.clone()),
            local_token: Arc::from(local_token),
            credentials,
            upstream,
            logger,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_configured()
    }

    pub fn list_models(&self) -> ModelList {
        models::list_models()
    }

    /// Check that an upstream credential exists, then that the caller presented
    /// the local token. Returns the credential snapshot the call will use.
    pub fn admit(&self, authorization: Option<&str>) -> std::result::Result<Arc<CredentialSet>, GatewayError> {
        // A login made after startup is picked up here without a restart.
        let credentials = self
            .credentials
            .current()
            .or_else(|| self.credentials.refresh().ok())
            .ok_or(GatewayError::NotConfigured)?;

        let token = authorization
            .map(bearer_token)
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::MissingApiKey)?;
        if token != &*self.local_token {
            return Err(GatewayError::InvalidApiKey);
        }

        Ok(credentials)
    }

    pub async fn handle_chat_completion(
        &self,
        body: &[u8],
        authorization: Option<&str>,
    ) -> std::result::Result<Completion, GatewayError> {
        let credentials = self.admit(authorization)?;

        let request: ChatCompletionRequest =
            serde_json::from_slice(body).map_err(|e| GatewayError::InvalidJson(e.to_string()))?;
        let upstream_request = openai_to_anthropic(&request, self.aliases.as_ref(), &self.default_model);

        let request_id = new_request_id();
        tracing::info!(
            %request_id,
            model = %request.model,
            upstream_model = %upstream_request.model,
            stream = upstream_request.stream,
            messages = upstream_request.messages.len(),
            "Chat completion"
        );
        self.logger.request(
            LogLevel::Info,
            "gateway",
            &request_id,
            "chat completion",
            Some(json!({
                "model": request.model,
                "upstream_model": upstream_request.model,
                "stream": upstream_request.stream,
                "messages": upstream_request.messages.len(),
                "tools": upstream_request.tools.as_ref().map_or(0, Vec::len),
            })),
        );

        if upstream_request.stream {
            self.open_stream(upstream_request, credentials, request_id)
                .await
                .map(Completion::Stream)
        } else {
            self.complete(&upstream_request, &credentials, &request_id)
                .await
                .map(Completion::Json)
        }
    }

    async fn complete(
        &self,
        request: &MessagesRequest,
        credentials: &CredentialSet,
        request_id: &str,
    ) -> std::result::Result<ChatCompletionResponse, GatewayError> {
        let response = match self.upstream.create_message(request, credentials).await {
            Err(e) if e.is_auth() => {
                let refreshed = self.refresh_credentials(&e, request_id)?;
                self.upstream.create_message(request, &refreshed).await
            }
            other => other,
        }
        .map_err(|e| self.upstream_failure(e, request_id))?;

        tracing::info!(
            %request_id,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Completed"
        );
        self.logger.request(
            LogLevel::Info,
            "gateway",
            request_id,
            "completed",
            Some(json!({
                "input_tokens": response.usage.input_tokens,
                "output_tokens": response.usage.output_tokens,
            })),
        );

        Ok(anthropic_to_openai(&response, chrono::Utc::now().timestamp()))
    }

    async fn open_stream(
        &self,
        request: MessagesRequest,
        credentials: Arc<CredentialSet>,
        request_id: String,
    ) -> std::result::Result<SseStream, GatewayError> {
        let (events, retried) = match self.upstream.stream_message(&request, &credentials).await {
            Ok(events) => (events, false),
            Err(e) if e.is_auth() => {
                let refreshed = self.refresh_credentials(&e, &request_id)?;
                let events = self
                    .upstream
                    .stream_message(&request, &refreshed)
                    .await
                    .map_err(|e| self.upstream_failure(e, &request_id))?;
                (events, true)
            }
            Err(e) => return Err(self.upstream_failure(e, &request_id)),
        };

        Ok(Box::pin(self.clone().relay(request, events, retried, request_id)))
    }

    /// Forward translated chunks as they arrive. Owns the upstream stream, so
    /// dropping the returned stream aborts the upstream request.
    ///
    /// A mid-stream auth failure reopens the stream only while nothing has been
    /// forwarded. `message_start` already yields the role chunk, so a failure
    /// after it ends the stream with an error chunk instead of replaying output.
    fn relay(
        self,
        request: MessagesRequest,
        mut events: EventStream,
        mut retried: bool,
        request_id: String,
    ) -> impl Stream<Item = SseFrame> + Send + 'static {
        async_stream::stream! {
            let mut guard = CancelGuard::new(request_id.clone(), self.logger.clone());
            let mut translator = StreamTranslator::new();

            loop {
                match events.next().await {
                    Some(Ok(event)) => {
                        if let Some(chunk) = translator.process_event(&event) {
                            guard.forwarded += 1;
                            yield SseFrame::Chunk(chunk);
                        }
                    }
                    Some(Err(e)) if e.is_auth() && guard.forwarded == 0 && !retried => {
                        retried = true;
                        let reopened = match self.refresh_credentials(&e, &request_id) {
                            Ok(refreshed) => self
                                .upstream
                                .stream_message(&request, &refreshed)
                                .await
                                .map_err(|e| e.to_string()),
                            Err(e) => Err(e.to_string()),
                        };
                        match reopened {
                            Ok(fresh) => {
                                events = fresh;
                                translator = StreamTranslator::new();
                            }
                            Err(message) => {
                                self.stream_failure(&request_id, &message);
                                yield SseFrame::Error(ChatErrorResponse::stream_error(message));
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let message = e.to_string();
                        self.stream_failure(&request_id, &message);
                        yield SseFrame::Error(ChatErrorResponse::stream_error(message));
                        break;
                    }
                    None => break,
                }
            }

            guard.finish(translator.tool_call_count());
            yield SseFrame::Done;
        }
    }

    /// Swap in a freshly loaded credential after the upstream rejected ours.
    fn refresh_credentials(
        &self,
        cause: &UpstreamError,
        request_id: &str,
    ) -> std::result::Result<Arc<CredentialSet>, GatewayError> {
        tracing::warn!(%request_id, error = %cause, "Upstream rejected credential, refreshing");
        match self.credentials.refresh() {
            Ok(refreshed) => {
                self.logger.request(
                    LogLevel::Info,
                    "credentials",
                    request_id,
                    "credential refreshed",
                    Some(json!({"kind": refreshed.kind().to_string()})),
                );
                Ok(refreshed)
            }
            Err(e) => {
                tracing::error!(%request_id, error = %e, "Credential refresh failed");
                self.logger.request(LogLevel::Error, "credentials", request_id, e.to_string(), None);
                Err(GatewayError::UpstreamAuth)
            }
        }
    }

    fn upstream_failure(&self, error: UpstreamError, request_id: &str) -> GatewayError {
        tracing::warn!(%request_id, %error, "Upstream call failed");
        self.logger
            .request(LogLevel::Warn, "gateway", request_id, error.to_string(), None);
        error.into()
    }

    fn stream_failure(&self, request_id: &str, message: &str) {
        tracing::warn!(%request_id, error = %message, "Stream failed");
        self.logger
            .request(LogLevel::Warn, "stream", request_id, message, None);
    }
}

/// Logs a stream that was dropped before it finished.
struct CancelGuard {
    request_id: String,
    logger: SharedLogger,
    forwarded: usize,
    finished: bool,
}

impl CancelGuard {
    fn new(request_id: String, logger: SharedLogger) -> Self {
        Self {
            request_id,
            logger,
            forwarded: 0,
            finished: false,
        }
    }

    fn finish(&mut self, tool_calls: u32) {
        self.finished = true;
        tracing::info!(request_id = %self.request_id, chunks = self.forwarded, tool_calls, "Stream completed");
        self.logger.request(
            LogLevel::Info,
            "stream",
            &self.request_id,
            "stream completed",
            Some(json!({"chunks": self.forwarded, "tool_calls": tool_calls})),
        );
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(request_id = %self.request_id, chunks = self.forwarded, "Client disconnected, upstream request aborted");
            self.logger.request(
                LogLevel::Info,
                "stream",
                &self.request_id,
                "client disconnected",
                Some(json!({"chunks": self.forwarded})),
            );
        }
    }
}

/// Strip a case-insensitive `Bearer` scheme. A bare scheme yields an empty token.
fn bearer_token(header: &str) -> &str {
    let header = header.trim_start();
    match header.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer") => {
            let rest = &header[6..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest.trim()
            } else {
                header.trim_end()
            }
        }
        _ => header.trim_end(),
    }
}

fn new_request_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{}", &uuid[..12])
}
