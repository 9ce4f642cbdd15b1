//! Provider backed by an OpenAI-compatible `chat/completions` endpoint.
//!
//! Requests are always sent with `"stream": true`; the Server-Sent Events
//! reply is decoded into a [`TextStream`] of content deltas.
//!
//! SSE format: `data: {"choices":[{"delta":{"content":"Hel"}}]}\n\n`,
//! terminated by `data: [DONE]`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    ChatMessage, ChatModel, ChatProvider, ModelSelector, ProviderError, RequestOptions, TextStream,
};

/// A [`ChatProvider`] serving a fixed catalog of model ids from one vendor.
///
/// Each model's family is its id, so a selector family of `gpt-4o` resolves
/// the `gpt-4o` entry.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    vendor: String,
    models: Vec<String>,
}

impl OpenAiCompatProvider {
    pub const CAPABILITY_NAME: &'static str = "openai-compatible";

    /// Builds a provider for `{base_url}/chat/completions`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Transport`] if the HTTP client cannot be initialised.
    pub fn new(
        base_url: &str,
        vendor: impl Into<String>,
        models: Vec<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lmbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            token: None,
            vendor: vendor.into(),
            models,
        })
    }

    /// Sets the bearer token sent with every request.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn capability_name(&self) -> &str {
        Self::CAPABILITY_NAME
    }

    async fn select_model(
        &self,
        selector: &ModelSelector,
    ) -> Result<Option<Arc<dyn ChatModel>>, ProviderError> {
        let found = self
            .models
            .iter()
            .find(|id| selector.matches(&self.vendor, id));

        Ok(found.map(|id| {
            Arc::new(OpenAiCompatModel {
                client: self.client.clone(),
                endpoint: self.endpoint.clone(),
                token: self.token.clone(),
                id: id.clone(),
                vendor: self.vendor.clone(),
            }) as Arc<dyn ChatModel>
        }))
    }
}

struct OpenAiCompatModel {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    id: String,
    vendor: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[async_trait]
impl ChatModel for OpenAiCompatModel {
    fn id(&self) -> &str {
        &self.id
    }

    fn vendor(&self) -> &str {
        &self.vendor
    }

    fn family(&self) -> &str {
        &self.id
    }

    async fn send(
        &self,
        messages: Vec<ChatMessage>,
        _options: RequestOptions,
        cancel: CancellationToken,
    ) -> Result<TextStream, ProviderError> {
        let body = CompletionRequest {
            model: &self.id,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: "user",
                    content: &m.content,
                })
                .collect(),
            stream: true,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        debug!(model = %self.id, endpoint = %self.endpoint, "sending completion request");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let err = ProviderError::language_model(
                error_code(status),
                format!("{} returned HTTP {}", self.endpoint, status.as_u16()),
            );
            let detail = detail.trim();
            return Err(if detail.is_empty() {
                err
            } else {
                err.with_cause(detail)
            });
        }

        Ok(text_fragments(response.bytes_stream(), cancel))
    }
}

/// Maps an upstream HTTP status onto a language-model error code.
fn error_code(status: reqwest::StatusCode) -> &'static str {
    match status.as_u16() {
        401 | 403 => "NoPermissions",
        404 => "NotFound",
        429 => "Blocked",
        _ => "Unknown",
    }
}

/// Line buffer that yields the payload of each complete `data:` line.
#[derive(Default)]
struct SseDecoder {
    buf: BytesMut,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_data(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                return Some(data.trim_start().to_owned());
            }
            // Comments, `event:` and blank separator lines carry no text.
        }
        None
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    message: String,
}

fn fragment_from(data: &str) -> Result<Option<String>, ProviderError> {
    let chunk: CompletionChunk = serde_json::from_str(data)?;

    if let Some(err) = chunk.error {
        let code = match err.code {
            Some(serde_json::Value::String(code)) => code,
            Some(other) => other.to_string(),
            None => "Unknown".to_owned(),
        };
        return Err(ProviderError::language_model(code, err.message));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .collect();
    Ok(Some(text).filter(|t| !t.is_empty()))
}

struct SseState {
    bytes: futures_util::stream::BoxStream<'static, Result<Bytes, ProviderError>>,
    decoder: SseDecoder,
    done: bool,
}

/// Turns an SSE byte stream into text fragments, stopping at `[DONE]`, the
/// first error, end of input, or cancellation.
fn text_fragments<S, E>(bytes: S, cancel: CancellationToken) -> TextStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ProviderError>,
{
    let state = SseState {
        bytes: bytes.map(|item| item.map_err(Into::into)).boxed(),
        decoder: SseDecoder::default(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            if let Some(data) = st.decoder.next_data() {
                if data == "[DONE]" {
                    return None;
                }
                match fragment_from(&data) {
                    Ok(Some(text)) => return Some((Ok(text), st)),
                    Ok(None) => continue,
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => return None,
            }
        }
    })
    .take_until(cancel.cancelled_owned())
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        parts: &[&'static str],
    ) -> impl Stream<Item = Result<Bytes, ProviderError>> + Send + 'static {
        let parts: Vec<_> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        futures_util::stream::iter(parts)
    }

    async fn collect(stream: TextStream) -> Vec<Result<String, ProviderError>> {
        stream.collect().await
    }

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            "http://127.0.0.1:9/v1/",
            "copilot",
            vec!["gpt-4o".into(), "gpt-4o-mini".into()],
        )
        .unwrap()
    }

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(provider().endpoint(), "http://127.0.0.1:9/v1/chat/completions");
    }

    #[test]
    fn blank_token_is_dropped() {
        assert!(provider().with_token(Some("  ".into())).token.is_none());
        assert_eq!(
            provider().with_token(Some("ghp_x".into())).token.as_deref(),
            Some("ghp_x")
        );
    }

    #[tokio::test]
    async fn selects_from_catalog() {
        let provider = provider();
        let model = provider
            .select_model(&ModelSelector::new("copilot", "gpt-4o-mini"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(model.id(), "gpt-4o-mini");
        assert_eq!(model.vendor(), "copilot");
        assert_eq!(model.family(), "gpt-4o-mini");

        let missing = provider
            .select_model(&ModelSelector::new("copilot", "o1-preview"))
            .await
            .unwrap();
        assert!(missing.is_none());

        let wrong_vendor = provider
            .select_model(&ModelSelector::new("anthropic", "gpt-4o"))
            .await
            .unwrap();
        assert!(wrong_vendor.is_none());
    }

    #[tokio::test]
    async fn send_honours_prior_cancellation() {
        let provider = provider();
        let model = provider
            .select_model(&ModelSelector::default())
            .await
            .unwrap()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = model
            .send(vec![ChatMessage::user("hi")], RequestOptions::default(), cancel)
            .await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[test]
    fn status_codes_map_to_error_codes() {
        assert_eq!(error_code(reqwest::StatusCode::UNAUTHORIZED), "NoPermissions");
        assert_eq!(error_code(reqwest::StatusCode::FORBIDDEN), "NoPermissions");
        assert_eq!(error_code(reqwest::StatusCode::NOT_FOUND), "NotFound");
        assert_eq!(error_code(reqwest::StatusCode::TOO_MANY_REQUESTS), "Blocked");
        assert_eq!(error_code(reqwest::StatusCode::BAD_GATEWAY), "Unknown");
    }

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        decoder.push(b": keep-alive\n\ndata: {\"a\"");
        assert_eq!(decoder.next_data(), None);
        decoder.push(b":1}\r\n\r\ndata:[DONE]\n");
        assert_eq!(decoder.next_data().as_deref(), Some("{\"a\":1}"));
        assert_eq!(decoder.next_data().as_deref(), Some("[DONE]"));
        assert_eq!(decoder.next_data(), None);
    }

    #[tokio::test]
    async fn fragments_arrive_in_order() {
        let bytes = byte_stream(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);
        let out: Vec<String> = collect(text_fragments(bytes, CancellationToken::new()))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(out, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn streamed_error_event_is_a_language_model_error() {
        let bytes = byte_stream(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n",
            "data: {\"error\":{\"code\":\"content_filter\",\"message\":\"filtered\"}}\n\n",
        ]);
        let out = collect(text_fragments(bytes, CancellationToken::new())).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_deref().unwrap(), "par");
        assert!(matches!(
            &out[1],
            Err(ProviderError::LanguageModel { code, message, .. })
                if code == "content_filter" && message == "filtered"
        ));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_decode_error() {
        let bytes = byte_stream(&["data: {not json}\n\n"]);
        let out = collect(text_fragments(bytes, CancellationToken::new())).await;
        assert!(matches!(out.as_slice(), [Err(ProviderError::Decode(_))]));
    }

    #[tokio::test]
    async fn cancellation_truncates_stream() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let bytes = byte_stream(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"]);
        let out = collect(text_fragments(bytes, cancel)).await;
        assert!(out.is_empty());
    }
}
