//! The relay: one prompt in, one [`RelayResult`] out.
//!
//! [`Relay::run`] resolves a model, submits the messages, concatenates the
//! streamed fragments and folds every failure into
//! [`RelayResult::Failure`]. Both the CLI and the HTTP route serialize the
//! result directly.

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{
    ChatMessage, ChatModel, ChatProvider, ModelSelector, ProviderError, RequestOptions,
};

/// A prompt to relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Overrides the configured model family for this request only.
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// The `error` field of a failed result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No model matched the selector.
    ModelUnavailable,
    /// The HTTP body could not be decoded.
    InvalidRequest,
    /// Anything that was not a structured language-model error.
    Unknown,
    /// A code reported by the model service, passed through verbatim.
    Host(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ModelUnavailable => "copilot_not_available",
            Self::InvalidRequest => "invalid_request",
            Self::Unknown => "unknown_error",
            Self::Host(code) => code,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSuccess {
    pub content: String,
    pub model: String,
    pub vendor: String,
    pub family: String,
    pub uses_premium_requests: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatFailure {
    pub error: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Outcome of a relay call, serialized with a leading `success` flag:
///
/// ```json
/// {"success":true,"content":"…","model":"…","vendor":"…","family":"…","uses_premium_requests":true}
/// {"success":false,"error":"…","message":"…","cause":"…"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResult {
    Success(ChatSuccess),
    Failure(ChatFailure),
}

impl RelayResult {
    pub fn failure(error: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure(ChatFailure {
            error,
            message: message.into(),
            cause: None,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<ProviderError> for RelayResult {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::LanguageModel {
                code,
                message,
                cause,
            } => Self::Failure(ChatFailure {
                error: ErrorKind::Host(code),
                message,
                cause,
            }),
            other => Self::failure(ErrorKind::Unknown, other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    success: bool,
    #[serde(flatten)]
    body: &'a T,
}

impl Serialize for RelayResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(body) => Tagged {
                success: true,
                body,
            }
            .serialize(serializer),
            Self::Failure(body) => Tagged {
                success: false,
                body,
            }
            .serialize(serializer),
        }
    }
}

/// Forwards prompts to the first model matching a selector.
pub struct Relay {
    provider: Arc<dyn ChatProvider>,
    selector: ModelSelector,
}

impl Relay {
    pub fn new(provider: Arc<dyn ChatProvider>, selector: ModelSelector) -> Self {
        Self { provider, selector }
    }

    pub fn provider(&self) -> &dyn ChatProvider {
        self.provider.as_ref()
    }

    /// Relays `request` and returns a result for every outcome.
    pub async fn run(&self, request: &ChatRequest) -> RelayResult {
        let selector = match request.model.as_deref().filter(|m| !m.trim().is_empty()) {
            Some(family) => self.selector.with_family(family),
            None => self.selector.clone(),
        };

        let model = match self.provider.select_model(&selector).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                warn!(%selector, "no matching chat model");
                return RelayResult::failure(
                    ErrorKind::ModelUnavailable,
                    format!(
                        "No chat model available for {selector}. Check your subscription and consent."
                    ),
                );
            }
            Err(e) => {
                warn!(%selector, error = %e, "model selection failed");
                return e.into();
            }
        };

        match complete(model.as_ref(), request).await {
            Ok(content) => {
                info!(model = %model.id(), chars = content.len(), "relay completed");
                RelayResult::Success(ChatSuccess {
                    content,
                    model: model.id().to_owned(),
                    vendor: model.vendor().to_owned(),
                    family: model.family().to_owned(),
                    uses_premium_requests: true,
                })
            }
            Err(e) => {
                warn!(model = %model.id(), error = %e, "relay failed");
                e.into()
            }
        }
    }
}

/// Builds the message list: system prompt first (if non-empty), then the prompt.
fn build_messages(request: &ChatRequest) -> Vec<ChatMessage> {
    let system = request
        .system_prompt
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(ChatMessage::user);
    system
        .into_iter()
        .chain(std::iter::once(ChatMessage::user(request.prompt.as_str())))
        .collect()
}

async fn complete(model: &dyn ChatModel, request: &ChatRequest) -> Result<String, ProviderError> {
    // Never fired; the model may still observe it.
    let cancel = CancellationToken::new();
    let messages = build_messages(request);
    debug!(model = %model.id(), messages = messages.len(), "submitting request");

    let mut fragments = model
        .send(messages, RequestOptions::default(), cancel)
        .await?;

    let mut content = String::new();
    while let Some(fragment) = fragments.next().await {
        content.push_str(&fragment?);
    }
    Ok(content.trim().to_owned())
}
