//! Chat-model provider seam.
//!
//! The relay never talks to a model service directly. It asks a
//! [`ChatProvider`] for a [`ChatModel`] matching a [`ModelSelector`], sends it
//! an ordered list of [`ChatMessage`]s and drains the returned
//! [`TextStream`]. [`openai::OpenAiCompatProvider`] is the implementation the
//! binary ships with; tests substitute scripted fakes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod openai;

/// Lazily produced text fragments, consumed once in arrival order.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// Errors raised while selecting or invoking a model.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A structured failure reported by the model service itself.
    ///
    /// `code` is passed through to callers verbatim.
    #[error("{message}")]
    LanguageModel {
        code: String,
        message: String,
        cause: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed provider payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("request was cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn language_model(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LanguageModel {
            code: code.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches an underlying cause to a [`ProviderError::LanguageModel`].
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn with_cause(self, cause: impl Into<String>) -> Self {
        match self {
            Self::LanguageModel { code, message, .. } => Self::LanguageModel {
                code,
                message,
                cause: Some(cause.into()),
            },
            other => other,
        }
    }
}

/// Criteria used to pick a chat model. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelector {
    pub vendor: Option<String>,
    pub family: Option<String>,
}

impl ModelSelector {
    pub fn new(vendor: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            vendor: Some(vendor.into()),
            family: Some(family.into()),
        }
    }

    /// Returns a copy with `family` replaced.
    #[must_use]
    pub fn with_family(&self, family: impl Into<String>) -> Self {
        Self {
            vendor: self.vendor.clone(),
            family: Some(family.into()),
        }
    }

    pub fn matches(&self, vendor: &str, family: &str) -> bool {
        self.vendor.as_deref().is_none_or(|v| v == vendor)
            && self.family.as_deref().is_none_or(|f| f == family)
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vendor={} family={}",
            self.vendor.as_deref().unwrap_or("*"),
            self.family.as_deref().unwrap_or("*")
        )
    }
}

/// One user-originated message in a request.
///
/// The system prompt, when present, is sent as an ordinary user message
/// ahead of the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Per-request tuning passed to [`ChatModel::send`]. The relay sends no
/// custom options.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct RequestOptions {}

/// A resolved, invocable chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn id(&self) -> &str;
    fn vendor(&self) -> &str;
    fn family(&self) -> &str;

    /// Submits `messages` as a single request and returns the streamed reply.
    ///
    /// Implementations should stop early once `cancel` fires.
    async fn send(
        &self,
        messages: Vec<ChatMessage>,
        options: RequestOptions,
        cancel: CancellationToken,
    ) -> Result<TextStream, ProviderError>;
}

/// Source of chat models.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Name reported by `GET /health` as `api`.
    fn capability_name(&self) -> &str;

    /// Resolves the first model matching `selector`, or `None` if nothing is available.
    async fn select_model(
        &self,
        selector: &ModelSelector,
    ) -> Result<Option<Arc<dyn ChatModel>>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matching() {
        let selector = ModelSelector::new("copilot", "gpt-4o");
        assert!(selector.matches("copilot", "gpt-4o"));
        assert!(!selector.matches("copilot", "gpt-4o-mini"));
        assert!(!selector.matches("other", "gpt-4o"));
        assert!(ModelSelector::default().matches("any", "thing"));
    }

    #[test]
    fn family_override_keeps_vendor() {
        let selector = ModelSelector::new("copilot", "gpt-4o").with_family("claude-sonnet-4.5");
        assert_eq!(selector.vendor.as_deref(), Some("copilot"));
        assert_eq!(selector.family.as_deref(), Some("claude-sonnet-4.5"));
        assert_eq!(selector.to_string(), "vendor=copilot family=claude-sonnet-4.5");
    }

    #[test]
    fn cause_only_attaches_to_language_model_errors() {
        let err = ProviderError::language_model("Blocked", "quota exhausted").with_cause("429");
        assert!(matches!(
            err,
            ProviderError::LanguageModel { ref cause, .. } if cause.as_deref() == Some("429")
        ));
        assert_eq!(err.to_string(), "quota exhausted");

        let err = ProviderError::Cancelled.with_cause("ignored");
        assert!(matches!(err, ProviderError::Cancelled));
    }
}
