//! # lmbridge
//!
//! Forwards text prompts to a chat model and hands back one JSON result,
//! either as a one-shot command or from a small local HTTP server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lmbridge::provider::{ModelSelector, openai::OpenAiCompatProvider};
//! use lmbridge::relay::{ChatRequest, Relay};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = OpenAiCompatProvider::new(
//!         "https://models.github.ai/inference",
//!         "copilot",
//!         vec!["gpt-4o".into()],
//!     )?
//!     .with_token(std::env::var("GITHUB_TOKEN").ok());
//!
//!     let relay = Relay::new(Arc::new(provider), ModelSelector::new("copilot", "gpt-4o"));
//!     let result = relay.run(&ChatRequest::new("Say hello")).await;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

// ── HTTP plumbing ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod router;
pub mod server;

// ── Relay ─────────────────────────────────────────────────────────────────────
pub mod bridge;
pub mod cli;
pub mod config;
pub mod provider;
pub mod relay;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::BridgeConfig;
pub use provider::{ChatModel, ChatProvider, ModelSelector, ProviderError};
pub use relay::{ChatRequest, ErrorKind, Relay, RelayResult};
pub use server::{Server, ServerError};
