//! Runtime configuration, read from flags or the environment.

use clap::Args;

use crate::provider::ModelSelector;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3737";
pub const DEFAULT_VENDOR: &str = "copilot";
pub const DEFAULT_FAMILY: &str = "gpt-4o";
pub const DEFAULT_BASE_URL: &str = "https://models.github.ai/inference";
pub const DEFAULT_MODELS: [&str; 2] = ["gpt-4o", "gpt-4o-mini"];

/// Settings shared by the one-shot and server modes.
#[derive(Debug, Clone, Args)]
pub struct BridgeConfig {
    /// Address the HTTP server listens on.
    #[arg(long, env = "LMBRIDGE_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Vendor a model must belong to.
    #[arg(long, env = "LMBRIDGE_VENDOR", default_value = DEFAULT_VENDOR)]
    pub vendor: String,

    /// Model family to select.
    #[arg(long, env = "LMBRIDGE_FAMILY", default_value = DEFAULT_FAMILY)]
    pub family: String,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "LMBRIDGE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Bearer token for the API.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Model ids the provider offers.
    #[arg(long, env = "LMBRIDGE_MODELS", value_delimiter = ',', default_values = DEFAULT_MODELS)]
    pub models: Vec<String>,

    /// Name reported as `api` by `GET /health`. Defaults to the provider's own name.
    #[arg(long, env = "LMBRIDGE_API_NAME")]
    pub api_name: Option<String>,
}

impl BridgeConfig {
    pub fn selector(&self) -> ModelSelector {
        ModelSelector::new(&self.vendor, &self.family)
    }

    /// Model ids with blanks removed.
    pub fn model_ids(&self) -> Vec<String> {
        self.models
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_owned(),
            vendor: DEFAULT_VENDOR.to_owned(),
            family: DEFAULT_FAMILY.to_owned(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            token: None,
            models: DEFAULT_MODELS.map(str::to_owned).to_vec(),
            api_name: None,
        }
    }
}
