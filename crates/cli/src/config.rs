//! Configuration loading from arcana.toml.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use mcp::TransportConfig;
use runtime::{AnthropicAuth, AnthropicBackend, OpenAiBackend, Provider};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_CONFIG_PATH: &str = "arcana.toml";
const DEFAULT_BIND: &str = "127.0.0.1:4000";
const DEFAULT_DATABASE: &str = "arcana.db";
const DEFAULT_MAX_TOKENS: u32 = 16384;
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-opus-4-6";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_VERTEX_REGION: &str = "us-east5";
const VERTEX_PROJECT_VARS: [&str; 2] = ["VERTEX_PROJECT_ID", "ANTHROPIC_VERTEX_PROJECT_ID"];
/// Google access token for Vertex AI, e.g. from `gcloud auth print-access-token`.
const VERTEX_TOKEN_VARS: [&str; 2] = ["VERTEX_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,

    /// Tool providers registered at startup.
    pub providers: Vec<ProviderSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP surface listens on.
    pub bind: String,

    /// SQLite file holding conversations.
    pub database: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            database: PathBuf::from(DEFAULT_DATABASE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Claude on Google Vertex AI.
    Vertex,
    Anthropic,
    OpenAi,
    /// An OpenAI-compatible server; needs a base URL.
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    const NAMES: &'static str = "vertex, anthropic, openai, openai-compatible";

    fn key_var(self) -> &'static str {
        match self {
            Self::Vertex => VERTEX_TOKEN_VARS[0],
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi | Self::OpenAiCompatible => "OPENAI_API_KEY",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Vertex | Self::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            Self::OpenAi | Self::OpenAiCompatible => DEFAULT_OPENAI_MODEL,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "vertex" => Ok(Self::Vertex),
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "openai-compatible" => Ok(Self::OpenAiCompatible),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Model provider configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Detected from the environment when absent.
    pub provider: Option<ProviderKind>,

    /// Model id; defaults per provider.
    pub model: Option<String>,

    pub max_tokens: u32,

    /// Alternate API endpoint (OpenAI-compatible servers, proxies).
    pub base_url: Option<String>,

    /// Falls back to the provider's environment variable.
    pub api_key: Option<String>,

    /// Enables Anthropic extended thinking with this token budget.
    pub thinking_budget: Option<u32>,

    /// Model turns allowed per chat request.
    pub max_iterations: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: None,
            api_key: None,
            thinking_budget: None,
            max_iterations: runtime::orchestrator::DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `ARCANA_BIND`, `AI_PROVIDER`, `MODEL_ID` and `MAX_TOKENS` overrides.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(bind) = var("ARCANA_BIND") {
            self.server.bind = bind;
        }
        if let Some(provider) = var("AI_PROVIDER") {
            self.model.provider = Some(provider.parse()?);
        }
        if let Some(model) = var("MODEL_ID") {
            self.model.model = Some(model);
        }
        if let Some(raw) = var("MAX_TOKENS") {
            self.model.max_tokens = raw.trim().parse().map_err(|_| ConfigError::Env {
                name: "MAX_TOKENS",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    /// Resolve which provider to use, honoring an explicit setting first.
    ///
    /// Detection order: a Vertex project, then `ANTHROPIC_API_KEY`, then
    /// `OPENAI_API_KEY` (OpenAI-compatible when `OPENAI_BASE_URL` is set).
    pub fn provider_kind(
        &self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<ProviderKind, ConfigError> {
        if let Some(kind) = self.model.provider {
            return Ok(kind);
        }
        if first_var(&var, &VERTEX_PROJECT_VARS).is_some() {
            return Ok(ProviderKind::Vertex);
        }
        if var("ANTHROPIC_API_KEY").is_some() {
            return Ok(ProviderKind::Anthropic);
        }
        if var("OPENAI_API_KEY").is_some() {
            return Ok(match var("OPENAI_BASE_URL") {
                Some(_) => ProviderKind::OpenAiCompatible,
                None => ProviderKind::OpenAi,
            });
        }
        Err(ConfigError::NoProvider)
    }

    /// Build the model backend from config plus environment credentials.
    pub fn build_provider(
        &self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Provider, ConfigError> {
        let kind = self.provider_kind(&var)?;
        let api_key = match kind {
            ProviderKind::Vertex => self
                .model
                .api_key
                .clone()
                .or_else(|| first_var(&var, &VERTEX_TOKEN_VARS)),
            _ => self.model.api_key.clone().or_else(|| var(kind.key_var())),
        }
        .ok_or(ConfigError::MissingApiKey(kind.key_var()))?;
        let model = self
            .model
            .model
            .clone()
            .unwrap_or_else(|| kind.default_model().to_string());

        let provider = match kind {
            ProviderKind::Vertex => {
                let project = first_var(&var, &VERTEX_PROJECT_VARS)
                    .ok_or(ConfigError::MissingVertexProject)?;
                let region =
                    var("VERTEX_REGION").unwrap_or_else(|| DEFAULT_VERTEX_REGION.to_string());
                let mut builder = AnthropicBackend::builder(AnthropicAuth::Bearer(api_key), model)
                    .max_tokens(self.model.max_tokens)
                    .vertex(project, region);
                if let Some(url) = &self.model.base_url {
                    builder = builder.base_url(url);
                }
                if let Some(budget) = self.model.thinking_budget {
                    builder = builder.thinking_budget(budget);
                }
                Provider::Anthropic(builder.build())
            }
            ProviderKind::Anthropic => {
                let mut builder = AnthropicBackend::builder(AnthropicAuth::ApiKey(api_key), model)
                    .max_tokens(self.model.max_tokens);
                if let Some(url) = &self.model.base_url {
                    builder = builder.base_url(url);
                }
                if let Some(budget) = self.model.thinking_budget {
                    builder = builder.thinking_budget(budget);
                }
                Provider::Anthropic(builder.build())
            }
            ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => {
                let mut builder =
                    OpenAiBackend::builder(api_key, model).max_tokens(self.model.max_tokens);
                match self.model.base_url.clone().or_else(|| var("OPENAI_BASE_URL")) {
                    Some(url) => builder = builder.base_url(url),
                    None if kind == ProviderKind::OpenAiCompatible => {
                        return Err(ConfigError::MissingBaseUrl);
                    }
                    None => {}
                }
                Provider::OpenAi(builder.build())
            }
        };
        Ok(provider)
    }
}

/// A tool provider as written in config or posted to `/api/mcp/servers`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSpec {
    pub id: Option<String>,

    /// `stdio`/`subprocess` or `http`/`httpStream`; anything else is stdio.
    #[serde(rename = "type")]
    pub kind: Option<String>,

    pub url: Option<String>,
    pub command: Option<String>,

    /// Array of strings or one whitespace-separated string.
    pub args: Value,

    /// Object of strings or a `"K=V K2=V2"` string.
    pub env: Value,
}

impl ProviderSpec {
    /// Validate into a provider id and transport.
    pub fn into_transport(self) -> Result<(String, TransportConfig), ConfigError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ConfigError::InvalidProvider("id is required".into()))?;

        let transport = match self.kind.as_deref() {
            Some("http" | "httpStream") => {
                let url = non_empty(self.url).ok_or_else(|| {
                    ConfigError::InvalidProvider("url is required for http providers".into())
                })?;
                TransportConfig::HttpStream { url }
            }
            _ => {
                let command = non_empty(self.command).ok_or_else(|| {
                    ConfigError::InvalidProvider("command is required for stdio providers".into())
                })?;
                TransportConfig::Subprocess {
                    command,
                    args: parse_args(&self.args)?,
                    env: parse_env(&self.env)?,
                }
            }
        };
        Ok((id, transport))
    }
}

fn first_var(var: impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|&name| var(name))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_args(args: &Value) -> Result<Vec<String>, ConfigError> {
    match args {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s.split_whitespace().map(str::to_string).collect()),
        Value::Array(items) => Ok(items.iter().map(scalar_string).collect()),
        _ => Err(ConfigError::InvalidProvider(
            "args must be an array or a string".into(),
        )),
    }
}

fn parse_env(env: &Value) -> Result<BTreeMap<String, String>, ConfigError> {
    match env {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), scalar_string(v)))
            .collect()),
        // Pairs without a key (`=x`) or without `=` are skipped.
        Value::String(s) => Ok(s
            .split_whitespace()
            .filter_map(|pair| pair.split_once('='))
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()),
        _ => Err(ConfigError::InvalidProvider(
            "env must be an object or a string".into(),
        )),
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {name}: `{value}`")]
    Env { name: &'static str, value: String },

    #[error(
        "no model provider configured: set model.provider, AI_PROVIDER, VERTEX_PROJECT_ID, ANTHROPIC_API_KEY or OPENAI_API_KEY"
    )]
    NoProvider,

    #[error("unknown provider `{0}`: expected one of {names}", names = ProviderKind::NAMES)]
    UnknownProvider(String),

    #[error("missing API key: set model.api_key or {0}")]
    MissingApiKey(&'static str),

    #[error("VERTEX_PROJECT_ID or ANTHROPIC_VERTEX_PROJECT_ID is required for the vertex provider")]
    MissingVertexProject,

    #[error("OPENAI_BASE_URL or model.base_url is required for the openai-compatible provider")]
    MissingBaseUrl,

    #[error("{0}")]
    InvalidProvider(String),
}
