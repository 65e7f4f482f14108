// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::Path;
use toolgate_core::DEFAULT_TRIGGER;

mod shared;

pub use shared::SharedConfig;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be read.
    #[error("failed to read config {path}: {reason}")]
    ReadError {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error detail.
        reason: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A channel is missing its key or model list and will be skipped at
    /// routing time.
    PlaceholderChannel {
        /// Channel name.
        name: String,
    },
    /// Two channels share the same name.
    DuplicateChannelName {
        /// The duplicated name.
        name: String,
    },
    /// No upstream channels are configured at all.
    NoChannels,
    /// A per-request timeout is unusually large.
    LargeTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::PlaceholderChannel { name } => {
                write!(f, "channel '{name}' has no api_key or models and will be skipped")
            }
            ConfigWarning::DuplicateChannelName { name } => {
                write!(f, "duplicate channel name '{name}'")
            }
            ConfigWarning::NoChannels => write!(f, "no upstream channels configured"),
            ConfigWarning::LargeTimeout { secs } => {
                write!(f, "request timeout is unusually large ({secs}s)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Listener binding and per-request default timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request default timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8788
}

fn default_timeout() -> u64 {
    180
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout: default_timeout(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` string to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Upstream provider family.  Every family is reached over the same
/// OpenAI-shaped chat-completions surface; the variant is recorded for
/// operators and base-URL conventions, not for protocol switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// OpenAI or any OpenAI-compatible endpoint.
    #[default]
    Openai,
    /// Anthropic endpoint exposed through an OpenAI-compatible surface.
    Anthropic,
    /// Google endpoint exposed through an OpenAI-compatible surface.
    Google,
}

/// A `models` list entry of the form `alias:real`, or a bare model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAlias<'a> {
    /// The name clients route on.
    pub alias: &'a str,
    /// The name sent upstream.
    pub real: &'a str,
}

impl<'a> ModelAlias<'a> {
    /// Parse a `models` entry.  Entries without a `:` advertise the same
    /// name in both directions.
    #[must_use]
    pub fn parse(entry: &'a str) -> Self {
        match entry.split_once(':') {
            Some((alias, real)) if !alias.is_empty() && !real.is_empty() => {
                Self { alias, real }
            }
            _ => Self {
                alias: entry,
                real: entry,
            },
        }
    }
}

/// A single configured upstream endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    /// Channel name (unique per configuration).
    pub name: String,
    /// Base URL of the chat-completions surface (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    /// API key sent upstream (unless key passthrough is enabled).
    #[serde(default)]
    pub api_key: String,
    /// Provider family.
    #[serde(default)]
    pub service_type: ServiceType,
    /// Advertised models, possibly `alias:real` pairs.
    #[serde(default)]
    pub models: Vec<String>,
    /// Routing priority — larger wins.
    #[serde(default)]
    pub priority: i32,
    /// Legacy tie-breaker: preferred when priorities are equal and the
    /// fallback channel when no channel advertises the requested model.
    #[serde(default)]
    pub is_default: bool,
}

impl ChannelConfig {
    /// A channel missing its key or its model list is configuration
    /// scaffolding, not a routable upstream.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.api_key.is_empty() || self.models.is_empty()
    }

    /// Returns `true` if this channel advertises `model` (alias-aware).
    #[must_use]
    pub fn advertises(&self, model: &str) -> bool {
        self.models
            .iter()
            .any(|entry| ModelAlias::parse(entry).alias == model)
    }

    /// The model name to send upstream for a requested `model`: the `real`
    /// half of a matching alias, or the requested name unchanged.
    #[must_use]
    pub fn upstream_model(&self, model: &str) -> String {
        self.models
            .iter()
            .map(|entry| ModelAlias::parse(entry))
            .find(|a| a.alias == model)
            .map_or_else(|| model.to_string(), |a| a.real.to_string())
    }

    /// Every model name this channel advertises to clients.
    pub fn advertised_models(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|entry| ModelAlias::parse(entry).alias)
    }

    /// The chat-completions endpoint URL for this channel.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// Client authentication
// ---------------------------------------------------------------------------

/// Client bearer-key allow-list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientAuth {
    /// Keys accepted in the `Authorization: Bearer` header.
    #[serde(default)]
    pub allowed_keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Feature switches and tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Features {
    /// Master switch for prompt injection and tool-call extraction.
    #[serde(default = "default_true")]
    pub enable_function_calling: bool,
    /// Rewrite `developer` role messages to `system`.
    #[serde(default)]
    pub convert_developer_to_system: bool,
    /// Forward the client's bearer key upstream instead of the channel key.
    #[serde(default)]
    pub key_passthrough: bool,
    /// Bypass model-based routing: every channel is a candidate.
    #[serde(default)]
    pub model_passthrough: bool,
    /// Override of the teaching-prompt template.  Must contain both
    /// `{tools_list}` and `{trigger_signal}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    /// Override of the trigger token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_token: Option<String>,
    /// Strip `<think>…</think>` regions from client-visible output instead
    /// of passing them through.
    #[serde(default)]
    pub strip_think_tags: bool,
    /// Cap on tool-call envelope accumulation, in bytes.
    #[serde(default = "default_envelope_cap")]
    pub envelope_cap_bytes: usize,
    /// Log filter threshold (e.g. `"info"`, `"toolgate=debug"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_envelope_cap() -> usize {
    256 * 1024
}

impl Default for Features {
    fn default() -> Self {
        Self {
            enable_function_calling: true,
            convert_developer_to_system: false,
            key_passthrough: false,
            model_passthrough: false,
            prompt_template: None,
            trigger_token: None,
            strip_think_tags: false,
            envelope_cap_bytes: default_envelope_cap(),
            log_level: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// The full configuration snapshot consumed by the gateway.
///
/// Snapshots are immutable once constructed; live updates go through
/// [`SharedConfig::swap`], which replaces the shared pointer atomically
/// while in-flight requests keep the snapshot they started with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Listener and timeout settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream channel definitions, in declaration order.
    #[serde(default)]
    pub upstream_services: Vec<ChannelConfig>,
    /// Client bearer allow-list.
    #[serde(default)]
    pub client_authentication: ClientAuth,
    /// Feature switches.
    #[serde(default)]
    pub features: Features,
}

impl GatewayConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    /// Load and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// The trigger token in effect: the configured override or the built-in
    /// default.
    #[must_use]
    pub fn trigger(&self) -> &str {
        self.features
            .trigger_token
            .as_deref()
            .unwrap_or(DEFAULT_TRIGGER)
    }

    /// Semantic validation.  Hard failures come back as
    /// [`ConfigError::ValidationError`]; advisory issues as warnings.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            reasons.push("server.port must be non-zero".to_string());
        }
        if self.features.envelope_cap_bytes == 0 {
            reasons.push("features.envelope_cap_bytes must be non-zero".to_string());
        }
        if let Some(template) = &self.features.prompt_template {
            for placeholder in ["{tools_list}", "{trigger_signal}"] {
                if !template.contains(placeholder) {
                    reasons.push(format!("prompt_template is missing {placeholder}"));
                }
            }
        }
        if let Some(trigger) = &self.features.trigger_token {
            if trigger.is_empty() {
                reasons.push("trigger_token must not be empty".to_string());
            }
            if trigger.contains('\n') || trigger.contains('\r') {
                reasons.push("trigger_token must not contain SSE framing bytes".to_string());
            }
        }

        if self.upstream_services.is_empty() {
            warnings.push(ConfigWarning::NoChannels);
        }
        if self.server.timeout > 600 {
            warnings.push(ConfigWarning::LargeTimeout {
                secs: self.server.timeout,
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for channel in &self.upstream_services {
            if !seen.insert(channel.name.as_str()) {
                warnings.push(ConfigWarning::DuplicateChannelName {
                    name: channel.name.clone(),
                });
            }
            if channel.is_placeholder() {
                warnings.push(ConfigWarning::PlaceholderChannel {
                    name: channel.name.clone(),
                });
            }
            if channel.base_url.is_empty() {
                reasons.push(format!("channel '{}' has an empty base_url", channel.name));
            }
        }

        if reasons.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, models: &[&str], priority: i32) -> ChannelConfig {
        ChannelConfig {
            name: name.into(),
            base_url: "https://api.example.com/v1".into(),
            api_key: "sk-test".into(),
            service_type: ServiceType::Openai,
            models: models.iter().map(|m| m.to_string()).collect(),
            priority,
            is_default: false,
        }
    }

    // -----------------------------------------------------------------------
    // Alias parsing
    // -----------------------------------------------------------------------

    #[test]
    fn alias_entry_splits_on_colon() {
        let a = ModelAlias::parse("gpt-4:qwen-72b-chat");
        assert_eq!(a.alias, "gpt-4");
        assert_eq!(a.real, "qwen-72b-chat");
    }

    #[test]
    fn bare_entry_aliases_to_itself() {
        let a = ModelAlias::parse("llama-3-70b");
        assert_eq!(a.alias, "llama-3-70b");
        assert_eq!(a.real, "llama-3-70b");
    }

    #[test]
    fn degenerate_colon_entries_fall_back_to_identity() {
        assert_eq!(ModelAlias::parse(":x").alias, ":x");
        assert_eq!(ModelAlias::parse("x:").real, "x:");
    }

    // -----------------------------------------------------------------------
    // Channel helpers
    // -----------------------------------------------------------------------

    #[test]
    fn advertises_matches_alias_side() {
        let ch = channel("a", &["gpt-4:qwen-72b", "claude-x"], 0);
        assert!(ch.advertises("gpt-4"));
        assert!(ch.advertises("claude-x"));
        assert!(!ch.advertises("qwen-72b"));
    }

    #[test]
    fn upstream_model_rewrites_alias() {
        let ch = channel("a", &["gpt-4:qwen-72b"], 0);
        assert_eq!(ch.upstream_model("gpt-4"), "qwen-72b");
        assert_eq!(ch.upstream_model("other"), "other");
    }

    #[test]
    fn placeholder_requires_key_and_models() {
        let mut ch = channel("a", &["m"], 0);
        assert!(!ch.is_placeholder());
        ch.api_key.clear();
        assert!(ch.is_placeholder());
        ch.api_key = "k".into();
        ch.models.clear();
        assert!(ch.is_placeholder());
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let mut ch = channel("a", &["m"], 0);
        ch.base_url = "https://api.example.com/v1/".into();
        assert_eq!(ch.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    // -----------------------------------------------------------------------
    // TOML loading
    // -----------------------------------------------------------------------

    #[test]
    fn parses_full_toml() {
        let cfg = GatewayConfig::from_toml_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            timeout = 120

            [[upstream_services]]
            name = "primary"
            base_url = "https://api.openai.com/v1"
            api_key = "sk-live"
            service_type = "openai"
            models = ["gpt-4", "gpt-4o:gpt-4o-2024-08-06"]
            priority = 100
            is_default = true

            [client_authentication]
            allowed_keys = ["ck-1", "ck-2"]

            [features]
            convert_developer_to_system = true
            key_passthrough = false
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.upstream_services.len(), 1);
        assert!(cfg.upstream_services[0].is_default);
        assert!(cfg.upstream_services[0].advertises("gpt-4o"));
        assert_eq!(cfg.client_authentication.allowed_keys.len(), 2);
        assert!(cfg.features.enable_function_calling);
        assert!(cfg.features.convert_developer_to_system);
    }

    #[test]
    fn defaults_apply_to_empty_toml() {
        let cfg = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.server.timeout, 180);
        assert_eq!(cfg.features.envelope_cap_bytes, 256 * 1024);
        assert!(cfg.features.enable_function_calling);
        assert_eq!(cfg.trigger(), toolgate_core::DEFAULT_TRIGGER);
    }

    #[test]
    fn load_missing_file_is_file_not_found() {
        let err = GatewayConfig::load("/nonexistent/toolgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.toml");
        std::fs::write(&path, "[server]\nport = 1234\n").unwrap();
        let cfg = GatewayConfig::load(&path).unwrap();
        assert_eq!(cfg.server.port, 1234);
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn valid_config_produces_no_warnings() {
        let cfg = GatewayConfig {
            upstream_services: vec![channel("a", &["m"], 1)],
            ..Default::default()
        };
        assert!(cfg.validate().unwrap().is_empty());
    }

    #[test]
    fn template_without_placeholders_is_rejected() {
        let cfg = GatewayConfig {
            features: Features {
                prompt_template: Some("tools here".into()),
                ..Default::default()
            },
            upstream_services: vec![channel("a", &["m"], 1)],
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => assert_eq!(reasons.len(), 2),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn trigger_with_newline_is_rejected() {
        let cfg = GatewayConfig {
            features: Features {
                trigger_token: Some("bad\ntoken".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn placeholder_and_duplicate_channels_warn() {
        let mut bare = channel("dup", &[], 0);
        bare.api_key.clear();
        let cfg = GatewayConfig {
            upstream_services: vec![channel("dup", &["m"], 1), bare],
            ..Default::default()
        };
        let warnings = cfg.validate().unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::DuplicateChannelName { name } if name == "dup")));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::PlaceholderChannel { name } if name == "dup")));
    }

    #[test]
    fn no_channels_is_advisory_only() {
        let warnings = GatewayConfig::default().validate().unwrap();
        assert!(warnings.contains(&ConfigWarning::NoChannels));
    }
}
