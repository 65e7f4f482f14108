// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::cmp::Reverse;
use toolgate_config::{ChannelConfig, GatewayConfig};
use toolgate_core::GatewayError;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the ordered list of channels eligible for `model`.
///
/// - Passthrough mode: every channel, sorted by priority.
/// - Otherwise: channels advertising the model (alias-aware).  When none
///   does, fall back to the highest-priority default channel, else to the
///   highest-priority channel overall.
/// - Placeholder channels (no key or no models) are never candidates.
///
/// Ordering: priority descending, `is_default` first on ties, then
/// configuration order.
pub fn resolve<'a>(
    config: &'a GatewayConfig,
    model: &str,
) -> Result<Vec<&'a ChannelConfig>, GatewayError> {
    let routable: Vec<&ChannelConfig> = config
        .upstream_services
        .iter()
        .filter(|ch| !ch.is_placeholder())
        .collect();

    let mut candidates: Vec<&ChannelConfig> = if config.features.model_passthrough {
        routable
    } else {
        let advertising: Vec<&ChannelConfig> = routable
            .iter()
            .copied()
            .filter(|ch| ch.advertises(model))
            .collect();
        if !advertising.is_empty() {
            advertising
        } else {
            // No channel knows this model; a single fallback carries it.
            let fallback = pick_highest(routable.iter().copied().filter(|ch| ch.is_default))
                .or_else(|| pick_highest(routable.iter().copied()));
            fallback.map(|ch| vec![ch]).unwrap_or_default()
        }
    };

    sort_channels(&mut candidates);

    if candidates.is_empty() {
        return Err(GatewayError::NoUpstreamAvailable {
            model: model.to_string(),
        });
    }

    debug!(
        model,
        channels = ?candidates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "resolved upstream channels"
    );
    Ok(candidates)
}

/// Stable ordering: priority descending, defaults first, config order last.
fn sort_channels(channels: &mut [&ChannelConfig]) {
    channels.sort_by_key(|ch| (Reverse(ch.priority), Reverse(ch.is_default)));
}

fn pick_highest<'a>(
    channels: impl Iterator<Item = &'a ChannelConfig>,
) -> Option<&'a ChannelConfig> {
    let mut best: Option<&ChannelConfig> = None;
    for ch in channels {
        // Strict comparison keeps the earliest channel on priority ties.
        let better = match best {
            None => true,
            Some(b) => {
                ch.priority > b.priority || (ch.priority == b.priority && ch.is_default && !b.is_default)
            }
        };
        if better {
            best = Some(ch);
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Outcome classification
// ---------------------------------------------------------------------------

/// How an upstream HTTP status is treated by the failover loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 2xx — terminal success; the body goes to the parser.
    Success,
    /// 429 or 5xx — record the failure and try the next channel.
    Retryable,
    /// Any other 4xx — terminal; the same request would be rejected
    /// everywhere, so the upstream reply is returned to the client as-is.
    Terminal,
}

/// Classify an upstream HTTP status code.
#[must_use]
pub fn classify_status(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 => Disposition::Retryable,
        500..=599 => Disposition::Retryable,
        _ => Disposition::Terminal,
    }
}

/// A retryable failure recorded during the attempt loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// Upstream answered 429.
    RateLimited {
        /// Detail for the surfaced error.
        detail: String,
    },
    /// Upstream answered 5xx.
    ServerError {
        /// The status code observed.
        status: u16,
        /// Detail for the surfaced error.
        detail: String,
    },
    /// Connection or transport failure before any byte arrived.
    Network {
        /// Detail for the surfaced error.
        detail: String,
    },
    /// A deadline elapsed before any byte arrived.
    Timeout {
        /// The deadline in seconds.
        secs: u64,
    },
}

impl RetryReason {
    /// Convert the last recorded failure into the error surfaced to the
    /// client.
    #[must_use]
    pub fn into_error(self) -> GatewayError {
        match self {
            Self::RateLimited { detail } => GatewayError::UpstreamRateLimited { detail },
            Self::ServerError { status, detail } => GatewayError::UpstreamServerError {
                detail: format!("upstream returned {status}: {detail}"),
            },
            Self::Network { detail } => GatewayError::UpstreamServerError { detail },
            Self::Timeout { secs } => GatewayError::UpstreamTimeout { secs },
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt loop
// ---------------------------------------------------------------------------

/// Drive sequential attempts over the resolved channels.
///
/// The closure performs one dispatch and either produces a terminal result
/// (`Ok` — success *or* a terminal upstream failure the client should see
/// verbatim) or a [`RetryReason`] that sends the loop to the next channel.
/// When the list is exhausted, only the last recorded failure is surfaced.
///
/// Streaming callers use the same loop: the closure returns `Ok` as soon as
/// an upstream response body begins, and from that point no further channel
/// can be contacted — failover after the first forwarded byte is
/// structurally impossible.
pub async fn run_attempts<'c, T, F, Fut>(
    channels: &[&'c ChannelConfig],
    model: &str,
    mut attempt: F,
) -> Result<T, GatewayError>
where
    F: FnMut(&'c ChannelConfig) -> Fut,
    Fut: Future<Output = Result<T, RetryReason>>,
{
    let mut last: Option<RetryReason> = None;
    for channel in channels {
        match attempt(channel).await {
            Ok(done) => return Ok(done),
            Err(reason) => {
                warn!(channel = %channel.name, reason = ?reason, "upstream attempt failed, trying next channel");
                last = Some(reason);
            }
        }
    }
    Err(match last {
        Some(reason) => reason.into_error(),
        None => GatewayError::NoUpstreamAvailable {
            model: model.to_string(),
        },
    })
}

// ---------------------------------------------------------------------------
// Per-attempt request helpers
// ---------------------------------------------------------------------------

/// The bearer key to send upstream for this attempt: the client's own key
/// when key passthrough is enabled, else the channel's key.
#[must_use]
pub fn effective_key<'a>(
    config: &GatewayConfig,
    channel: &'a ChannelConfig,
    client_key: Option<&'a str>,
) -> &'a str {
    if config.features.key_passthrough
        && let Some(key) = client_key
    {
        return key;
    }
    channel.api_key.as_str()
}

/// Rewrite the `model` field of an outgoing body for a specific channel's
/// alias.  Returns the body unchanged when no rewrite is needed or the body
/// is not a JSON object.
#[must_use]
pub fn rewrite_model(body: &[u8], channel: &ChannelConfig, model: &str) -> Vec<u8> {
    let real = channel.upstream_model(model);
    if real == model {
        return body.to_vec();
    }
    let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return body.to_vec();
    };
    let Some(obj) = value.as_object_mut() else {
        return body.to_vec();
    };
    obj.insert("model".to_string(), serde_json::Value::String(real));
    serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_config::{Features, ServiceType};

    fn channel(name: &str, models: &[&str], priority: i32, is_default: bool) -> ChannelConfig {
        ChannelConfig {
            name: name.into(),
            base_url: "https://api.example.com/v1".into(),
            api_key: "sk-test".into(),
            service_type: ServiceType::Openai,
            models: models.iter().map(|m| m.to_string()).collect(),
            priority,
            is_default,
        }
    }

    fn config(channels: Vec<ChannelConfig>) -> GatewayConfig {
        GatewayConfig {
            upstream_services: channels,
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    #[test]
    fn advertising_channels_sorted_by_priority() {
        let cfg = config(vec![
            channel("low", &["gpt-4"], 50, false),
            channel("high", &["gpt-4"], 100, false),
            channel("other", &["claude"], 200, false),
        ]);
        let order: Vec<_> = resolve(&cfg, "gpt-4")
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(order, ["high", "low"]);
    }

    #[test]
    fn default_breaks_priority_ties() {
        let cfg = config(vec![
            channel("a", &["m"], 10, false),
            channel("b", &["m"], 10, true),
        ]);
        let order: Vec<_> = resolve(&cfg, "m")
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(order, ["b", "a"]);
    }

    #[test]
    fn config_order_breaks_remaining_ties() {
        let cfg = config(vec![
            channel("first", &["m"], 10, false),
            channel("second", &["m"], 10, false),
        ]);
        let order: Vec<_> = resolve(&cfg, "m")
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(order, ["first", "second"]);
    }

    #[test]
    fn priority_dominates_is_default() {
        let cfg = config(vec![
            channel("default-low", &["m"], 1, true),
            channel("plain-high", &["m"], 5, false),
        ]);
        let order: Vec<_> = resolve(&cfg, "m")
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(order, ["plain-high", "default-low"]);
    }

    #[test]
    fn alias_matches_route() {
        let cfg = config(vec![channel("a", &["gpt-4:qwen-72b"], 1, false)]);
        let resolved = resolve(&cfg, "gpt-4").unwrap();
        assert_eq!(resolved[0].name, "a");
        assert!(resolve(&cfg, "qwen-72b").is_ok()); // falls back to highest overall
    }

    #[test]
    fn placeholders_are_skipped() {
        let mut bare = channel("bare", &["gpt-4"], 1000, true);
        bare.api_key.clear();
        let cfg = config(vec![bare, channel("real", &["gpt-4"], 1, false)]);
        let resolved = resolve(&cfg, "gpt-4").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "real");
    }

    #[test]
    fn unknown_model_falls_back_to_highest_priority_default() {
        let cfg = config(vec![
            channel("a", &["x"], 100, false),
            channel("dflt", &["y"], 10, true),
        ]);
        let resolved = resolve(&cfg, "unknown-model").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "dflt");
    }

    #[test]
    fn unknown_model_without_default_uses_highest_overall() {
        let cfg = config(vec![
            channel("a", &["x"], 5, false),
            channel("b", &["y"], 50, false),
        ]);
        let resolved = resolve(&cfg, "unknown").unwrap();
        assert_eq!(resolved[0].name, "b");
    }

    #[test]
    fn all_placeholders_is_no_upstream() {
        let mut a = channel("a", &["m"], 1, false);
        a.api_key.clear();
        let cfg = config(vec![a]);
        let err = resolve(&cfg, "m").unwrap_err();
        assert!(matches!(err, GatewayError::NoUpstreamAvailable { .. }));
    }

    #[test]
    fn empty_config_is_no_upstream() {
        let err = resolve(&config(vec![]), "m").unwrap_err();
        assert!(matches!(err, GatewayError::NoUpstreamAvailable { model } if model == "m"));
    }

    #[test]
    fn passthrough_mode_ignores_model_lists() {
        let cfg = GatewayConfig {
            upstream_services: vec![
                channel("a", &["x"], 5, false),
                channel("b", &["y"], 50, false),
            ],
            features: Features {
                model_passthrough: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let order: Vec<_> = resolve(&cfg, "whatever")
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(order, ["b", "a"]);
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    #[test]
    fn classification_table() {
        assert_eq!(classify_status(200), Disposition::Success);
        assert_eq!(classify_status(204), Disposition::Success);
        assert_eq!(classify_status(429), Disposition::Retryable);
        assert_eq!(classify_status(500), Disposition::Retryable);
        assert_eq!(classify_status(503), Disposition::Retryable);
        assert_eq!(classify_status(400), Disposition::Terminal);
        assert_eq!(classify_status(401), Disposition::Terminal);
        assert_eq!(classify_status(404), Disposition::Terminal);
        assert_eq!(classify_status(302), Disposition::Terminal);
    }

    #[test]
    fn retry_reasons_surface_as_matching_errors() {
        assert!(matches!(
            RetryReason::RateLimited { detail: "x".into() }.into_error(),
            GatewayError::UpstreamRateLimited { .. }
        ));
        assert!(matches!(
            RetryReason::ServerError {
                status: 502,
                detail: "x".into()
            }
            .into_error(),
            GatewayError::UpstreamServerError { .. }
        ));
        assert!(matches!(
            RetryReason::Timeout { secs: 9 }.into_error(),
            GatewayError::UpstreamTimeout { secs: 9 }
        ));
    }

    // -----------------------------------------------------------------------
    // Attempt loop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failover_moves_to_next_channel_on_retryable() {
        let c1 = channel("c1", &["gpt-4"], 100, false);
        let c2 = channel("c2", &["gpt-4"], 50, false);
        let channels = [&c1, &c2];
        let mut attempts = Vec::new();

        let result = run_attempts(&channels, "gpt-4", |ch| {
            attempts.push(ch.name.clone());
            let name = ch.name.clone();
            async move {
                if name == "c1" {
                    Err(RetryReason::RateLimited {
                        detail: "429".into(),
                    })
                } else {
                    Ok("body-from-c2")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "body-from-c2");
        assert_eq!(attempts, ["c1", "c2"]);
    }

    #[tokio::test]
    async fn terminal_result_stops_the_loop() {
        let c1 = channel("c1", &["m"], 100, false);
        let c2 = channel("c2", &["m"], 50, false);
        let channels = [&c1, &c2];
        let mut attempts = 0u32;

        // A 400 is returned as Ok so it goes back to the client verbatim.
        let result: Result<&str, _> = run_attempts(&channels, "m", |_| {
            attempts += 1;
            async { Ok("verbatim-400-body") }
        })
        .await;

        assert_eq!(result.unwrap(), "verbatim-400-body");
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let c1 = channel("c1", &["m"], 100, false);
        let c2 = channel("c2", &["m"], 50, false);
        let channels = [&c1, &c2];

        let result: Result<(), _> = run_attempts(&channels, "m", |ch| {
            let name = ch.name.clone();
            async move {
                if name == "c1" {
                    Err(RetryReason::ServerError {
                        status: 500,
                        detail: "boom".into(),
                    })
                } else {
                    Err(RetryReason::RateLimited {
                        detail: "slow down".into(),
                    })
                }
            }
        })
        .await;

        // The *last* failure (429) decides the surfaced error.
        assert!(matches!(
            result.unwrap_err(),
            GatewayError::UpstreamRateLimited { .. }
        ));
    }

    // -----------------------------------------------------------------------
    // Per-attempt helpers
    // -----------------------------------------------------------------------

    #[test]
    fn effective_key_prefers_client_key_in_passthrough() {
        let ch = channel("a", &["m"], 1, false);
        let mut cfg = config(vec![ch.clone()]);
        assert_eq!(effective_key(&cfg, &ch, Some("ck")), "sk-test");

        cfg.features.key_passthrough = true;
        assert_eq!(effective_key(&cfg, &ch, Some("ck")), "ck");
        assert_eq!(effective_key(&cfg, &ch, None), "sk-test");
    }

    #[test]
    fn rewrite_model_applies_channel_alias() {
        let ch = channel("a", &["gpt-4:qwen-72b"], 1, false);
        let body = serde_json::to_vec(&serde_json::json!({
            "model": "gpt-4",
            "messages": [],
            "temperature": 0.1
        }))
        .unwrap();
        let out = rewrite_model(&body, &ch, "gpt-4");
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["model"], "qwen-72b");
        assert_eq!(parsed["temperature"], 0.1);
    }

    #[test]
    fn rewrite_model_is_identity_without_alias() {
        let ch = channel("a", &["gpt-4"], 1, false);
        let body = br#"{"model":"gpt-4"}"#.to_vec();
        assert_eq!(rewrite_model(&body, &ch, "gpt-4"), body);
    }
}
