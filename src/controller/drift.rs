//! Configuration drift manager.
//!
//! Decides whether a newly derived configuration hash is applied now,
//! held in a debounce window, or ignored. All state lives in
//! `status.configuration`, so a window survives operator restarts.
//!
//! Successive changes inside a window reset it with the newest hash; only
//! the value that is still current once the window elapses is applied.

use std::time::Duration;

use jiff::Timestamp;

use crate::client::ServerPod;
use crate::controller::common::{elapsed, parse_timestamp};
use crate::crd::ConfigurationStatus;

/// Outcome of one drift evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftDecision {
    /// The derived configuration is already applied.
    NoOp,
    /// Apply this hash now.
    Apply { hash: String },
    /// Hold the change. `opened` is set when this pass started or restarted
    /// the window.
    Debounce {
        hash: String,
        remaining: Duration,
        opened: bool,
    },
}

impl DriftDecision {
    /// Whether child resources may be written this pass.
    pub fn permits_apply(&self) -> bool {
        !matches!(self, DriftDecision::Debounce { .. })
    }
}

/// Evaluate a derived hash against the persisted drift state.
///
/// Returns the decision and the state to persist.
pub fn evaluate(
    state: &ConfigurationStatus,
    hash: &str,
    now: Timestamp,
    window: Duration,
) -> (DriftDecision, ConfigurationStatus) {
    let applied = |state: &ConfigurationStatus| ConfigurationStatus {
        last_applied_hash: Some(hash.to_string()),
        pending_hash: None,
        pending_since: None,
        last_applied_at: Some(now.to_string()),
        ..state.clone()
    };

    let Some(last_applied) = state.last_applied_hash.as_deref() else {
        // Initial creation is never debounced.
        return (
            DriftDecision::Apply {
                hash: hash.to_string(),
            },
            applied(state),
        );
    };

    if last_applied == hash {
        // A pending change that was reverted inside its window is dropped.
        let next = ConfigurationStatus {
            pending_hash: None,
            pending_since: None,
            ..state.clone()
        };
        return (DriftDecision::NoOp, next);
    }

    let since = match (state.pending_hash.as_deref(), parse_timestamp(state.pending_since.as_deref())) {
        (Some(pending), Some(since)) if pending == hash => Some(since),
        _ => None,
    };

    match since {
        Some(since) => {
            let waited = elapsed(since, now);
            if waited >= window {
                (
                    DriftDecision::Apply {
                        hash: hash.to_string(),
                    },
                    applied(state),
                )
            } else {
                (
                    DriftDecision::Debounce {
                        hash: hash.to_string(),
                        remaining: window.saturating_sub(waited),
                        opened: false,
                    },
                    state.clone(),
                )
            }
        }
        None if window.is_zero() => (
            DriftDecision::Apply {
                hash: hash.to_string(),
            },
            applied(state),
        ),
        None => (
            DriftDecision::Debounce {
                hash: hash.to_string(),
                remaining: window,
                opened: true,
            },
            ConfigurationStatus {
                pending_hash: Some(hash.to_string()),
                pending_since: Some(now.to_string()),
                ..state.clone()
            },
        ),
    }
}

/// Next pod to restart so it picks up the applied configuration.
///
/// Only chosen while every declared server is ready and none is shutting
/// down, which limits a configuration rollout to one restart at a time.
/// A pod running an image other than the template's is skipped: restarting
/// it would change its version, which only an upgrade may do.
pub fn next_config_restart<'a>(
    pods: &'a [ServerPod],
    servers: i32,
    applied_hash: &str,
    image: &str,
) -> Option<&'a ServerPod> {
    let declared = usize::try_from(servers).unwrap_or(0);
    if pods.len() < declared || pods.iter().any(|p| !p.is_serving()) {
        return None;
    }
    pods.iter()
        .filter(|p| p.ordinal < servers && runs_image(p, image))
        .find(|p| p.config_hash.as_deref() != Some(applied_hash))
}

/// Declared servers whose pod runs an image other than `image`.
pub fn version_skew(pods: &[ServerPod], servers: i32, image: &str) -> Vec<String> {
    pods.iter()
        .filter(|p| p.ordinal < servers && !runs_image(p, image))
        .map(|p| p.name.clone())
        .collect()
}

fn runs_image(pod: &ServerPod, image: &str) -> bool {
    pod.image.as_deref().is_none_or(|i| i == image)
}
