//! Controller tuning.

use std::time::Duration;

use slipway_core::config::ControllerSection;

/// Timing and bound parameters for the rollout state machine. Every
/// field comes from the `[controller]` config section, with defaults
/// sized for a small production fleet.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Apply attempts before giving up on a transient platform.
    pub apply_max_attempts: u32,
    pub apply_backoff_base: Duration,
    pub apply_backoff_max: Duration,
    /// How often the instance group is polled while converging.
    pub convergence_poll_interval: Duration,
    /// Poll budget before convergence is declared timed out.
    pub convergence_max_polls: u32,
    pub verify_interval: Duration,
    /// Wall-clock budget for the verification window.
    pub verify_timeout: Duration,
    /// Consecutive healthy verdicts required for success.
    pub healthy_streak: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            apply_max_attempts: 3,
            apply_backoff_base: Duration::from_secs(1),
            apply_backoff_max: Duration::from_secs(30),
            convergence_poll_interval: Duration::from_secs(2),
            convergence_max_polls: 60,
            verify_interval: Duration::from_secs(2),
            verify_timeout: Duration::from_secs(60),
            healthy_streak: 3,
        }
    }
}

impl ControllerConfig {
    /// Build from the `[controller]` section; unset or unparseable
    /// fields keep their defaults.
    pub fn from_section(section: &ControllerSection) -> Self {
        let d = Self::default();
        Self {
            apply_max_attempts: section.apply_max_attempts.unwrap_or(d.apply_max_attempts),
            apply_backoff_base: parse_or(section.apply_backoff_base.as_deref(), d.apply_backoff_base),
            apply_backoff_max: parse_or(section.apply_backoff_max.as_deref(), d.apply_backoff_max),
            convergence_poll_interval: parse_or(
                section.convergence_poll_interval.as_deref(),
                d.convergence_poll_interval,
            ),
            convergence_max_polls: section
                .convergence_max_polls
                .unwrap_or(d.convergence_max_polls),
            verify_interval: parse_or(section.verify_interval.as_deref(), d.verify_interval),
            verify_timeout: parse_or(section.verify_timeout.as_deref(), d.verify_timeout),
            healthy_streak: section.healthy_streak.unwrap_or(d.healthy_streak),
        }
    }

    /// Aggressive timings for tests and local development.
    pub fn fast() -> Self {
        Self {
            apply_max_attempts: 3,
            apply_backoff_base: Duration::from_millis(5),
            apply_backoff_max: Duration::from_millis(20),
            convergence_poll_interval: Duration::from_millis(10),
            convergence_max_polls: 25,
            verify_interval: Duration::from_millis(10),
            verify_timeout: Duration::from_millis(300),
            healthy_streak: 2,
        }
    }
}

fn parse_or(value: Option<&str>, default: Duration) -> Duration {
    value.and_then(parse_duration).unwrap_or(default)
}

/// Parse a duration string like "5s", "500ms", "1m".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
