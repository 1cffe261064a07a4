//! Reconnect backoff schedule.

use std::time::Duration;

/// Exponential backoff configuration for reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,

    /// Relative jitter applied to every delay. Default: 0.25 (+-25%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: None,
            jitter: 0.25,
        }
    }
}

/// Backoff schedule bound to a per-session seed.
///
/// `delay = min(initial * 2^attempt, max) * (1 + jitter * sin(attempt * 7.3 + seed))`
///
/// The seed shifts the jitter phase so sessions that lost the backend at the
/// same moment do not come back in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    phase: f64,
}

impl Backoff {
    pub fn new(config: ReconnectConfig, seed: u64) -> Self {
        // Map the seed onto [0, 2π).
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let phase = (seed % 10_000) as f64 / 10_000.0 * std::f64::consts::TAU;
        Self { config, phase }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.config.max_retries.is_none_or(|max| attempt < max)
    }

    /// Delay before reconnection attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
        let base = self.config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.config.max_delay.as_secs_f64());

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = 1.0 + jitter * (f64::from(attempt) * 7.3 + self.phase).sin();

        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
