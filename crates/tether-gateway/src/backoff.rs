//! Exponential backoff for reconnect attempts.

use std::time::Duration;

use tether_settings::ReconnectSettings;

/// Retry limits and delay shape.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Retries after the first failure.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0–1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for BackoffPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay_ms: settings.base_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            jitter_factor: settings.jitter_factor,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (zero-based), with fresh randomness.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }

    /// Delay before retry `attempt` with `random` in `[0, 1)`.
    ///
    /// `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_delay_ms);

        // Maps random [0,1) to [-jitter, +jitter]
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        let millis = ((capped as f64) * jitter).round().max(0.0) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter_factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 10,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter_factor,
        }
    }

    #[test]
    fn doubles_per_attempt() {
        let p = policy(0.0);
        assert_eq!(p.delay_with_random(0, 0.5), Duration::from_secs(1));
        assert_eq!(p.delay_with_random(1, 0.5), Duration::from_secs(2));
        assert_eq!(p.delay_with_random(3, 0.5), Duration::from_secs(8));
    }

    #[test]
    fn capped_at_max() {
        let p = policy(0.0);
        assert_eq!(p.delay_with_random(10, 0.5), Duration::from_secs(60));
        assert_eq!(p.delay_with_random(200, 0.5), Duration::from_secs(60));
    }

    #[test]
    fn jitter_is_symmetric() {
        let p = policy(0.2);
        assert_eq!(p.delay_with_random(0, 0.0), Duration::from_millis(800));
        assert_eq!(p.delay_with_random(0, 0.5), Duration::from_millis(1000));
        let high = p.delay_with_random(0, 0.999_999);
        assert!(high <= Duration::from_millis(1200));
        assert!(high > Duration::from_millis(1199));
    }

    #[test]
    fn random_delay_stays_in_band() {
        let p = policy(0.2);
        for attempt in 0..8 {
            let base = p.delay_with_random(attempt, 0.5);
            let d = p.delay(attempt);
            assert!(d >= base.mul_f64(0.8) && d <= base.mul_f64(1.2), "{d:?} vs {base:?}");
        }
    }

    #[test]
    fn from_settings() {
        let settings = ReconnectSettings {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_factor: 0.0,
        };
        let p = BackoffPolicy::from(&settings);
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.delay_with_random(5, 0.0), Duration::from_millis(100));
    }
}
