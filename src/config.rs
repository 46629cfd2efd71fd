//! Validated policy configuration.

use std::time::Duration;

use crate::error::ConfigError;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Validated configuration for a [`WindowedPolicy`](crate::WindowedPolicy).
///
/// With the `serde` feature the durations (de)serialize as whole seconds, e.g.
/// `{"trip_threshold": 5, "threshold_window": 60, "half_open_timeout": 30}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawPolicyConfig", into = "RawPolicyConfig"))]
pub struct PolicyConfig {
    trip_threshold: u32,
    threshold_window: Duration,
    half_open_timeout: Duration,
}

impl PolicyConfig {
    /// Create a config with validation.
    pub fn new(
        trip_threshold: u32,
        threshold_window: Duration,
        half_open_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let cfg = Self { trip_threshold, threshold_window, half_open_timeout };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Start a builder seeded with [`PolicyConfig::default`].
    pub fn builder() -> PolicyConfigBuilder {
        PolicyConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.trip_threshold == 0 {
            return Err(ConfigError::InvalidTripThreshold { provided: self.trip_threshold });
        }
        if self.threshold_window < MIN_PERIOD {
            return Err(ConfigError::InvalidThresholdWindow(self.threshold_window));
        }
        if self.half_open_timeout < MIN_PERIOD {
            return Err(ConfigError::InvalidHalfOpenTimeout(self.half_open_timeout));
        }
        Ok(())
    }

    /// Classified failures inside the window needed to trip.
    pub fn trip_threshold(&self) -> u32 {
        self.trip_threshold
    }

    /// Sliding window over which failures are counted.
    pub fn threshold_window(&self) -> Duration {
        self.threshold_window
    }

    /// Cooldown after tripping before a reset attempt is permitted.
    pub fn half_open_timeout(&self) -> Duration {
        self.half_open_timeout
    }
}

impl Default for PolicyConfig {
    /// 5 failures per 60s trips the breaker; reset attempts after 30s.
    fn default() -> Self {
        Self {
            trip_threshold: 5,
            threshold_window: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder for [`PolicyConfig`].
#[derive(Debug, Clone)]
pub struct PolicyConfigBuilder {
    cfg: PolicyConfig,
}

impl Default for PolicyConfigBuilder {
    fn default() -> Self {
        Self { cfg: PolicyConfig::default() }
    }
}

impl PolicyConfigBuilder {
    /// Failures within the window that trip the breaker.
    pub fn trip_threshold(mut self, threshold: u32) -> Self {
        self.cfg.trip_threshold = threshold;
        self
    }

    /// Window length in seconds.
    pub fn threshold_window_secs(mut self, secs: u64) -> Self {
        self.cfg.threshold_window = Duration::from_secs(secs);
        self
    }

    /// Cooldown in seconds.
    pub fn half_open_timeout_secs(mut self, secs: u64) -> Self {
        self.cfg.half_open_timeout = Duration::from_secs(secs);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<PolicyConfig, ConfigError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct RawPolicyConfig {
    trip_threshold: u32,
    threshold_window: u64,
    half_open_timeout: u64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawPolicyConfig> for PolicyConfig {
    type Error = ConfigError;

    fn try_from(raw: RawPolicyConfig) -> Result<Self, Self::Error> {
        PolicyConfig::new(
            raw.trip_threshold,
            Duration::from_secs(raw.threshold_window),
            Duration::from_secs(raw.half_open_timeout),
        )
    }
}

#[cfg(feature = "serde")]
impl From<PolicyConfig> for RawPolicyConfig {
    fn from(cfg: PolicyConfig) -> Self {
        Self {
            trip_threshold: cfg.trip_threshold,
            threshold_window: cfg.threshold_window.as_secs(),
            half_open_timeout: cfg.half_open_timeout.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_trip_threshold() {
        let err = PolicyConfig::new(0, Duration::from_secs(10), Duration::from_secs(5))
            .expect_err("zero threshold should be invalid");
        assert!(matches!(err, ConfigError::InvalidTripThreshold { provided: 0 }));
    }

    #[test]
    fn rejects_sub_second_periods() {
        let err = PolicyConfig::new(1, Duration::from_millis(500), Duration::from_secs(5))
            .expect_err("window below one second");
        assert!(matches!(err, ConfigError::InvalidThresholdWindow(_)));

        let err = PolicyConfig::builder().half_open_timeout_secs(0).build().expect_err("zero cooldown");
        assert_eq!(err, ConfigError::InvalidHalfOpenTimeout(Duration::ZERO));
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = PolicyConfig::builder()
            .trip_threshold(2)
            .threshold_window_secs(10)
            .half_open_timeout_secs(5)
            .build()
            .expect("valid config");
        assert_eq!(cfg.trip_threshold(), 2);
        assert_eq!(cfg.threshold_window(), Duration::from_secs(10));
        assert_eq!(cfg.half_open_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn default_is_valid() {
        let cfg = PolicyConfig::default();
        assert_eq!(PolicyConfig::builder().build(), Ok(cfg));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_whole_seconds_and_validates() {
        let cfg: PolicyConfig = serde_json::from_str(
            r#"{"trip_threshold": 3, "threshold_window": 20, "half_open_timeout": 7}"#,
        )
        .expect("valid json config");
        assert_eq!(cfg.threshold_window(), Duration::from_secs(20));

        let bad = serde_json::from_str::<PolicyConfig>(
            r#"{"trip_threshold": 0, "threshold_window": 20, "half_open_timeout": 7}"#,
        );
        assert!(bad.is_err());
    }
}
