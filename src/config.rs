//! Lifecycle configuration
use super::error::{ConsentError, Result};
use chrono::TimeDelta;

pub const DEFAULT_EXPIRY_ENV: &str = "CONSENT_DEFAULT_EXPIRY_SECONDS";
const DEFAULT_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Applied to pending consents created without an explicit expiry.
    pub default_expiry: TimeDelta,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_expiry: TimeDelta::seconds(DEFAULT_EXPIRY_SECS),
        }
    }
}

impl LifecycleConfig {
    pub fn with_default_expiry(mut self, expiry: TimeDelta) -> Self {
        self.default_expiry = expiry;
        self
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(DEFAULT_EXPIRY_ENV) {
            let secs: i64 = raw.trim().parse().map_err(|_| {
                ConsentError::Validation(format!("{DEFAULT_EXPIRY_ENV} is not an integer: '{raw}'"))
            })?;
            if secs <= 0 {
                return Err(ConsentError::Validation(format!(
                    "{DEFAULT_EXPIRY_ENV} must be positive, got {secs}"
                )));
            }
            config.default_expiry = TimeDelta::try_seconds(secs).ok_or_else(|| {
                ConsentError::Validation(format!("{DEFAULT_EXPIRY_ENV} is out of range: {secs}"))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_when_unset() {
        let config = LifecycleConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, LifecycleConfig::default());
        assert_eq!(config.default_expiry.num_days(), 7);
    }

    #[test]
    fn reads_expiry_seconds() {
        let config = LifecycleConfig::from_lookup(|key| {
            (key == DEFAULT_EXPIRY_ENV).then(|| " 3600 ".to_string())
        })
        .unwrap();
        assert_eq!(config.default_expiry, TimeDelta::seconds(3600));
    }

    #[test]
    fn rejects_malformed_values() {
        for raw in ["soon", "0", "-5", "1.5"] {
            let res = LifecycleConfig::from_lookup(|_| Some(raw.to_string()));
            assert!(matches!(res, Err(ConsentError::Validation(_))), "{raw}");
        }
    }
}
