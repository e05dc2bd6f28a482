//! Checkout tuning knobs.

use std::time::Duration;

/// Settings for a [`CheckoutOrchestrator`](crate::CheckoutOrchestrator).
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// The store's fixed currency, passed to the payment provider.
    pub currency: String,
    /// Upper bound on a single payment call.
    pub payment_timeout: Duration,
    /// Upper bound on the unit of work commit.
    pub commit_timeout: Duration,
    /// How long a captured-but-unpersisted payment waits for a client retry
    /// before it is reversed.
    pub reversal_grace: Duration,
}

impl CheckoutConfig {
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_payment_timeout(mut self, timeout: Duration) -> Self {
        self.payment_timeout = timeout;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn with_reversal_grace(mut self, grace: Duration) -> Self {
        self.reversal_grace = grace;
        self
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "GBP".to_string(),
            payment_timeout: Duration::from_secs(10),
            commit_timeout: Duration::from_secs(5),
            reversal_grace: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CheckoutConfig::default();
        assert_eq!(config.currency, "GBP");
        assert_eq!(config.payment_timeout, Duration::from_secs(10));
        assert_eq!(config.commit_timeout, Duration::from_secs(5));
        assert_eq!(config.reversal_grace, Duration::from_secs(60));
    }

    #[test]
    fn test_builders_override() {
        let config = CheckoutConfig::default()
            .with_currency("EUR")
            .with_payment_timeout(Duration::from_millis(250))
            .with_commit_timeout(Duration::from_millis(100))
            .with_reversal_grace(Duration::ZERO);
        assert_eq!(config.currency, "EUR");
        assert_eq!(config.payment_timeout, Duration::from_millis(250));
        assert_eq!(config.commit_timeout, Duration::from_millis(100));
        assert_eq!(config.reversal_grace, Duration::ZERO);
    }
}
