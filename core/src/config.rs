use std::env;
use std::time::Duration;

/// Configuration the core reads to parameterize idempotency and the fee
/// engine. Values come from environment variables already loaded by the
/// process (the service binary loads `.env` via `dotenvy` before calling
/// `from_env`); the core itself never touches the filesystem.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub idempotency_enabled: bool,
    pub idempotency_ttl: Option<Duration>,
    pub default_currency: String,
    pub fee_provider_default: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            idempotency_enabled: true,
            idempotency_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            default_currency: "USD".to_string(),
            fee_provider_default: "stripe".to_string(),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let idempotency_enabled = env::var("IDEMPOTENCY_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.idempotency_enabled);

        let idempotency_ttl = match env::var("IDEMPOTENCY_TTL_SECONDS") {
            Ok(raw) if raw.eq_ignore_ascii_case("none") => None,
            Ok(raw) => raw
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
                .or(defaults.idempotency_ttl),
            Err(_) => defaults.idempotency_ttl,
        };

        let default_currency =
            env::var("DEFAULT_CURRENCY").unwrap_or(defaults.default_currency);

        let fee_provider_default =
            env::var("FEE_PROVIDER_DEFAULT").unwrap_or(defaults.fee_provider_default);

        Self {
            idempotency_enabled,
            idempotency_ttl,
            default_currency,
            fee_provider_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_idempotency_with_a_one_day_ttl() {
        let config = CoreConfig::default();
        assert!(config.idempotency_enabled);
        assert_eq!(config.idempotency_ttl, Some(Duration::from_secs(86_400)));
        assert_eq!(config.default_currency, "USD");
    }
}
