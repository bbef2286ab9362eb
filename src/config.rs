//! Runtime configuration, loaded from the environment (and `.env` via
//! dotenv in `main`). Every knob has a default except the credentials
//! and the market id; a missing or unparsable value is a startup error.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;

use crate::error::ConfigError;

#[derive(Debug)]
pub struct Settings {
    // Venue endpoints
    pub polymarket_api_url: String,
    pub polymarket_ws_url: String,

    // Credentials
    pub private_key: SecretString,

    // Market selection
    pub market_id: String,
    pub market_discovery_enabled: bool,

    // Risk limits
    pub max_exposure_usd: Decimal,
    pub min_exposure_usd: Decimal,
    pub target_inventory_balance: Decimal,

    // Quote shape
    pub base_size: Decimal,
    pub min_size: Decimal,
    pub max_size: Decimal,
    pub min_half_spread: Decimal,
    pub widen_factor: Decimal,
    pub skew_coefficient: Decimal,

    // Loop timing
    pub quote_refresh_rate_ms: u64,
    pub cancel_replace_interval_ms: u64,
    pub order_lifetime_ms: u64,

    // Redemption sweeper
    pub auto_redeem_enabled: bool,
    pub redeem_threshold_usd: Decimal,

    // Observability
    pub metrics_host: String,
    pub metrics_port: u16,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self {
            polymarket_api_url: var_or("POLYMARKET_API_URL", "https://clob.polymarket.com"),
            polymarket_ws_url: var_or("POLYMARKET_WS_URL", "wss://clob-ws.polymarket.com"),
            private_key: SecretString::from(require("PRIVATE_KEY")?),
            market_id: require("MARKET_ID")?,
            market_discovery_enabled: parse_or("MARKET_DISCOVERY_ENABLED", true)?,
            max_exposure_usd: parse_or("MAX_EXPOSURE_USD", dec!(1000))?,
            min_exposure_usd: parse_or("MIN_EXPOSURE_USD", Decimal::ZERO)?,
            target_inventory_balance: parse_or("TARGET_INVENTORY_BALANCE", dec!(0.5))?,
            base_size: parse_or("BASE_SIZE", dec!(100))?,
            min_size: parse_or("MIN_SIZE", dec!(5))?,
            max_size: parse_or("MAX_SIZE", dec!(500))?,
            min_half_spread: parse_or("MIN_HALF_SPREAD", dec!(0.01))?,
            widen_factor: parse_or("WIDEN_FACTOR", dec!(1.0))?,
            skew_coefficient: parse_or("SKEW_COEFFICIENT", dec!(0.05))?,
            quote_refresh_rate_ms: parse_or("QUOTE_REFRESH_RATE_MS", 1_000)?,
            cancel_replace_interval_ms: parse_or("CANCEL_REPLACE_INTERVAL_MS", 1_000)?,
            order_lifetime_ms: parse_or("ORDER_LIFETIME_MS", 60_000)?,
            auto_redeem_enabled: parse_or("AUTO_REDEEM_ENABLED", true)?,
            redeem_threshold_usd: parse_or("REDEEM_THRESHOLD_USD", dec!(1.0))?,
            metrics_host: var_or("METRICS_HOST", "127.0.0.1"),
            metrics_port: parse_or("METRICS_PORT", 9090)?,
            log_level: var_or("LOG_LEVEL", "info"),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.polymarket_api_url).map_err(|_| ConfigError::Invalid {
            key: "POLYMARKET_API_URL",
            value: self.polymarket_api_url.clone(),
        })?;
        url::Url::parse(&self.polymarket_ws_url).map_err(|_| ConfigError::Invalid {
            key: "POLYMARKET_WS_URL",
            value: self.polymarket_ws_url.clone(),
        })?;
        if self.market_id.trim().is_empty() {
            return Err(ConfigError::Missing("MARKET_ID"));
        }
        if self.max_exposure_usd <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                key: "MAX_EXPOSURE_USD",
                value: self.max_exposure_usd.to_string(),
            });
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::Invalid {
                key: "MIN_SIZE",
                value: format!("{} > MAX_SIZE {}", self.min_size, self.max_size),
            });
        }
        Ok(())
    }
}

fn var_or(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parse_or<T: ParseableFlag>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => T::parse_flagged(&raw).ok_or(ConfigError::Invalid {
            key,
            value: raw,
        }),
    }
}

/// Env-var parsing with the usual boolean spellings ("1"/"true").
pub trait ParseableFlag: Sized {
    fn parse_flagged(raw: &str) -> Option<Self>;
}

impl ParseableFlag for bool {
    fn parse_flagged(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        }
    }
}

macro_rules! impl_parseable {
    ($($t:ty),*) => {
        $(impl ParseableFlag for $t {
            fn parse_flagged(raw: &str) -> Option<Self> {
                raw.trim().parse().ok()
            }
        })*
    };
}

impl_parseable!(u16, u64, Decimal);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_spellings() {
        assert_eq!(bool::parse_flagged("1"), Some(true));
        assert_eq!(bool::parse_flagged("TRUE"), Some(true));
        assert_eq!(bool::parse_flagged("false"), Some(false));
        assert_eq!(bool::parse_flagged("0"), Some(false));
        assert_eq!(bool::parse_flagged("maybe"), None);
    }

    #[test]
    fn decimal_parse() {
        assert_eq!(Decimal::parse_flagged("0.015"), Some(dec!(0.015)));
        assert_eq!(Decimal::parse_flagged("x"), None);
    }
}
