use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> =
    Lazy::new(|| read_flag("ALLOW_MIGRATION_FAILURE", false));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDriver {
    Postgres,
    Memory,
}

impl StoreDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreDriver::Postgres => "postgres",
            StoreDriver::Memory => "memory",
        }
    }
}

fn parse_store_driver() -> StoreDriver {
    match std::env::var("ENTITLEMENTS_STORE") {
        Ok(raw) => {
            let normalized = raw.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "" | "postgres" => StoreDriver::Postgres,
                "memory" => StoreDriver::Memory,
                other => panic!(
                    "unsupported ENTITLEMENTS_STORE value '{other}'; expected 'postgres' or 'memory'"
                ),
            }
        }
        Err(_) => StoreDriver::Postgres,
    }
}

/// Backing store for bundles and transactions. Defaults to `postgres`.
pub static STORE_DRIVER: Lazy<StoreDriver> = Lazy::new(parse_store_driver);

/// key: maintenance-config -> expiry reconciliation and stale sweep cadence
pub static MAINTENANCE_SCAN_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("MAINTENANCE_SCAN_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// key: maintenance-config -> age after which an unpaid transaction is outdated
pub static TRANSACTION_STALE_AFTER_HOURS: Lazy<i64> = Lazy::new(|| {
    std::env::var("TRANSACTION_STALE_AFTER_HOURS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(24)
});

/// Prefix of every transaction description shown on the provider's payment page.
pub static PAYMENT_DESCRIPTION_PREFIX: Lazy<String> = Lazy::new(|| {
    read_optional_env("PAYMENT_DESCRIPTION_PREFIX").unwrap_or_else(|| "PLAYMAKER.PRO".to_string())
});

/// Base URL of the Tpay REST API.
pub static TPAY_API_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("TPAY_API_URL")
        .unwrap_or_else(|| "https://openapi.sandbox.tpay.com".to_string())
});

pub static TPAY_CLIENT_ID: Lazy<String> =
    Lazy::new(|| read_optional_env("TPAY_CLIENT_ID").unwrap_or_default());

pub static TPAY_CLIENT_SECRET: Lazy<String> =
    Lazy::new(|| read_optional_env("TPAY_CLIENT_SECRET").unwrap_or_default());

pub static TPAY_SCOPE: Lazy<String> =
    Lazy::new(|| read_optional_env("TPAY_SCOPE").unwrap_or_else(|| "read write".to_string()));

/// Shared secret mixed into the callback checksum.
pub static TPAY_SECURITY_CODE: Lazy<String> =
    Lazy::new(|| read_optional_env("TPAY_SECURITY_CODE").unwrap_or_default());

/// Whether callbacks flagged as test mode may settle transactions. Defaults to `false`.
pub static TPAY_ACCEPT_TEST_MODE: Lazy<bool> =
    Lazy::new(|| read_flag("TPAY_ACCEPT_TEST_MODE", false));

pub static TPAY_SUCCESS_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("TPAY_SUCCESS_URL")
        .unwrap_or_else(|| "http://localhost:3000/payment/success".to_string())
});

pub static TPAY_ERROR_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("TPAY_ERROR_URL")
        .unwrap_or_else(|| "http://localhost:3000/payment/error".to_string())
});

pub static TPAY_NOTIFICATION_EMAIL: Lazy<String> =
    Lazy::new(|| read_optional_env("TPAY_NOTIFICATION_EMAIL").unwrap_or_default());

/// Request timeout for provider calls. Defaults to 10 seconds.
pub static TPAY_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("TPAY_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(default)
}
