//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STARSHOP_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STARSHOP_FRONTEND_URL` - Public URL of the Mini App frontend
//! - `TELEGRAM_BOT_TOKEN` - Bot token issued by `@BotFather`
//!
//! ## Optional
//! - `STARSHOP_HOST` - Bind address (default: 127.0.0.1)
//! - `STARSHOP_PORT` - Listen port (default: 8000)
//! - `TELEGRAM_WEBHOOK_SECRET` - Expected `X-Telegram-Bot-Api-Secret-Token` header value
//! - `TELEGRAM_API_URL` - Bot API base URL (default: <https://api.telegram.org>)
//! - `INTERNAL_API_SECRET` - Shared secret for trusted bot-originated logins
//! - `ADMIN_TELEGRAM_IDS` - Comma separated Telegram ids of shop operators
//! - `INIT_DATA_TTL_SECS` - Maximum age of Mini App init data (default: 86400)
//! - `STAR_RATE` - Shop currency units per Telegram Star (default: 2.015)
//! - `LONGPOLL_TIMEOUT_SECS` - Maximum long-poll wait (default: 25)
//! - `LONGPOLL_INTERVAL_MS` - Long-poll re-check interval (default: 1000)
//! - `CHAT_WELCOME_MESSAGE` - Message posted into a freshly paid order's chat (empty disables)
//! - `RATE_LIMIT_ENABLED` - Enable rate limiting on auth and payment routes (default: true)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use starshop_core::{StarRate, TelegramId};
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const MAX_WEBHOOK_SECRET_LENGTH: usize = 256;

/// Default welcome text posted by an operator when an order is paid.
pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Thank you for your order! An operator will reply here shortly.";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Telegram ids allowed to act as shop operators.
///
/// Admin status is always derived from this list at request time and never
/// read back from storage or client input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowList(HashSet<TelegramId>);

impl AdminAllowList {
    /// Build an allow-list from explicit ids.
    pub fn new(ids: impl IntoIterator<Item = TelegramId>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Parse a comma or whitespace separated list of Telegram ids.
    ///
    /// # Errors
    ///
    /// Returns the offending token if any entry is not an integer.
    pub fn parse(raw: &str) -> Result<Self, String> {
        raw.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| token.parse::<TelegramId>().map_err(|_| token.to_string()))
            .collect::<Result<HashSet<_>, _>>()
            .map(Self)
    }

    /// Whether the given Telegram user is an operator.
    #[must_use]
    pub fn contains(&self, telegram_id: TelegramId) -> bool {
        self.0.contains(&telegram_id)
    }

    /// Iterate over the operator ids.
    pub fn iter(&self) -> impl Iterator<Item = TelegramId> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Long-poll timing for chat message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongPollConfig {
    /// Upper bound a single poll request may be held open.
    pub timeout: Duration,
    /// Delay between two store checks.
    pub interval: Duration,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            interval: Duration::from_secs(1),
        }
    }
}

/// Telegram Bot API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token, also the key material for init data signatures
    pub bot_token: SecretString,
    /// Expected value of the `X-Telegram-Bot-Api-Secret-Token` webhook header
    pub webhook_secret: Option<SecretString>,
    /// Bot API base URL
    pub api_url: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Server application configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public URL of the Mini App frontend
    pub frontend_url: String,
    /// Telegram Bot API configuration
    pub telegram: TelegramConfig,
    /// Shared secret for bot-originated logins; the channel is disabled when unset
    pub internal_api_secret: Option<SecretString>,
    /// Operator allow-list
    pub admins: AdminAllowList,
    /// Maximum accepted age of init data
    pub init_data_ttl: Duration,
    /// Conversion rate from shop prices to Stars
    pub star_rate: StarRate,
    /// Chat long-poll timing
    pub long_poll: LongPollConfig,
    /// Operator message posted when an order is paid
    pub welcome_message: Option<String>,
    /// Whether auth and payment routes are rate limited
    pub rate_limit_enabled: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl ServerConfig {
    /// Build a configuration with default tuning for the given essentials.
    #[must_use]
    pub fn new(
        database_url: SecretString,
        frontend_url: impl Into<String>,
        bot_token: SecretString,
    ) -> Self {
        Self {
            database_url,
            host: IpAddr::from([127, 0, 0, 1]),
            port: 8000,
            frontend_url: frontend_url.into(),
            telegram: TelegramConfig {
                bot_token,
                webhook_secret: None,
                api_url: "https://api.telegram.org".to_string(),
            },
            internal_api_secret: None,
            admins: AdminAllowList::default(),
            init_data_ttl: Duration::from_secs(86_400),
            star_rate: StarRate::default(),
            long_poll: LongPollConfig::default(),
            welcome_message: Some(DEFAULT_WELCOME_MESSAGE.to_string()),
            rate_limit_enabled: true,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STARSHOP_DATABASE_URL")?;
        let frontend_url = get_required_env("STARSHOP_FRONTEND_URL")?;
        url::Url::parse(&frontend_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STARSHOP_FRONTEND_URL".to_string(), e.to_string())
        })?;
        let bot_token = get_required_env("TELEGRAM_BOT_TOKEN")?;
        validate_bot_token(&bot_token, "TELEGRAM_BOT_TOKEN")?;

        let mut config = Self::new(database_url, frontend_url, SecretString::from(bot_token));

        config.host = parse_env("STARSHOP_HOST", config.host)?;
        config.port = parse_env("STARSHOP_PORT", config.port)?;

        config.telegram.webhook_secret = get_optional_env("TELEGRAM_WEBHOOK_SECRET")
            .map(|value| validate_webhook_secret(&value, "TELEGRAM_WEBHOOK_SECRET").map(|()| value))
            .transpose()?
            .map(SecretString::from);
        config.telegram.api_url = get_env_or_default("TELEGRAM_API_URL", &config.telegram.api_url)
            .trim_end_matches('/')
            .to_string();
        config.internal_api_secret = get_optional_validated_secret("INTERNAL_API_SECRET")?;

        if let Some(raw) = get_optional_env("ADMIN_TELEGRAM_IDS") {
            config.admins = AdminAllowList::parse(&raw).map_err(|token| {
                ConfigError::InvalidEnvVar(
                    "ADMIN_TELEGRAM_IDS".to_string(),
                    format!("not a Telegram id: {token}"),
                )
            })?;
        }

        config.init_data_ttl = Duration::from_secs(parse_env(
            "INIT_DATA_TTL_SECS",
            config.init_data_ttl.as_secs(),
        )?);
        config.star_rate = parse_env("STAR_RATE", config.star_rate)?;
        config.long_poll = LongPollConfig {
            timeout: Duration::from_secs(parse_env(
                "LONGPOLL_TIMEOUT_SECS",
                config.long_poll.timeout.as_secs(),
            )?),
            interval: Duration::from_millis(parse_env("LONGPOLL_INTERVAL_MS", 1000_u64)?),
        };
        if config.long_poll.interval.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "LONGPOLL_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if let Ok(message) = std::env::var("CHAT_WELCOME_MESSAGE") {
            config.welcome_message = Some(message).filter(|m| !m.trim().is_empty());
        }
        config.rate_limit_enabled = parse_env("RATE_LIMIT_ENABLED", config.rate_limit_enabled)?;
        config.sentry_dsn = get_optional_env("SENTRY_DSN");
        config.sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");

        Ok(config)
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, keeping `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Validate the `<bot id>:<secret>` shape of a `@BotFather` token.
fn validate_bot_token(token: &str, var_name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEnvVar(var_name.to_string(), reason.to_string());

    let (bot_id, secret) = token
        .split_once(':')
        .ok_or_else(|| invalid("expected <bot id>:<secret>"))?;
    if bot_id.is_empty() || !bot_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("bot id must be numeric"));
    }
    if secret.len() < 30
        || !secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(invalid("malformed token secret"));
    }
    Ok(())
}

/// Telegram only accepts `A-Z`, `a-z`, `0-9`, `_` and `-` in webhook secrets.
fn validate_webhook_secret(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    if secret.len() > MAX_WEBHOOK_SECRET_LENGTH
        || !secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            "must be 1-256 characters of A-Z, a-z, 0-9, _ or -".to_string(),
        ));
    }
    validate_secret_strength(secret, var_name)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate an optional secret from environment.
fn get_optional_validated_secret(key: &str) -> Result<Option<SecretString>, ConfigError> {
    get_optional_env(key)
        .map(|value| {
            validate_secret_strength(&value, key)?;
            Ok(SecretString::from(value))
        })
        .transpose()
}

/// Compare a presented secret with the configured one in constant time.
#[must_use]
pub fn secret_matches(expected: &SecretString, presented: &str) -> bool {
    crate::telegram::constant_time_eq(expected.expose_secret().as_bytes(), presented.as_bytes())
}
