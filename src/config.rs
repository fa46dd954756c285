use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// One fixed-window quota: `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        RateLimitRule {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login: RateLimitRule,
    pub register: RateLimitRule,
    pub api: RateLimitRule,
    pub strict: RateLimitRule,
    /// Key clients by `X-Forwarded-For` / `Forwarded` rather than the socket peer.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            login: RateLimitRule::new(5, 15 * 60),
            register: RateLimitRule::new(3, 60 * 60),
            api: RateLimitRule::new(100, 15 * 60),
            strict: RateLimitRule::new(20, 15 * 60),
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    /// Counters older than this belong to no live window.
    pub fn longest_window(&self) -> Duration {
        [self.login, self.register, self.api, self.strict]
            .iter()
            .map(|rule| rule.window)
            .max()
            .unwrap_or_default()
    }
}

/// Everything the server needs, read once at startup and handed to constructors.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub require_email_verification: bool,
    pub expose_dev_tokens: bool,
    pub rate_limits: RateLimitConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            host: var_or("HOST", "127.0.0.1"),
            port: parse_or("PORT", 8080)?,
            database_url: required("DATABASE_URL")?,
            database_name: var_or("DATABASE_NAME", "bull_mart"),
            jwt_secret: required("JWT_SECRET")?,
            require_email_verification: parse_or("REQUIRE_EMAIL_VERIFICATION", false)?,
            expose_dev_tokens: parse_or("EXPOSE_DEV_TOKENS", false)?,
            rate_limits: RateLimitConfig {
                trust_forwarded_for: parse_or("TRUST_PROXY_HEADERS", false)?,
                ..RateLimitConfig::default()
            },
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn var_or(key: &'static str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        log::info!("{} not set, using default: {}", key, default);
        default.to_string()
    })
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
