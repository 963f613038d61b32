//! Runtime configuration read from the process environment.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Deployment environment, taken from `NODE_ENV`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
    /// Unset or unrecognized; behaves like neither of the above.
    Other(String),
}

impl Environment {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("development") => Self::Development,
            Some("production") => Self::Production,
            Some("test") => Self::Test,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
            Self::Other(s) => s,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-window rate limit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    /// Key clients by `X-Forwarded-For` / `X-Real-IP` (`TRUST_PROXY=true`).
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT_MAX,
            window: Duration::from_millis(DEFAULT_RATE_LIMIT_WINDOW_MS),
            trust_proxy: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub port: u16,
    /// Extra allowed CORS origins from `CORS_ORIGIN`.
    pub cors_origins: Vec<String>,
    pub enable_swagger: bool,
    pub database_url: Option<String>,
    pub rate_limit: RateLimitConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Other(String::new()),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            enable_swagger: false,
            database_url: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read the process environment. Call [`load_dotenv`] first to pick up
    /// a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Environment::parse(lookup("NODE_ENV").as_deref());

        let cors_origins = lookup("CORS_ORIGIN")
            .map(|raw| split_origins(&raw))
            .unwrap_or_default();

        let enable_swagger = lookup("ENABLE_SWAGGER").as_deref() == Some("true");

        let port = parse_var(&lookup, "PORT", DEFAULT_PORT)?;

        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());

        let max_requests = parse_var(&lookup, "RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX)?;
        if max_requests == 0 {
            return Err(ConfigError::InvalidVar {
                name: "RATE_LIMIT_MAX",
                value: "0".to_string(),
                reason: "limit must be positive".to_string(),
            });
        }
        let window_ms = parse_var(&lookup, "RATE_LIMIT_WINDOW_MS", DEFAULT_RATE_LIMIT_WINDOW_MS)?;
        if window_ms == 0 {
            return Err(ConfigError::InvalidVar {
                name: "RATE_LIMIT_WINDOW_MS",
                value: "0".to_string(),
                reason: "window must be positive".to_string(),
            });
        }

        Ok(Self {
            environment,
            port,
            cors_origins,
            enable_swagger,
            database_url,
            rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_millis(window_ms),
                trust_proxy: lookup("TRUST_PROXY").as_deref() == Some("true"),
            },
        })
    }

    /// Interactive docs are served outside production, or when forced on.
    pub fn docs_enabled(&self) -> bool {
        !self.environment.is_production() || self.enable_swagger
    }

    pub fn request_logging_enabled(&self) -> bool {
        !self.environment.is_test()
    }

    pub fn database_enabled(&self) -> bool {
        !self.environment.is_test()
    }
}

/// Load `.env` into the process environment. A missing file is fine; other
/// failures are returned so the caller can log them once tracing is up.
pub fn load_dotenv() -> Result<(), dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
