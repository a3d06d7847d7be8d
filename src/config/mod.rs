use secrecy::{ExposeSecret, Secret};
use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub tenancy: TenancyConfig,
    pub token: TokenConfig,
    pub pool: PoolConfig,
    pub credential_cache: CredentialCacheConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Master secret: source for both the credential-cipher subkey and the
    /// token-signing subkey.
    pub app_secret: Secret<String>,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// Registered root domain; a bare root host maps to the default tenant.
    pub root_domain: String,
    /// Subdomain a bare root or loopback host resolves to.
    pub default_tenant_subdomain: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Physical connection cap per tenant.
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub idle_eviction: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CredentialCacheConfig {
    pub ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let config = AppConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("tenancy-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            port: parse_env("PORT", Some("8080"), is_prod)?,
            database: DatabaseConfig {
                url: get_env(
                    "DATABASE_URL",
                    Some("postgres://localhost/tenancy"),
                    is_prod,
                )?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            security: SecurityConfig {
                app_secret: Secret::new(get_env("APP_SECRET", None, is_prod)?),
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            },
            tenancy: TenancyConfig {
                root_domain: get_env("ROOT_DOMAIN", Some("localhost"), is_prod)?,
                default_tenant_subdomain: get_env(
                    "DEFAULT_TENANT_SUBDOMAIN",
                    Some("demo"),
                    is_prod,
                )?,
            },
            token: TokenConfig {
                ttl_minutes: parse_env("TOKEN_TTL_MINUTES", Some("30"), is_prod)?,
            },
            pool: PoolConfig {
                max_size: parse_env("TENANT_POOL_MAX_SIZE", Some("10"), is_prod)?,
                acquire_timeout: Duration::from_secs(parse_env(
                    "TENANT_POOL_ACQUIRE_TIMEOUT_SECONDS",
                    Some("5"),
                    is_prod,
                )?),
                idle_eviction: Duration::from_secs(
                    60 * parse_env::<u64>("TENANT_POOL_IDLE_EVICTION_MINUTES", Some("30"), is_prod)?,
                ),
                sweep_interval: Duration::from_secs(parse_env(
                    "TENANT_POOL_SWEEP_INTERVAL_SECONDS",
                    Some("60"),
                    is_prod,
                )?),
            },
            credential_cache: CredentialCacheConfig {
                ttl: Duration::from_secs(
                    60 * parse_env::<u64>("CREDENTIAL_CACHE_TTL_MINUTES", Some("15"), is_prod)?,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.pool.max_size == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TENANT_POOL_MAX_SIZE must be greater than 0"
            )));
        }

        if self.token.ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOKEN_TTL_MINUTES must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.app_secret.expose_secret().len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "APP_SECRET must be at least 32 bytes in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, default, is_prod)?.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} is not valid: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
