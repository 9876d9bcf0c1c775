use crate::services::auth::{AuthSettings, ConfirmationSettings, PasswordSettings};
use crate::utils::HashCost;
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

/// Upper bound for every configured token and confirmation lifetime.
const MAX_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct AuthdConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` runs against the in-memory store (dev only).
    pub database: Option<DatabaseConfig>,
    pub jwt: JwtConfig,
    /// `None` logs outbound mail instead of sending it (dev only).
    pub smtp: Option<SmtpConfig>,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
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
pub enum JwtConfig {
    /// HS256 with a shared secret.
    Secret(SecretString),
    /// RS256 with PEM key files.
    Rsa {
        private_key_path: String,
        public_key_path: String,
    },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub from: String,
}

impl AuthdConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment: Environment = lookup("ENVIRONMENT")
            .unwrap_or_else(|| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let env = EnvReader {
            lookup,
            is_prod: environment == Environment::Prod,
        };

        let database = match env.optional("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: env.parse("DATABASE_MAX_CONNECTIONS", Some("10"))?,
                min_connections: env.parse("DATABASE_MIN_CONNECTIONS", Some("1"))?,
            }),
            None if env.is_prod => {
                return Err(missing_in_prod("DATABASE_URL"));
            }
            None => None,
        };

        let jwt = match env.optional("JWT_PRIVATE_KEY_PATH") {
            Some(private_key_path) => JwtConfig::Rsa {
                private_key_path,
                public_key_path: env.get_env("JWT_PUBLIC_KEY_PATH", None)?,
            },
            None => JwtConfig::Secret(SecretString::new(
                env.get_env("JWT_SECRET", Some("authd-dev-secret-do-not-use-in-prod"))?,
            )),
        };

        let smtp = match env.optional("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: env.parse("SMTP_PORT", Some("587"))?,
                user: env.get_env("SMTP_USER", None)?,
                password: SecretString::new(env.get_env("SMTP_PASSWORD", None)?),
                from: env.get_env("SMTP_FROM", None)?,
            }),
            None if env.is_prod => {
                return Err(missing_in_prod("SMTP_HOST"));
            }
            None => None,
        };

        let defaults = AuthSettings::default();
        let auth = AuthSettings {
            access_ttl: env.ttl("ACCESS_TOKEN_TTL_MINUTES", "60", Duration::try_minutes)?,
            refresh_ttl: env.ttl("REFRESH_TOKEN_TTL_HOURS", "120", Duration::try_hours)?,
            password: PasswordSettings {
                min_length: env.parse("PASSWORD_MIN_LENGTH", Some("6"))?,
                cost: HashCost {
                    memory_kib: env.parse_or(
                        "PASSWORD_HASH_MEMORY_KIB",
                        defaults.password.cost.memory_kib,
                    )?,
                    iterations: env.parse_or(
                        "PASSWORD_HASH_ITERATIONS",
                        defaults.password.cost.iterations,
                    )?,
                    parallelism: env.parse_or(
                        "PASSWORD_HASH_PARALLELISM",
                        defaults.password.cost.parallelism,
                    )?,
                },
            },
            sign_up: ConfirmationSettings {
                ttl: env.ttl("SIGNUP_CONFIRMATION_TTL_HOURS", "120", Duration::try_hours)?,
                link: env.get_env(
                    "SIGNUP_CONFIRMATION_LINK",
                    Some(defaults.sign_up.link.as_str()),
                )?,
                template: env.get_env(
                    "SIGNUP_CONFIRMATION_TEMPLATE",
                    Some(defaults.sign_up.template.as_str()),
                )?,
            },
            password_reset: ConfirmationSettings {
                ttl: env.ttl("RESETPW_CONFIRMATION_TTL_HOURS", "12", Duration::try_hours)?,
                link: env.get_env(
                    "RESETPW_CONFIRMATION_LINK",
                    Some(defaults.password_reset.link.as_str()),
                )?,
                template: env.get_env(
                    "RESETPW_CONFIRMATION_TEMPLATE",
                    Some(defaults.password_reset.template.as_str()),
                )?,
            },
        };

        let config = AuthdConfig {
            common,
            service_name: env.get_env("SERVICE_NAME", Some("authd"))?,
            log_level: env.get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: env.optional("OTLP_ENDPOINT"),
            environment,
            database,
            jwt,
            smtp,
            auth,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.auth.access_ttl <= Duration::zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_TTL_MINUTES must be positive"
            )));
        }

        if self.auth.refresh_ttl <= Duration::zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_TTL_HOURS must be positive"
            )));
        }

        if self.auth.sign_up.ttl <= Duration::zero()
            || self.auth.password_reset.ttl <= Duration::zero()
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Confirmation TTLs must be positive"
            )));
        }

        if self.auth.password.min_length == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_MIN_LENGTH must be at least 1"
            )));
        }

        if let Some(database) = &self.database {
            if database.min_connections > database.max_connections {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
                )));
            }
        }

        if self.environment == Environment::Prod {
            if let JwtConfig::Secret(secret) = &self.jwt {
                if secret.expose_secret().len() < 32 {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "JWT_SECRET must be at least 32 bytes in production"
                    )));
                }
            }
        }

        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
    is_prod: bool,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and non-empty.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    /// Defaults are only honored outside production.
    fn get_env(&self, key: &str, default: Option<&str>) -> Result<String, AppError> {
        match self.optional(key) {
            Some(val) => Ok(val),
            None => {
                if self.is_prod {
                    Err(missing_in_prod(key))
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

    fn parse<T>(&self, key: &str, default: Option<&str>) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get_env(key, default)?;
        raw.parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} is invalid ({}): {}", key, raw, e))
        })
    }

    /// Like `parse` but the default applies in every environment.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| {
                AppError::ConfigError(anyhow::anyhow!("{} is invalid ({}): {}", key, raw, e))
            }),
            None => Ok(default),
        }
    }

    /// A lifetime in the unit `to_duration` converts from, capped at `MAX_TTL_DAYS`.
    fn ttl(
        &self,
        key: &str,
        default: &str,
        to_duration: fn(i64) -> Option<Duration>,
    ) -> Result<Duration, AppError> {
        let value: i64 = self.parse(key, Some(default))?;
        match to_duration(value) {
            Some(ttl) if ttl <= Duration::days(MAX_TTL_DAYS) => Ok(ttl),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is out of range ({}): at most {} days",
                key,
                value,
                MAX_TTL_DAYS
            ))),
        }
    }
}

fn missing_in_prod(key: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(format!(
        "{} is required in production but not set",
        key
    )))
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
