//! Environment-driven configuration, validated once at startup.

use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub ticket_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub ticket_ttl: Duration,
    pub max_conns_per_user: usize,
    pub max_total_conns: usize,
    pub ws_queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub allowed_origins: Vec<String>,
    pub enable_metrics: bool,
    pub outbox_sweep_interval: Duration,
    pub outbox_retention_days: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Config {
    /// Loads configuration from the process environment, applying `.env` via
    /// `dotenvy` first. Fails closed: a production deployment with a short or
    /// missing `JWT_SECRET` refuses to start rather than run insecurely.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Environment::parse(&env_or("APP_ENV", "development"));

        let jwt_secret = env_or("JWT_SECRET", "dev-only-insecure-secret-change-me-32+");
        let ticket_secret = env_or("TICKET_SECRET", &jwt_secret);

        if environment.is_production() && jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters in production");
        }

        Ok(Self {
            environment,
            server_port: env_or("SERVER_PORT", "8080").parse()?,
            database_url: env_or(
                "DATABASE_URL",
                "postgres://localhost/sanctum",
            ),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            jwt_secret,
            ticket_secret,
            access_ttl: Duration::from_secs(env_or("ACCESS_TOKEN_TTL_SECONDS", "900").parse()?),
            refresh_ttl: Duration::from_secs(
                env_or("REFRESH_TOKEN_TTL_SECONDS", "2592000").parse()?,
            ),
            ticket_ttl: Duration::from_secs(env_or("WS_TICKET_TTL_SECONDS", "30").parse()?),
            max_conns_per_user: env_or("MAX_CONNS_PER_USER", "12").parse()?,
            max_total_conns: env_or("MAX_TOTAL_CONNS", "20000").parse()?,
            ws_queue_capacity: env_or("WS_QUEUE_CAPACITY", "256").parse()?,
            heartbeat_interval: Duration::from_secs(
                env_or("WS_HEARTBEAT_INTERVAL_SECONDS", "30").parse()?,
            ),
            allowed_origins: env_or("ALLOWED_ORIGINS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            enable_metrics: truthy(&env_or("ENABLE_METRICS", "true")),
            outbox_sweep_interval: Duration::from_secs(
                env_or("OUTBOX_SWEEP_INTERVAL_SECONDS", "10").parse()?,
            ),
            outbox_retention_days: env_or("OUTBOX_RETENTION_DAYS", "7").parse()?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn truthy(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_known_aliases() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("Prod"), Environment::Production);
        assert_eq!(Environment::parse("test"), Environment::Test);
        assert_eq!(Environment::parse("whatever"), Environment::Development);
    }

    #[test]
    fn truthy_recognizes_common_spellings() {
        assert!(truthy("true"));
        assert!(truthy("YES"));
        assert!(truthy("1"));
        assert!(!truthy("0"));
        assert!(!truthy("nah"));
    }
}
