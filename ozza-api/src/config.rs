/// Configuration management for the API server
///
/// Configuration is read from environment variables, with a `.env` file
/// picked up in development.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `API_HOST` / `API_PORT`: bind address (default: 0.0.0.0:8080)
/// - `JWT_SECRET`: HS256 signing secret, at least 32 characters (required)
/// - `APP_BASE_URL`: public web origin used in invite and checkout links
/// - `CORS_ORIGINS`: comma-separated origins, `*` for permissive (default: `*`)
/// - `PRODUCTION`: enables HSTS and `Secure` cookies (default: false)
/// - `INVITE_TTL_HOURS`: invitation lifetime (default: 168)
/// - `INVITE_SWEEP_INTERVAL_SECS`: expiry sweep period (default: 300)
/// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`: payments provider credentials
/// - `STRIPE_PRICE_STARTER`, `STRIPE_PRICE_PRO`, `STRIPE_PRICE_ENTERPRISE`: price ids
///
/// # Example
///
/// ```no_run
/// use ozza_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use ozza_shared::payments::{PriceTable, StripeConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,

    pub database: DatabaseConfig,

    pub jwt: JwtConfig,

    pub invitations: InvitationConfig,

    pub stripe: StripeSettings,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,

    pub port: u16,

    /// Public web origin, without a trailing slash
    pub app_base_url: String,

    pub cors_origins: Vec<String>,

    /// HSTS header and `Secure` cookies
    pub production: bool,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,

    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct InvitationConfig {
    pub ttl_hours: i64,

    pub sweep_interval_secs: u64,
}

impl InvitationConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Payments provider settings; everything is optional so the server runs
/// without billing in development.
#[derive(Debug, Clone, Default)]
pub struct StripeSettings {
    pub secret_key: Option<String>,

    pub webhook_secret: Option<String>,

    pub price_starter: Option<String>,

    pub price_pro: Option<String>,

    pub price_enterprise: Option<String>,
}

impl StripeSettings {
    pub fn provider_config(&self) -> StripeConfig {
        StripeConfig {
            secret_key: self.secret_key.clone(),
            webhook_secret: self.webhook_secret.clone(),
            prices: PriceTable {
                starter: self.price_starter.clone(),
                pro: self.price_pro.clone(),
                enterprise: self.price_enterprise.clone(),
            },
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Fails when a required variable is missing, a numeric variable does not
    /// parse, or `JWT_SECRET` is shorter than 32 characters.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = optional("DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let jwt_secret = optional("JWT_SECRET")
            .ok_or_else(|| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!("JWT_SECRET must be at least {} characters long", MIN_JWT_SECRET_LEN);
        }

        let ttl_hours: i64 = parsed("INVITE_TTL_HOURS", 168)?;
        if ttl_hours <= 0 {
            anyhow::bail!("INVITE_TTL_HOURS must be positive");
        }

        let config = Self {
            api: ApiConfig {
                host: optional("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed("API_PORT", 8080)?,
                app_base_url: optional("APP_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:3000".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                cors_origins: parse_origins(&optional("CORS_ORIGINS").unwrap_or_else(|| "*".to_string())),
                production: optional("PRODUCTION").as_deref().is_some_and(parse_bool),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            jwt: JwtConfig { secret: jwt_secret },
            invitations: InvitationConfig {
                ttl_hours,
                sweep_interval_secs: parsed("INVITE_SWEEP_INTERVAL_SECS", 300)?,
            },
            stripe: StripeSettings {
                secret_key: optional("STRIPE_SECRET_KEY"),
                webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
                price_starter: optional("STRIPE_PRICE_STARTER"),
                price_pro: optional("STRIPE_PRICE_PRO"),
                price_enterprise: optional("STRIPE_PRICE_ENTERPRISE"),
            },
        };

        if config.api.production && config.api.cors_origins.iter().any(|o| o == "*") {
            tracing::warn!("CORS_ORIGINS is permissive in production");
        }
        if config.stripe.secret_key.is_none() {
            tracing::warn!("STRIPE_SECRET_KEY not set; checkout and portal are disabled");
        }

        Ok(config)
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Whether CORS accepts any origin
    pub fn cors_is_permissive(&self) -> bool {
        self.api.cors_origins.iter().any(|o| o == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                app_base_url: "https://app.ozza.test".to_string(),
                cors_origins: vec!["https://app.ozza.test".to_string()],
                production: false,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/ozza_test".to_string(),
                max_connections: 10,
            },
            jwt: JwtConfig {
                secret: "test-secret-key-at-least-32-bytes-long".to_string(),
            },
            invitations: InvitationConfig {
                ttl_hours: 168,
                sweep_interval_secs: 300,
            },
            stripe: StripeSettings::default(),
        }
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(config().bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_invitation_durations() {
        let invitations = config().invitations;
        assert_eq!(invitations.ttl(), chrono::Duration::days(7));
        assert_eq!(invitations.sweep_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("https://a.test/, https://b.test ,,"),
            vec!["https://a.test".to_string(), "https://b.test".to_string()]
        );
        assert_eq!(parse_origins("*"), vec!["*".to_string()]);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_cors_permissive() {
        let mut config = config();
        assert!(!config.cors_is_permissive());
        config.api.cors_origins.push("*".to_string());
        assert!(config.cors_is_permissive());
    }

    #[test]
    fn test_stripe_provider_config() {
        let mut config = config();
        config.stripe.price_pro = Some("price_pro".to_string());

        let provider = config.stripe.provider_config();
        assert!(provider.secret_key.is_none());
        assert_eq!(provider.prices.pro.as_deref(), Some("price_pro"));
        assert!(provider.prices.starter.is_none());
    }
}
