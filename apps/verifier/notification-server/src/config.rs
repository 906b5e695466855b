use core_config::{
    ConfigError, Environment, FromEnv, database::DatabaseConfig, env_or_default, env_required,
    server::ServerConfig,
};
use domain_notifications::providers::{DEFAULT_SENDGRID_URL, SendGridConfig};
use messaging::BrokerConfig;

pub const DEFAULT_HEALTH_PORT: u16 = 8082;

/// Notification server configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub sendgrid: SendGridConfig,
    /// Listener for `/health`, `/ready` and `/metrics`.
    pub health: ServerConfig,
}

fn sendgrid_from_env() -> Result<SendGridConfig, ConfigError> {
    Ok(
        SendGridConfig::new(env_required("SENDGRID_API_KEY")?, env_required("FROM_ADDRESS")?)
            .with_api_url(env_or_default("SENDGRID_URL", DEFAULT_SENDGRID_URL)),
    )
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: Environment::from_env(),
            database: DatabaseConfig::from_env()?,
            broker: BrokerConfig::from_env()?,
            sendgrid: sendgrid_from_env()?,
            health: ServerConfig::from_env_with_port("HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
        })
    }
}
