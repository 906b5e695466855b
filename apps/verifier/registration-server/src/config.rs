use core_config::{
    ConfigError, Environment, FromEnv, database::DatabaseConfig, env_or_default,
    server::ServerConfig,
};
use domain_registration::topology::{DEFAULT_BINDING_KEY, DEFAULT_REQUEST_QUEUE};
use messaging::BrokerConfig;

/// Registration server configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    /// Weight of the request queue on the consistent-hash exchange.
    pub binding_key: String,
    pub queue_name: String,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            broker: BrokerConfig::from_env()?,
            binding_key: env_or_default("BINDING_KEY", DEFAULT_BINDING_KEY),
            queue_name: env_or_default("QUEUE_NAME", DEFAULT_REQUEST_QUEUE),
        })
    }
}
