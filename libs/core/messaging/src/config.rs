//! Broker settings read from the environment.

use crate::consumer::AckPolicy;
use core_config::{env_or_default, env_parse, env_required, ConfigError, FromEnv};

/// Message broker connection settings shared by both services.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// AMQP URI, e.g. `amqp://localhost:5672`
    pub url: String,
    /// Value for the `x-queue-type` queue argument. Empty means a classic queue.
    pub queue_type: String,
    pub ack_policy: AckPolicy,
}

impl BrokerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_type: "quorum".to_string(),
            ack_policy: AckPolicy::default(),
        }
    }

    pub fn with_ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }
}

impl FromEnv for BrokerConfig {
    /// - RABBIT_URL: required
    /// - QUEUE_TYPE: defaults to "quorum"
    /// - ACK_POLICY: `receipt` (default) or `completion`
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("RABBIT_URL")?,
            queue_type: env_or_default("QUEUE_TYPE", "quorum"),
            ack_policy: env_parse("ACK_POLICY", AckPolicy::default())?,
        })
    }
}
