//! Request exchange and queue.
//!
//! Several registration servers may share the request exchange. Each binds
//! its own queue with a weight, and the consistent-hash exchange spreads
//! random routing keys across them in proportion.

use messaging::{ExchangeDef, QueueDef};

pub const REQUEST_EXCHANGE: &str = "registration-CH-request-exchange";
pub const DEFAULT_REQUEST_QUEUE: &str = "registration-CH_request";
/// Weight of this server's queue on the hash ring.
pub const DEFAULT_BINDING_KEY: &str = "1";

pub fn request_exchange(binding_key: &str) -> ExchangeDef {
    ExchangeDef::consistent_hash(REQUEST_EXCHANGE, binding_key)
}

pub fn request_queue(name: &str, queue_type: &str) -> QueueDef {
    QueueDef::with_queue_type(name, queue_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::ExchangeKind;

    #[test]
    fn test_request_topology() {
        let exchange = request_exchange(DEFAULT_BINDING_KEY);
        assert_eq!(exchange.kind, ExchangeKind::ConsistentHash);
        assert_eq!(exchange.binding_key, "1");
        assert_ne!(
            exchange.routing_key.key_for(b"to@example.com"),
            exchange.routing_key.key_for(b"to@example.com")
        );

        let queue = request_queue(DEFAULT_REQUEST_QUEUE, "quorum");
        assert_eq!(queue.name, "registration-CH_request");
        assert!(queue.durable());
    }
}
