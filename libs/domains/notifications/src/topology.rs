//! Broker entities the notification flow runs on.

use messaging::{ExchangeDef, QueueDef};

pub const NOTIFICATION_EXCHANGE: &str = "registration-notification-exchange";
/// Routing and binding key of the notification exchange.
pub const NOTIFICATION_ROUTING_KEY: &str = "42";
pub const NOTIFICATION_QUEUE: &str = "registration-notification";

/// Direct exchange carrying [`NotificationMessage`](crate::NotificationMessage)s.
pub fn notification_exchange() -> ExchangeDef {
    ExchangeDef::direct(NOTIFICATION_EXCHANGE, NOTIFICATION_ROUTING_KEY)
}

pub fn notification_queue(queue_type: &str) -> QueueDef {
    QueueDef::with_queue_type(NOTIFICATION_QUEUE, queue_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::ExchangeKind;

    #[test]
    fn test_notification_topology() {
        let exchange = notification_exchange();
        assert_eq!(exchange.kind, ExchangeKind::Direct);
        assert_eq!(exchange.binding_key, "42");
        assert_eq!(exchange.routing_key.key_for(b"anything"), "42");

        assert!(notification_queue("quorum").durable());
        assert!(!notification_queue("").durable());
    }
}
