//! Broker integration: the AMQP bridge and the change publisher

pub mod bridge;
pub mod publisher;

pub use bridge::{BridgeError, BridgeState, BrokerBridge, EnvelopeHandler};
pub use publisher::{BrokerPublisher, EventPublisher, PublisherMetrics};
