use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::rebalance::OwnershipSet;
use crate::types::Partition;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("broker client is closed")]
    Closed,
}

/// A record fetched from a subscribed topic, before envelope decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Consumer-group client the dispatcher pulls records from.
///
/// Implementations own partition assignment and offset commits. They report
/// rebalance notifications to a `RebalanceController` and expose the resulting
/// ownership set read-only.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Replace the current subscription with `topics`.
    fn subscribe(&self, topics: &[&str]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next record. `None` means nothing arrived in time.
    async fn poll(&self, timeout: Duration) -> Option<Result<BrokerRecord, BrokerError>>;

    fn ownership(&self) -> OwnershipSet;

    /// Release the client's resources. Calling it again is a no-op.
    fn close(&self);
}

/// Acknowledgement side of a rebalance: tells the broker client the consumer
/// has taken or given up ownership of a partition set.
pub trait AssignmentAck {
    fn confirm_assignment(&self, partitions: &[Partition]) -> Result<(), BrokerError>;

    fn release_assignment(&self, partitions: &[Partition]) -> Result<(), BrokerError>;

    /// Identity of this consumer within its group, when known.
    fn member_id(&self) -> Option<String>;
}
