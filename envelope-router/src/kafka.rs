use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientConfig, ClientContext, Message, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::broker::{AssignmentAck, BrokerClient, BrokerError, BrokerRecord};
use crate::metrics_consts::BROKER_ERRORS;
use crate::rebalance::{OwnershipSet, RebalanceController};
use crate::types::{partitions_from_list, partitions_to_list, Partition};

/// rdkafka context that routes group rebalances into a `RebalanceController`
/// and reports client-level errors.
pub struct DispatchContext {
    controller: RebalanceController,
    member_id: Option<String>,
}

impl DispatchContext {
    pub fn new(member_id: Option<String>) -> Self {
        Self {
            controller: RebalanceController::new(),
            member_id,
        }
    }

    pub fn ownership(&self) -> OwnershipSet {
        self.controller.ownership()
    }

    fn ack<'a>(&'a self, consumer: &'a BaseConsumer<Self>) -> ConsumerAck<'a> {
        ConsumerAck {
            consumer,
            member_id: self.member_id.as_deref(),
        }
    }
}

impl ClientContext for DispatchContext {
    fn error(&self, error: KafkaError, reason: &str) {
        metrics::counter!(BROKER_ERRORS, "kind" => "transport").increment(1);
        error!("Kafka transport error: {:#} ({})", error, reason);
    }
}

impl ConsumerContext for DispatchContext {
    fn pre_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(list) => {
                let partitions = partitions_from_list(list);
                self.controller
                    .on_revoked(&partitions, &self.ack(base_consumer));
            }
            Rebalance::Assign(list) => {
                debug!("Pre-rebalance assign event for {} partitions", list.count());
            }
            Rebalance::Error(e) => {
                metrics::counter!(BROKER_ERRORS, "kind" => "rebalance").increment(1);
                error!("Rebalance error: {:#}", e);
            }
        }
    }

    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(list) => {
                let partitions = partitions_from_list(list);
                self.controller
                    .on_assigned(&partitions, &self.ack(base_consumer));
            }
            Rebalance::Revoke(_) => {
                debug!("Post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                // librdkafka drops the whole assignment on a failed rebalance.
                let owned = self.controller.ownership().snapshot();
                warn!(
                    "Releasing {} partitions after rebalance error: {:#}",
                    owned.len(),
                    e
                );
                self.controller
                    .on_revoked(&owned, &self.ack(base_consumer));
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(_) => debug!("Committed offsets for {} partitions", offsets.count()),
            Err(e) => warn!("Failed to commit offsets: {:#}", e),
        }
    }
}

/// Acknowledges rebalances through the consumer handle librdkafka passes to
/// the rebalance callbacks.
struct ConsumerAck<'a> {
    consumer: &'a BaseConsumer<DispatchContext>,
    member_id: Option<&'a str>,
}

impl AssignmentAck for ConsumerAck<'_> {
    fn confirm_assignment(&self, partitions: &[Partition]) -> Result<(), BrokerError> {
        self.consumer.assign(&partitions_to_list(partitions))?;
        Ok(())
    }

    fn release_assignment(&self, _partitions: &[Partition]) -> Result<(), BrokerError> {
        // Eager protocol: a revocation always covers the whole assignment.
        self.consumer.unassign()?;
        Ok(())
    }

    fn member_id(&self) -> Option<String> {
        self.member_id.map(str::to_owned)
    }
}

/// `BrokerClient` backed by an rdkafka group consumer.
///
/// The consumer is created (but not subscribed) on construction and released
/// by `close`, which also runs on drop.
pub struct KafkaBrokerClient {
    consumer: StreamConsumer<DispatchContext>,
    ownership: OwnershipSet,
    closed: AtomicBool,
}

impl KafkaBrokerClient {
    pub fn new(config: &ClientConfig) -> Result<Self, BrokerError> {
        let context = DispatchContext::new(config.get("client.id").map(str::to_owned));
        let ownership = context.ownership();

        debug!("rdkafka configuration: {:?}", config);
        let consumer: StreamConsumer<DispatchContext> = config.create_with_context(context)?;

        Ok(Self {
            consumer,
            ownership,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    fn subscribe(&self, topics: &[&str]) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        self.consumer.subscribe(topics)?;
        info!("Subscribed to topics: [{}]", topics.join(", "));
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Option<Result<BrokerRecord, BrokerError>> {
        if self.is_closed() {
            return Some(Err(BrokerError::Closed));
        }

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(message)) => Some(Ok(BrokerRecord {
                topic: message.topic().to_owned(),
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec),
            })),
            Ok(Err(e)) => Some(Err(BrokerError::Kafka(e))),
            Err(_) => None,
        }
    }

    fn ownership(&self) -> OwnershipSet {
        self.ownership.clone()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.consumer.unsubscribe();
        info!(
            "Closed Kafka consumer, owned partitions at close: {}",
            self.ownership.len()
        );
    }
}

impl Drop for KafkaBrokerClient {
    fn drop(&mut self) {
        self.close();
    }
}
