//! Partition ownership bookkeeping for consumer group rebalances.
//!
//! The broker client invokes the `RebalanceController` from its own polling
//! machinery, which may run while a `receive_once` call is in flight. The
//! controller is the only writer of the `OwnershipSet`; every other holder of
//! the set gets a read-only view.
//!
//! ```text
//! Unassigned ──assign(P)──► Assigned(P)    confirm_assignment(P), replace set with P
//! Assigned(P) ──revoke(R)──► Assigned(P∖R) release_assignment(R), remove R
//!                            (Unassigned once the set is empty)
//! ```
//!
//! Every notification is authoritative: an assignment replaces the set
//! wholesale, it is never merged with what was owned before.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info};

use crate::broker::AssignmentAck;
use crate::metrics_consts::{OWNED_PARTITIONS, REBALANCE_ACK_FAILURES, REBALANCE_EVENTS};
use crate::types::{format_partitions, Partition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipState {
    Unassigned,
    Assigned(Vec<Partition>),
}

/// Shared view of the partitions currently owned by this consumer.
#[derive(Debug, Clone, Default)]
pub struct OwnershipSet {
    inner: Arc<RwLock<HashSet<Partition>>>,
}

impl OwnershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owned partitions, sorted by topic then partition number.
    pub fn snapshot(&self) -> Vec<Partition> {
        let owned = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut partitions: Vec<Partition> = owned.iter().cloned().collect();
        partitions.sort();
        partitions
    }

    pub fn state(&self) -> OwnershipState {
        let partitions = self.snapshot();
        if partitions.is_empty() {
            OwnershipState::Unassigned
        } else {
            OwnershipState::Assigned(partitions)
        }
    }

    pub fn contains(&self, partition: &Partition) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(partition)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replace(&self, partitions: &[Partition]) -> usize {
        let mut owned = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *owned = partitions.iter().cloned().collect();
        owned.len()
    }

    fn remove(&self, partitions: &[Partition]) -> usize {
        let mut owned = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for partition in partitions {
            owned.remove(partition);
        }
        owned.len()
    }
}

/// Applies assignment and revocation notifications to an `OwnershipSet`,
/// acknowledging each one back to the broker client.
#[derive(Debug, Default)]
pub struct RebalanceController {
    ownership: OwnershipSet,
}

impl RebalanceController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ownership(&self) -> OwnershipSet {
        self.ownership.clone()
    }

    pub fn on_assigned(&self, partitions: &[Partition], ack: &dyn AssignmentAck) {
        metrics::counter!(REBALANCE_EVENTS, "event_type" => "assign").increment(1);

        if let Err(e) = ack.confirm_assignment(partitions) {
            metrics::counter!(REBALANCE_ACK_FAILURES, "event_type" => "assign").increment(1);
            error!(
                "Failed to confirm assignment of {}: {:#}",
                format_partitions(partitions),
                e
            );
        }

        let owned = self.ownership.replace(partitions);
        metrics::gauge!(OWNED_PARTITIONS).set(owned as f64);

        info!(
            "Assigned partitions: {}, member id: {}",
            format_partitions(partitions),
            ack.member_id().as_deref().unwrap_or("unknown")
        );
    }

    pub fn on_revoked(&self, partitions: &[Partition], ack: &dyn AssignmentAck) {
        metrics::counter!(REBALANCE_EVENTS, "event_type" => "revoke").increment(1);

        if let Err(e) = ack.release_assignment(partitions) {
            metrics::counter!(REBALANCE_ACK_FAILURES, "event_type" => "revoke").increment(1);
            error!(
                "Failed to release assignment of {}: {:#}",
                format_partitions(partitions),
                e
            );
        }

        let owned = self.ownership.remove(partitions);
        metrics::gauge!(OWNED_PARTITIONS).set(owned as f64);

        info!("Revoked partitions: {}", format_partitions(partitions));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use rdkafka::error::{KafkaError, RDKafkaErrorCode};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAck {
        confirmed: Mutex<Vec<Vec<Partition>>>,
        released: Mutex<Vec<Vec<Partition>>>,
        fail: bool,
    }

    impl AssignmentAck for RecordingAck {
        fn confirm_assignment(&self, partitions: &[Partition]) -> Result<(), BrokerError> {
            self.confirmed.lock().unwrap().push(partitions.to_vec());
            if self.fail {
                return Err(BrokerError::Kafka(KafkaError::Global(
                    RDKafkaErrorCode::AllBrokersDown,
                )));
            }
            Ok(())
        }

        fn release_assignment(&self, partitions: &[Partition]) -> Result<(), BrokerError> {
            self.released.lock().unwrap().push(partitions.to_vec());
            if self.fail {
                return Err(BrokerError::Kafka(KafkaError::Global(
                    RDKafkaErrorCode::AllBrokersDown,
                )));
            }
            Ok(())
        }

        fn member_id(&self) -> Option<String> {
            Some("test-member".to_owned())
        }
    }

    fn orders(partition: i32) -> Partition {
        Partition::new("orders", partition)
    }

    #[test]
    fn test_initially_unassigned() {
        let controller = RebalanceController::new();

        assert_eq!(controller.ownership().state(), OwnershipState::Unassigned);
        assert!(controller.ownership().is_empty());
    }

    #[test]
    fn test_assign_then_partial_revoke() {
        let controller = RebalanceController::new();
        let ack = RecordingAck::default();

        controller.on_assigned(&[orders(0), orders(1)], &ack);
        controller.on_revoked(&[orders(0)], &ack);

        assert_eq!(controller.ownership().snapshot(), vec![orders(1)]);
        assert!(!controller.ownership().contains(&orders(0)));
        assert_eq!(*ack.confirmed.lock().unwrap(), vec![vec![orders(0), orders(1)]]);
        assert_eq!(*ack.released.lock().unwrap(), vec![vec![orders(0)]]);
    }

    #[test]
    fn test_full_revoke_returns_to_unassigned() {
        let controller = RebalanceController::new();
        let ack = RecordingAck::default();

        controller.on_assigned(&[orders(0), orders(1)], &ack);
        controller.on_revoked(&[orders(0), orders(1)], &ack);

        assert_eq!(controller.ownership().state(), OwnershipState::Unassigned);
    }

    #[test]
    fn test_assignment_replaces_instead_of_merging() {
        let controller = RebalanceController::new();
        let ack = RecordingAck::default();

        controller.on_assigned(&[orders(0), orders(1)], &ack);
        controller.on_assigned(&[orders(2)], &ack);

        assert_eq!(
            controller.ownership().state(),
            OwnershipState::Assigned(vec![orders(2)])
        );
    }

    #[test]
    fn test_revoke_of_unowned_partition_is_harmless() {
        let controller = RebalanceController::new();
        let ack = RecordingAck::default();

        controller.on_revoked(&[orders(7)], &ack);
        controller.on_assigned(&[orders(1)], &ack);
        controller.on_revoked(&[orders(7)], &ack);

        assert_eq!(controller.ownership().snapshot(), vec![orders(1)]);
        assert_eq!(ack.released.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_ack_still_follows_broker() {
        let controller = RebalanceController::new();
        let ack = RecordingAck {
            fail: true,
            ..Default::default()
        };

        controller.on_assigned(&[orders(0)], &ack);
        assert_eq!(controller.ownership().snapshot(), vec![orders(0)]);

        controller.on_revoked(&[orders(0)], &ack);
        assert!(controller.ownership().is_empty());
    }

    #[test]
    fn test_ownership_views_share_state() {
        let controller = RebalanceController::new();
        let view = controller.ownership();

        controller.on_assigned(&[orders(3)], &RecordingAck::default());

        assert!(view.contains(&orders(3)));
        assert_eq!(view.len(), 1);
    }
}
