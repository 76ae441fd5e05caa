use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::broker::{AssignmentAck, BrokerClient, BrokerError, BrokerRecord};
use crate::envelope::{Envelope, EnvelopeCodec, FieldNaming};
use crate::rebalance::{OwnershipSet, RebalanceController};
use crate::registry::StreamProcessor;
use crate::types::Partition;

/// In-memory `BrokerClient` for tests: records are queued up front, rebalances
/// are scripted with `assign`/`revoke`, and every acknowledgement is recorded.
pub struct MockBroker {
    records: Mutex<VecDeque<Result<BrokerRecord, BrokerError>>>,
    subscriptions: Mutex<Vec<Vec<String>>>,
    controller: RebalanceController,
    confirmed: Mutex<Vec<Vec<Partition>>>,
    released: Mutex<Vec<Vec<Partition>>>,
    close_calls: AtomicUsize,
    next_offset: AtomicI64,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub const MEMBER_ID: &'static str = "mock-member-1";

    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
            controller: RebalanceController::new(),
            confirmed: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            next_offset: AtomicI64::new(0),
        }
    }

    pub fn push_envelope(&self, topic: &str, envelope: &Envelope, naming: FieldNaming) {
        let bytes = EnvelopeCodec::new(naming).encode(envelope).unwrap();
        self.push_raw(topic, Some(&bytes));
    }

    pub fn push_raw(&self, topic: &str, payload: Option<&[u8]>) {
        let record = BrokerRecord {
            topic: topic.to_owned(),
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
            payload: payload.map(<[u8]>::to_vec),
        };
        self.records.lock().unwrap().push_back(Ok(record));
    }

    pub fn push_error(&self, error: BrokerError) {
        self.records.lock().unwrap().push_back(Err(error));
    }

    pub fn pending(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Deliver an assignment notification the way a broker callback would.
    pub fn assign(&self, partitions: &[Partition]) {
        self.controller.on_assigned(partitions, self);
    }

    pub fn revoke(&self, partitions: &[Partition]) {
        self.controller.on_revoked(partitions, self);
    }

    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn confirmed(&self) -> Vec<Vec<Partition>> {
        self.confirmed.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<Vec<Partition>> {
        self.released.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl AssignmentAck for MockBroker {
    fn confirm_assignment(&self, partitions: &[Partition]) -> Result<(), BrokerError> {
        self.confirmed.lock().unwrap().push(partitions.to_vec());
        Ok(())
    }

    fn release_assignment(&self, partitions: &[Partition]) -> Result<(), BrokerError> {
        self.released.lock().unwrap().push(partitions.to_vec());
        Ok(())
    }

    fn member_id(&self) -> Option<String> {
        Some(Self::MEMBER_ID.to_owned())
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    fn subscribe(&self, topics: &[&str]) -> Result<(), BrokerError> {
        let topics = topics.iter().map(|topic| (*topic).to_owned()).collect();
        self.subscriptions.lock().unwrap().push(topics);
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Option<Result<BrokerRecord, BrokerError>> {
        let next = self.records.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        next
    }

    fn ownership(&self) -> OwnershipSet {
        self.controller.ownership()
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Processor that remembers every payload it was handed.
#[derive(Default)]
pub struct RecordingProcessor {
    payloads: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamProcessor for RecordingProcessor {
    async fn process_message(&self, payload: &str) -> anyhow::Result<()> {
        self.payloads.lock().unwrap().push(payload.to_owned());
        Ok(())
    }
}

/// Processor that fails every call.
pub struct FailingProcessor {
    message: String,
}

impl FailingProcessor {
    pub fn error(message: &str) -> Self {
        Self {
            message: message.to_owned(),
        }
    }
}

#[async_trait]
impl StreamProcessor for FailingProcessor {
    async fn process_message(&self, _payload: &str) -> anyhow::Result<()> {
        Err(anyhow!("{}", self.message))
    }
}
