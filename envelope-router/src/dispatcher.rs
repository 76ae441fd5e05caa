use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerClient, BrokerError, BrokerRecord};
use crate::config::{generate_client_id, Config, ConsumerConfigBuilder};
use crate::envelope::{DecodeError, Envelope, EnvelopeCodec, FieldNaming};
use crate::error::{DispatchError, HandlerFault};
use crate::kafka::KafkaBrokerClient;
use crate::metrics_consts::{
    BROKER_ERRORS, DECODE_FAILURES, HANDLER_DURATION, HANDLER_INVOCATIONS, RECORDS_RECEIVED,
    UNROUTED_ENVELOPES,
};
use crate::rebalance::OwnershipSet;
use crate::registry::{
    HandlerKind, HandlerRegistry, RegisteredHandler, RegistrationError, StreamFunction,
    StreamProcessor,
};

/// What a single `receive_once` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing arrived within the timeout.
    Idle,
    /// The broker client reported an error instead of a record.
    ConsumeFailed,
    /// A record was fetched but no handler is registered for its message type.
    Unrouted { message_type: String },
    Dispatched {
        message_type: String,
        kind: HandlerKind,
        invoked: usize,
        faults: usize,
    },
}

/// Routes envelopes fetched from a `BrokerClient` to the handlers registered
/// for their message type.
///
/// Setup (`with_*`, `register_*`) consumes or mutably borrows the dispatcher,
/// while `receive_once` only needs a shared reference: once the loop starts
/// the registry can no longer change.
pub struct Dispatcher<B: BrokerClient> {
    broker: B,
    registry: HandlerRegistry,
    codec: EnvelopeCodec,
    subscription: Vec<String>,
}

impl Dispatcher<KafkaBrokerClient> {
    /// Create a Kafka-backed dispatcher for `group_id` on the given bootstrap servers.
    pub fn connect(brokers: &str, group_id: &str) -> Result<Self, BrokerError> {
        let config = ConsumerConfigBuilder::new(brokers, group_id)
            .with_client_id(&generate_client_id(group_id))
            .build();

        Ok(Self::new(KafkaBrokerClient::new(&config)?))
    }

    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        let client = KafkaBrokerClient::new(&config.to_client_config())?;

        Ok(Self::new(client).with_field_naming(config.envelope_field_naming))
    }
}

impl<B: BrokerClient> Dispatcher<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            registry: HandlerRegistry::new(),
            codec: EnvelopeCodec::default(),
            subscription: Vec::new(),
        }
    }

    /// Subscribe to `topics`, replacing any previous subscription.
    pub fn with_topics<I>(mut self, topics: I) -> Result<Self, BrokerError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let topics: Vec<String> = topics
            .into_iter()
            .map(|topic| topic.as_ref().to_owned())
            .collect();
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();

        self.broker.subscribe(&names)?;
        self.subscription = topics;
        Ok(self)
    }

    pub fn with_field_naming(mut self, naming: FieldNaming) -> Self {
        self.codec = EnvelopeCodec::new(naming);
        self
    }

    /// Register `processor` for `message_type`. A rejected registration is
    /// reported and setup carries on with the original handler in place.
    pub fn with_processor<P>(mut self, message_type: &str, processor: P) -> Self
    where
        P: StreamProcessor + 'static,
    {
        if let Err(e) = self.register_processor(message_type, processor) {
            debug!("Continuing setup after rejected registration: {}", e);
        }
        self
    }

    /// Register a closure for `message_type`. Functions only run when no
    /// processor is registered for the same message type.
    pub fn with_function<F>(mut self, message_type: &str, function: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if let Err(e) = self.register_function(message_type, function) {
            debug!("Continuing setup after rejected registration: {}", e);
        }
        self
    }

    pub fn register_processor<P>(
        &mut self,
        message_type: &str,
        processor: P,
    ) -> Result<(), RegistrationError>
    where
        P: StreamProcessor + 'static,
    {
        self.registry
            .register(message_type, HandlerKind::Processor, Arc::new(processor))
    }

    pub fn register_function<F>(
        &mut self,
        message_type: &str,
        function: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.register(
            message_type,
            HandlerKind::Function,
            Arc::new(StreamFunction::new(function)),
        )
    }

    /// Fetch at most one record, waiting up to `timeout`, and dispatch it.
    ///
    /// Broker errors are reported and turned into `DispatchOutcome::ConsumeFailed`.
    /// Only an undecodable record is returned as an error; the caller decides
    /// whether to skip it or stop.
    pub async fn receive_once(&self, timeout: Duration) -> Result<DispatchOutcome, DispatchError> {
        let record = match self.broker.poll(timeout).await {
            None => return Ok(DispatchOutcome::Idle),
            Some(Err(e)) => {
                metrics::counter!(BROKER_ERRORS, "kind" => "consume").increment(1);
                error!("Error receiving message: {:#}", e);
                return Ok(DispatchOutcome::ConsumeFailed);
            }
            Some(Ok(record)) => record,
        };

        metrics::counter!(RECORDS_RECEIVED).increment(1);

        let envelope = self.decode(record)?;
        Ok(self.dispatch(&envelope).await)
    }

    fn decode(&self, record: BrokerRecord) -> Result<Envelope, DispatchError> {
        let decoded = match record.payload.as_deref() {
            Some(bytes) => self.codec.decode(bytes),
            None => Err(DecodeError::Empty),
        };

        decoded.map_err(|source| {
            metrics::counter!(DECODE_FAILURES).increment(1);
            error!(
                "Failed to decode record from topic {} partition {} offset {}: {:#}",
                record.topic, record.partition, record.offset, source
            );
            DispatchError::Decode {
                topic: record.topic,
                partition: record.partition,
                offset: record.offset,
                source,
            }
        })
    }

    /// Run the handlers registered for `envelope.message_type`.
    ///
    /// Processors win over functions. Every handler of the winning kind runs in
    /// registration order, even if an earlier one fails or panics.
    pub async fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        let message_type = &envelope.message_type;
        let handlers: &[RegisteredHandler] = if message_type.is_empty() {
            &[]
        } else {
            self.registry.lookup(message_type)
        };

        let Some(first) = handlers.first() else {
            metrics::counter!(UNROUTED_ENVELOPES).increment(1);
            debug!("No handler registered for message type {:?}", message_type);
            return DispatchOutcome::Unrouted {
                message_type: message_type.clone(),
            };
        };

        let payload = envelope.payload_text();
        let mut faults = 0;

        for entry in handlers {
            if let Err(fault) = invoke(entry, message_type, &payload).await {
                faults += 1;
                error!("{}", fault);
            }
        }

        debug!(
            "Dispatched {} to {} {}(s), {} failed",
            message_type,
            handlers.len(),
            first.kind(),
            faults
        );

        DispatchOutcome::Dispatched {
            message_type: message_type.clone(),
            kind: first.kind(),
            invoked: handlers.len(),
            faults,
        }
    }

    /// Call `receive_once` until `shutdown` is cancelled, then close the broker client.
    ///
    /// Undecodable records are logged and skipped.
    pub async fn run(&self, shutdown: CancellationToken, poll_timeout: Duration) {
        info!(
            "Starting dispatch loop for topics [{}]",
            self.subscription.join(", ")
        );

        while !shutdown.is_cancelled() {
            match self.receive_once(poll_timeout).await {
                Ok(DispatchOutcome::ConsumeFailed) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(_) => {}
                Err(e) => warn!(error = ?e, "Skipping undecodable record"),
            }
        }

        info!("Shutdown requested, closing broker client");
        self.close();
    }

    /// Release the broker client. Safe to call more than once.
    pub fn close(&self) {
        self.broker.close();
    }

    pub fn subscription(&self) -> &[String] {
        &self.subscription
    }

    pub fn ownership(&self) -> OwnershipSet {
        self.broker.ownership()
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }
}

async fn invoke(
    entry: &RegisteredHandler,
    message_type: &str,
    payload: &str,
) -> Result<(), HandlerFault> {
    let kind = entry.kind();
    let start = Instant::now();

    let result = AssertUnwindSafe(entry.handler().process_message(payload))
        .catch_unwind()
        .await;

    metrics::histogram!(HANDLER_DURATION, "kind" => kind.as_str())
        .record(start.elapsed().as_secs_f64());

    let outcome = match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(HandlerFault::Failed {
            message_type: message_type.to_owned(),
            kind,
            error,
        }),
        Err(panic) => Err(HandlerFault::Panicked {
            message_type: message_type.to_owned(),
            kind,
            message: panic_message(panic.as_ref()),
        }),
    };

    let status = if outcome.is_ok() { "success" } else { "failure" };
    metrics::counter!(HANDLER_INVOCATIONS, "kind" => kind.as_str(), "status" => status)
        .increment(1);

    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
