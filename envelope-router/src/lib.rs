//! Envelope router: consumes JSON envelopes from Kafka topics as part of a
//! consumer group and hands each envelope's payload to the handlers registered
//! for its message type.
//!
//! ## Error logging
//!
//! Handler failures are `anyhow::Error`s. Log them with `{e:#}` so the whole
//! cause chain ends up on one line; `{}` only shows the outermost message.

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod metrics_consts;
pub mod rebalance;
pub mod registry;
pub mod test_utils;
pub mod types;

// Re-export commonly used types for convenience
pub use broker::{BrokerClient, BrokerError, BrokerRecord};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use envelope::{Envelope, EnvelopeCodec, FieldNaming};
pub use error::{DispatchError, HandlerFault};
pub use rebalance::{OwnershipSet, OwnershipState};
pub use registry::{HandlerKind, RegistrationError, StreamProcessor};
pub use types::Partition;
