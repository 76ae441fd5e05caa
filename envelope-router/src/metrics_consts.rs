// ==== Consumption metrics ====
/// Counter for records fetched from the broker
pub const RECORDS_RECEIVED: &str = "envelope_records_received_total";

/// Counter for records whose envelope could not be decoded
pub const DECODE_FAILURES: &str = "envelope_decode_failures_total";

/// Counter for broker-level errors, labelled by kind (transport/consume)
pub const BROKER_ERRORS: &str = "envelope_broker_errors_total";

/// Counter for envelopes with no matching handler
pub const UNROUTED_ENVELOPES: &str = "envelope_unrouted_total";

// ==== Handler metrics ====
/// Counter for handler invocations, labelled by kind and status
pub const HANDLER_INVOCATIONS: &str = "envelope_handler_invocations_total";

/// Histogram for handler execution time
pub const HANDLER_DURATION: &str = "envelope_handler_duration_seconds";

/// Counter for rejected handler registrations
pub const REGISTRATION_CONFLICTS: &str = "envelope_registration_conflicts_total";

// ==== Rebalance metrics ====
/// Gauge for partitions currently owned by this consumer
pub const OWNED_PARTITIONS: &str = "envelope_owned_partitions";

/// Counter for rebalance notifications, labelled by event type
pub const REBALANCE_EVENTS: &str = "envelope_rebalance_events_total";

/// Counter for failed assignment acknowledgements
pub const REBALANCE_ACK_FAILURES: &str = "envelope_rebalance_ack_failures_total";
