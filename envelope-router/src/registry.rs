use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics_consts::REGISTRATION_CONFLICTS;

/// Business logic invoked for every envelope whose message type it was registered under.
///
/// Implementations receive the payload as self-contained text and do their own
/// structural decoding.
#[async_trait]
pub trait StreamProcessor: Send + Sync {
    async fn process_message(&self, payload: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: StreamProcessor + ?Sized> StreamProcessor for Arc<T> {
    async fn process_message(&self, payload: &str) -> anyhow::Result<()> {
        (**self).process_message(payload).await
    }
}

/// Adapts a plain closure into a `StreamProcessor`.
pub struct StreamFunction<F> {
    function: F,
}

impl<F> StreamFunction<F>
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

#[async_trait]
impl<F> StreamProcessor for StreamFunction<F>
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    async fn process_message(&self, payload: &str) -> anyhow::Result<()> {
        (self.function)(payload)
    }
}

/// Registered handler kinds, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandlerKind {
    Processor,
    Function,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Processor => "processor",
            HandlerKind::Function => "function",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("a {kind} is already registered for message type {message_type}")]
    Conflict {
        message_type: String,
        kind: HandlerKind,
    },
    #[error("handlers cannot be registered for an empty message type")]
    EmptyMessageType,
}

#[derive(Clone)]
pub struct RegisteredHandler {
    kind: HandlerKind,
    handler: Arc<dyn StreamProcessor>,
}

impl RegisteredHandler {
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn handler(&self) -> &dyn StreamProcessor {
        self.handler.as_ref()
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Maps message types to their handlers.
///
/// Each message type holds a single list ordered by `HandlerKind` priority,
/// then by registration order. Registration is first-write-wins per
/// `(message_type, kind)`: a duplicate is rejected and reported while the
/// original registration stays active.
#[derive(Default, Debug)]
pub struct HandlerRegistry {
    routes: HashMap<String, Vec<RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        message_type: &str,
        kind: HandlerKind,
        handler: Arc<dyn StreamProcessor>,
    ) -> Result<(), RegistrationError> {
        if message_type.is_empty() {
            warn!("Rejected {} registration for empty message type", kind);
            metrics::counter!(REGISTRATION_CONFLICTS, "reason" => "empty_message_type")
                .increment(1);
            return Err(RegistrationError::EmptyMessageType);
        }

        let entries = self.routes.entry(message_type.to_owned()).or_default();

        if entries.iter().any(|entry| entry.kind == kind) {
            warn!(
                "Rejected duplicate {} registration for message type {}, keeping the original",
                kind, message_type
            );
            metrics::counter!(REGISTRATION_CONFLICTS, "reason" => "duplicate").increment(1);
            return Err(RegistrationError::Conflict {
                message_type: message_type.to_owned(),
                kind,
            });
        }

        if let Some(winner) = entries.first().filter(|entry| entry.kind < kind) {
            warn!(
                "{} registered for message type {} will not run while a {} is registered",
                kind, message_type, winner.kind
            );
        }

        // Stable insert: after every entry of equal or higher priority.
        let position = entries.partition_point(|entry| entry.kind <= kind);
        entries.insert(position, RegisteredHandler { kind, handler });

        debug!("Registered {} for message type {}", kind, message_type);
        Ok(())
    }

    /// Handlers of the highest-priority kind registered for `message_type`,
    /// in registration order. Empty when nothing matches.
    pub fn lookup(&self, message_type: &str) -> &[RegisteredHandler] {
        let Some(entries) = self.routes.get(message_type) else {
            return &[];
        };
        let Some(first) = entries.first() else {
            return &[];
        };

        let end = entries.partition_point(|entry| entry.kind == first.kind);
        &entries[..end]
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct NamedProcessor {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StreamProcessor for NamedProcessor {
        async fn process_message(&self, payload: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(payload.to_owned());
            Ok(())
        }
    }

    fn processor() -> Arc<dyn StreamProcessor> {
        Arc::new(NamedProcessor::default())
    }

    fn function() -> Arc<dyn StreamProcessor> {
        Arc::new(StreamFunction::new(|_: &str| Ok(())))
    }

    #[test]
    fn test_lookup_unknown_message_type_is_empty() {
        let registry = HandlerRegistry::new();

        assert!(registry.lookup("NotifySettle").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = HandlerRegistry::new();
        let first = processor();
        let second = processor();

        registry
            .register("NotifySettle", HandlerKind::Processor, first.clone())
            .unwrap();
        let result = registry.register("NotifySettle", HandlerKind::Processor, second);

        assert_eq!(
            result,
            Err(RegistrationError::Conflict {
                message_type: "NotifySettle".to_owned(),
                kind: HandlerKind::Processor,
            })
        );

        let handlers = registry.lookup("NotifySettle");
        assert_eq!(handlers.len(), 1);
        assert!(Arc::ptr_eq(&handlers[0].handler, &first));
    }

    #[test]
    fn test_duplicate_function_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();

        registry
            .register("NotifySettle", HandlerKind::Function, function())
            .unwrap();

        assert!(registry
            .register("NotifySettle", HandlerKind::Function, function())
            .is_err());
        assert_eq!(registry.lookup("NotifySettle").len(), 1);
    }

    #[test]
    fn test_processor_takes_priority_over_function() {
        let mut registry = HandlerRegistry::new();

        registry
            .register("NotifySettle", HandlerKind::Function, function())
            .unwrap();
        registry
            .register("NotifySettle", HandlerKind::Processor, processor())
            .unwrap();

        let handlers = registry.lookup("NotifySettle");
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].kind(), HandlerKind::Processor);
    }

    #[test]
    fn test_function_used_when_no_processor() {
        let mut registry = HandlerRegistry::new();

        registry
            .register("NotifyBetSettle", HandlerKind::Function, function())
            .unwrap();
        registry
            .register("NotifyMarketSettle", HandlerKind::Processor, processor())
            .unwrap();

        let handlers = registry.lookup("NotifyBetSettle");
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].kind(), HandlerKind::Function);
    }

    #[test]
    fn test_empty_message_type_is_rejected() {
        let mut registry = HandlerRegistry::new();

        assert_eq!(
            registry.register("", HandlerKind::Processor, processor()),
            Err(RegistrationError::EmptyMessageType)
        );
        assert!(registry.lookup("").is_empty());
    }

    #[tokio::test]
    async fn test_shared_processor_via_arc() {
        let shared = Arc::new(NamedProcessor::default());
        let mut registry = HandlerRegistry::new();

        registry
            .register("A", HandlerKind::Processor, Arc::new(shared.clone()))
            .unwrap();
        registry
            .register("B", HandlerKind::Processor, Arc::new(shared.clone()))
            .unwrap();

        for message_type in ["A", "B"] {
            for entry in registry.lookup(message_type) {
                entry.handler().process_message(message_type).await.unwrap();
            }
        }

        assert_eq!(*shared.calls.lock().unwrap(), vec!["A", "B"]);
    }
}
