//! Per-call lifecycle events.

use std::sync::Arc;

use crate::call::Call;
use crate::Error;

/// Observes the phases of a single call. All methods have empty defaults;
/// implement the ones of interest. One listener instance is created per
/// call by the configured factory, after the call itself exists (the call
/// is handed to the factory, so listeners may retain it).
#[allow(unused_variables)]
pub trait EventListener: Send + Sync {
    fn call_start(&self, call: &Call) {}

    /// A connection was obtained for an exchange, pooled or fresh.
    fn connection_acquired(&self, call: &Call) {}

    fn call_end(&self, call: &Call) {}

    fn call_failed(&self, call: &Call, error: &Error) {}
}

/// Creates the listener for each call.
pub type EventListenerFactory = Arc<dyn Fn(&Call) -> Arc<dyn EventListener> + Send + Sync>;

pub(crate) struct NoopListener;

impl EventListener for NoopListener {}

pub(crate) fn noop_factory() -> EventListenerFactory {
    Arc::new(|_| Arc::new(NoopListener))
}
