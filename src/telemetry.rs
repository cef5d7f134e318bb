//! Process-wide instrumentation (ambient stack): a `tracing_subscriber`
//! layer that feeds the management protocol's log counter, installed
//! alongside the formatting layer in the same `registry()` the way
//! multi-layer subscribers are normally composed.

use std::sync::Arc;

use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::management::Counters;

/// Increments [`Counters::log_entries`] for every event that reaches the
/// subscriber, regardless of level or target. `reset` (management command)
/// zeroes the count back to 0 without touching this layer.
pub struct LogCounterLayer {
    counters: Arc<Counters>,
}

impl LogCounterLayer {
    pub fn new(counters: Arc<Counters>) -> Self {
        LogCounterLayer { counters }
    }
}

impl<S: Subscriber> Layer<S> for LogCounterLayer {
    fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.counters.record_log();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn counts_one_log_entry_per_event() {
        let counters = Arc::new(Counters::default());
        let subscriber = tracing_subscriber::registry().with(LogCounterLayer::new(counters.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("first");
            tracing::warn!("second");
        });
        assert_eq!(counters.log_entries.load(std::sync::atomic::Ordering::Relaxed), 2);
    }
}
