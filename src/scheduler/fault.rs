// ── Process-wide fault sink ──────────────────────────────────────────────────
//
// Faults from work that nobody is waiting on (posted items, detached tasks,
// panicking event handlers) end up here.  The default sink logs them; the
// host may install its own, e.g. to show a dialog or abort.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::WorkItemFault;

type Sink = Arc<dyn Fn(&WorkItemFault) + Send + Sync>;

static SINK: RwLock<Option<Sink>> = RwLock::new(None);

/// Replace the fault sink for the whole process.
pub fn set_fault_sink(sink: impl Fn(&WorkItemFault) + Send + Sync + 'static) {
    *SINK.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(sink));
}

/// Restore the default (logging) sink.
pub fn clear_fault_sink() {
    *SINK.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Hand a fault to the current sink.
pub(crate) fn report(fault: &WorkItemFault) {
    // Clone the Arc out so a sink that replaces itself cannot deadlock.
    let sink = SINK.read().unwrap_or_else(PoisonError::into_inner).clone();
    match sink {
        Some(sink) => sink(fault),
        None => tracing::error!(target: "app", %fault, "unhandled fault in scheduled work"),
    }
}
