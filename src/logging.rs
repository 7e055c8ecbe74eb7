// ── Logging ───────────────────────────────────────────────────────────────────
//
// Three targets are used throughout the crate:
//   • `app` – application events and unhandled faults
//   • `ui`  – window and browser surface operations
//   • `wm`  – the message pump and scheduler drain
//
// `RUST_LOG` wins when set; otherwise the configured filter applies.

use tracing_subscriber::{fmt, EnvFilter};

/// Build the filter: `RUST_LOG` if it parses, else `fallback`, else `info`.
pub fn filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.  Returns `false` if one was already set.
pub fn init(fallback: &str) -> bool {
    fmt()
        .with_env_filter(filter(fallback))
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .is_ok()
}
