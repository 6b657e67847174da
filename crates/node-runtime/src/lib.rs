//! # Node Runtime
//!
//! Wiring for one consensus instance. The embedder supplies the overlay
//! transport and the validator manager through their ports; everything else
//! (journal, bus, receiver, producer, resolver, candidate store) is
//! constructed and started here and torn down by a `StopRequested` fan-out.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod instance;

pub use instance::{ConsensusInstance, SessionConfig};

use tracing::Level;

/// Initialize process-wide logging. Honors `RUST_LOG` when set.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(Level::INFO.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
