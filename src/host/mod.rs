//! # Background Services Hosting
//!
//! Owns the lifecycle of a fixed set of pollers: gated idempotent
//! start/stop, bounded start retry with rollback, per-poller stop timeouts,
//! and a shared cancellation scope. Pollers feed data into the execution
//! engine and task manager through the events they emit.

mod poller;
mod services_host;

pub use poller::{IntervalPoller, PollOutcome, Poller, PollerEvent, PollerLifecycle};
pub use services_host::BackgroundServicesHost;
