//! # Thread-Safe Event Aggregation
//!
//! Decouples producers (engine, host, task manager) from consumers across
//! threads: typed subscribe/publish with unordered delivery, handler
//! isolation (a panicking handler never reaches the publisher or blocks the
//! remaining subscribers), and optional marshaling to an injected affinity
//! dispatcher.

mod aggregator;

pub use aggregator::{Dispatcher, EventAggregator, SubscriptionToken};
