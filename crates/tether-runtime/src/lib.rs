//! Tether Runtime - the protocol core
//!
//! This crate ties the node tree to the backend connection:
//! - Event journal (ids, ack timers, processed flags, rollback records)
//! - `SyncRuntime`: local mutation entry points and inbound dispatch
//! - Newest-first rollback
//! - Disconnected flag derived from ack timeouts
//! - Bound views retargeted by selector fields
//! - Configuration, logging setup and the async dispatcher

pub mod config;
pub mod logging;
pub mod journal;
pub mod tree;
pub mod binding;
pub mod runtime;
pub mod dispatch;

pub use config::*;
pub use logging::*;
pub use journal::*;
pub use tree::*;
pub use binding::*;
pub use runtime::*;
pub use dispatch::*;
