//! Tether Test Harness - simulation and protocol validation
//!
//! This crate provides:
//! - A simulated authoritative backend (echo, reject, drop, originate)
//! - A deterministic client/backend harness on a manual clock
//! - The same backend served over TCP
//! - Seeded state fuzzing with convergence checks

pub mod backend;
pub mod harness;
pub mod server;
pub mod state_fuzzer;

pub use backend::*;
pub use harness::*;
pub use server::*;
pub use state_fuzzer::*;
