//! Tether Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every layer of the replication engine:
//! - Path addresses (dotted/bracketed key paths with a traversal cursor)
//! - Scalar values and typed conversions
//! - Event identifiers
//! - Wire messages exchanged with the authoritative backend
//! - The error type

pub mod id;
pub mod path;
pub mod value;
pub mod event;
pub mod error;

pub use id::*;
pub use path::*;
pub use value::*;
pub use event::*;
pub use error::*;
