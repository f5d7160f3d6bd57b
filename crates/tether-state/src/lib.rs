//! Tether State - the local mirror of the remote data tree
//!
//! This crate implements the reactive node tree:
//! - Fields (scalar value plus zero-or-one live subscriber)
//! - Object nodes (named fields and nested children)
//! - List nodes (primitive, keyed or positional elements)
//! - Path-directed dispatch of set/append/delete/rollback changes
//! - Inverse replay for rollback

pub mod field;
pub mod node;
pub mod object;
pub mod list;

pub use field::*;
pub use node::*;
pub use object::*;
pub use list::*;
