//! Shared types and clients for the codegrade services.
//!
//! Everything that more than one binary needs to agree on lives here: the
//! sandbox wire protocol, the Redis key layout and the error taxonomy.

pub mod builder;
pub mod config;
pub mod error;
pub mod redis;
pub mod sandbox;
pub mod types;

pub use error::{ErrorClass, GradeError, GradeResult};
