//! `convoy-core`: identifiers and error primitives shared by every convoy crate.
//!
//! This crate is **pure** (no IO, no async, no clock).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, TenantId, WorkerId};
