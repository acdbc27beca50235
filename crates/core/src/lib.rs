//! `projector-core`: identifiers and error primitives shared by the
//! projection pipeline.
//!
//! This crate contains no storage or transport concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, MessageId};
