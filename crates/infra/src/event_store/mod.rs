//! Append-only event store boundary.
//!
//! Projections only ever read from the store: the dispatch engine and the
//! rebuild coordinator pull commits strictly after a checkpoint position. The
//! append side exists so tests, benches and the demo can produce a stream.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError};
