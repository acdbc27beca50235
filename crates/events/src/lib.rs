//! `projector-events`: the event stream vocabulary consumed by projections and
//! the notification vocabulary they produce.
//!
//! - [`DomainEvent`] / [`Commit`] / [`Position`]: what the event store hands out
//! - [`MessageBus`]: fire-and-forget pub/sub mechanics
//! - [`ReadModelUpdatedMessage`]: change notifications published by read models

pub mod bus;
pub mod commit;
pub mod domain_event;
pub mod event;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{MessageBus, Subscription};
pub use commit::{Commit, Position};
pub use domain_event::DomainEvent;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryMessageBus};
pub use notification::{ReadModelUpdatedMessage, UpdateKind};
