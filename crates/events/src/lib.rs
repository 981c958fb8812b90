//! Transport-agnostic pub/sub mechanics for queue lifecycle notifications.
//!
//! The queue core publishes lifecycle events (dead-lettering in particular)
//! through an [`EventBus`]; operators and observability sinks subscribe.

pub mod bus;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
