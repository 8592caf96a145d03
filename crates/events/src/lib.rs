//! Domain events and their distribution.
//!
//! Mechanics only: the event trait, the envelope published to consumers and the
//! pub/sub bus abstraction. Concrete events live in the domain crates.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
