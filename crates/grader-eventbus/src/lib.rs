//! Event Bus (spec §4.E): the normalized pod-event wire format plus a
//! durable transport between the Watcher and the Completion Consumer.

pub mod bus;
pub mod event;
pub mod lapin_bus;
pub mod memory;

pub use bus::{Delivery, EventBusError, EventConsumer, EventPublisher};
pub use event::{EventMeta, EventTimes, NormalizedEvent, WireContainerState, WireOutcome};
pub use lapin_bus::{LapinEventBus, LapinEventConsumer};
pub use memory::{InMemoryEventBus, InMemoryEventPublisher};
