//! `EventWaiter` and `StatusBroadcaster` (§4.1, §4.2): the coupling that
//! links triggers, running nodes, and external observers.

mod broadcaster;
mod waiter;

pub use broadcaster::{StatusBroadcaster, StatusMessage};
pub use waiter::{
    EventWaiter, InMemoryWaiterBackend, TriggerConfig, TriggerRegistry, Waiter, WaitError, WaiterBackend,
};
