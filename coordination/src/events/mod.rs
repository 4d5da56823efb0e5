//! Swarm event stream (§6).
//!
//! The audit event stream is a separate, differently-typed instance of
//! the same [`bus::EventBus`] machinery; see [`crate::ledger`].

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, FilteredReceiver, SharedEventBus};
pub use types::SwarmEvent;

pub type SwarmEventBus = EventBus<SwarmEvent>;
