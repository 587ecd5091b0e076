#![forbid(unsafe_code)]

//! Unified event bus for the moqtail player.

mod abr;
mod bus;
mod event;
mod player;

pub use abr::AbrEvent;
pub use bus::{DEFAULT_EVENT_CAPACITY, EventBus, EventStream};
pub use event::Event;
pub use player::{GroupRef, PlayerEvent, SkipEvent, SkipKind, Stat};
