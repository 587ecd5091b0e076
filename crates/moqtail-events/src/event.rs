#![forbid(unsafe_code)]

use crate::{AbrEvent, PlayerEvent, SkipEvent, Stat};

/// Unified event for the playback pipeline.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Player(PlayerEvent),
    Abr(AbrEvent),
}

impl From<PlayerEvent> for Event {
    fn from(e: PlayerEvent) -> Self {
        Self::Player(e)
    }
}

impl From<AbrEvent> for Event {
    fn from(e: AbrEvent) -> Self {
        Self::Abr(e)
    }
}

impl From<Stat> for Event {
    fn from(s: Stat) -> Self {
        Self::Player(s.into())
    }
}

impl From<SkipEvent> for Event {
    fn from(s: SkipEvent) -> Self {
        Self::Player(s.into())
    }
}
