#![forbid(unsafe_code)]

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::{Event, PlayerEvent};

/// Events a player keeps for slow subscribers before they start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fan-out of player, stat and ABR events.
///
/// Cloned into the fetch loops, the timeline and the ABR task. Publishing
/// never waits on subscribers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Accepts any sub-enum: `bus.publish(Stat::Latency { .. })`.
    /// Returns `false` when nobody was listening.
    pub fn publish<E: Into<Event>>(&self, event: E) -> bool {
        self.tx.send(event.into()).is_ok()
    }

    /// Raw receiver. Lag surfaces as `RecvError::Lagged`.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Lag-tolerant stream ending with the player's `Closed` event.
    #[must_use]
    pub fn events(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            missed: 0,
            finished: false,
        }
    }
}

/// Subscriber view of a player's events.
///
/// Skips over lag and counts what was lost. Yields `PlayerEvent::Closed`
/// once and then ends, even if stragglers are still published.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<Event>,
    missed: u64,
    finished: bool,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    self.finished = matches!(event, Event::Player(PlayerEvent::Closed { .. }));
                    return Some(event);
                }
                Err(RecvError::Lagged(n)) => {
                    debug!(n, "event subscriber lagged");
                    self.missed += n;
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Events dropped because this subscriber fell behind.
    #[must_use]
    pub fn missed(&self) -> u64 {
        self.missed
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
