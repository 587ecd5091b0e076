use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

struct State<T, E> {
    items: VecDeque<T>,
    closed: bool,
    error: Option<E>,
    dropped: u64,
}

/// Bounded FIFO with drop-oldest overflow, graceful close and abort.
///
/// After `close()` queued items still drain, then `next()` yields `None`.
/// After `abort()` every `next()` fails with the abort error.
pub struct Queue<T, E> {
    label: &'static str,
    capacity: usize,
    state: Mutex<State<T, E>>,
    notify: Notify,
}

impl<T, E: Clone> Queue<T, E> {
    pub fn new(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            capacity: capacity.max(1),
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
                error: None,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue `item`. Returns `false` if the queue is already closed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut st = self.state.lock();
            if st.closed {
                return false;
            }
            if st.items.len() >= self.capacity {
                st.items.pop_front();
                st.dropped += 1;
                warn!(
                    queue = self.label,
                    capacity = self.capacity,
                    dropped = st.dropped,
                    "queue full, dropping oldest"
                );
            }
            st.items.push_back(item);
        }
        self.notify.notify_waiters();
        true
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn abort(&self, err: E) {
        {
            let mut st = self.state.lock();
            st.closed = true;
            st.items.clear();
            st.error.get_or_insert(err);
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Wait for the next item. Cancel safe.
    pub async fn next(&self) -> Result<Option<T>, E> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.state.lock();
                if let Some(err) = &st.error {
                    return Err(err.clone());
                }
                if let Some(item) = st.items.pop_front() {
                    return Ok(Some(item));
                }
                if st.closed {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }
}
