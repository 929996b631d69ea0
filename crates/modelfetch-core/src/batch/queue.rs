//! Closable FIFO shared by batch workers.

use crate::sync::resilient_lock;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-consumer FIFO. Once closed, pops return `None` and pushes are refused.
///
/// The closed flag lives under the same lock as the items, so a push racing a
/// close either lands before the drain or is handed back.
#[derive(Debug)]
pub(crate) struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue an item. Returns it back if the queue is closed.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        {
            let mut state = resilient_lock(&self.state);
            if state.closed {
                return Err(item);
            }
            state.items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next item, or `None` once the queue is closed.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a close or push between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            {
                let mut state = resilient_lock(&self.state);
                if state.closed {
                    return None;
                }
                if let Some(next) = state.items.pop_front() {
                    return Some(next);
                }
            }

            notified.await;
        }
    }

    /// Close the queue, wake every waiter and return the items never popped.
    pub(crate) fn close(&self) -> Vec<T> {
        let drained = {
            let mut state = resilient_lock(&self.state);
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    pub(crate) fn is_closed(&self) -> bool {
        resilient_lock(&self.state).closed
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        resilient_lock(&self.state).items.len()
    }
}
