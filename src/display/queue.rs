// src/display/queue.rs
//! FIFO of work handed from the listener thread to the event-loop thread.
//!
//! Unbounded and never coalesced: every frame the producer sends is rendered,
//! in order. The condition variable is only used while the window is closing
//! (the event loop waits here for the producer's handshake reply); during
//! normal operation the event loop is woken through its `EventLoopWaker`.

use crate::display::shutdown::ShutdownCause;
use crate::frame::FramePayload;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    /// A frame to render, still encoded.
    Frame(FramePayload),
    /// The listener has stopped for this reason; nothing follows.
    Stop(ShutdownCause),
}

/// Outcome of waiting for the listener to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopWait {
    /// Why the listener stopped, or `None` on timeout.
    pub cause: Option<ShutdownCause>,
    /// Frames discarded while waiting.
    pub discarded_frames: usize,
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    items: Mutex<VecDeque<Pending>>,
    available: Condvar,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Pending>> {
        // A panic on the other thread must not hide queued work.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: Pending) {
        self.lock().push_back(item);
        self.available.notify_all();
    }

    pub fn pop(&self) -> Option<Pending> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Waits up to `timeout` for a `Stop`, throwing away frames that arrive
    /// first.
    pub fn wait_for_stop(&self, timeout: Duration) -> StopWait {
        let deadline = Instant::now() + timeout;
        let mut discarded_frames = 0;
        let mut items = self.lock();
        loop {
            while let Some(item) = items.pop_front() {
                match item {
                    Pending::Frame(_) => discarded_frames += 1,
                    Pending::Stop(cause) => {
                        return StopWait {
                            cause: Some(cause),
                            discarded_frames,
                        }
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return StopWait {
                    cause: None,
                    discarded_frames,
                };
            }
            items = self
                .available
                .wait_timeout(items, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
