// src/display/listener.rs
//! The listener thread: reads messages from the producer and hands them to the
//! event loop.
//!
//! The listener never touches the GUI. It pushes onto the `PendingQueue` and
//! calls `EventLoopWaker::wake()`. It waits on the channel and on a private
//! stop pipe at the same time, so it can be stopped between messages.

use crate::channel::{ChannelError, FrameReceiver, Message};
use crate::display::queue::{Pending, PendingQueue};
use crate::display::shutdown::{ShutdownCause, ShutdownError};
use crate::display::waker::EventLoopWaker;
use crate::os::poll::{self, Readiness, StopSignal, StopWatch};
use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use std::io::Read;
use std::os::fd::AsFd;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LOG_TARGET: &str = "jes_show::listener";

/// Bound on the join performed when a `Listener` is dropped without `join_timeout`.
const DROP_JOIN_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Listener {
    stop: StopSignal,
    finished_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

/// Signals the owning `Listener` when the thread body returns or unwinds.
struct FinishedGuard(SyncSender<()>);

impl Drop for FinishedGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

impl Listener {
    pub fn spawn<R>(
        receiver: FrameReceiver<R>,
        queue: Arc<PendingQueue>,
        waker: Box<dyn EventLoopWaker>,
    ) -> Result<Self>
    where
        R: Read + AsFd + Send + 'static,
    {
        let (stop, watch) = poll::stop_pipe()?;
        let (finished_tx, finished_rx) = mpsc::sync_channel(1);

        let handle = thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || {
                let _finished = FinishedGuard(finished_tx);
                run(receiver, watch, &queue, waker.as_ref());
            })
            .context("Failed to spawn listener thread")?;

        info!(target: LOG_TARGET, "Listener: started");
        Ok(Self {
            stop,
            finished_rx,
            handle: Some(handle),
        })
    }

    /// Asks the thread to stop at the next message boundary. Does not wait.
    pub fn stop(&self) {
        self.stop.trigger();
    }

    /// Waits at most `timeout` for the thread to finish, then joins it.
    ///
    /// On timeout the thread is left running; the handle stays here so a
    /// later call can try again.
    pub fn join_timeout(&mut self, timeout: Duration) -> Result<(), ShutdownError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match self.finished_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                handle.join().map_err(|_| ShutdownError::ListenerPanicked)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.handle = Some(handle);
                Err(ShutdownError::ListenerJoinTimeout(timeout))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        self.stop();
        if let Err(e) = self.join_timeout(DROP_JOIN_TIMEOUT) {
            warn!(target: LOG_TARGET, "Listener: detaching thread on drop: {}", e);
        }
    }
}

fn run<R: Read + AsFd>(
    mut receiver: FrameReceiver<R>,
    watch: StopWatch,
    queue: &PendingQueue,
    waker: &dyn EventLoopWaker,
) {
    let mut frames = 0u64;
    let cause = loop {
        match poll::wait_readable(receiver.as_fd(), watch.as_fd()) {
            Ok(Readiness::Channel) => {}
            Ok(Readiness::Stop) => {
                debug!(target: LOG_TARGET, "Listener: stop requested after {} frame(s)", frames);
                return;
            }
            Err(e) => break ShutdownCause::ChannelFailed(format!("{:#}", e)),
        }

        match receiver.receive() {
            Ok(Message::Frame(payload)) => {
                frames += 1;
                trace!(target: LOG_TARGET, "Listener: frame #{} ({} bytes)", frames, payload.len());
                queue.push(Pending::Frame(payload));
                wake(waker, &watch);
            }
            Ok(Message::Exit) => break ShutdownCause::ProducerExit,
            Err(ChannelError::Closed) => break ShutdownCause::ChannelClosed,
            Err(e) => {
                warn!(target: LOG_TARGET, "Listener: {}", e);
                break ShutdownCause::ChannelFailed(e.to_string());
            }
        }
    };

    debug!(target: LOG_TARGET, "Listener: stopping ({}) after {} frame(s)", cause, frames);
    queue.push(Pending::Stop(cause));
    wake(waker, &watch);
}

fn wake(waker: &dyn EventLoopWaker, watch: &StopWatch) {
    // Once stopped, the window this would wake may already be destroyed.
    if poll::is_readable_now(watch.as_fd()).unwrap_or(false) {
        trace!(target: LOG_TARGET, "Listener: stopped, not waking the event loop");
        return;
    }
    if let Err(e) = waker.wake() {
        debug!(target: LOG_TARGET, "Listener: wake failed: {:#}", e);
    }
}
