// src/display/shutdown.rs
//! Exactly-once termination of the display process.
//!
//! Three things can end a display session: the producer sends `EXIT`, the
//! user closes the window, or the channel fails. Whichever is observed first
//! is recorded by `begin()`; later observations are logged and ignored. The
//! coordinator also owns the listener thread and is the only place that stops
//! and joins it.

use crate::config::ShutdownConfig;
use crate::display::listener::Listener;
use crate::display::queue::{PendingQueue, StopWait};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const LOG_TARGET: &str = "jes_show::shutdown";

/// Why the display session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The user closed the window.
    WindowClosed,
    /// The producer sent `EXIT`.
    ProducerExit,
    /// The producer closed the channel on a message boundary.
    ChannelClosed,
    /// The channel broke or carried garbage.
    ChannelFailed(String),
    /// The GUI backend failed.
    DisplayFailed(String),
}

impl ShutdownCause {
    /// True for causes the producer does not know about yet and should be
    /// told about with an upstream `EXIT`.
    pub fn is_abnormal(&self) -> bool {
        matches!(
            self,
            ShutdownCause::ChannelFailed(_) | ShutdownCause::DisplayFailed(_)
        )
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::WindowClosed => write!(f, "window closed"),
            ShutdownCause::ProducerExit => write!(f, "producer exit"),
            ShutdownCause::ChannelClosed => write!(f, "channel closed"),
            ShutdownCause::ChannelFailed(reason) => write!(f, "channel failed: {}", reason),
            ShutdownCause::DisplayFailed(reason) => write!(f, "display failed: {}", reason),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("listener thread did not stop within {0:?}")]
    ListenerJoinTimeout(Duration),

    #[error("listener thread panicked")]
    ListenerPanicked,
}

pub struct ShutdownCoordinator {
    cause: OnceCell<ShutdownCause>,
    listener: Option<Listener>,
    handshake_timeout: Duration,
    listener_join_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(listener: Listener, config: &ShutdownConfig) -> Self {
        Self {
            cause: OnceCell::new(),
            listener: Some(listener),
            handshake_timeout: config.handshake_timeout(),
            listener_join_timeout: config.listener_join_timeout(),
        }
    }

    /// Records `cause` as the reason for shutting down. Returns `false` if a
    /// shutdown had already begun, in which case `cause` is discarded.
    pub fn begin(&self, cause: ShutdownCause) -> bool {
        match self.cause.set(cause) {
            Ok(()) => {
                if let Some(cause) = self.cause.get() {
                    info!(target: LOG_TARGET, "ShutdownCoordinator: shutting down ({})", cause);
                }
                true
            }
            Err(late) => {
                debug!(
                    target: LOG_TARGET,
                    "ShutdownCoordinator: ignoring '{}', already shutting down",
                    late
                );
                false
            }
        }
    }

    pub fn cause(&self) -> Option<&ShutdownCause> {
        self.cause.get()
    }

    pub fn has_begun(&self) -> bool {
        self.cause.get().is_some()
    }

    /// After sending `EXIT` upstream, waits for the producer's reply (or for
    /// the channel to close), discarding any frames that arrive meanwhile.
    pub fn await_handshake(&self, queue: &PendingQueue) -> StopWait {
        debug!(
            target: LOG_TARGET,
            "ShutdownCoordinator: waiting up to {:?} for the exit handshake",
            self.handshake_timeout
        );
        let waited = queue.wait_for_stop(self.handshake_timeout);
        match &waited.cause {
            Some(ShutdownCause::ProducerExit) => {
                debug!(target: LOG_TARGET, "ShutdownCoordinator: handshake complete");
            }
            Some(other) => {
                debug!(target: LOG_TARGET, "ShutdownCoordinator: no handshake reply ({})", other);
            }
            None => warn!(
                target: LOG_TARGET,
                "ShutdownCoordinator: producer did not answer the exit handshake within {:?}",
                self.handshake_timeout
            ),
        }
        if waited.discarded_frames > 0 {
            debug!(
                target: LOG_TARGET,
                "ShutdownCoordinator: discarded {} frame(s) received while closing",
                waited.discarded_frames
            );
        }
        waited
    }

    /// Stops the listener and joins it within the configured timeout.
    /// Calling it again after it returned is a no-op.
    pub fn finish(&mut self) -> Result<(), ShutdownError> {
        let Some(mut listener) = self.listener.take() else {
            return Ok(());
        };
        listener.stop();
        match listener.join_timeout(self.listener_join_timeout) {
            Ok(()) => {
                debug!(target: LOG_TARGET, "ShutdownCoordinator: listener joined");
                Ok(())
            }
            Err(e) => {
                error!(target: LOG_TARGET, "ShutdownCoordinator: {}", e);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("cause", &self.cause.get())
            .field("listener_running", &self.listener.is_some())
            .finish()
    }
}
