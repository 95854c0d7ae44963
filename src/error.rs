// src/error.rs
//! Errors surfaced to code that calls `show()` / `repaint()`.

use crate::channel::ChannelError;
use crate::frame::FrameError;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShowError {
    #[error("failed to start display process {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The display process did not exit within the allotted time. It is still
    /// running; the caller decides whether to kill it.
    #[error("display process {pid} did not exit within {timeout:?}")]
    Unresponsive { pid: u32, timeout: Duration },

    #[error("display process {pid}: {source}")]
    Process {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ShowError {
    /// True when the display process is gone or its channel is unusable, in
    /// which case a fresh process can be spawned.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ShowError::Channel(e) if !matches!(e, ChannelError::WriteTimedOut { .. }))
    }
}

/// A pixel coordinate outside the picture.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("pixel ({x}, {y}) is outside a {width}x{height} picture")]
pub struct OutOfBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}
