// src/display/waker.rs
//! EventLoopWaker - Cross-thread signaling to wake the display event loop.
//!
//! The listener thread receives frames while the event-loop thread is blocked
//! waiting for GUI events. After queueing a frame the listener calls `wake()`,
//! which posts a toolkit-native event so the event loop returns from its wait
//! and drains the queue.

use crate::display::messages::DisplayEvent;
use anyhow::{Context, Result};
use std::sync::mpsc::Sender;

/// Trait for waking the display event loop from background threads.
///
/// Implementations post an event to the event loop's own queue. They must not
/// touch any GUI state beyond that.
pub trait EventLoopWaker: Send + Sync {
    /// Wake the event loop, causing it to return from a blocking wait.
    fn wake(&self) -> Result<()>;
}

/// Waker for drivers whose event queue is an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelWaker {
    events_tx: Sender<DisplayEvent>,
}

impl ChannelWaker {
    pub fn new(events_tx: Sender<DisplayEvent>) -> Self {
        Self { events_tx }
    }
}

impl EventLoopWaker for ChannelWaker {
    fn wake(&self) -> Result<()> {
        self.events_tx
            .send(DisplayEvent::Wake)
            .context("display event queue is gone")
    }
}

#[cfg(feature = "x11-display")]
pub use x11_waker::X11Waker;

#[cfg(feature = "x11-display")]
mod x11_waker {
    use super::*;
    use std::ptr;
    use std::sync::Mutex;
    use x11::xlib::*;

    struct WakerConnection {
        display: *mut Display,
        window: Window,
        wake_atom: Atom,
    }

    // The connection is used only while holding the mutex.
    unsafe impl Send for WakerConnection {}

    /// X11 implementation of EventLoopWaker.
    ///
    /// Opens its own Xlib connection and sends a `ClientMessage` carrying the
    /// wake atom to the display window. The event loop's connection receives
    /// it from `XNextEvent` like any other event.
    pub struct X11Waker {
        connection: Mutex<WakerConnection>,
    }

    impl X11Waker {
        pub fn new(window: Window, wake_atom: Atom) -> Result<Self> {
            let display = unsafe { XOpenDisplay(ptr::null()) };
            if display.is_null() {
                anyhow::bail!("Failed to open X11 display for waker. Is DISPLAY set?");
            }
            Ok(Self {
                connection: Mutex::new(WakerConnection {
                    display,
                    window,
                    wake_atom,
                }),
            })
        }
    }

    impl EventLoopWaker for X11Waker {
        fn wake(&self) -> Result<()> {
            let conn = self
                .connection
                .lock()
                .map_err(|_| anyhow::anyhow!("X11 waker mutex poisoned"))?;
            unsafe {
                let mut event: XEvent = std::mem::zeroed();
                event.client_message.type_ = ClientMessage;
                event.client_message.display = conn.display;
                event.client_message.window = conn.window;
                event.client_message.message_type = conn.wake_atom;
                event.client_message.format = 32;
                let status = XSendEvent(conn.display, conn.window, False, NoEventMask, &mut event);
                XFlush(conn.display);
                if status == 0 {
                    anyhow::bail!("XSendEvent failed for wake event");
                }
            }
            Ok(())
        }
    }

    impl Drop for X11Waker {
        fn drop(&mut self) {
            if let Ok(conn) = self.connection.get_mut() {
                if !conn.display.is_null() {
                    unsafe { XCloseDisplay(conn.display) };
                    conn.display = ptr::null_mut();
                }
            }
        }
    }
}
