// src/display/driver.rs
//! DisplayDriver trait - minimal interface for platform-specific display primitives.
//!
//! This trait defines the minimal set of operations the render loop needs
//! from a GUI toolkit. All protocol and lifecycle logic lives in the render
//! loop.
//!
//! ## Threading Model
//! - The driver lives on the event-loop thread and is only ever called there
//! - The listener thread reaches the event loop through an `EventLoopWaker`
//!   obtained from `create_waker()`, never through the driver itself
//!
//! ## Lifecycle
//! 1. Construct the driver (connect to the display server, no window yet)
//! 2. `handle_request(Init)` - create the window
//! 3. Request/response loop
//! 4. `handle_request(Destroy)` - tear the window down; `Drop` releases the
//!    connection

use crate::display::messages::{DisplayError, DriverRequest, DriverResponse};
use crate::display::waker::EventLoopWaker;
use anyhow::Result;

/// Minimal platform-specific display driver interface.
pub trait DisplayDriver {
    /// Create a waker that other threads can use to interrupt `WaitEvents`.
    fn create_waker(&self) -> Result<Box<dyn EventLoopWaker>>;

    /// Handle a request from the render loop, returning a response.
    ///
    /// ## Request/Response Pairs
    /// - `Init` → `InitComplete`
    /// - `WaitEvents` → `Events` (blocks until at least one event)
    /// - `SetTitle(s)` → `TitleSet`
    /// - `ResizeCanvas` → `CanvasResized`
    /// - `CreateImage` → `ImageCreated(id)`
    /// - `UpdateImage` → `ImageUpdated`
    /// - `RaiseImage` → `ImageRaised`
    /// - `Destroy` → `Destroyed`
    ///
    /// ## Error Handling
    /// Returns `DisplayError` instead of `anyhow::Result` so a failed image
    /// operation can hand the pixels back via `PresentationFailed`.
    fn handle_request(&mut self, request: DriverRequest) -> Result<DriverResponse, DisplayError>;
}
