// src/display/mod.rs
//! The display process: a window that shows whatever frames the producer sends.
//!
//! - RenderLoop: owns the driver and the event loop, renders queued frames
//! - Listener: reads the channel on its own thread and wakes the event loop
//! - ShutdownCoordinator: exactly-once termination and the listener join
//! - DisplayDriver: platform-specific primitives (X11, headless)
//! - Messages: request/response protocol between the loop and the driver

pub mod driver;
pub mod drivers;
pub mod listener;
pub mod messages;
pub mod queue;
pub mod render_loop;
pub mod shutdown;
pub mod waker;

#[cfg(test)]
mod tests;

pub use driver::DisplayDriver;
pub use drivers::headless::pixel_digest;
pub use drivers::{HeadlessDisplayDriver, HeadlessHandle, HeadlessOptions, RenderRecord};
pub use listener::Listener;
pub use messages::{DisplayError, DisplayEvent, DriverRequest, DriverResponse};
pub use queue::{Pending, PendingQueue};
pub use render_loop::{LoopState, RenderLoop, RenderSummary};
pub use shutdown::{ShutdownCause, ShutdownCoordinator, ShutdownError};
pub use waker::EventLoopWaker;

#[cfg(feature = "x11-display")]
pub use drivers::X11DisplayDriver;
