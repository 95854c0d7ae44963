// src/display/drivers/mod.rs
//! Platform-specific display driver implementations.

pub mod headless;

#[cfg(feature = "x11-display")]
pub mod x11;

pub use headless::{HeadlessDisplayDriver, HeadlessHandle, HeadlessOptions, RenderRecord};

#[cfg(feature = "x11-display")]
pub use x11::X11DisplayDriver;
