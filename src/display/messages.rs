// src/display/messages.rs
//! Message types for communication between the render loop and a DisplayDriver.
//!
//! This module defines the message-based protocol for display operations.
//! Pixel buffers move by ownership; the driver never shares state with the
//! render loop.

use thiserror::Error;

/// Handle on the canvas image item created by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub u32);

/// An RGB raster to put on the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasImage {
    pub width_px: u32,
    pub height_px: u32,
    /// Row-major RGB, 3 bytes per pixel.
    pub pixels: Box<[u8]>,
}

/// Requests sent from the render loop to the driver.
#[derive(Debug, Clone)]
pub enum DriverRequest {
    /// Create the window and canvas. Driver responds with InitComplete.
    Init { title: String },

    /// Block until at least one native event (or a wake) is available.
    /// Driver responds with Events.
    WaitEvents,

    /// Set the window title.
    SetTitle(String),

    /// Size the canvas (and window) to the given dimensions.
    ResizeCanvas { width_px: u32, height_px: u32 },

    /// Create the canvas image item. Driver responds with ImageCreated.
    CreateImage(CanvasImage),

    /// Replace the pixels of an existing image item in place.
    UpdateImage { id: ImageId, image: CanvasImage },

    /// Raise an image item above anything else drawn on the canvas.
    RaiseImage(ImageId),

    /// Tear down the window and release GUI resources.
    Destroy,
}

/// Responses sent from the driver to the render loop.
#[derive(Debug)]
pub enum DriverResponse {
    InitComplete { width_px: u32, height_px: u32 },
    Events(Vec<DisplayEvent>),
    TitleSet,
    CanvasResized,
    ImageCreated(ImageId),
    ImageUpdated,
    ImageRaised,
    Destroyed,
}

/// Platform-agnostic display events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Posted by an `EventLoopWaker` from another thread.
    Wake,
    /// User requested window close.
    CloseRequested,
    /// The window needs repainting.
    Exposed,
}

#[derive(Debug, Error)]
pub enum DisplayError {
    /// Presenting an image failed. The image is handed back so the caller can
    /// decide what to do with the pixels.
    #[error("presentation failed: {1}")]
    PresentationFailed(CanvasImage, String),

    #[error(transparent)]
    Generic(#[from] anyhow::Error),
}
