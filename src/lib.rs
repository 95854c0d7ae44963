// src/lib.rs
//! `show()` and `repaint()` for JES-style pictures.
//!
//! Each shown picture gets its own display process (`jes-show`). The producer
//! sends full snapshots over a framed pipe; the display renders them in order
//! and both sides shut down through an exit handshake.

pub mod channel;
pub mod color;
pub mod config;
pub mod display;
pub mod error;
pub mod frame;
pub mod os;
pub mod picture;

pub use channel::{ChannelError, FrameChannel, Message};
pub use color::{make_color, Color, NamedColor};
pub use config::{Config, CONFIG};
pub use error::{OutOfBounds, ShowError};
pub use frame::{Frame, FrameError, FramePayload};
pub use os::subprocess::DisplaySubprocess;
pub use picture::{repaint, show, Picture};
