// src/display/render_loop.rs
//! The display process's event loop.
//!
//! `RenderLoop` runs on the thread that owns the `DisplayDriver`. Frames
//! arrive from the listener thread through the `PendingQueue`; the listener
//! wakes this loop through the driver's `EventLoopWaker`. All GUI mutation
//! happens here.
//!
//! ```text
//! Starting -> Idle <-> Rendering
//!              |  \
//!              |   ClosingRemote (EXIT, EOF or channel failure)
//!              ClosingLocal (window closed)
//!                   both -> Terminated
//! ```

use crate::channel::{FrameChannel, FrameSender};
use crate::config::Config;
use crate::display::driver::DisplayDriver;
use crate::display::listener::Listener;
use crate::display::messages::{
    CanvasImage, DisplayError, DisplayEvent, DriverRequest, DriverResponse, ImageId,
};
use crate::display::queue::{Pending, PendingQueue};
use crate::display::shutdown::{ShutdownCause, ShutdownCoordinator, ShutdownError};
use crate::frame::FramePayload;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::sync::Arc;

const LOG_TARGET: &str = "jes_show::render_loop";

/// Title shown before the first frame arrives.
pub const INITIAL_WINDOW_TITLE: &str = "jes-show";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Idle,
    Rendering,
    ClosingLocal,
    ClosingRemote,
    Terminated,
}

/// What happened during a session, returned by [`RenderLoop::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSummary {
    pub cause: ShutdownCause,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
}

pub struct RenderLoop<D, W: Write> {
    driver: D,
    upstream: FrameSender<W>,
    queue: Arc<PendingQueue>,
    coordinator: ShutdownCoordinator,
    /// Set if the listener could not be joined during close.
    listener_error: Option<ShutdownError>,
    state: LoopState,
    title: String,
    image: Option<ImageId>,
    canvas_size: Option<(u32, u32)>,
    frames_rendered: u64,
    frames_dropped: u64,
}

impl<D: DisplayDriver, W: Write> RenderLoop<D, W> {
    /// Opens the window and starts the listener on the channel's receiving half.
    pub fn start<R>(mut driver: D, channel: FrameChannel<R, W>, config: &Config) -> Result<Self>
    where
        R: Read + AsFd + Send + 'static,
    {
        debug!(target: LOG_TARGET, "RenderLoop: starting");
        let response = driver
            .handle_request(DriverRequest::Init {
                title: INITIAL_WINDOW_TITLE.to_string(),
            })
            .map_err(|e| anyhow!(e))
            .context("Failed to initialize display driver")?;
        match response {
            DriverResponse::InitComplete {
                width_px,
                height_px,
            } => info!(
                target: LOG_TARGET,
                "RenderLoop: window ready ({}x{} px)",
                width_px,
                height_px
            ),
            other => return Err(anyhow!("Expected InitComplete response, got {:?}", other)),
        }

        let waker = driver.create_waker().context("Failed to create event loop waker")?;
        let (upstream, receiver) = channel.split();
        let queue = Arc::new(PendingQueue::new());
        let listener = Listener::spawn(receiver, Arc::clone(&queue), waker)?;

        Ok(Self {
            driver,
            upstream,
            queue,
            coordinator: ShutdownCoordinator::new(listener, &config.shutdown),
            listener_error: None,
            state: LoopState::Idle,
            title: INITIAL_WINDOW_TITLE.to_string(),
            image: None,
            canvas_size: None,
            frames_rendered: 0,
            frames_dropped: 0,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Runs until the session ends, then stops the listener.
    ///
    /// Returns an error only if the listener could not be joined.
    pub fn run(&mut self) -> Result<RenderSummary> {
        while self.state != LoopState::Terminated {
            if let Some(cause) = self.drain_queue() {
                self.close_remote(cause);
                break;
            }

            let events = match self.driver.handle_request(DriverRequest::WaitEvents) {
                Ok(DriverResponse::Events(events)) => events,
                Ok(other) => {
                    warn!(target: LOG_TARGET, "RenderLoop: expected Events, got {:?}", other);
                    continue;
                }
                Err(e) => {
                    self.close_remote(ShutdownCause::DisplayFailed(e.to_string()));
                    break;
                }
            };

            for event in events {
                match event {
                    DisplayEvent::CloseRequested => {
                        self.close_local();
                        break;
                    }
                    DisplayEvent::Wake => trace!(target: LOG_TARGET, "RenderLoop: woken"),
                    DisplayEvent::Exposed => trace!(target: LOG_TARGET, "RenderLoop: exposed"),
                }
            }
        }

        self.stop_listener();
        self.state = LoopState::Terminated;
        if let Some(e) = self.listener_error.take() {
            return Err(e.into());
        }

        let cause = self
            .coordinator
            .cause()
            .cloned()
            .ok_or_else(|| anyhow!("render loop ended without a shutdown cause"))?;
        let summary = RenderSummary {
            cause,
            frames_rendered: self.frames_rendered,
            frames_dropped: self.frames_dropped,
        };
        info!(
            target: LOG_TARGET,
            "RenderLoop: terminated ({}), {} frame(s) rendered, {} dropped",
            summary.cause,
            summary.frames_rendered,
            summary.frames_dropped
        );
        Ok(summary)
    }

    /// Renders everything queued, in order. Returns the listener's stop cause
    /// if one was reached; nothing is queued behind it.
    fn drain_queue(&mut self) -> Option<ShutdownCause> {
        while let Some(item) = self.queue.pop() {
            match item {
                Pending::Frame(payload) => {
                    self.state = LoopState::Rendering;
                    let rendered = self.render(payload);
                    self.state = LoopState::Idle;
                    if let Err(e) = rendered {
                        return Some(ShutdownCause::DisplayFailed(e.to_string()));
                    }
                }
                Pending::Stop(cause) => return Some(cause),
            }
        }
        None
    }

    /// Presents one frame. A payload that does not decode is logged and
    /// dropped; only driver failures are errors.
    fn render(&mut self, payload: FramePayload) -> Result<(), DisplayError> {
        let frame = match payload.decode() {
            Ok(frame) => frame,
            Err(e) => {
                self.frames_dropped += 1;
                warn!(target: LOG_TARGET, "RenderLoop: dropping malformed frame: {}", e);
                return Ok(());
            }
        };
        let (title, width_px, height_px, pixels) = frame.into_parts();

        self.request(DriverRequest::SetTitle(title.clone()))?;
        self.title = title;
        if self.canvas_size != Some((width_px, height_px)) {
            self.request(DriverRequest::ResizeCanvas {
                width_px,
                height_px,
            })?;
            self.canvas_size = Some((width_px, height_px));
        }

        let image = CanvasImage {
            width_px,
            height_px,
            pixels,
        };
        match self.image {
            None => match self.request(DriverRequest::CreateImage(image))? {
                DriverResponse::ImageCreated(id) => self.image = Some(id),
                other => {
                    return Err(DisplayError::Generic(anyhow!(
                        "Expected ImageCreated response, got {:?}",
                        other
                    )))
                }
            },
            Some(id) => {
                self.request(DriverRequest::UpdateImage { id, image })?;
                self.request(DriverRequest::RaiseImage(id))?;
            }
        }

        self.frames_rendered += 1;
        trace!(
            target: LOG_TARGET,
            "RenderLoop: frame #{} '{}' {}x{}",
            self.frames_rendered,
            self.title,
            width_px,
            height_px
        );
        Ok(())
    }

    fn request(&mut self, request: DriverRequest) -> Result<DriverResponse, DisplayError> {
        self.driver.handle_request(request)
    }

    /// The user closed the window: tell the producer and wait briefly for its
    /// reply so it can forget this process before it exits.
    ///
    /// The window is destroyed only after the listener has stopped, so no
    /// wake can target a window that no longer exists.
    fn close_local(&mut self) {
        self.state = LoopState::ClosingLocal;
        if !self.coordinator.begin(ShutdownCause::WindowClosed) {
            self.state = LoopState::Terminated;
            return;
        }

        match self.upstream.send_exit() {
            Ok(()) => {
                let waited = self.coordinator.await_handshake(&self.queue);
                self.frames_dropped += waited.discarded_frames as u64;
            }
            Err(e) => debug!(target: LOG_TARGET, "RenderLoop: producer already gone: {}", e),
        }
        self.stop_listener();
        self.destroy_window();
        self.state = LoopState::Terminated;
    }

    /// The producer ended the session, or the channel or GUI failed.
    fn close_remote(&mut self, cause: ShutdownCause) {
        self.state = LoopState::ClosingRemote;
        let notify_producer = cause.is_abnormal();
        if !self.coordinator.begin(cause) {
            self.state = LoopState::Terminated;
            return;
        }
        self.stop_listener();
        self.destroy_window();

        if notify_producer {
            if let Err(e) = self.upstream.send_exit() {
                debug!(target: LOG_TARGET, "RenderLoop: cannot notify producer: {}", e);
            }
        }
        self.state = LoopState::Terminated;
    }

    /// Stops and joins the listener, keeping the first join failure for
    /// [`RenderLoop::run`] to report.
    fn stop_listener(&mut self) {
        if let Err(e) = self.coordinator.finish() {
            if self.listener_error.is_none() {
                self.listener_error = Some(e);
            }
        }
    }

    fn destroy_window(&mut self) {
        if let Err(e) = self.driver.handle_request(DriverRequest::Destroy) {
            warn!(target: LOG_TARGET, "RenderLoop: failed to destroy window: {}", e);
        }
        self.image = None;
    }
}
