//! Headless display driver implementation.
//!
//! Keeps the canvas in memory and records every presented frame. Events come
//! from an mpsc channel, which the `HeadlessWaker` and the `HeadlessHandle`
//! both feed. Used by tests and by `jes-show --backend headless`.

use crate::display::driver::DisplayDriver;
use crate::display::messages::{
    CanvasImage, DisplayError, DisplayEvent, DriverRequest, DriverResponse, ImageId,
};
use crate::display::waker::{ChannelWaker, EventLoopWaker};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const LOG_TARGET: &str = "jes_show::headless";

#[derive(Debug, Clone, Default)]
pub struct HeadlessOptions {
    /// Simulate the user closing the window after this many presented frames.
    pub close_after_frames: Option<u64>,
    /// Append one JSON line per presented frame to this file.
    pub render_log: Option<PathBuf>,
}

/// One presented frame, as written to the render log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRecord {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub digest: String,
}

/// Stable digest of an RGB raster, used to compare what was presented with
/// what was sent.
pub fn pixel_digest(pixels: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    hasher.write(pixels);
    format!("{:016x}", hasher.finish())
}

#[derive(Debug, Default)]
struct CanvasState {
    title: String,
    canvas_size: Option<(u32, u32)>,
    image: Option<(ImageId, CanvasImage)>,
    raised: Option<ImageId>,
    history: Vec<RenderRecord>,
    window_open: bool,
    destroyed: bool,
    /// Wake requests that arrived after `Destroy`.
    late_wakes: u64,
}

/// Shared view of a `HeadlessDisplayDriver` for code outside the event loop.
#[derive(Debug, Clone)]
pub struct HeadlessHandle {
    events_tx: Sender<DisplayEvent>,
    state: Arc<Mutex<CanvasState>>,
}

impl HeadlessHandle {
    /// Behaves like the user clicking the window's close button.
    pub fn request_close(&self) -> Result<()> {
        self.events_tx
            .send(DisplayEvent::CloseRequested)
            .context("headless driver is gone")
    }

    /// Every frame presented so far, oldest first.
    pub fn history(&self) -> Vec<RenderRecord> {
        lock(&self.state).history.clone()
    }

    pub fn title(&self) -> String {
        lock(&self.state).title.clone()
    }

    /// Pixels of the canvas image item, if one exists.
    pub fn image_pixels(&self) -> Option<Box<[u8]>> {
        lock(&self.state)
            .image
            .as_ref()
            .map(|(_, image)| image.pixels.clone())
    }

    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        lock(&self.state).canvas_size
    }

    /// The image item most recently raised to the top of the canvas.
    pub fn raised_image(&self) -> Option<ImageId> {
        lock(&self.state).raised
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.state).destroyed
    }

    /// How many times something tried to wake the event loop after the
    /// window was destroyed. A real toolkit rejects those.
    pub fn late_wakes(&self) -> u64 {
        lock(&self.state).late_wakes
    }
}

/// Wakes the headless event loop, refusing once the window is destroyed the
/// way an X server rejects events for a dead window.
struct HeadlessWaker {
    inner: ChannelWaker,
    state: Arc<Mutex<CanvasState>>,
}

impl EventLoopWaker for HeadlessWaker {
    fn wake(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.destroyed {
                state.late_wakes += 1;
                anyhow::bail!("window already destroyed");
            }
        }
        self.inner.wake()
    }
}

fn lock(state: &Mutex<CanvasState>) -> MutexGuard<'_, CanvasState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct HeadlessDisplayDriver {
    events_tx: Sender<DisplayEvent>,
    events_rx: Receiver<DisplayEvent>,
    state: Arc<Mutex<CanvasState>>,
    close_after_frames: Option<u64>,
    render_log: Option<BufWriter<File>>,
    presented: u64,
    next_image_id: u32,
}

impl HeadlessDisplayDriver {
    pub fn new(options: HeadlessOptions) -> Result<Self> {
        info!(target: LOG_TARGET, "HeadlessDisplayDriver::new()");
        let render_log = match &options.render_log {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open render log {}", path.display()))?;
                debug!(target: LOG_TARGET, "HeadlessDisplayDriver: render log {}", path.display());
                Some(BufWriter::new(file))
            }
            None => None,
        };
        let (events_tx, events_rx) = mpsc::channel();
        Ok(Self {
            events_tx,
            events_rx,
            state: Arc::new(Mutex::new(CanvasState::default())),
            close_after_frames: options.close_after_frames,
            render_log,
            presented: 0,
            next_image_id: 1,
        })
    }

    pub fn handle(&self) -> HeadlessHandle {
        HeadlessHandle {
            events_tx: self.events_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    fn wait_events(&mut self) -> Result<DriverResponse> {
        // The driver holds a sender itself, so this only fails if that is gone.
        let first = self
            .events_rx
            .recv()
            .map_err(|_| anyhow!("headless event queue disconnected"))?;
        let mut events = vec![first];
        loop {
            match self.events_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        trace!(target: LOG_TARGET, "HeadlessDisplayDriver: {} event(s)", events.len());
        Ok(DriverResponse::Events(events))
    }

    fn present(&mut self, id: ImageId, image: CanvasImage) -> Result<(), DisplayError> {
        let mut state = lock(&self.state);
        if !state.window_open {
            return Err(DisplayError::PresentationFailed(
                image,
                "window is not open".to_string(),
            ));
        }
        let record = RenderRecord {
            title: state.title.clone(),
            width: image.width_px,
            height: image.height_px,
            digest: pixel_digest(&image.pixels),
        };
        state.image = Some((id, image));
        state.history.push(record.clone());
        drop(state);

        if let Some(log) = self.render_log.as_mut() {
            serde_json::to_writer(&mut *log, &record)
                .context("Failed to serialize render record")?;
            log.write_all(b"\n").context("Failed to write render log")?;
            log.flush().context("Failed to flush render log")?;
        }

        self.presented += 1;
        debug!(
            target: LOG_TARGET,
            "HeadlessDisplayDriver: presented #{} '{}' {}x{}",
            self.presented,
            record.title,
            record.width,
            record.height
        );
        if self.close_after_frames == Some(self.presented) {
            info!(
                target: LOG_TARGET,
                "HeadlessDisplayDriver: simulating window close after {} frame(s)",
                self.presented
            );
            let _ = self.events_tx.send(DisplayEvent::CloseRequested);
        }
        Ok(())
    }
}

impl DisplayDriver for HeadlessDisplayDriver {
    fn create_waker(&self) -> Result<Box<dyn EventLoopWaker>> {
        Ok(Box::new(HeadlessWaker {
            inner: ChannelWaker::new(self.events_tx.clone()),
            state: Arc::clone(&self.state),
        }))
    }

    fn handle_request(&mut self, request: DriverRequest) -> Result<DriverResponse, DisplayError> {
        match request {
            DriverRequest::Init { title } => {
                info!(target: LOG_TARGET, "HeadlessDisplayDriver: Init '{}'", title);
                let mut state = lock(&self.state);
                state.title = title;
                state.window_open = true;
                Ok(DriverResponse::InitComplete {
                    width_px: 0,
                    height_px: 0,
                })
            }
            DriverRequest::WaitEvents => Ok(self.wait_events()?),
            DriverRequest::SetTitle(title) => {
                trace!(target: LOG_TARGET, "HeadlessDisplayDriver: SetTitle '{}'", title);
                lock(&self.state).title = title;
                Ok(DriverResponse::TitleSet)
            }
            DriverRequest::ResizeCanvas {
                width_px,
                height_px,
            } => {
                lock(&self.state).canvas_size = Some((width_px, height_px));
                Ok(DriverResponse::CanvasResized)
            }
            DriverRequest::CreateImage(image) => {
                let id = ImageId(self.next_image_id);
                self.next_image_id += 1;
                self.present(id, image)?;
                Ok(DriverResponse::ImageCreated(id))
            }
            DriverRequest::UpdateImage { id, image } => {
                let known = lock(&self.state)
                    .image
                    .as_ref()
                    .is_some_and(|(current, _)| *current == id);
                if !known {
                    return Err(DisplayError::PresentationFailed(
                        image,
                        format!("unknown image item {:?}", id),
                    ));
                }
                self.present(id, image)?;
                Ok(DriverResponse::ImageUpdated)
            }
            DriverRequest::RaiseImage(id) => {
                lock(&self.state).raised = Some(id);
                Ok(DriverResponse::ImageRaised)
            }
            DriverRequest::Destroy => {
                info!(target: LOG_TARGET, "HeadlessDisplayDriver: Destroy");
                let mut state = lock(&self.state);
                state.window_open = false;
                state.destroyed = true;
                Ok(DriverResponse::Destroyed)
            }
        }
    }
}
