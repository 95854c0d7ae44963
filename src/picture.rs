// src/picture.rs

//! Pictures and the `show()` / `repaint()` entry points.
//!
//! A `Picture` owns at most one display process. The first `show()` spawns
//! it; later calls (`repaint()` included) send a fresh snapshot to the same
//! process, which updates its title and image in place. If the user closed
//! the window in the meantime the next call notices, forgets the old process
//! and spawns a new one.

use crate::color::{Color, NamedColor};
use crate::config::{Config, CONFIG};
use crate::error::{OutOfBounds, ShowError};
use crate::frame::{raster_len, Frame, FrameError, BYTES_PER_PIXEL};
use crate::os::subprocess::DisplaySubprocess;
use log::{debug, info, warn};

const LOG_TARGET: &str = "jes_show::picture";

/// Title used until `set_title` is called.
pub const DEFAULT_TITLE: &str = "Picture";

pub struct Picture {
    title: String,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    display: Option<DisplaySubprocess>,
    config: Option<Config>,
}

impl Picture {
    /// A white picture, like JES's `makeEmptyPicture(width, height)`.
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        Self::filled(width, height, NamedColor::White.to_color())
    }

    /// A picture of one solid color.
    pub fn filled(width: u32, height: u32, color: Color) -> Result<Self, FrameError> {
        let len = raster_len(width, height)?;
        let pixels = color
            .to_array()
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect();
        Ok(Self {
            title: DEFAULT_TITLE.to_string(),
            width,
            height,
            pixels,
            display: None,
            config: None,
        })
    }

    /// Uses `config` instead of the process-wide default for this picture's
    /// display process.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Result<Color, OutOfBounds> {
        let offset = self.offset(x, y)?;
        let mut rgb = [0u8; BYTES_PER_PIXEL];
        rgb.copy_from_slice(&self.pixels[offset..offset + BYTES_PER_PIXEL]);
        Ok(Color::from_array(rgb))
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) -> Result<(), OutOfBounds> {
        let offset = self.offset(x, y)?;
        self.pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color.to_array());
        Ok(())
    }

    /// Copies the current title and pixels into a frame. Later edits to the
    /// picture do not affect frames already taken.
    pub fn snapshot(&self) -> Frame {
        // `filled` sized the raster and pixel writes never resize it.
        Frame::from_validated(
            self.title.clone(),
            self.width,
            self.height,
            self.pixels.clone().into_boxed_slice(),
        )
    }

    /// Opens a window showing this picture, or refreshes the one already open.
    pub fn show(&mut self) -> Result<(), ShowError> {
        self.send_snapshot()
    }

    /// Pushes the current pixels and title to the open window. Opens one if
    /// there is none.
    pub fn repaint(&mut self) -> Result<(), ShowError> {
        self.send_snapshot()
    }

    /// True if a display process is open for this picture. Completes the exit
    /// handshake if its window was closed.
    pub fn is_showing(&mut self) -> bool {
        self.forget_closed_display();
        self.display.is_some()
    }

    /// PID of the display process, if one is open.
    pub fn display_pid(&self) -> Option<u32> {
        self.display.as_ref().map(DisplaySubprocess::pid)
    }

    /// Direct access to the display process, e.g. to `kill()` it after
    /// [`ShowError::Unresponsive`].
    pub fn display_mut(&mut self) -> Option<&mut DisplaySubprocess> {
        self.display.as_mut()
    }

    /// Closes the window and waits for the display process to exit.
    ///
    /// On [`ShowError::Unresponsive`] the process handle is kept so the caller
    /// can decide to kill it.
    pub fn close(&mut self) -> Result<(), ShowError> {
        let timeout = self.config().shutdown.exit_timeout();
        if let Some(display) = self.display.as_mut() {
            display.request_exit(timeout)?;
            self.display = None;
        }
        Ok(())
    }

    fn config(&self) -> &Config {
        self.config.as_ref().unwrap_or(&CONFIG)
    }

    fn offset(&self, x: u32, y: u32) -> Result<usize, OutOfBounds> {
        if x >= self.width || y >= self.height {
            return Err(OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok((y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL)
    }

    fn forget_closed_display(&mut self) {
        let closed = match self.display.as_mut() {
            Some(display) => display.poll_closed().unwrap_or_else(|e| {
                warn!(target: LOG_TARGET, "Picture: cannot check display state: {}", e);
                true
            }),
            None => false,
        };
        if closed {
            debug!(target: LOG_TARGET, "Picture: '{}' display closed, forgetting it", self.title);
            self.display = None;
        }
    }

    fn send_snapshot(&mut self) -> Result<(), ShowError> {
        self.forget_closed_display();
        let frame = self.snapshot();

        // A display can vanish between the closed-check and the write. One
        // respawn covers that; a second failure is reported.
        match self.send_to_display(&frame) {
            Err(e) if e.is_disconnect() => {
                warn!(
                    target: LOG_TARGET,
                    "Picture: display for '{}' went away ({}), opening a new one",
                    self.title,
                    e
                );
                self.display = None;
                self.send_to_display(&frame)
            }
            result => result,
        }
    }

    /// Sends `frame` to the open display, spawning one first if needed.
    fn send_to_display(&mut self, frame: &Frame) -> Result<(), ShowError> {
        let display = match self.display.as_mut() {
            Some(display) => display,
            None => {
                let display = DisplaySubprocess::spawn(self.config())?;
                info!(
                    target: LOG_TARGET,
                    "Picture: showing '{}' in pid {}",
                    self.title,
                    display.pid()
                );
                self.display.insert(display)
            }
        };
        display.send_frame(frame)
    }
}

impl std::fmt::Debug for Picture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Picture")
            .field("title", &self.title)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("display", &self.display)
            .finish()
    }
}

/// JES's `show(picture)`.
pub fn show(picture: &mut Picture) -> Result<(), ShowError> {
    picture.show()
}

/// JES's `repaint(picture)`.
pub fn repaint(picture: &mut Picture) -> Result<(), ShowError> {
    picture.repaint()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_start_white_with_the_default_title() {
        let picture = Picture::new(3, 2).unwrap();
        assert_eq!(picture.title(), DEFAULT_TITLE);
        assert_eq!(picture.pixel(2, 1).unwrap(), NamedColor::White.to_color());
        assert!(picture.display_pid().is_none());
    }

    #[test]
    fn it_should_reject_empty_pictures() {
        assert!(matches!(
            Picture::new(0, 10),
            Err(FrameError::EmptyDimensions { .. })
        ));
    }

    #[test]
    fn it_should_set_and_get_pixels() {
        let mut picture = Picture::filled(4, 4, NamedColor::Black.into()).unwrap();
        picture.set_pixel(1, 2, Color::new(10, 20, 30)).unwrap();
        assert_eq!(picture.pixel(1, 2).unwrap(), Color::new(10, 20, 30));
        assert_eq!(picture.pixel(2, 1).unwrap(), Color::default());
    }

    #[test]
    fn it_should_report_out_of_bounds_pixels() {
        let mut picture = Picture::new(4, 3).unwrap();
        let err = picture.set_pixel(4, 0, Color::default()).unwrap_err();
        assert_eq!(
            err,
            OutOfBounds {
                x: 4,
                y: 0,
                width: 4,
                height: 3
            }
        );
        assert!(picture.pixel(0, 3).is_err());
    }

    #[test]
    fn it_should_snapshot_a_copy_that_later_edits_do_not_touch() {
        let mut picture = Picture::new(2, 2).unwrap();
        picture.set_title("before");
        let frame = picture.snapshot();

        picture.set_title("after");
        picture.set_pixel(0, 0, Color::new(1, 2, 3)).unwrap();

        assert_eq!(frame.title(), "before");
        assert_eq!(&frame.pixels()[..3], &[255, 255, 255]);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn it_should_snapshot_a_frame_that_passes_validation() {
        let mut picture = Picture::filled(5, 3, NamedColor::Blue.into()).unwrap();
        picture.set_title("checked");
        picture.set_pixel(4, 2, Color::new(9, 8, 7)).unwrap();

        let frame = picture.snapshot();
        let rebuilt = Frame::new("checked", 5, 3, frame.pixels().to_vec()).unwrap();
        assert_eq!(frame, rebuilt);
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn it_should_close_without_a_display() {
        let mut picture = Picture::new(1, 1).unwrap();
        picture.close().unwrap();
        assert!(!picture.is_showing());
    }
}
