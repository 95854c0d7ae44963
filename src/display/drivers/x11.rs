#![cfg(feature = "x11-display")]

//! X11 DisplayDriver implementation using Xlib.
//!
//! - One top-level window, sized to the current frame
//! - The canvas image item is a server-side pixmap, copied to the window on
//!   raise and on expose
//! - `WM_DELETE_WINDOW` becomes `DisplayEvent::CloseRequested`
//! - `X11Waker` wakes `XNextEvent` with a `ClientMessage` carrying a private
//!   atom

use crate::display::driver::DisplayDriver;
use crate::display::messages::{
    CanvasImage, DisplayError, DisplayEvent, DriverRequest, DriverResponse, ImageId,
};
use crate::display::waker::{EventLoopWaker, X11Waker};
use crate::frame::BYTES_PER_PIXEL;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;
use x11::xlib::*;

const LOG_TARGET: &str = "jes_show::x11";

/// XImage pixels are 32-bit BGRX on the TrueColor visuals we accept.
const X_BYTES_PER_PIXEL: usize = 4;

/// Window size before the first frame arrives.
const INITIAL_SIZE: (u32, u32) = (200, 100);

struct ImageItem {
    id: ImageId,
    pixmap: Pixmap,
    width_px: u32,
    height_px: u32,
}

pub struct X11DisplayDriver {
    display: *mut Display,
    window: Window,
    gc: GC,
    visual: *mut Visual,
    depth: u32,
    wm_delete_window: Atom,
    wake_atom: Atom,
    image: Option<ImageItem>,
    next_image_id: u32,
}

impl X11DisplayDriver {
    /// Connects to `$DISPLAY` and creates the (unmapped) window.
    pub fn new() -> Result<Self> {
        info!(target: LOG_TARGET, "X11DisplayDriver::new() - Initializing X11 display");

        unsafe {
            // The waker talks to the server from the listener thread.
            XInitThreads();

            let display = XOpenDisplay(ptr::null());
            if display.is_null() {
                return Err(anyhow!("Failed to open X11 display. Is DISPLAY set?"));
            }

            let screen = XDefaultScreen(display);
            let root = XRootWindow(display, screen);
            let visual = XDefaultVisual(display, screen);
            let depth = XDefaultDepth(display, screen) as u32;

            let window = XCreateSimpleWindow(
                display,
                root,
                0,
                0,
                INITIAL_SIZE.0,
                INITIAL_SIZE.1,
                0,
                XBlackPixel(display, screen),
                XWhitePixel(display, screen),
            );
            if window == 0 {
                XCloseDisplay(display);
                return Err(anyhow!("Failed to create X11 window"));
            }

            XSelectInput(display, window, ExposureMask | StructureNotifyMask);
            let gc = XCreateGC(display, window, 0, ptr::null_mut());

            let wm_delete_window =
                XInternAtom(display, b"WM_DELETE_WINDOW\0".as_ptr() as *const c_char, False);
            if wm_delete_window != 0 {
                XSetWMProtocols(display, window, [wm_delete_window].as_mut_ptr(), 1);
            } else {
                warn!(
                    target: LOG_TARGET,
                    "X11DisplayDriver: no WM_DELETE_WINDOW atom, window close will not be reported"
                );
            }
            let wake_atom =
                XInternAtom(display, b"JES_SHOW_WAKE\0".as_ptr() as *const c_char, False);

            debug!(target: LOG_TARGET, "X11DisplayDriver: created window {}", window);
            Ok(Self {
                display,
                window,
                gc,
                visual,
                depth,
                wm_delete_window,
                wake_atom,
                image: None,
                next_image_id: 1,
            })
        }
    }

    fn handle_init(&mut self, title: &str) -> Result<DriverResponse> {
        self.handle_set_title(title)?;
        unsafe {
            XMapWindow(self.display, self.window);
            XFlush(self.display);
        }
        info!(target: LOG_TARGET, "X11DisplayDriver: window mapped");
        Ok(DriverResponse::InitComplete {
            width_px: INITIAL_SIZE.0,
            height_px: INITIAL_SIZE.1,
        })
    }

    fn handle_wait_events(&mut self) -> Result<DriverResponse> {
        let mut events = Vec::new();
        unsafe {
            // Block for the first event, then take whatever else is queued.
            loop {
                let mut event: XEvent = std::mem::zeroed();
                XNextEvent(self.display, &mut event);
                if let Some(display_event) = self.convert_event(&event) {
                    events.push(display_event);
                }
                if !events.is_empty() && XPending(self.display) == 0 {
                    break;
                }
            }
        }
        trace!(target: LOG_TARGET, "X11DisplayDriver: {} event(s)", events.len());
        Ok(DriverResponse::Events(events))
    }

    fn convert_event(&mut self, event: &XEvent) -> Option<DisplayEvent> {
        unsafe {
            match event.get_type() {
                ClientMessage => {
                    let message = event.client_message;
                    if message.message_type == self.wake_atom {
                        Some(DisplayEvent::Wake)
                    } else if message.data.get_long(0) as Atom == self.wm_delete_window {
                        debug!(target: LOG_TARGET, "X11DisplayDriver: WM_DELETE_WINDOW received");
                        Some(DisplayEvent::CloseRequested)
                    } else {
                        None
                    }
                }
                Expose if event.expose.count == 0 => {
                    self.copy_image_to_window();
                    Some(DisplayEvent::Exposed)
                }
                _ => None,
            }
        }
    }

    fn handle_set_title(&mut self, title: &str) -> Result<DriverResponse> {
        let c_title = CString::new(title.replace('\0', " "))
            .context("Failed to create CString for window title")?;
        unsafe {
            XStoreName(self.display, self.window, c_title.as_ptr());
            XFlush(self.display);
        }
        Ok(DriverResponse::TitleSet)
    }

    fn handle_resize(&mut self, width_px: u32, height_px: u32) -> Result<DriverResponse> {
        unsafe {
            XResizeWindow(self.display, self.window, width_px, height_px);
            XFlush(self.display);
        }
        debug!(target: LOG_TARGET, "X11DisplayDriver: canvas {}x{}", width_px, height_px);
        Ok(DriverResponse::CanvasResized)
    }

    fn handle_create_image(&mut self, image: CanvasImage) -> Result<DriverResponse, DisplayError> {
        let pixmap = unsafe {
            XCreatePixmap(
                self.display,
                self.window,
                image.width_px,
                image.height_px,
                self.depth,
            )
        };
        if pixmap == 0 {
            return Err(DisplayError::PresentationFailed(
                image,
                "Failed to create pixmap".to_string(),
            ));
        }
        let id = ImageId(self.next_image_id);
        self.next_image_id += 1;
        self.image = Some(ImageItem {
            id,
            pixmap,
            width_px: image.width_px,
            height_px: image.height_px,
        });
        self.put_image(image)?;
        self.copy_image_to_window();
        Ok(DriverResponse::ImageCreated(id))
    }

    fn handle_update_image(
        &mut self,
        id: ImageId,
        image: CanvasImage,
    ) -> Result<DriverResponse, DisplayError> {
        let Some(item) = self.image.as_mut() else {
            return Err(DisplayError::PresentationFailed(
                image,
                format!("unknown image item {:?}", id),
            ));
        };
        if item.id != id {
            return Err(DisplayError::PresentationFailed(
                image,
                format!("unknown image item {:?}", id),
            ));
        }
        if (item.width_px, item.height_px) != (image.width_px, image.height_px) {
            unsafe {
                XFreePixmap(self.display, item.pixmap);
                item.pixmap = XCreatePixmap(
                    self.display,
                    self.window,
                    image.width_px,
                    image.height_px,
                    self.depth,
                );
            }
            item.width_px = image.width_px;
            item.height_px = image.height_px;
        }
        self.put_image(image)?;
        Ok(DriverResponse::ImageUpdated)
    }

    /// Uploads RGB pixels into the image item's pixmap.
    fn put_image(&mut self, image: CanvasImage) -> Result<(), DisplayError> {
        let Some(item) = self.image.as_ref() else {
            return Err(DisplayError::PresentationFailed(
                image,
                "no image item".to_string(),
            ));
        };
        if self.depth != 24 && self.depth != 32 {
            let depth = self.depth;
            return Err(DisplayError::PresentationFailed(
                image,
                format!("unsupported visual depth {}", depth),
            ));
        }

        let mut converted = rgb_to_bgrx(&image.pixels);
        unsafe {
            let ximage = XCreateImage(
                self.display,
                self.visual,
                self.depth,
                ZPixmap,
                0,
                converted.as_mut_ptr() as *mut c_char,
                image.width_px,
                image.height_px,
                32,
                (image.width_px as usize * X_BYTES_PER_PIXEL) as i32,
            );
            if ximage.is_null() {
                return Err(DisplayError::PresentationFailed(
                    image,
                    "Failed to create XImage".to_string(),
                ));
            }
            XPutImage(
                self.display,
                item.pixmap,
                self.gc,
                ximage,
                0,
                0,
                0,
                0,
                image.width_px,
                image.height_px,
            );
            // The buffer belongs to `converted`.
            (*ximage).data = ptr::null_mut();
            XDestroyImage(ximage);
            XFlush(self.display);
        }
        Ok(())
    }

    fn copy_image_to_window(&self) {
        if let Some(item) = self.image.as_ref() {
            unsafe {
                XCopyArea(
                    self.display,
                    item.pixmap,
                    self.window,
                    self.gc,
                    0,
                    0,
                    item.width_px,
                    item.height_px,
                    0,
                    0,
                );
                XFlush(self.display);
            }
        }
    }

    fn handle_destroy(&mut self) -> Result<DriverResponse> {
        unsafe {
            if let Some(item) = self.image.take() {
                XFreePixmap(self.display, item.pixmap);
            }
            if self.window != 0 {
                XDestroyWindow(self.display, self.window);
                self.window = 0;
            }
            XFlush(self.display);
        }
        info!(target: LOG_TARGET, "X11DisplayDriver: window destroyed");
        Ok(DriverResponse::Destroyed)
    }
}

fn rgb_to_bgrx(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len() / BYTES_PER_PIXEL * X_BYTES_PER_PIXEL);
    for px in rgb.chunks_exact(BYTES_PER_PIXEL) {
        out.extend_from_slice(&[px[2], px[1], px[0], 0]);
    }
    out
}

impl DisplayDriver for X11DisplayDriver {
    fn create_waker(&self) -> Result<Box<dyn EventLoopWaker>> {
        Ok(Box::new(X11Waker::new(self.window, self.wake_atom)?))
    }

    fn handle_request(&mut self, request: DriverRequest) -> Result<DriverResponse, DisplayError> {
        if self.window == 0 && !matches!(request, DriverRequest::Destroy) {
            return Err(anyhow!("X11 window already destroyed").into());
        }
        match request {
            DriverRequest::Init { title } => Ok(self.handle_init(&title)?),
            DriverRequest::WaitEvents => Ok(self.handle_wait_events()?),
            DriverRequest::SetTitle(title) => Ok(self.handle_set_title(&title)?),
            DriverRequest::ResizeCanvas {
                width_px,
                height_px,
            } => Ok(self.handle_resize(width_px, height_px)?),
            DriverRequest::CreateImage(image) => self.handle_create_image(image),
            DriverRequest::UpdateImage { id, image } => self.handle_update_image(id, image),
            DriverRequest::RaiseImage(_) => {
                self.copy_image_to_window();
                Ok(DriverResponse::ImageRaised)
            }
            DriverRequest::Destroy => Ok(self.handle_destroy()?),
        }
    }
}

impl Drop for X11DisplayDriver {
    fn drop(&mut self) {
        debug!(target: LOG_TARGET, "X11DisplayDriver::drop() - Cleaning up");
        unsafe {
            if let Some(item) = self.image.take() {
                XFreePixmap(self.display, item.pixmap);
            }
            if !self.gc.is_null() {
                XFreeGC(self.display, self.gc);
            }
            if self.window != 0 {
                XDestroyWindow(self.display, self.window);
            }
            if !self.display.is_null() {
                XCloseDisplay(self.display);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_convert_rgb_to_bgrx() {
        let rgb = [1, 2, 3, 10, 20, 30];
        assert_eq!(rgb_to_bgrx(&rgb), vec![3, 2, 1, 0, 30, 20, 10, 0]);
    }
}
