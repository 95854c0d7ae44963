// src/os/poll.rs

//! Readiness checks built on `poll(2)`.
//!
//! The display's listener thread blocks on two descriptors at once: the
//! channel and a private stop pipe. Writing a byte into the stop pipe is how
//! the event loop thread interrupts a listener that is waiting between
//! messages. The producer uses the zero-timeout variant to check whether the
//! display has written anything upstream without blocking, and waits for
//! room in the display's stdin pipe against a deadline.

use anyhow::{Context, Result};
use log::{debug, trace};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::Mutex;
use std::time::Instant;

/// Readiness events that mean "a read will not block": data, hang-up or error.
fn readable_flags() -> PollFlags {
    PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR
}

/// Which descriptor became ready first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The channel has data, EOF or an error pending.
    Channel,
    /// Someone triggered the stop pipe.
    Stop,
}

/// Write end of a stop pipe. Triggering it is idempotent and never blocks for
/// long: one byte is enough to wake the watcher and the pipe is never drained.
#[derive(Debug)]
pub struct StopSignal {
    write_end: Mutex<Option<File>>,
}

impl StopSignal {
    pub fn trigger(&self) {
        let mut guard = self
            .write_end
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(mut file) = guard.take() {
            match file.write_all(&[1]) {
                Ok(()) => trace!(target: "jes_show::os", "StopSignal: triggered"),
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(target: "jes_show::os", "StopSignal: watcher already gone");
                }
                Err(e) => debug!(target: "jes_show::os", "StopSignal: write failed: {}", e),
            }
            // Dropping the write end also raises POLLHUP on the read end.
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.write_end
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_none()
    }
}

/// Read end of a stop pipe.
#[derive(Debug)]
pub struct StopWatch {
    read_end: OwnedFd,
}

impl AsFd for StopWatch {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read_end.as_fd()
    }
}

/// Creates a connected stop signal and watch.
pub fn stop_pipe() -> Result<(StopSignal, StopWatch)> {
    let (read_end, write_end) = nix::unistd::pipe().context("Failed to create stop pipe")?;
    Ok((
        StopSignal {
            write_end: Mutex::new(Some(File::from(write_end))),
        },
        StopWatch { read_end },
    ))
}

/// Blocks until either `channel` is readable or `stop` is triggered.
///
/// A triggered stop wins over pending channel data.
pub fn wait_readable(channel: BorrowedFd<'_>, stop: BorrowedFd<'_>) -> Result<Readiness> {
    loop {
        let mut fds = [
            PollFd::new(channel, PollFlags::POLLIN),
            PollFd::new(stop, PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e).context("poll on channel and stop pipe failed"),
        }

        let ready = |fd: &PollFd<'_>| {
            fd.revents()
                .is_some_and(|revents| revents.intersects(readable_flags()))
        };
        if ready(&fds[1]) {
            return Ok(Readiness::Stop);
        }
        if ready(&fds[0]) {
            return Ok(Readiness::Channel);
        }
    }
}

/// Returns true if reading from `fd` would not block right now.
pub fn is_readable_now(fd: BorrowedFd<'_>) -> Result<bool> {
    loop {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(0) => return Ok(false),
            Ok(_) => {
                return Ok(fds[0]
                    .revents()
                    .is_some_and(|revents| revents.intersects(readable_flags())))
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e).context("poll on upstream pipe failed"),
        }
    }
}

/// Blocks until a write to `fd` would not block or `deadline` passes.
/// Returns `false` on timeout. A hang-up or error counts as writable so the
/// following write reports it.
pub fn wait_writable(fd: BorrowedFd<'_>, deadline: Instant) -> Result<bool> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(u128::from(u16::MAX)) as u16;
        let mut fds = [PollFd::new(fd, PollFlags::POLLOUT)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) if Instant::now() >= deadline => return Ok(false),
            Ok(0) => continue,
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e).context("poll on downstream pipe failed"),
        }
    }
}

/// Puts `fd` into non-blocking mode so writes return `WouldBlock` instead of
/// waiting for the reader.
pub fn set_nonblocking<Fd: AsFd>(fd: Fd) -> Result<()> {
    let raw_fd = fd.as_fd().as_raw_fd();
    let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL)
        .with_context(|| format!("Failed to get flags for fd {}", raw_fd))?;
    let mut non_blocking_flags = OFlag::from_bits_truncate(flags);
    non_blocking_flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(non_blocking_flags))
        .with_context(|| format!("Failed to set fd {} to non-blocking", raw_fd))?;
    trace!(target: "jes_show::os", "set fd {} to non-blocking", raw_fd);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::io::Read;
    use std::thread;
    use std::time::Duration;

    #[test_log::test]
    fn it_should_report_channel_data() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let (_signal, watch) = stop_pipe().unwrap();
        tx.write_all(b"x").unwrap();
        assert_eq!(
            wait_readable(rx.as_fd(), watch.as_fd()).unwrap(),
            Readiness::Channel
        );
    }

    #[test_log::test]
    fn it_should_wake_on_stop_from_another_thread() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let (signal, watch) = stop_pipe().unwrap();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signal.trigger();
            signal
        });

        assert_eq!(
            wait_readable(rx.as_fd(), watch.as_fd()).unwrap(),
            Readiness::Stop
        );
        let signal = stopper.join().unwrap();
        assert!(signal.is_triggered());
        // A second trigger is a no-op.
        signal.trigger();
    }

    #[test_log::test]
    fn it_should_prefer_stop_over_pending_data() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let (signal, watch) = stop_pipe().unwrap();
        tx.write_all(b"x").unwrap();
        signal.trigger();
        assert_eq!(
            wait_readable(rx.as_fd(), watch.as_fd()).unwrap(),
            Readiness::Stop
        );
    }

    #[test_log::test]
    fn it_should_poll_without_blocking() {
        let (tx, rx) = UnixStream::pair().unwrap();
        assert!(!is_readable_now(rx.as_fd()).unwrap());
        drop(tx);
        // EOF counts as readable.
        assert!(is_readable_now(rx.as_fd()).unwrap());
    }

    #[test_log::test]
    fn it_should_wait_for_room_in_a_full_pipe() {
        let (mut tx, mut rx) = UnixStream::pair().unwrap();
        assert!(wait_writable(tx.as_fd(), Instant::now()).unwrap());

        set_nonblocking(&tx).unwrap();
        let chunk = [0u8; 4096];
        loop {
            match tx.write(&chunk) {
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("unexpected write error: {}", e),
            }
        }

        let started = Instant::now();
        let deadline = started + Duration::from_millis(50);
        assert!(!wait_writable(tx.as_fd(), deadline).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(50));

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            while rx.read(&mut buf).unwrap() > 0 {}
        });
        assert!(wait_writable(tx.as_fd(), Instant::now() + Duration::from_secs(5)).unwrap());
        drop(tx);
        reader.join().unwrap();
    }
}
