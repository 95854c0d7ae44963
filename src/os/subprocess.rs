// src/os/subprocess.rs

//! Producer-side handle on one display process.
//!
//! The display runs as a separate OS process so a GUI crash cannot take the
//! producer down. Frames go down the child's stdin, the exit token comes back
//! on its stdout, and stderr is inherited so the child's log lines land in
//! the user's terminal.
//!
//! Writes to the child never block past a deadline: its stdin is
//! non-blocking, so a display that stops reading is reported as
//! [`ShowError::Unresponsive`] instead of hanging `show()`.

use crate::channel::{ChannelError, FrameReceiver, FrameSender, Message};
use crate::config::Config;
use crate::error::ShowError;
use crate::frame::Frame;
use crate::os::poll::{is_readable_now, set_nonblocking};
use log::{debug, info, trace, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::fd::AsFd;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "jes_show::subprocess";

/// How often `wait_with_deadline` checks the child.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time between SIGTERM and SIGKILL in [`DisplaySubprocess::kill`].
const KILL_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Lifecycle as seen from the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubprocessState {
    /// The process is (as far as we know) alive and accepting frames.
    Running,
    /// The process has exited and been reaped.
    Closed,
}

pub struct DisplaySubprocess {
    child: Child,
    /// `None` once the exit token has been sent; dropping it closes the
    /// child's stdin.
    sender: Option<FrameSender<ChildStdin>>,
    receiver: FrameReceiver<ChildStdout>,
    state: SubprocessState,
    exit_timeout: Duration,
    send_timeout: Duration,
}

impl DisplaySubprocess {
    /// Starts a display process as described by `config.display`.
    pub fn spawn(config: &Config) -> Result<Self, ShowError> {
        let program = config.display.resolve_program();
        let mut command = Command::new(&program);
        command
            .args(&config.display.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(filter) = &config.display.log_filter {
            command.env("RUST_LOG", filter);
        }

        let mut child = command.spawn().map_err(|source| ShowError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ShowError::Process {
                    pid,
                    source: std::io::Error::other("display process stdio was not piped"),
                });
            }
        };

        if let Err(e) = set_nonblocking(&stdin) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ShowError::Process {
                pid,
                source: std::io::Error::other(format!("{:#}", e)),
            });
        }

        info!(
            target: LOG_TARGET,
            "DisplaySubprocess: spawned {} (pid {})",
            program.display(),
            pid
        );

        Ok(Self {
            child,
            sender: Some(FrameSender::new(stdin)),
            receiver: FrameReceiver::new(stdout, config.channel.max_payload_bytes),
            state: SubprocessState::Running,
            exit_timeout: config.shutdown.exit_timeout(),
            send_timeout: config.shutdown.send_timeout(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn state(&self) -> SubprocessState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SubprocessState::Closed
    }

    /// Sends one frame. Fails with [`ChannelError::Closed`] once the exit token
    /// has gone out, with [`ChannelError::Broken`] if the process died, and
    /// with [`ShowError::Unresponsive`] if the display stops reading for
    /// longer than the send timeout.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), ShowError> {
        let sender = self.sender.as_mut().ok_or(ChannelError::Closed)?;
        let deadline = Instant::now() + self.send_timeout;
        match sender.send_frame_before(frame, deadline) {
            Ok(()) => {
                trace!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: sent frame '{}' {}x{} to pid {}",
                    frame.title(),
                    frame.width(),
                    frame.height(),
                    self.child.id()
                );
                Ok(())
            }
            Err(ChannelError::WriteTimedOut { written, len }) => {
                let pid = self.child.id();
                warn!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: pid {} took {} of {} bytes in {:?}",
                    pid,
                    written,
                    len,
                    self.send_timeout
                );
                // A half-written frame leaves the stream unusable.
                self.sender = None;
                Err(ShowError::Unresponsive {
                    pid,
                    timeout: self.send_timeout,
                })
            }
            Err(e) => {
                warn!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: pid {} stopped accepting frames: {}",
                    self.child.id(),
                    e
                );
                self.sender = None;
                self.reap_or_kill();
                Err(e.into())
            }
        }
    }

    /// Checks, without blocking, whether the display has closed on its own.
    ///
    /// When the user closes the window the display sends the exit token
    /// upstream and waits for ours. This answers it, reaps the process and
    /// reports `true`. EOF or a broken upstream pipe also count as closed.
    pub fn poll_closed(&mut self) -> Result<bool, ShowError> {
        if self.is_closed() {
            return Ok(true);
        }

        let pid = self.child.id();
        let readable = is_readable_now(self.receiver.as_fd()).map_err(|e| ShowError::Process {
            pid,
            source: std::io::Error::other(format!("{:#}", e)),
        })?;
        if !readable {
            return Ok(false);
        }

        match self.receiver.receive() {
            Ok(Message::Exit) => {
                info!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: pid {} window closed, completing exit handshake",
                    pid
                );
                if let Some(mut sender) = self.sender.take() {
                    if let Err(e) = sender.send_exit_before(Instant::now() + self.send_timeout) {
                        debug!(target: LOG_TARGET, "DisplaySubprocess: handshake reply not delivered: {}", e);
                    }
                }
            }
            Ok(Message::Frame(payload)) => {
                warn!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: ignoring unexpected {} byte frame from pid {}",
                    payload.len(),
                    pid
                );
                return Ok(false);
            }
            Err(ChannelError::Closed) => {
                info!(target: LOG_TARGET, "DisplaySubprocess: pid {} closed its channel", pid);
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "DisplaySubprocess: pid {} channel failed: {}", pid, e);
            }
        }

        self.sender = None;
        self.reap_or_kill();
        Ok(true)
    }

    /// Asks the display to exit and waits up to `timeout` for it to do so.
    ///
    /// `timeout` covers both writing the exit token and waiting for the
    /// process. On timeout the process is left running and
    /// [`ShowError::Unresponsive`] is returned; follow up with
    /// [`DisplaySubprocess::kill`] to force it.
    pub fn request_exit(&mut self, timeout: Duration) -> Result<(), ShowError> {
        if self.is_closed() {
            return Ok(());
        }
        let pid = self.child.id();
        let deadline = Instant::now() + timeout;

        if let Some(mut sender) = self.sender.take() {
            match sender.send_exit_before(deadline) {
                Ok(()) => debug!(target: LOG_TARGET, "DisplaySubprocess: sent EXIT to pid {}", pid),
                Err(e) => debug!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: EXIT not delivered to pid {} ({}), waiting for exit anyway",
                    pid,
                    e
                ),
            }
            // Dropping the sender closes stdin, so the display sees EOF even
            // if it missed the token.
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.wait_with_deadline(remaining)? {
            Some(status) => {
                info!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: pid {} exited ({})",
                    pid,
                    status
                );
                self.state = SubprocessState::Closed;
                Ok(())
            }
            None => {
                warn!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: pid {} still running after {:?}",
                    pid,
                    timeout
                );
                Err(ShowError::Unresponsive { pid, timeout })
            }
        }
    }

    /// Terminates the display: SIGTERM, then SIGKILL if it is still alive after
    /// a short grace period. Always reaps the process.
    pub fn kill(&mut self) -> Result<(), ShowError> {
        if self.is_closed() {
            return Ok(());
        }
        let pid = self.child.id();
        self.sender = None;

        if self.wait_with_deadline(Duration::ZERO)?.is_none() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(target: LOG_TARGET, "DisplaySubprocess: SIGTERM to pid {} failed: {}", pid, e);
            }
            if self.wait_with_deadline(KILL_GRACE_PERIOD)?.is_none() {
                warn!(target: LOG_TARGET, "DisplaySubprocess: pid {} ignored SIGTERM, killing", pid);
                self.child
                    .kill()
                    .map_err(|source| ShowError::Process { pid, source })?;
                self.child
                    .wait()
                    .map_err(|source| ShowError::Process { pid, source })?;
            }
        }

        info!(target: LOG_TARGET, "DisplaySubprocess: pid {} terminated", pid);
        self.state = SubprocessState::Closed;
        Ok(())
    }

    /// Polls `try_wait` until the child exits or `timeout` elapses.
    fn wait_with_deadline(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, ShowError> {
        let pid = self.child.id();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self
                .child
                .try_wait()
                .map_err(|source| ShowError::Process { pid, source })?
            {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(REAP_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Waits for a child that is already on its way out, killing it if it
    /// lingers past the exit timeout.
    fn reap_or_kill(&mut self) {
        let pid = self.child.id();
        match self.wait_with_deadline(self.exit_timeout) {
            Ok(Some(status)) => {
                debug!(target: LOG_TARGET, "DisplaySubprocess: reaped pid {} ({})", pid, status);
                self.state = SubprocessState::Closed;
            }
            Ok(None) => {
                warn!(
                    target: LOG_TARGET,
                    "DisplaySubprocess: pid {} did not exit after closing, killing",
                    pid
                );
                if let Err(e) = self.kill() {
                    warn!(target: LOG_TARGET, "DisplaySubprocess: failed to kill pid {}: {}", pid, e);
                }
            }
            Err(e) => warn!(target: LOG_TARGET, "DisplaySubprocess: failed to reap pid {}: {}", pid, e),
        }
    }
}

impl std::fmt::Debug for DisplaySubprocess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySubprocess")
            .field("pid", &self.child.id())
            .field("state", &self.state)
            .field("exit_sent", &self.sender.is_none())
            .finish()
    }
}

impl Drop for DisplaySubprocess {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        debug!(target: LOG_TARGET, "DisplaySubprocess: dropped while running, requesting exit");
        if let Err(e) = self.request_exit(self.exit_timeout) {
            warn!(target: LOG_TARGET, "DisplaySubprocess: {}. Killing.", e);
            if let Err(e) = self.kill() {
                warn!(target: LOG_TARGET, "DisplaySubprocess: {}", e);
            }
        }
    }
}
