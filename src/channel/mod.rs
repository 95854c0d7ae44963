// src/channel/mod.rs
//! Framed, ordered transport between the producer and a display process.
//!
//! - `FrameSender`: writes whole messages, optionally against a deadline, and
//!   refuses to write after `EXIT`
//! - `FrameReceiver`: reads one self-delimited message at a time
//! - `FrameChannel`: a sender and a receiver bound to one peer
//!
//! The transport is any `Read`/`Write` pair. The producer uses the child's
//! stdin/stdout pipes, the display process its own stdio, and tests use
//! `UnixStream::pair()`.

pub mod wire;

#[cfg(test)]
mod tests;

use crate::frame::{Frame, FramePayload};
use crate::os::poll::wait_writable;
use log::trace;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Instant;
use thiserror::Error;
use wire::{Opcode, LENGTH_PREFIX_SIZE, OPCODE_EXIT};

const LOG_TARGET: &str = "jes_show::channel";

/// Default cap on a single frame payload (256 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

/// A message on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// One encoded picture snapshot.
    Frame(FramePayload),
    /// Exit handshake token.
    Exit,
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Frame(_) => Opcode::Frame,
            Message::Exit => Opcode::Exit,
        }
    }
}

/// Failures reported by the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer closed the connection on a message boundary, or this sender
    /// already sent `EXIT`.
    #[error("channel closed")]
    Closed,

    /// The transport failed, or the peer vanished in the middle of a message.
    #[error("channel broken: {0}")]
    Broken(#[from] io::Error),

    #[error("unknown opcode 0x{0:02x} on channel")]
    UnknownOpcode(u8),

    #[error("frame payload of {len} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { len: u64, limit: u64 },

    /// The peer stopped reading before the deadline. The message may be
    /// partly written, so the sender must not be used again.
    #[error("peer stopped reading after {written} of {len} bytes")]
    WriteTimedOut { written: usize, len: usize },
}

impl ChannelError {
    /// True for a clean close, false for anything that indicates corruption
    /// or an unexpected disconnect.
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed)
    }
}

/// Writing half of a channel.
#[derive(Debug)]
pub struct FrameSender<W> {
    writer: W,
    exit_sent: bool,
}

impl<W: Write> FrameSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            exit_sent: false,
        }
    }

    /// Sends one message.
    ///
    /// The opcode, length prefix and payload are assembled into one buffer and
    /// written with a single `write_all`, so a message is never interleaved
    /// with another write on this sender. Once `EXIT` has been sent every
    /// later call fails with [`ChannelError::Closed`].
    pub fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        let bytes = self.encode(message)?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Assembles the bytes of one message, refusing anything after `EXIT`.
    fn encode(&mut self, message: &Message) -> Result<Vec<u8>, ChannelError> {
        if self.exit_sent {
            return Err(ChannelError::Closed);
        }

        let bytes = match message {
            Message::Frame(payload) => {
                let mut bytes = Vec::with_capacity(wire::FRAME_HEADER_SIZE + payload.len());
                bytes.extend_from_slice(&wire::encode_frame_header(payload.len() as u64));
                bytes.extend_from_slice(payload.as_bytes());
                bytes
            }
            Message::Exit => {
                // A failed EXIT still ends this sender; the peer is gone or
                // about to be.
                self.exit_sent = true;
                vec![OPCODE_EXIT]
            }
        };

        trace!(
            target: LOG_TARGET,
            "FrameSender: writing {:?} ({} bytes)",
            message.opcode(),
            bytes.len()
        );
        Ok(bytes)
    }

    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        self.send(&Message::Frame(FramePayload::encode(frame)))
    }

    pub fn send_exit(&mut self) -> Result<(), ChannelError> {
        self.send(&Message::Exit)
    }

    pub fn exit_sent(&self) -> bool {
        self.exit_sent
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + AsFd> FrameSender<W> {
    /// Sends one message over a non-blocking writer, giving up at `deadline`.
    ///
    /// Fails with [`ChannelError::WriteTimedOut`] if the peer does not drain
    /// the pipe in time.
    pub fn send_before(&mut self, message: &Message, deadline: Instant) -> Result<(), ChannelError> {
        let bytes = self.encode(message)?;
        let mut written = 0;
        while written < bytes.len() {
            match self.writer.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let writable = wait_writable(self.writer.as_fd(), deadline)
                        .map_err(|e| io::Error::other(format!("{:#}", e)))?;
                    if !writable {
                        return Err(ChannelError::WriteTimedOut {
                            written,
                            len: bytes.len(),
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn send_frame_before(&mut self, frame: &Frame, deadline: Instant) -> Result<(), ChannelError> {
        self.send_before(&Message::Frame(FramePayload::encode(frame)), deadline)
    }

    pub fn send_exit_before(&mut self, deadline: Instant) -> Result<(), ChannelError> {
        self.send_before(&Message::Exit, deadline)
    }
}

/// Reading half of a channel.
#[derive(Debug)]
pub struct FrameReceiver<R> {
    reader: R,
    max_payload_bytes: u64,
}

impl<R: Read> FrameReceiver<R> {
    pub fn new(reader: R, max_payload_bytes: u64) -> Self {
        Self {
            reader,
            max_payload_bytes,
        }
    }

    /// Blocks until the next message arrives.
    ///
    /// EOF before an opcode is a clean [`ChannelError::Closed`]; EOF after the
    /// opcode is [`ChannelError::Broken`].
    pub fn receive(&mut self) -> Result<Message, ChannelError> {
        let mut opcode = [0u8; 1];
        loop {
            match self.reader.read(&mut opcode) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match Opcode::from_byte(opcode[0]) {
            Some(Opcode::Exit) => {
                trace!(target: LOG_TARGET, "FrameReceiver: EXIT");
                Ok(Message::Exit)
            }
            Some(Opcode::Frame) => {
                let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                self.reader.read_exact(&mut prefix)?;
                let len = wire::decode_length(prefix);
                if len > self.max_payload_bytes {
                    return Err(ChannelError::PayloadTooLarge {
                        len,
                        limit: self.max_payload_bytes,
                    });
                }

                let mut payload = vec![0u8; len as usize];
                self.reader.read_exact(&mut payload)?;
                trace!(target: LOG_TARGET, "FrameReceiver: FRAME ({} bytes)", len);
                Ok(Message::Frame(FramePayload::from_bytes(payload)))
            }
            None => Err(ChannelError::UnknownOpcode(opcode[0])),
        }
    }

    pub fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }
}

impl<R: AsFd> AsFd for FrameReceiver<R> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}

/// Both halves of a channel to one peer.
#[derive(Debug)]
pub struct FrameChannel<R, W> {
    pub sender: FrameSender<W>,
    pub receiver: FrameReceiver<R>,
}

impl<R: Read, W: Write> FrameChannel<R, W> {
    pub fn new(reader: R, writer: W, max_payload_bytes: u64) -> Self {
        Self {
            sender: FrameSender::new(writer),
            receiver: FrameReceiver::new(reader, max_payload_bytes),
        }
    }

    pub fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        self.sender.send(message)
    }

    pub fn receive(&mut self) -> Result<Message, ChannelError> {
        self.receiver.receive()
    }

    pub fn split(self) -> (FrameSender<W>, FrameReceiver<R>) {
        (self.sender, self.receiver)
    }
}

impl FrameChannel<File, File> {
    /// Binds a channel to this process's stdin (downstream) and stdout
    /// (upstream).
    ///
    /// Both descriptors are duplicated into plain files. `std::io::Stdin`
    /// buffers internally, which would hide pending bytes from `poll(2)`.
    pub fn from_stdio(max_payload_bytes: u64) -> io::Result<Self> {
        let stdin = File::from(io::stdin().as_fd().try_clone_to_owned()?);
        let stdout = File::from(io::stdout().as_fd().try_clone_to_owned()?);
        Ok(Self::new(stdin, stdout, max_payload_bytes))
    }
}
