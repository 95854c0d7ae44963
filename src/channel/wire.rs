// src/channel/wire.rs
//! Message headers for the show/repaint pipe.
//!
//! Every message starts with a single opcode byte. `FRAME` is followed by an
//! 8-byte big-endian payload length and exactly that many payload bytes.
//! `EXIT` has no payload. The opcode is always read on its own before any
//! payload, so frame bytes are never taken for a control code.

/// Opcode of the exit handshake message.
pub const OPCODE_EXIT: u8 = 0x00;

/// Opcode of a frame message.
pub const OPCODE_FRAME: u8 = 0x01;

/// Size of the big-endian length that follows `OPCODE_FRAME`.
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Opcode plus length prefix.
pub const FRAME_HEADER_SIZE: usize = 1 + LENGTH_PREFIX_SIZE;

/// Tag carried by every message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Exit = OPCODE_EXIT,
    Frame = OPCODE_FRAME,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            OPCODE_EXIT => Some(Opcode::Exit),
            OPCODE_FRAME => Some(Opcode::Frame),
            _ => None,
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

/// Encodes the header that precedes a frame payload of `payload_len` bytes.
pub fn encode_frame_header(payload_len: u64) -> [u8; FRAME_HEADER_SIZE] {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header[0] = OPCODE_FRAME;
    header[1..].copy_from_slice(&payload_len.to_be_bytes());
    header
}

/// Decodes the length prefix that follows `OPCODE_FRAME`.
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> u64 {
    u64::from_be_bytes(prefix)
}
