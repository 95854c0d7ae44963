// src/os/mod.rs
//! OS plumbing: the display child process and `poll(2)` helpers.

pub mod poll;
pub mod subprocess;
