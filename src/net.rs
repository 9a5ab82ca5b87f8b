//! Newline-delimited JSON over TCP: one request envelope per line, one
//! response envelope per line.

pub mod client;
pub mod server;
