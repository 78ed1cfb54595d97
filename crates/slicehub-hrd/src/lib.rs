//! # slicehub-hrd -- HRD-style rig-control TCP servers
//!
//! The line-oriented rig-control protocol spoken by decoder processes and
//! external logging programs: 16-byte framed headers, UTF-16-LE payloads,
//! and an ASCII command grammar.
//!
//! - [`frame`] -- pure frame encode/decode
//! - [`command`] -- command grammar
//! - [`server`] -- the TCP listeners (per-channel and aggregate)

pub mod command;
pub mod frame;
pub mod server;

pub use command::{parse_command, HrdCommand};
pub use frame::{decode_frame, encode_frame, DecodeResult};
pub use server::{HrdServer, ServedChannel};
