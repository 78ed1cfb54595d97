//! # slicehub-wsjtx -- decoder UDP protocol
//!
//! The binary datagram protocol spoken between the hub and its decoder
//! processes: magic `0xADBCCBDA`, schema 2, big-endian integers, Latin-1
//! length-prefixed strings, and 13-byte Julian-day timestamps.
//!
//! - [`wire`] -- primitive reader/writer over datagrams
//! - [`message`] -- typed inbound parsing and outbound frame encoding
//! - [`ingest`] -- the four per-channel UDP listeners
//! - [`egress`] -- per-channel control-frame send links

pub mod egress;
pub mod ingest;
pub mod message;
pub mod wire;

pub use egress::ChannelLink;
pub use ingest::IngestManager;
pub use message::{
    ConfigureFrame, DecodeFields, DecoderMessage, QsoLoggedFields, ReplyFrame, StatusFields,
    MODIFIER_SHIFT,
};
