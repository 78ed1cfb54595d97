//! # slicehub-core -- shared vocabulary of the slicehub workspace
//!
//! This crate holds everything the other slicehub crates agree on:
//!
//! - [`error::Error`] and the workspace-wide [`Result`] alias
//! - channel, mode, status, and record types ([`types`])
//! - the frequency-to-band table ([`band`])
//! - decode-text parsing and CQ targeting ([`message`])
//! - the [`RadioBackend`] trait and its events ([`backend`])
//!
//! It contains no I/O; all networking lives in the protocol crates.

pub mod backend;
pub mod band;
pub mod error;
pub mod message;
pub mod types;

pub use backend::{BackendEvent, RadioBackend, SliceInfo};
pub use band::{band_name, Band};
pub use error::{Error, Result};
pub use types::{
    channel_letter, ChannelStatus, Continent, DecodeFlags, DecodeRecord, QsoRecord, RadioMode,
    StationProfile, CHANNEL_COUNT, FLEX_TCP_PORT, HRD_AGGREGATE_PORT, HRD_BASE_PORT, UDP_BASE_PORT,
};
