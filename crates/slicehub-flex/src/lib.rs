//! # slicehub-flex -- SmartSDR radio backend
//!
//! Implements [`slicehub_core::RadioBackend`] over the SmartSDR text
//! protocol: newline-terminated command/response/status lines on TCP port
//! 4992, MHz frequencies translated to Hz, and slice liveness transitions
//! turned into `SliceAdded`/`SliceRemoved` events.

pub mod client;
pub mod codec;

pub use client::{FlexBackend, FlexOptions};
