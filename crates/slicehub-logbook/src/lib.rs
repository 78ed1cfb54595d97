//! # slicehub-logbook -- ADIF persistence and duplicate detection
//!
//! An append-only ADIF 3.1.0 file plus the in-memory worked-index keyed
//! by `UPPER(call):lower(band):UPPER(mode)`. The logbook owns both; the
//! rest of the hub asks `is_worked` questions and hands completed QSOs in.

pub mod adif;
pub mod logbook;

pub use logbook::{default_path, Logbook};
