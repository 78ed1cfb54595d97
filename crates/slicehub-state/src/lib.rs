//! # slicehub-state -- canonical world state of the hub
//!
//! One [`StateCore`] instance owns the channels, decoder instances, and
//! per-channel decode rings. Collaborators read through cloning accessors
//! and write through explicit mutators; changes fan out through a debounced
//! broadcast of [`HubEvent`]s. The heartbeat watchdog also lives here,
//! turning silent decoders into offline channels and restart requests.

pub mod core;
pub mod events;
pub mod state;

pub use crate::core::{
    StateCore, CHANGE_DEBOUNCE, DECODE_HORIZON, HEARTBEAT_TIMEOUT, RESTART_LIMIT, RESTART_SPACING,
    WATCHDOG_CADENCE,
};
pub use events::{DecoderStatusUpdate, HubEvent, SliceUpdate};
pub use state::{ChannelState, DecoderInstance, HubSnapshot};
