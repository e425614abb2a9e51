//! # Remote Transport
//!
//! Actors in other processes are reached over TCP. Outbound frames go through
//! per-host connection pools that keep frames for one destination path in order;
//! inbound frames are read by a listener and delivered through normal resolution.

pub(crate) mod codec;
pub(crate) mod listener;
pub(crate) mod pool;

pub use codec::{JsonCodec, WireCodec};
