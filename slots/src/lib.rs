//! `slots` crate entry point.
//!
//! Responsibility: the banner-instance registry and the deterministic
//! slot-assignment algorithm over the shared advertisement list.

mod assigner;

pub use assigner::{chunk_spans, SlotAssigner, SlotEvent, MAX_SLOT_SIZE};
