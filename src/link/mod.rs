//! Everything that is specific to a single link: its queues, the sources heard on it, and the
//!  health of the link itself. The only state shared between links is the
//!  [DedupCache](crate::dedup::DedupCache).

pub mod link_config;
pub mod link_handle;
pub mod session;
pub mod driver;

pub mod liveness;
pub mod sequence_loss;
pub mod link_quality;
pub mod link_delay;
pub mod resequencer;
