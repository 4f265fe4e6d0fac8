//! Routing core for telemetry that arrives via several redundant links. Each link runs a
//!  [LinkSession](link::session::LinkSession) that tracks the sources heard on it, link loss and
//!  link quality; a [DedupCache](dedup::DedupCache) shared by all links makes sure that a message
//!  received on more than one link is forwarded only once.

pub mod message;
pub mod dedup;
pub mod link;
pub mod util;
pub mod test_util;
