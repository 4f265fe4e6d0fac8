//! The deduplication cache is the only state shared between link sessions. It remembers which
//!  message fingerprints were forwarded recently for each source, so that a message arriving on
//!  several links is forwarded only once.
//!
//! A fingerprint must be remembered at least as long as the same message can take to arrive on
//!  the slowest link, so the eviction window is the maximum of a fixed floor and the largest link
//!  delay measured by any session. Slow or jittery links therefore widen the window for every
//!  link.
//!
//! Eviction is triggered by sessions on heartbeat receipt rather than by a timer. If no link
//!  receives heartbeats, the cache grows until some heartbeat arrives; flushes always cover all
//!  sources of all links.

use std::collections::hash_map::Entry;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::message::checksum::Fingerprint;
use crate::message::message::SourceId;

/// lower bound for the eviction window, applied even before any link delay was measured
pub const DEFAULT_WINDOW_FLOOR: Duration = Duration::from_secs(1);


/// A link's slot for its measured delay, reserved when the link registers
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkSlot(usize);


/// All operations lock a single mutex for their complete duration, in particular
///  [DedupCache::is_duplicate] covers the lookup and the insert: two sessions receiving the same
///  message concurrently must not both see it as new.
pub struct DedupCache {
    window_floor: Duration,
    state: Mutex<DedupState>,
}

#[derive(Default)]
struct DedupState {
    recently_received: FxHashMap<SourceId, FxHashMap<Fingerprint, Instant>>,
    link_delays: Vec<Duration>,
    all_source_ids: BTreeSet<SourceId>,
}
impl DedupState {
    fn max_delay(&self) -> Duration {
        self.link_delays.iter()
            .copied()
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn eviction_window(&self, window_floor: Duration) -> Duration {
        window_floor.max(self.max_delay())
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupCache {
    pub fn new() -> DedupCache {
        Self::with_window_floor(DEFAULT_WINDOW_FLOOR)
    }

    pub fn with_window_floor(window_floor: Duration) -> DedupCache {
        DedupCache {
            window_floor,
            state: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupState> {
        // no operation leaves the state half-updated
        self.state.lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_link(&self) -> LinkSlot {
        let mut state = self.lock();
        state.link_delays.push(Duration::ZERO);
        LinkSlot(state.link_delays.len() - 1)
    }

    /// Resets a stopped link's delay, so it no longer widens the eviction window. The slot
    ///  itself stays reserved.
    pub fn release_link(&self, slot: LinkSlot) {
        self.record_link_delay(slot, Duration::ZERO);
    }

    pub fn record_link_delay(&self, slot: LinkSlot, delay: Duration) {
        match self.lock().link_delays.get_mut(slot.0) {
            Some(d) => *d = delay,
            None => warn!("link delay for unregistered slot {:?} - ignoring", slot),
        }
    }

    pub fn max_delay(&self) -> Duration {
        self.lock().max_delay()
    }

    pub fn eviction_window(&self) -> Duration {
        self.lock().eviction_window(self.window_floor)
    }

    /// adds a source id to the set of sources observed on any link, returning `true` if it was
    ///  not known before
    pub fn note_source(&self, source_id: SourceId) -> bool {
        self.lock().all_source_ids.insert(source_id)
    }

    pub fn known_sources(&self) -> Vec<SourceId> {
        self.lock().all_source_ids.iter()
            .copied()
            .collect()
    }

    /// Checks whether a fingerprint was seen for a source within the eviction window, remembering
    ///  it with timestamp `now` if it was not.
    ///
    /// An entry older than the window counts as absent even if no flush removed it yet.
    pub fn is_duplicate(&self, source_id: SourceId, fingerprint: Fingerprint, now: Instant) -> bool {
        let mut state = self.lock();
        let window = state.eviction_window(self.window_floor);

        state.all_source_ids.insert(source_id);
        match state.recently_received.entry(source_id).or_default().entry(fingerprint) {
            Entry::Occupied(mut e) => {
                if now.saturating_duration_since(*e.get()) > window {
                    e.insert(now);
                    false
                }
                else {
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(now);
                false
            }
        }
    }

    /// removes all entries that are older than the eviction window
    pub fn flush(&self, now: Instant) {
        let mut guard = self.lock();
        let window = guard.eviction_window(self.window_floor);
        let state = &mut *guard;

        let mut num_evicted = 0;
        for source_id in &state.all_source_ids {
            if let Some(fingerprints) = state.recently_received.get_mut(source_id) {
                let len_before = fingerprints.len();
                fingerprints.retain(|_, first_seen| now.saturating_duration_since(*first_seen) <= window);
                num_evicted += len_before - fingerprints.len();
            }
        }

        trace!("flushed dedup cache with window {:?}: evicted {} entries", window, num_evicted);
    }

    /// total number of remembered fingerprints
    pub fn len(&self) -> usize {
        self.lock().recently_received.values()
            .map(|fingerprints| fingerprints.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
