use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::message::message::SourceId;


/// Statistics for one source as seen on one link
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PerSourceStats {
    pub num_packets_received: u64,
    /// cumulative number of sequence numbers that were skipped
    pub packets_lost: u64,
    /// duplicates that were suppressed because another link forwarded them first
    pub packets_dropped: u64,
    /// `None` until the first sequenced packet established a baseline
    pub last_packet_sequence: Option<u8>,
    pub last_packet_time: Instant,
}
impl PerSourceStats {
    fn new(now: Instant) -> PerSourceStats {
        PerSourceStats {
            num_packets_received: 0,
            packets_lost: 0,
            packets_dropped: 0,
            last_packet_sequence: None,
            last_packet_time: now,
        }
    }
}


/// The sources that were heard on a link recently. Entries are created by the first packet from
///  a source and removed by [SourceTable::sweep] when the source goes silent.
#[derive(Debug, Default)]
pub struct SourceTable {
    sources: BTreeMap<SourceId, PerSourceStats>,
}

impl SourceTable {
    /// registers a received packet, returning `true` if this is the first packet from the source
    ///  (since it was last swept)
    pub fn touch(&mut self, source_id: SourceId, now: Instant) -> bool {
        let stats = self.stats_mut(source_id, now);
        let is_new = stats.num_packets_received == 0;
        stats.num_packets_received += 1;
        stats.last_packet_time = now;
        is_new
    }

    pub fn stats_mut(&mut self, source_id: SourceId, now: Instant) -> &mut PerSourceStats {
        match self.sources.entry(source_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(PerSourceStats::new(now)),
        }
    }

    pub fn get(&self, source_id: SourceId) -> Option<&PerSourceStats> {
        self.sources.get(&source_id)
    }

    pub fn contains(&self, source_id: SourceId) -> bool {
        self.sources.contains_key(&source_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &PerSourceStats)> {
        self.sources.iter()
            .map(|(id, stats)| (*id, stats))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Removes all sources that were silent for longer than `timeout`, returning their ids. This
    ///  does nothing on a link that never received a packet.
    ///
    /// This affects only this link: a source may time out here and still be alive on other links.
    pub fn sweep(&mut self, now: Instant, timeout: Duration, link_name: &str, link_has_traffic: bool) -> Vec<SourceId> {
        if !link_has_traffic {
            return Vec::new();
        }

        let timed_out = self.sources.iter()
            .map(|(id, stats)| (*id, now.saturating_duration_since(stats.last_packet_time)))
            .filter(|(_, silent_for)| *silent_for > timeout)
            .collect::<Vec<_>>();

        for (source_id, silent_for) in &timed_out {
            info!(link = %link_name, source_id = source_id.0, "source {} timed out after {:.3}s - removing it from link {}", source_id, silent_for.as_secs_f64(), link_name);
            self.sources.remove(source_id);
        }

        timed_out.into_iter()
            .map(|(id, _)| id)
            .collect()
    }
}
