use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dedup::{DedupCache, LinkSlot};
use crate::link::link_config::LinkConfig;
use crate::link::link_delay::LinkDelayEstimator;
use crate::link::link_handle::{LinkCounters, LinkError, LinkHandle};
use crate::link::link_quality::LinkQuality;
use crate::link::liveness::{PerSourceStats, SourceTable};
use crate::link::resequencer::Resequencer;
use crate::link::sequence_loss::record_loss;
use crate::message::checksum::ChecksumExtras;
use crate::message::message::{Message, MessageCodec, SourceId};
use crate::util::random::{RandomSource, RngRandom};


pub(crate) enum QueuedMessage {
    Incoming(Message),
    Outgoing(Message),
}


/// Processing state of a single link. A session is owned by the link's processing thread or
///  task; other threads interact with it through its [LinkHandle].
///
/// Everything in here is specific to this link, except for the [DedupCache] which is shared
///  by all sessions.
pub struct LinkSession {
    config: Arc<LinkConfig>,
    handle: LinkHandle,
    inbound: mpsc::Receiver<Message>,
    outbound: mpsc::Receiver<Message>,

    dedup: Arc<DedupCache>,
    delay_slot: LinkSlot,

    sources: SourceTable,
    quality: LinkQuality,
    delay_estimator: LinkDelayEstimator,
    random: Box<dyn RandomSource>,
    resequencer: Option<Resequencer>,
}

impl LinkSession {
    pub fn new(config: Arc<LinkConfig>, dedup: Arc<DedupCache>, checksum_extras: Arc<ChecksumExtras>, codec: Arc<dyn MessageCodec>) -> anyhow::Result<LinkSession> {
        Self::with_random(config, dedup, checksum_extras, codec, Box::new(RngRandom::from_entropy()))
    }

    pub fn with_random(config: Arc<LinkConfig>, dedup: Arc<DedupCache>, checksum_extras: Arc<ChecksumExtras>, codec: Arc<dyn MessageCodec>, random: Box<dyn RandomSource>) -> anyhow::Result<LinkSession> {
        config.validate()?;

        let (inbound_send, inbound) = mpsc::channel(config.inbound_queue_capacity);
        let (outbound_send, outbound) = mpsc::channel(config.outbound_queue_capacity);

        let resequencer = if config.resequence_outgoing {
            warn!(link = %config.name, "resequencing outgoing messages on link {} - this is experimental", config.name);
            Some(Resequencer::new(checksum_extras))
        }
        else {
            None
        };

        info!(link = %config.name, "starting link {}", config.name);
        Ok(LinkSession {
            handle: LinkHandle::new(&config.name, inbound_send, outbound_send, codec),
            inbound,
            outbound,
            delay_slot: dedup.register_link(),
            dedup,
            sources: Default::default(),
            quality: Default::default(),
            delay_estimator: LinkDelayEstimator::new(config.heartbeat_period),
            random,
            resequencer,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    pub fn counters(&self) -> &LinkCounters {
        self.handle.counters()
    }

    pub fn link_quality(&self) -> &LinkQuality {
        &self.quality
    }

    pub fn accept_incoming(&self, raw: &[u8]) -> Result<Message, LinkError> {
        self.handle.accept_incoming(raw)
    }

    pub fn enqueue_outgoing(&self, msg: Message) -> Result<(), LinkError> {
        self.handle.enqueue_outgoing(msg)
    }

    pub fn kill(&self) {
        self.handle.kill()
    }

    pub fn is_killed(&self) -> bool {
        self.handle.is_killed()
    }

    /// takes the next message from the inbound queue without waiting
    pub fn read_incoming(&mut self) -> Option<Message> {
        self.inbound.try_recv().ok()
    }

    /// Takes the next message from the outbound queue, encoded and ready for the transport. The
    ///  message is resequenced first if that is configured.
    pub fn next_outgoing(&mut self) -> Option<Bytes> {
        let msg = self.outbound.try_recv().ok()?;
        Some(self.prepare_outgoing(msg))
    }

    /// waits for the next message in either queue
    pub(crate) async fn next_queued(&mut self) -> QueuedMessage {
        select! {
            msg = self.inbound.recv() => QueuedMessage::Incoming(msg.expect("the session's own handle holds the inbound sender - this should never happen")),
            msg = self.outbound.recv() => QueuedMessage::Outgoing(msg.expect("the session's own handle holds the outbound sender - this should never happen")),
        }
    }

    /// resets this link's delay in the shared cache after the link stopped
    pub(crate) fn release_link_delay(&self) {
        self.dedup.release_link(self.delay_slot);
    }

    pub(crate) fn prepare_outgoing(&mut self, mut msg: Message) -> Bytes {
        if let Some(resequencer) = &mut self.resequencer {
            if let Err(e) = resequencer.resequence(&mut msg) {
                debug!(link = %self.config.name, source_id = msg.source_id.0, "sending message unchanged: {}", e);
            }
        }

        let mut buf = BytesMut::new();
        self.handle.codec().encode(&msg, &mut buf);
        buf.freeze()
    }

    /// The full receive path for one message: bookkeeping, simulated loss and duplicate
    ///  suppression. Returns the message if it should be forwarded to other links.
    ///
    /// A simulated loss happens after bookkeeping, so the link still counts the message as
    ///  received, but neither loss accounting nor the dedup cache see it.
    pub fn process_incoming(&mut self, msg: Message) -> Option<Message> {
        self.on_message_recv(&msg);

        if self.should_simulate_drop() {
            debug!(link = %self.config.name, source_id = msg.source_id.0, "simulated packet loss - dropping message");
            return None;
        }

        if self.record_incoming(&msg) {
            Some(msg)
        }
        else {
            None
        }
    }

    /// Bookkeeping for every received message: counters, source liveness, link delay and link
    ///  quality. The message is always accepted for further processing, even if quality fields
    ///  are missing.
    pub fn on_message_recv(&mut self, msg: &Message) -> bool {
        let now = Instant::now();
        self.handle.counters().on_received();

        self.update_routing(msg, now);

        if self.config.radio_status_link && msg.kind.is_radio_status() {
            self.quality.update_from_radio_status(msg);
        }
        true
    }

    fn update_routing(&mut self, msg: &Message, now: Instant) {
        let is_new_source = self.sources.touch(msg.source_id, now);
        if is_new_source {
            info!(link = %self.config.name, source_id = msg.source_id.0, "adding source {} to the mapping on link {}", msg.source_id, self.config.name);
            self.dedup.note_source(msg.source_id);
            return;
        }

        if msg.kind.is_heartbeat() {
            if let Some(delay) = self.delay_estimator.on_heartbeat(&mut self.quality, now) {
                self.dedup.record_link_delay(self.delay_slot, delay);
            }
            self.dedup.flush(now);
        }
    }

    /// `true` if simulation is configured and the random draw says the message is lost
    pub fn should_simulate_drop(&mut self) -> bool {
        match &self.config.simulation {
            None => false,
            Some(simulation) => self.random.percentile_draw() <= simulation.packet_loss_percent,
        }
    }

    /// Loss accounting and duplicate suppression. Returns `false` if the same message was
    ///  forwarded recently (via any link), i.e. it should be dropped.
    ///
    /// Heartbeats are always forwarded: they carry liveness and delay information and must not
    ///  be lost to a fingerprint collision.
    pub fn record_incoming(&mut self, msg: &Message) -> bool {
        let now = Instant::now();

        let stats = self.sources.stats_mut(msg.source_id, now);
        record_loss(stats, msg);

        if msg.kind.is_heartbeat() || !self.config.reject_repeat_packets {
            return true;
        }

        if self.dedup.is_duplicate(msg.source_id, msg.fingerprint(), now) {
            stats.packets_dropped += 1;
            debug!(link = %self.config.name, source_id = msg.source_id.0, "dropping duplicate of kind {} from {:?}", msg.kind.0, msg.source_id);
            return false;
        }
        true
    }

    /// removes sources that were silent on this link for longer than the configured timeout
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<SourceId> {
        let link_has_traffic = self.counters().packets_received() > 0;
        self.sources.sweep(now, self.config.source_timeout, &self.config.name, link_has_traffic)
    }

    pub fn seen_source(&self, source_id: SourceId) -> bool {
        self.sources.contains(source_id)
    }

    pub fn source_stats(&self, source_id: SourceId) -> Option<&PerSourceStats> {
        self.sources.get(source_id)
    }

    pub fn packet_stats(&self) -> Vec<(SourceId, PerSourceStats)> {
        self.sources.iter()
            .map(|(id, stats)| (id, stats.clone()))
            .collect()
    }

    pub fn log_packet_stats(&self) {
        info!(link = %self.config.name, "packet stats for link {}: {} sources", self.config.name, self.sources.len());
        for (source_id, stats) in self.sources.iter() {
            info!(link = %self.config.name, source_id = source_id.0,
                received = stats.num_packets_received, lost = stats.packets_lost, dropped = stats.packets_dropped,
                "source {}: {} packets received", source_id, stats.num_packets_received);
        }
    }
}
