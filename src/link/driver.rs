use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tracing::{debug, info};

use crate::link::link_handle::{LinkError, LinkHandle};
use crate::link::session::{LinkSession, QueuedMessage};
use crate::message::message::Message;


/// Decides where a message received on one link is sent
#[cfg_attr(test, mockall::automock)]
pub trait FanOut: Send + Sync + 'static {
    fn forward(&self, from_link: &str, msg: &Message);
}

/// The sending side of a link's transport
#[cfg_attr(test, mockall::automock)]
pub trait FrameSink: Send + Sync + 'static {
    fn send_frame(&self, frame: Bytes);
}


/// Forwards every message to all links except the one it was received on
pub struct BroadcastFanOut {
    links: Vec<LinkHandle>,
}

impl BroadcastFanOut {
    pub fn new(links: Vec<LinkHandle>) -> BroadcastFanOut {
        BroadcastFanOut {
            links,
        }
    }
}

impl FanOut for BroadcastFanOut {
    fn forward(&self, from_link: &str, msg: &Message) {
        for link in self.links.iter().filter(|l| l.name() != from_link) {
            match link.enqueue_outgoing(msg.clone()) {
                Ok(()) => {}
                Err(LinkError::QueueFull(_)) => {} // logged by the handle
                Err(e) => debug!(link = %link.name(), source_id = msg.source_id.0, "not forwarding from {}: {}", from_link, e),
            }
        }
    }
}


/// Runs a link's processing loop until the link is killed. Inbound messages go through the
///  session's receive path and are then handed to `fan_out`; outbound messages are encoded and
///  passed to `sink`. Silent sources are swept periodically.
///
/// On exit, the link's delay no longer counts towards the shared eviction window. Returns the
///  session so that its final state can be inspected.
pub async fn run_link_session(mut session: LinkSession, fan_out: Arc<dyn FanOut>, sink: Arc<dyn FrameSink>) -> LinkSession {
    let mut liveness_ticks = time::interval(session.config().liveness_check_interval);
    liveness_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !session.is_killed() {
        select! {
            queued = session.next_queued() => {
                match queued {
                    QueuedMessage::Incoming(msg) => {
                        if let Some(msg) = session.process_incoming(msg) {
                            fan_out.forward(session.name(), &msg);
                        }
                    }
                    QueuedMessage::Outgoing(msg) => {
                        sink.send_frame(session.prepare_outgoing(msg));
                    }
                }
            }
            _ = liveness_ticks.tick() => {
                session.check_timeouts(Instant::now());
            }
        }
    }

    info!(link = %session.name(), "link {} stopped", session.name());
    session.release_link_delay();
    session.log_packet_stats();
    session
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;
    use super::*;
    use crate::dedup::DedupCache;
    use crate::link::link_config::{LinkConfig, SimulationConfig};
    use crate::message::checksum::ChecksumExtras;
    use crate::message::frame_codec::FrameCodec;
    use crate::message::message::SourceId;
    use crate::test_util::message::{encoded, heartbeat, test_message};

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Bytes>>,
    }
    impl FrameSink for RecordingSink {
        fn send_frame(&self, frame: Bytes) {
            self.frames.lock().unwrap().push(frame);
        }
    }
    impl RecordingSink {
        fn frames(&self) -> Vec<Bytes> {
            self.frames.lock().unwrap().clone()
        }
    }

    fn session_with_config(config: LinkConfig, dedup: &Arc<DedupCache>) -> LinkSession {
        LinkSession::new(Arc::new(config), dedup.clone(), Arc::new(ChecksumExtras::new()), Arc::new(FrameCodec))
            .unwrap()
    }

    fn session(name: &str, dedup: &Arc<DedupCache>) -> LinkSession {
        session_with_config(LinkConfig::new(name), dedup)
    }

    #[test]
    fn test_broadcast_skips_receiving_link() {
        let dedup = Arc::new(DedupCache::new());
        let mut a = session("a", &dedup);
        let mut b = session("b", &dedup);
        let mut c = session("c", &dedup);

        let fan_out = BroadcastFanOut::new(vec![a.handle(), b.handle(), c.handle()]);
        let msg = test_message(7, 33, 1, b"abc");
        fan_out.forward("a", &msg);

        assert_eq!(a.next_outgoing(), None);
        assert_eq!(b.next_outgoing(), Some(encoded(&msg)));
        assert_eq!(c.next_outgoing(), Some(encoded(&msg)));
    }

    #[test]
    fn test_broadcast_skips_killed_links() {
        let dedup = Arc::new(DedupCache::new());
        let a = session("a", &dedup);
        let mut b = session("b", &dedup);
        let mut c = session("c", &dedup);

        let fan_out = BroadcastFanOut::new(vec![a.handle(), b.handle(), c.handle()]);
        c.kill();
        assert!(!a.is_killed());
        fan_out.forward("a", &test_message(7, 33, 1, b"abc"));

        assert!(b.next_outgoing().is_some());
        assert_eq!(c.next_outgoing(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_suppresses_duplicates() {
        let dedup = Arc::new(DedupCache::new());
        let a = session("a", &dedup);
        let b = session("b", &dedup);
        let (handle_a, handle_b) = (a.handle(), b.handle());

        let fan_out: Arc<dyn FanOut> = Arc::new(BroadcastFanOut::new(vec![a.handle(), b.handle()]));
        let sink_a = Arc::new(RecordingSink::default());
        let sink_b = Arc::new(RecordingSink::default());

        let join_a = tokio::spawn(run_link_session(a, fan_out.clone(), sink_a.clone()));
        let join_b = tokio::spawn(run_link_session(b, fan_out.clone(), sink_b.clone()));

        let via_a = test_message(7, 33, 10, b"position");
        handle_a.accept_incoming(&encoded(&via_a)).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        handle_b.accept_incoming(&encoded(&test_message(7, 33, 99, b"position"))).unwrap();
        time::sleep(Duration::from_millis(10)).await;

        handle_a.kill();
        handle_b.kill();
        let a = join_a.await.unwrap();
        let b = join_b.await.unwrap();

        assert!(sink_a.frames().is_empty());
        assert_eq!(sink_b.frames(), vec![encoded(&via_a)]);
        assert_eq!(a.source_stats(SourceId(7)).unwrap().packets_dropped, 0);
        assert_eq!(b.source_stats(SourceId(7)).unwrap().packets_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_sweep_runs_periodically() {
        let dedup = Arc::new(DedupCache::new());
        let a = session("a", &dedup);
        let handle = a.handle();

        let mut fan_out = MockFanOut::new();
        fan_out.expect_forward().return_const(());
        let join = tokio::spawn(run_link_session(a, Arc::new(fan_out), Arc::new(RecordingSink::default())));

        handle.accept_incoming(&encoded(&test_message(7, 0, 0, b""))).unwrap();
        time::sleep(Duration::from_secs(5)).await;
        handle.accept_incoming(&encoded(&test_message(8, 0, 0, b""))).unwrap();
        time::sleep(Duration::from_secs(7)).await;

        handle.kill();
        let a = join.await.unwrap();
        assert!(!a.seen_source(SourceId(7)));
        assert!(a.seen_source(SourceId(8)));
        assert_eq!(dedup.known_sources(), vec![SourceId(7), SourceId(8)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_link_releases_its_delay() {
        let dedup = Arc::new(DedupCache::new());
        let a = session("a", &dedup);
        let handle = a.handle();

        let mut fan_out = MockFanOut::new();
        fan_out.expect_forward().return_const(());
        let join = tokio::spawn(run_link_session(a, Arc::new(fan_out), Arc::new(RecordingSink::default())));

        handle.accept_incoming(&encoded(&heartbeat(7, 0))).unwrap();
        time::sleep(Duration::from_secs(1)).await;
        handle.accept_incoming(&encoded(&heartbeat(7, 1))).unwrap();
        time::sleep(Duration::from_millis(2500)).await;
        handle.accept_incoming(&encoded(&heartbeat(7, 2))).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dedup.max_delay(), Duration::from_millis(1500));

        handle.kill();
        join.await.unwrap();
        assert_eq!(dedup.max_delay(), Duration::ZERO);
        assert_eq!(dedup.eviction_window(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_loss_is_not_forwarded() {
        let mut config = LinkConfig::new("lossy");
        config.simulation = Some(SimulationConfig { packet_loss_percent: 100 });
        let dedup = Arc::new(DedupCache::new());
        let a = session_with_config(config, &dedup);
        let handle = a.handle();

        let mut fan_out = MockFanOut::new();
        fan_out.expect_forward().never();

        let join = tokio::spawn(run_link_session(a, Arc::new(fan_out), Arc::new(MockFrameSink::new())));
        for seq in 0..10 {
            handle.accept_incoming(&encoded(&test_message(7, 33, seq, b"x"))).unwrap();
        }
        time::sleep(Duration::from_millis(10)).await;

        handle.kill();
        let a = join.await.unwrap();
        assert_eq!(a.counters().packets_received(), 10);
        assert_eq!(a.source_stats(SourceId(7)).unwrap().packets_lost, 0);
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_messages_are_sent() {
        let dedup = Arc::new(DedupCache::new());
        let a = session("a", &dedup);
        let handle = a.handle();

        let mut sink = MockFrameSink::new();
        let msg = test_message(7, 33, 10, b"status");
        let expected = encoded(&msg);
        sink.expect_send_frame()
            .withf(move |frame| frame == &expected)
            .times(1)
            .return_const(());

        let join = tokio::spawn(run_link_session(a, Arc::new(MockFanOut::new()), Arc::new(sink)));
        handle.enqueue_outgoing(msg).unwrap();
        time::sleep(Duration::from_millis(10)).await;

        handle.kill();
        join.await.unwrap();
    }
}
