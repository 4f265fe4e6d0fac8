use clap::Parser;
use clap_derive::Parser;
use linkrouter::dedup::DedupCache;
use linkrouter::link::driver::{run_link_session, BroadcastFanOut, FanOut, FrameSink};
use linkrouter::link::link_config::{LinkConfig, SimulationConfig};
use linkrouter::link::session::LinkSession;
use linkrouter::message::checksum::ChecksumExtras;
use linkrouter::message::frame_codec::FrameCodec;
use linkrouter::test_util::message::{encoded, heartbeat, radio_status, test_message, RadioStatusFields};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::time;
use tracing::{info, Level};

/// Feeds the same telemetry into two links (a lossy radio and a reliable cellular link) and
///  relays it to a ground station link. Every message should reach the ground station exactly
///  once, no matter which link delivered it first.
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 20)]
    radio_loss_percent: u8,

    #[clap(long, default_value_t = 50)]
    num_messages: u8,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

struct CountingSink {
    link: &'static str,
    count: AtomicUsize,
}
impl FrameSink for CountingSink {
    fn send_frame(&self, frame: Bytes) {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        info!("{}: sending frame #{} ({} bytes)", self.link, n, frame.len());
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    let dedup = Arc::new(DedupCache::new());
    let checksum_extras = Arc::new(ChecksumExtras::new());

    let mut radio_config = LinkConfig::new("radio");
    radio_config.radio_status_link = true;
    radio_config.simulation = Some(SimulationConfig { packet_loss_percent: args.radio_loss_percent });

    let mut ground_config = LinkConfig::new("ground");
    ground_config.resequence_outgoing = true;

    let mut sessions = Vec::new();
    for config in [radio_config, LinkConfig::new("cellular"), ground_config] {
        sessions.push(LinkSession::new(Arc::new(config), dedup.clone(), checksum_extras.clone(), Arc::new(FrameCodec))?);
    }
    let handles = sessions.iter()
        .map(|s| s.handle())
        .collect::<Vec<_>>();

    let fan_out: Arc<dyn FanOut> = Arc::new(BroadcastFanOut::new(handles.clone()));
    let ground_sink = Arc::new(CountingSink { link: "ground", count: Default::default() });

    let mut joins = Vec::new();
    for session in sessions {
        let sink: Arc<dyn FrameSink> = if session.name() == "ground" {
            ground_sink.clone() as Arc<dyn FrameSink>
        }
        else {
            Arc::new(CountingSink { link: "air", count: Default::default() })
        };
        joins.push(tokio::spawn(run_link_session(session, fan_out.clone(), sink)));
    }

    let (radio, cellular) = (&handles[0], &handles[1]);
    // source 1 numbers all of its messages in one sequence, heartbeats included
    let mut source_seq = 0u8;
    let mut next_seq = || {
        let seq = source_seq;
        source_seq = source_seq.wrapping_add(1);
        seq
    };

    for seq in 0..args.num_messages {
        let mut frames = Vec::new();
        if seq % 10 == 0 {
            frames.push(encoded(&heartbeat(1, next_seq())));
        }
        frames.push(encoded(&test_message(1, 33, next_seq(), &[seq, seq.wrapping_mul(7), 0x10])));

        for frame in &frames {
            radio.accept_incoming(frame)?;
            cellular.accept_incoming(frame)?;
        }
        radio.accept_incoming(&encoded(&radio_status(51, seq, RadioStatusFields { local_rssi: 180, remote_rssi: 175, tx_buffer: 100, ..Default::default() })))?;

        time::sleep(Duration::from_millis(100)).await;
    }

    for handle in &handles {
        handle.kill();
    }
    for join in joins {
        let session = join.await?;
        info!("{}: received {} packets, sent {}, link quality {:?}",
            session.name(), session.counters().packets_received(), session.counters().packets_sent(), session.link_quality());
        for (source_id, stats) in session.packet_stats() {
            info!("  {}: {:?}", source_id, stats);
        }
    }

    // heartbeats are never suppressed, everything else arrives once per eviction window
    info!("ground station sent {} frames for {} position reports", ground_sink.count.load(Ordering::Relaxed), args.num_messages);
    Ok(())
}
