use crate::link::liveness::PerSourceStats;
use crate::message::message::Message;


/// Number of sequence numbers skipped between two consecutive packets of a source, modulo 256.
///
/// A new sequence number that is not ahead of the previous one is treated as a wrap-around, i.e.
///  `new - prev + 255`; otherwise the gap is `new - prev - 1`. In 8 bit arithmetic these two
///  cases are the same expression. A repeated sequence number counts as a full wrap of 255.
pub fn sequence_gap(prev: u8, new: u8) -> u8 {
    new.wrapping_sub(prev).wrapping_sub(1)
}

/// Adds the packets lost since the previous packet of the source to its statistics and returns
///  their number.
///
/// Radio status reports are skipped since the radio generates them outside the source's
///  sequence space. The first packet from a source only establishes the baseline.
pub fn record_loss(stats: &mut PerSourceStats, msg: &Message) -> u64 {
    if msg.kind.is_radio_status() {
        return 0;
    }

    let lost = match stats.last_packet_sequence {
        Some(prev) => sequence_gap(prev, msg.sequence) as u64,
        None => 0,
    };
    stats.packets_lost += lost;
    stats.last_packet_sequence = Some(msg.sequence);
    lost
}
