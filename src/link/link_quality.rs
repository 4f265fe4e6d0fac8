use std::time::Duration;

use tokio::time::Instant;

use crate::message::message::Message;


/// Latest link health snapshot of a link. Radio fields are overwritten by every radio status
///  report without smoothing; delay fields are maintained by the
///  [LinkDelayEstimator](crate::link::link_delay::LinkDelayEstimator).
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LinkQuality {
    pub local_rssi: u8,
    pub remote_rssi: u8,
    /// remaining transmit buffer of the radio, in percent
    pub tx_buffer: u8,
    pub local_noise: u8,
    pub remote_noise: u8,
    pub rx_errors: u16,
    /// packets with errors that were corrected by the radio's error correction
    pub corrected_packets: u16,

    pub last_heartbeat: Option<Instant>,
    pub link_delay: Duration,
}

impl LinkQuality {
    /// Copies the radio fields out of a radio status report. Returns `false` without touching
    ///  anything for other message kinds.
    pub fn update_from_radio_status(&mut self, msg: &Message) -> bool {
        if !msg.kind.is_radio_status() {
            return false;
        }

        self.rx_errors = msg.payload_u16_le(0);
        self.corrected_packets = msg.payload_u16_le(2);
        self.local_rssi = msg.payload_u8(4);
        self.remote_rssi = msg.payload_u8(5);
        self.tx_buffer = msg.payload_u8(6);
        self.local_noise = msg.payload_u8(7);
        self.remote_noise = msg.payload_u8(8);
        true
    }
}
