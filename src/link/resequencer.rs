use std::fmt::{Display, Formatter};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::message::checksum::{frame_checksum, ChecksumExtras, UnresolvableChecksumExtra};
use crate::message::message::{Message, SourceId};


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResequenceError {
    UnresolvableChecksumExtra(UnresolvableChecksumExtra),
    /// rewriting the sequence number would invalidate the signature
    SignedFrame,
}
impl Display for ResequenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResequenceError::UnresolvableChecksumExtra(e) => write!(f, "{}", e),
            ResequenceError::SignedFrame => write!(f, "signed frames can not be resequenced"),
        }
    }
}
impl std::error::Error for ResequenceError {}

impl From<UnresolvableChecksumExtra> for ResequenceError {
    fn from(value: UnresolvableChecksumExtra) -> Self {
        ResequenceError::UnresolvableChecksumExtra(value)
    }
}


/// Gives the messages an outgoing link sends for each source a gap-free sequence, so that the
///  receiver does not see gaps where duplicates were suppressed or messages arrived via
///  different links.
pub struct Resequencer {
    checksum_extras: Arc<ChecksumExtras>,
    out_packet_sequence: FxHashMap<SourceId, u8>,
}

impl Resequencer {
    pub fn new(checksum_extras: Arc<ChecksumExtras>) -> Resequencer {
        Resequencer {
            checksum_extras,
            out_packet_sequence: Default::default(),
        }
    }

    /// Rewrites the message's sequence number and checksum. On error, the message is unchanged
    ///  and the source's counter is not advanced.
    pub fn resequence(&mut self, msg: &mut Message) -> Result<(), ResequenceError> {
        if msg.signature.is_some() {
            return Err(ResequenceError::SignedFrame);
        }

        // resolve before modifying: discovery needs the checksum as it was received
        let crc_extra = self.checksum_extras.resolve(msg)?;

        let sequence = self.out_packet_sequence.entry(msg.source_id).or_insert(0);
        *sequence = sequence.wrapping_add(1);

        msg.sequence = *sequence;
        msg.checksum = frame_checksum(msg, crc_extra);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use super::*;
    use crate::message::checksum::builtin_crc_extra;
    use crate::message::message::MessageKind;
    use crate::test_util::message::{heartbeat, test_message, with_valid_checksum};

    #[test]
    fn test_sequences_per_source() {
        let mut resequencer = Resequencer::new(Arc::new(ChecksumExtras::new()));

        let mut sequences = Vec::new();
        for (source, seq) in [(1, 50), (1, 51), (2, 7), (1, 90), (2, 8)] {
            let mut msg = heartbeat(source, seq);
            resequencer.resequence(&mut msg).unwrap();
            sequences.push(msg.sequence);
        }
        assert_eq!(sequences, vec![1, 2, 1, 3, 2]);
    }

    #[test]
    fn test_checksum_is_recomputed() {
        let mut resequencer = Resequencer::new(Arc::new(ChecksumExtras::new()));
        let mut msg = heartbeat(1, 200);

        resequencer.resequence(&mut msg).unwrap();
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg, with_valid_checksum(heartbeat(1, 1), builtin_crc_extra(MessageKind::HEARTBEAT).unwrap()));
    }

    #[test]
    fn test_custom_kind_uses_discovered_extra() {
        let extras = Arc::new(ChecksumExtras::new());
        let mut resequencer = Resequencer::new(extras.clone());

        let original = with_valid_checksum(test_message(3, 190, 99, b"vendor data"), 123);
        let mut msg = original.clone();
        resequencer.resequence(&mut msg).unwrap();

        let extra = extras.resolve(&original).unwrap();
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.checksum, frame_checksum(&msg, extra));
    }

    #[test]
    fn test_signed_frame_is_left_alone() {
        let mut resequencer = Resequencer::new(Arc::new(ChecksumExtras::new()));
        let mut msg = test_message(1, 0x1234, 9, b"abc");
        msg.incompat_flags = Message::INCOMPAT_FLAG_SIGNED;
        msg.signature = Some(Bytes::from_static(&[0; Message::SIGNATURE_LEN]));
        let before = msg.clone();

        assert_eq!(resequencer.resequence(&mut msg), Err(ResequenceError::SignedFrame));
        assert_eq!(msg, before);
    }
}
