use std::collections::hash_map::Entry;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;
use crc::{Crc, CRC_16_MCRF4XX, CRC_64_REDIS};
use rustc_hash::FxHashMap;
use tracing::error;

use crate::message::message::{Message, MessageKind};

/// the frame checksum of the wire protocol (X.25 style CRC-16 without final XOR)
const FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);
const FINGERPRINT_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);


/// Identifies a message's content for duplicate detection. It covers component id, message kind
///  and payload, but not the sequence number: the same message relayed on two links carries
///  different sequence numbers if one of the relays re-sequences.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Fingerprint(pub u64);

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x?}", self.0)
    }
}

impl Fingerprint {
    pub fn of(msg: &Message) -> Fingerprint {
        let mut digest = FINGERPRINT_CRC.digest();
        digest.update(&[msg.component_id]);
        digest.update(&msg.kind.0.to_le_bytes());
        digest.update(&msg.payload);
        Fingerprint(digest.finalize())
    }
}


/// Calculates the frame checksum for a message as it currently is, mixing in the per-kind
///  checksum extra
pub fn frame_checksum(msg: &Message, crc_extra: u8) -> u16 {
    let mut buf = BytesMut::new();
    msg.write_checksummed_bytes(&mut buf);
    checksum_with_extra(&buf, crc_extra)
}

fn checksum_with_extra(checksummed_bytes: &[u8], crc_extra: u8) -> u16 {
    let mut digest = FRAME_CRC.digest();
    digest.update(checksummed_bytes);
    digest.update(&[crc_extra]);
    digest.finalize()
}


/// Checksum extras of the v1 message set, indexed by message kind. Zero marks kinds that are not
///  part of the standard message set.
const BUILTIN_CRC_EXTRAS: [u8; 256] = [
     50, 124, 137,   0, 237, 217, 104, 119,   0,   0,   0,  89,   0,   0,   0,   0,
      0,   0,   0,   0, 214, 159, 220, 168,  24,  23, 170, 144,  67, 115,  39, 246,
    185, 104, 237, 244, 222, 212,   9, 254, 230,  28,  28, 132, 221, 232,  11, 153,
     41,  39,  78, 196,   0,   0,  15,   3,   0,   0,   0,   0,   0, 167, 183, 119,
    191, 118, 148,  21,   0, 243, 124,   0,   0,  38,  20, 158, 152, 143,   0,   0,
      0, 106,  49,  22, 143, 140,   5, 150,   0, 231, 183,  63,  54,  47,   0,   0,
      0,   0,   0,   0, 175, 102, 158, 208,  56,  93, 138, 108,  32, 185,  84,  34,
    174, 124, 237,   4,  76, 128,  56, 116, 134, 237, 203, 250,  87, 203, 220,  25,
    226,  46,  29, 223,  85,   6, 229, 203,   1, 195, 109, 168, 181,  47,  72, 131,
    127,   0, 103, 154, 178, 200, 134,   0, 208,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0, 127, 154,  21,  22,   0,   1,   0,   0,   0,   0,   0, 167,   0,
      0,   0,  47,   0,   0,   0, 229,   0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,  71,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,   0,
      0,   0,   0,   0,   0,   0, 163, 105, 151,  35, 150,   0,   0,   0,   0,   0,
      0,  90, 104,  85,  95, 130, 184,  81,   8, 204,  49, 170,  44,  83,  46,   0,
];

pub fn builtin_crc_extra(kind: MessageKind) -> Option<u8> {
    let index = usize::try_from(kind.0).ok()?;
    match BUILTIN_CRC_EXTRAS.get(index) {
        Some(&extra) if extra != 0 => Some(extra),
        _ => None,
    }
}


#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnresolvableChecksumExtra {
    pub kind: MessageKind,
}
impl Display for UnresolvableChecksumExtra {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "no checksum extra in 0..=255 reproduces the frame checksum for message kind {}", self.kind.0)
    }
}
impl std::error::Error for UnresolvableChecksumExtra {}


/// Registry of checksum extras for message kinds outside the built-in table (custom or vendor
///  messages). Unknown extras are discovered by brute force from the first message of a kind,
///  and the outcome (including failure) is remembered, so each kind is attempted at most once
///  per registry.
///
/// Brute force is a heuristic: a wrong guess can reproduce a 16 bit checksum by accident. That
///  is why this is used only by the opt-in resequencer, and why every discovery is logged loudly.
#[derive(Default)]
pub struct ChecksumExtras {
    discovered: Mutex<FxHashMap<MessageKind, Option<u8>>>,
}

impl ChecksumExtras {
    pub fn new() -> ChecksumExtras {
        Default::default()
    }

    /// NB: Discovery relies on `msg` still carrying the checksum it was received with, so this
    ///  must be called before the message is modified
    pub fn resolve(&self, msg: &Message) -> Result<u8, UnresolvableChecksumExtra> {
        if let Some(extra) = builtin_crc_extra(msg.kind) {
            return Ok(extra);
        }

        let mut discovered = self.discovered.lock()
            .unwrap_or_else(PoisonError::into_inner);
        let resolved = match discovered.entry(msg.kind) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => *e.insert(discover_crc_extra(msg)),
        };
        resolved.ok_or(UnresolvableChecksumExtra { kind: msg.kind })
    }
}

fn discover_crc_extra(msg: &Message) -> Option<u8> {
    let mut buf = BytesMut::new();
    msg.write_checksummed_bytes(&mut buf);

    let found = (0..=u8::MAX)
        .find(|&guess| checksum_with_extra(&buf, guess) == msg.checksum);

    match found {
        Some(extra) => error!(kind = msg.kind.0, extra, "custom message kind {} has no known checksum extra - brute force found {}. Add it to the built-in table to avoid this guess.", msg.kind.0, extra),
        None => error!(kind = msg.kind.0, "custom message kind {} has no known checksum extra, and no value reproduces the frame checksum - messages of this kind are not resequenced", msg.kind.0),
    }
    found
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;
    use crate::test_util::message::{test_message, with_valid_checksum};

    #[rstest]
    #[case::heartbeat(0, Some(50))]
    #[case::radio_status(109, Some(185))]
    #[case::radio(166, Some(22))]
    #[case::unassigned(3, None)]
    #[case::custom(180, None)]
    #[case::beyond_v1(300, None)]
    fn test_builtin_crc_extra(#[case] kind: u32, #[case] expected: Option<u8>) {
        assert_eq!(builtin_crc_extra(MessageKind(kind)), expected);
    }

    #[test]
    fn test_frame_checksum_reference_value() {
        // CRC-16/MCRF4XX check value for "123456789"
        assert_eq!(FRAME_CRC.checksum(b"123456789"), 0x6f91);
    }

    #[test]
    fn test_fingerprint_ignores_sequence() {
        let a = test_message(1, 33, 10, b"payload");
        let b = test_message(1, 33, 99, b"payload");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[rstest]
    #[case::payload(test_message(1, 33, 10, b"other"))]
    #[case::kind(test_message(1, 34, 10, b"payload"))]
    fn test_fingerprint_covers_content(#[case] other: Message) {
        let msg = test_message(1, 33, 10, b"payload");
        assert_ne!(msg.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_resolve_builtin_does_not_brute_force() {
        let extras = ChecksumExtras::new();
        let mut msg = test_message(1, 0, 0, b"abc");
        msg.checksum = 0; // irrelevant for built-in kinds
        assert_eq!(extras.resolve(&msg), Ok(50));
        assert!(extras.discovered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_discovers_custom_extra_once() {
        let extras = ChecksumExtras::new();
        let msg = with_valid_checksum(test_message(1, 180, 7, b"custom payload"), 77);

        let resolved = extras.resolve(&msg).unwrap();
        assert_eq!(frame_checksum(&msg, resolved), msg.checksum);

        // a second message of the same kind is resolved from the registry, even if its own
        //  checksum is garbage
        let mut garbage = test_message(1, 180, 8, b"other payload");
        garbage.checksum = garbage.checksum.wrapping_add(1);
        assert_eq!(extras.resolve(&garbage), Ok(resolved));
    }

    #[test]
    fn test_resolve_unresolvable_is_remembered() {
        let extras = ChecksumExtras::new();
        let base = test_message(1, 200, 3, b"xyz");

        // find a checksum value that no extra in 0..=255 can produce
        let mut buf = BytesMut::new();
        base.write_checksummed_bytes(&mut buf);
        let reachable = (0..=u8::MAX)
            .map(|extra| checksum_with_extra(&buf, extra))
            .collect::<Vec<_>>();
        let unreachable = (0..=u16::MAX)
            .find(|c| !reachable.contains(c))
            .unwrap();

        let mut msg = base.clone();
        msg.checksum = unreachable;

        let expected = Err(UnresolvableChecksumExtra { kind: MessageKind(200) });
        assert_eq!(extras.resolve(&msg), expected);
        assert_eq!(extras.discovered.lock().unwrap().get(&MessageKind(200)), Some(&None));
        assert_eq!(extras.resolve(&msg), expected);
    }
}
