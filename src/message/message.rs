use std::fmt::{Debug, Display, Formatter};

use bytes::{BufMut, Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::message::checksum::Fingerprint;


/// Identifies the system a message originates from. This is *not* the link it arrived on: the
///  same source can be heard on several links at once.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SourceId(pub u8);

impl Debug for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sys#{}", self.0)
    }
}
impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The message id of the wire protocol. v1 frames carry 8 bits of it, v2 frames 24 bits.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct MessageKind(pub u32);

impl MessageKind {
    pub const HEARTBEAT: MessageKind = MessageKind(0);
    /// radio health report, generated by the radio modem rather than by the source
    pub const RADIO_STATUS: MessageKind = MessageKind(109);
    /// legacy variant of [MessageKind::RADIO_STATUS] with identical layout
    pub const RADIO: MessageKind = MessageKind(166);

    pub fn is_heartbeat(self) -> bool {
        self == Self::HEARTBEAT
    }

    /// Radio status reports are injected by radio hardware: they do not share the link's sequence
    ///  space, and they carry link health fields
    pub fn is_radio_status(self) -> bool {
        self == Self::RADIO_STATUS || self == Self::RADIO
    }
}

/// The start-of-frame marker doubles as the protocol version
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FrameVersion {
    V1 = 0xFE,
    V2 = 0xFD,
}


/// A decoded frame. Messages are immutable once decoded, with the exception of the outgoing
///  resequencer which rewrites sequence number and checksum of its own copy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub version: FrameVersion,
    /// v2 only, always 0 for v1
    pub incompat_flags: u8,
    /// v2 only, always 0 for v1
    pub compat_flags: u8,
    pub sequence: u8,
    pub source_id: SourceId,
    pub component_id: u8,
    pub kind: MessageKind,
    pub payload: Bytes,
    pub checksum: u16,
    /// v2 signature block, present iff [Message::INCOMPAT_FLAG_SIGNED] is set
    pub signature: Option<Bytes>,
}

impl Message {
    pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;
    pub const SIGNATURE_LEN: usize = 13;

    /// Writes the bytes covered by the frame checksum, i.e. everything between the start marker
    ///  and the checksum field.
    pub fn write_checksummed_bytes(&self, buf: &mut BytesMut) {
        // payload length is checked on decode, and builders never exceed a single byte
        buf.put_u8(self.payload.len() as u8);
        match self.version {
            FrameVersion::V1 => {
                buf.put_u8(self.sequence);
                buf.put_u8(self.source_id.0);
                buf.put_u8(self.component_id);
                buf.put_u8(self.kind.0 as u8);
            }
            FrameVersion::V2 => {
                buf.put_u8(self.incompat_flags);
                buf.put_u8(self.compat_flags);
                buf.put_u8(self.sequence);
                buf.put_u8(self.source_id.0);
                buf.put_u8(self.component_id);
                buf.put_slice(&self.kind.0.to_le_bytes()[..3]);
            }
        }
        buf.put_slice(&self.payload);
    }

    /// v2 truncates trailing zero bytes of the payload, so fields beyond the received payload
    ///  read as zero
    pub fn payload_u8(&self, offset: usize) -> u8 {
        self.payload.get(offset).copied().unwrap_or(0)
    }

    pub fn payload_u16_le(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.payload_u8(offset), self.payload_u8(offset + 1)])
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}


/// The boundary to the wire protocol's framing. Implementations are shared by every link, so
///  they must be stateless or internally synchronized.
#[cfg_attr(test, automock)]
pub trait MessageCodec: Send + Sync + 'static {
    fn decode(&self, raw: &[u8]) -> anyhow::Result<Message>;

    fn encode(&self, msg: &Message, buf: &mut BytesMut);
}
