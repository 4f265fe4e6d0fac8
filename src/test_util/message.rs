use bytes::{BufMut, Bytes, BytesMut};

use crate::message::checksum::{builtin_crc_extra, frame_checksum};
use crate::message::frame_codec::FrameCodec;
use crate::message::message::{FrameVersion, Message, MessageCodec, MessageKind, SourceId};


/// A message from component 1 of `source`. Kinds that fit into a v1 frame get one, and the
///  checksum is valid for all well-known kinds.
pub fn test_message(source: u8, kind: u32, sequence: u8, payload: &[u8]) -> Message {
    let kind = MessageKind(kind);
    let msg = Message {
        version: if kind.0 <= u8::MAX as u32 { FrameVersion::V1 } else { FrameVersion::V2 },
        incompat_flags: 0,
        compat_flags: 0,
        sequence,
        source_id: SourceId(source),
        component_id: 1,
        kind,
        payload: Bytes::copy_from_slice(payload),
        checksum: 0,
        signature: None,
    };
    with_valid_checksum(msg, builtin_crc_extra(kind).unwrap_or(0))
}

/// sets the checksum that matches the message's content for a given checksum extra
pub fn with_valid_checksum(mut msg: Message, crc_extra: u8) -> Message {
    msg.checksum = frame_checksum(&msg, crc_extra);
    msg
}

/// a heartbeat whose payload is the same for every call
pub fn heartbeat(source: u8, sequence: u8) -> Message {
    test_message(source, MessageKind::HEARTBEAT.0, sequence, &[0, 0, 0, 0, 2, 3, 0x51, 4, 3])
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RadioStatusFields {
    pub rx_errors: u16,
    pub corrected_packets: u16,
    pub local_rssi: u8,
    pub remote_rssi: u8,
    pub tx_buffer: u8,
    pub local_noise: u8,
    pub remote_noise: u8,
}

pub fn radio_status(source: u8, sequence: u8, fields: RadioStatusFields) -> Message {
    let mut payload = BytesMut::new();
    payload.put_u16_le(fields.rx_errors);
    payload.put_u16_le(fields.corrected_packets);
    payload.put_u8(fields.local_rssi);
    payload.put_u8(fields.remote_rssi);
    payload.put_u8(fields.tx_buffer);
    payload.put_u8(fields.local_noise);
    payload.put_u8(fields.remote_noise);

    test_message(source, MessageKind::RADIO_STATUS.0, sequence, &payload)
}

/// the message as a frame on the wire
pub fn encoded(msg: &Message) -> Bytes {
    let mut buf = BytesMut::new();
    FrameCodec.encode(msg, &mut buf);
    buf.freeze()
}
