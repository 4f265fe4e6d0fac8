use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, BytesMut};

use crate::message::checksum::{builtin_crc_extra, frame_checksum};
use crate::message::message::{FrameVersion, Message, MessageCodec, MessageKind, SourceId};


/// Framing for v1 and v2 frames:
///
/// ```ascii
/// v1: FE len seq src comp kind                  payload checksum(LE u16)
/// v2: FD len incompat compat seq src comp kind(LE u24) payload checksum(LE u16) [signature(13)]
/// ```
///
/// The checksum is verified for kinds with a built-in checksum extra, and a mismatch fails the
///  decode. Custom kinds are carried through unchecked since their extra is unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl MessageCodec for FrameCodec {
    fn decode(&self, raw: &[u8]) -> anyhow::Result<Message> {
        let buf = &mut &raw[..];

        let stx = buf.try_get_u8()?;
        let version = FrameVersion::try_from(stx)
            .map_err(|_| anyhow!("invalid start of frame marker 0x{:02X}", stx))?;

        let payload_len = buf.try_get_u8()? as usize;
        let (incompat_flags, compat_flags) = match version {
            FrameVersion::V1 => (0, 0),
            FrameVersion::V2 => (buf.try_get_u8()?, buf.try_get_u8()?),
        };
        let sequence = buf.try_get_u8()?;
        let source_id = SourceId(buf.try_get_u8()?);
        let component_id = buf.try_get_u8()?;
        let kind = match version {
            FrameVersion::V1 => buf.try_get_u8()? as u32,
            FrameVersion::V2 => {
                let low = buf.try_get_u16_le()? as u32;
                let high = buf.try_get_u8()? as u32;
                (high << 16) | low
            }
        };

        if buf.remaining() < payload_len + std::mem::size_of::<u16>() {
            bail!("frame truncated: payload length {} with only {} bytes left", payload_len, buf.remaining());
        }
        let payload = buf.copy_to_bytes(payload_len);
        let checksum = buf.try_get_u16_le()?;

        let signature = if incompat_flags & Message::INCOMPAT_FLAG_SIGNED != 0 {
            if buf.remaining() < Message::SIGNATURE_LEN {
                bail!("signed frame without complete signature block");
            }
            Some(buf.copy_to_bytes(Message::SIGNATURE_LEN))
        }
        else {
            None
        };

        if buf.has_remaining() {
            bail!("{} unexpected bytes after end of frame", buf.remaining());
        }

        let msg = Message {
            version,
            incompat_flags,
            compat_flags,
            sequence,
            source_id,
            component_id,
            kind: MessageKind(kind),
            payload,
            checksum,
            signature,
        };

        if let Some(crc_extra) = builtin_crc_extra(msg.kind) {
            let expected = frame_checksum(&msg, crc_extra);
            if msg.checksum != expected {
                bail!("checksum error in message of kind {} from {:?}: expected 0x{:04X}, was 0x{:04X}", msg.kind.0, msg.source_id, expected, msg.checksum);
            }
        }
        Ok(msg)
    }

    fn encode(&self, msg: &Message, buf: &mut BytesMut) {
        buf.put_u8(msg.version.into());
        msg.write_checksummed_bytes(buf);
        buf.put_u16_le(msg.checksum);
        if let Some(signature) = &msg.signature {
            buf.put_slice(signature);
        }
    }
}
