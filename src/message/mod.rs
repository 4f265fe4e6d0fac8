//! Decoded messages and the codec boundary to the wire protocol. Everything beyond the fields
//!  that routing needs (source, kind, sequence, checksum) is treated as opaque payload.

pub mod message;
pub mod checksum;
pub mod frame_codec;
