//! Length-prefixed framing for stream links
//!
//! Every frame on a cable, wireless, radio or bridge link is:
//! ```text
//! [ 4 bytes: payload length (u32, big-endian) ][ N bytes: protobuf Envelope ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Largest frame either side will accept (1 MiB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const PREFIX_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode an envelope into a standalone frame
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(envelope, &mut buf)?;
    Ok(buf.freeze())
}

/// Append one frame to `buf`
pub fn encode_into(envelope: &Envelope, buf: &mut BytesMut) -> Result<(), CodecError> {
    let body_len = envelope.encoded_len();
    if body_len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    buf.reserve(PREFIX_LEN + body_len);
    buf.put_u32(body_len as u32);
    envelope.encode(buf)?;
    Ok(())
}

/// Pull one complete frame off the front of `buf`.
///
/// `Ok(None)` means more bytes are needed; `buf` is left untouched in that case.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if body_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(body_len));
    }

    if buf.len() < PREFIX_LEN + body_len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(body_len as usize);
    Ok(Some(Envelope::decode(body)?))
}

/// Accumulates bytes read from a stream and yields whole frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Call repeatedly until it returns `Ok(None)` to drain buffered frames
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes held that do not yet form a whole frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop partial data, e.g. after a link drop
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::Payload, ComponentInfo, DeviceAnnounce, Heartbeat};

    fn announce() -> Envelope {
        Envelope::wrap(
            "AC-0001",
            1,
            Payload::Announce(DeviceAnnounce {
                model: "Sim Aircraft".into(),
                firmware: "01.02.0300".into(),
                family: crate::ProductFamily::FamilyAircraft.into(),
                components: vec![
                    ComponentInfo::new("gimbal", 0, "Gimbal"),
                    ComponentInfo::new("battery", 0, "Battery"),
                ],
            }),
        )
    }

    #[test]
    fn test_length_prefix_matches_body() {
        let encoded = encode(&announce()).expect("encode failed");
        let prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(prefix as usize, encoded.len() - PREFIX_LEN);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no frame");
        assert_eq!(decoded, announce_with_header(&decoded));
        assert!(buf.is_empty());
    }

    // Timestamps differ between calls, so compare against the decoded header.
    fn announce_with_header(decoded: &Envelope) -> Envelope {
        let mut expected = announce();
        expected.header = decoded.header.clone();
        expected
    }

    #[test]
    fn test_partial_frame_leaves_buffer() {
        let encoded = encode(&announce()).expect("encode failed");
        let mut buf = BytesMut::from(&encoded[..6]);
        assert!(decode(&mut buf).expect("partial data is not an error").is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_decoder_split_and_concatenated_frames() {
        let first = encode(&announce()).expect("encode failed");
        let second = encode(&Envelope::wrap("AC-0001", 2, Payload::Heartbeat(Heartbeat::new(10))))
            .expect("encode failed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&first[..3]);
        assert!(decoder.decode_next().unwrap().is_none());

        let mut rest = first[3..].to_vec();
        rest.extend_from_slice(&second);
        decoder.extend(&rest);

        let a = decoder.decode_next().unwrap().expect("first frame");
        let b = decoder.decode_next().unwrap().expect("second frame");
        assert!(matches!(a.payload, Some(Payload::Announce(_))));
        assert!(matches!(b.payload, Some(Payload::Heartbeat(_))));
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 16);
        assert!(matches!(decode(&mut buf), Err(CodecError::InvalidLength(_))));
    }

    #[test]
    fn test_reset_discards_partial() {
        let encoded = encode(&announce()).expect("encode failed");
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded[..10]);
        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
    }
}
