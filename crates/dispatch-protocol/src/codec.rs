//! Codec for encoding and decoding audio frames.

use crate::frame::AudioFrame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Insufficient data to decode.
    #[error("Insufficient data")]
    InsufficientData,

    /// Unsupported version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Channel id is not valid UTF-8.
    #[error("Channel id is not valid UTF-8")]
    InvalidChannelId,

    /// Channel id exceeds the one-byte length field.
    #[error("Channel id too long: {0} bytes")]
    ChannelIdTooLong(usize),
}

/// Encode an audio frame to bytes.
///
/// # Errors
///
/// Returns `ChannelIdTooLong` if the channel id does not fit the header.
pub fn encode_frame(frame: &AudioFrame) -> Result<Bytes, CodecError> {
    let channel_bytes = frame.channel_id.as_bytes();
    if channel_bytes.len() > AudioFrame::MAX_CHANNEL_ID_LEN {
        return Err(CodecError::ChannelIdTooLong(channel_bytes.len()));
    }

    let total_len = AudioFrame::FIXED_HEADER_SIZE + channel_bytes.len() + frame.payload.len();
    let mut buf = BytesMut::with_capacity(total_len);

    // Version (1 byte)
    buf.put_u8(frame.version);

    // Token ID (16 bytes)
    buf.put_slice(frame.token_id.as_bytes());

    // Sequence Number (8 bytes)
    buf.put_u64(frame.sequence);

    // Timestamp (8 bytes)
    buf.put_u64(frame.timestamp_us);

    // Channel ID Length (1 byte)
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_CHANNEL_ID_LEN above
    buf.put_u8(channel_bytes.len() as u8);

    // Payload Length (4 bytes)
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32(frame.payload.len() as u32);

    // Channel ID
    buf.put_slice(channel_bytes);

    // Payload
    buf.extend_from_slice(&frame.payload);

    Ok(buf.freeze())
}

/// Decode an audio frame from bytes.
///
/// # Errors
///
/// Returns an error if the buffer is truncated, carries an unknown
/// version, or the channel id is not UTF-8.
pub fn decode_frame(data: &mut impl Buf) -> Result<AudioFrame, CodecError> {
    if data.remaining() < AudioFrame::FIXED_HEADER_SIZE {
        return Err(CodecError::InsufficientData);
    }

    // Version (1 byte)
    let version = data.get_u8();
    if version != AudioFrame::VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    // Token ID (16 bytes)
    let mut token_bytes = [0u8; 16];
    data.copy_to_slice(&mut token_bytes);
    let token_id = Uuid::from_bytes(token_bytes);

    // Sequence Number (8 bytes)
    let sequence = data.get_u64();

    // Timestamp (8 bytes)
    let timestamp_us = data.get_u64();

    // Channel ID Length (1 byte)
    let channel_len = data.get_u8() as usize;

    // Payload Length (4 bytes)
    let payload_len = data.get_u32() as usize;

    if data.remaining() < channel_len + payload_len {
        return Err(CodecError::InsufficientData);
    }

    // Channel ID
    let mut channel_buf = vec![0u8; channel_len];
    data.copy_to_slice(&mut channel_buf);
    let channel_id = String::from_utf8(channel_buf).map_err(|_| CodecError::InvalidChannelId)?;

    // Payload
    let mut payload_buf = vec![0u8; payload_len];
    data.copy_to_slice(&mut payload_buf);
    let payload = Bytes::from(payload_buf);

    Ok(AudioFrame {
        version,
        token_id,
        sequence,
        timestamp_us,
        channel_id,
        payload,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn sample_frame() -> AudioFrame {
        AudioFrame {
            version: AudioFrame::VERSION,
            token_id: Uuid::new_v4(),
            sequence: 42,
            timestamp_us: 1_700_000_000_000_000,
            channel_id: "ops-1".to_string(),
            payload: Bytes::from_static(b"opus-packet-bytes"),
        }
    }

    #[test]
    fn test_round_trip() {
        let frame = sample_frame();
        let encoded = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&mut encoded.clone()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let mut frame = sample_frame();
        frame.payload = Bytes::new();
        let encoded = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&mut encoded.clone()).unwrap();
        assert_eq!(decoded.payload.len(), 0);
        assert_eq!(decoded.channel_id, "ops-1");
    }

    #[test]
    fn test_truncated_header_rejected() {
        let frame = sample_frame();
        let encoded = encode_frame(&frame).unwrap();
        let mut short = encoded.slice(..AudioFrame::FIXED_HEADER_SIZE - 1);
        assert!(matches!(
            decode_frame(&mut short),
            Err(CodecError::InsufficientData)
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let frame = sample_frame();
        let encoded = encode_frame(&frame).unwrap();
        let mut short = encoded.slice(..encoded.len() - 4);
        assert!(matches!(
            decode_frame(&mut short),
            Err(CodecError::InsufficientData)
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let frame = sample_frame();
        let encoded = encode_frame(&frame).unwrap();
        let mut bad = BytesMut::from(&encoded[..]);
        bad[0] = 99;
        let mut buf = bad.freeze();
        assert!(matches!(
            decode_frame(&mut buf),
            Err(CodecError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_oversized_channel_id_rejected() {
        let mut frame = sample_frame();
        frame.channel_id = "x".repeat(300);
        assert!(matches!(
            encode_frame(&frame),
            Err(CodecError::ChannelIdTooLong(300))
        ));
    }
}
