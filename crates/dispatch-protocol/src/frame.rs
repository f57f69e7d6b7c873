//! Audio frame type and binary layout.

use bytes::Bytes;
use uuid::Uuid;

/// An opaque audio frame relayed between a transmitter and channel listeners.
///
/// Frame layout (38-byte fixed header plus a variable-length channel id):
/// - Version: 1 byte
/// - Token ID: 16 bytes (transmission capability, zeroed server-to-client)
/// - Sequence Number: 8 bytes (per-channel delivery order; 0 from clients,
///   assigned by the relay)
/// - Timestamp: 8 bytes (microseconds since epoch, transmitter clock)
/// - Channel ID Length: 1 byte
/// - Payload Length: 4 bytes
/// - Channel ID: variable (UTF-8)
/// - Payload: variable (opaque codec data, never inspected)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Protocol version (currently 1).
    pub version: u8,
    /// Transmission token this frame was sent under.
    pub token_id: Uuid,
    /// Per-channel delivery sequence number.
    pub sequence: u64,
    /// Capture timestamp in microseconds since epoch.
    pub timestamp_us: u64,
    /// Channel the frame belongs to.
    pub channel_id: String,
    /// Opaque audio payload.
    pub payload: Bytes,
}

impl AudioFrame {
    /// Fixed header size in bytes (excludes the channel id itself).
    pub const FIXED_HEADER_SIZE: usize = 1 + 16 + 8 + 8 + 1 + 4;

    /// Current protocol version.
    pub const VERSION: u8 = 1;

    /// Maximum channel id length representable in the header.
    pub const MAX_CHANNEL_ID_LEN: usize = u8::MAX as usize;
}
