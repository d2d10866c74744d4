//! aerolink shared protocol types
//!
//! Link frames, the frame codec and the session state machine used by both
//! the SDK side (`aerolink`) and the development bridge.

pub mod codec;
pub mod proto;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Link and capacity limits shared by both ends of a link
pub mod limits {
    /// Heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

    /// Silence on a link for longer than this is treated as a drop
    pub const LINK_SILENCE_TIMEOUT_MS: u64 = 5000;

    /// Default TCP port of the development bridge
    pub const DEFAULT_BRIDGE_PORT: u16 = 4030;

    /// Default TCP port a product exposes on its own wireless network
    pub const DEFAULT_WIRELESS_PORT: u16 = 4031;

    /// Retention ceiling of the debug log directory
    pub const DEBUG_LOG_CAPACITY_BYTES: u64 = 100 * 1024 * 1024;
}

impl Header {
    /// Create a new header with the given device ID and message type
    pub fn new(device_id: impl Into<String>, msg_type: MessageType, sequence_id: u64) -> Self {
        Self {
            device_id: device_id.into(),
            sequence_id,
            timestamp_ms: now_ms(),
            msg_type: msg_type.into(),
        }
    }
}

impl Envelope {
    /// Wrap a payload, deriving the header message type from it
    pub fn wrap(device_id: impl Into<String>, sequence_id: u64, payload: envelope::Payload) -> Self {
        let msg_type = match &payload {
            envelope::Payload::Announce(_) => MessageType::MsgAnnounce,
            envelope::Payload::Gone(_) => MessageType::MsgGone,
            envelope::Payload::Delta(_) => MessageType::MsgDelta,
            envelope::Payload::Heartbeat(_) => MessageType::MsgHeartbeat,
        };
        Self {
            header: Some(Header::new(device_id, msg_type, sequence_id)),
            payload: Some(payload),
        }
    }

    /// Device identity from the header, empty if absent
    pub fn device_id(&self) -> &str {
        self.header.as_ref().map(|h| h.device_id.as_str()).unwrap_or("")
    }
}

impl ComponentInfo {
    pub fn new(key: impl Into<String>, index: u32, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            index,
            name: name.into(),
        }
    }
}

impl ComponentRef {
    pub fn new(key: impl Into<String>, index: u32) -> Self {
        Self {
            key: key.into(),
            index,
        }
    }
}

impl Heartbeat {
    pub fn new(uptime_ms: u64) -> Self {
        Self { uptime_ms }
    }
}
