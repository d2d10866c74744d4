//! Link protocol messages
//!
//! Declared with prost derive macros so the shared crate builds without a
//! `protoc` step. Tags are part of the wire format: never renumber them.

/// Frame header carried by every envelope
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    /// Identity of the sending device (empty when sent by the SDK side)
    #[prost(string, tag = "1")]
    pub device_id: String,
    #[prost(uint64, tag = "2")]
    pub sequence_id: u64,
    #[prost(uint64, tag = "3")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "MessageType", tag = "4")]
    pub msg_type: i32,
}

/// Top-level frame exchanged over every link
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(oneof = "envelope::Payload", tags = "2, 3, 4, 5")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Announce(super::DeviceAnnounce),
        #[prost(message, tag = "3")]
        Gone(super::DeviceGone),
        #[prost(message, tag = "4")]
        Delta(super::ComponentDelta),
        #[prost(message, tag = "5")]
        Heartbeat(super::Heartbeat),
    }
}

/// Sent by a device when it becomes reachable (and again on reconnect)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceAnnounce {
    #[prost(string, tag = "1")]
    pub model: String,
    #[prost(string, tag = "2")]
    pub firmware: String,
    #[prost(enumeration = "ProductFamily", tag = "3")]
    pub family: i32,
    #[prost(message, repeated, tag = "4")]
    pub components: Vec<ComponentInfo>,
}

/// Sent by a device that is shutting down or unplugging its link
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceGone {
    #[prost(string, tag = "1")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComponentInfo {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(uint32, tag = "2")]
    pub index: u32,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComponentRef {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(uint32, tag = "2")]
    pub index: u32,
}

/// Live reconfiguration (e.g. a gimbal hot-swap)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ComponentDelta {
    #[prost(message, repeated, tag = "1")]
    pub added: Vec<ComponentInfo>,
    #[prost(message, repeated, tag = "2")]
    pub removed: Vec<ComponentRef>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(uint64, tag = "1")]
    pub uptime_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    MsgUnknown = 0,
    MsgAnnounce = 1,
    MsgGone = 2,
    MsgDelta = 3,
    MsgHeartbeat = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProductFamily {
    FamilyUnknown = 0,
    FamilyAircraft = 1,
    FamilyHandheld = 2,
}
