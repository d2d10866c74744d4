//! Error taxonomy surfaced to applications
//!
//! Every variant carries owned data and is `Clone`: one registration outcome
//! may fan out to several listeners.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("invalid app key: {0}")]
    InvalidKey(String),

    #[error("authorization service unreachable: {0}")]
    NetworkFailure(String),

    #[error("app key rejected by authorization service: {0}")]
    ServerRejected(String),

    /// Part of the public taxonomy; the gate itself treats any cache failure
    /// as a miss and verifies online.
    #[error("registration cache corrupt: {0}")]
    CacheCorrupt(String),

    #[error("another registration with a different app key is pending")]
    AlreadyPending,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("SDK is not registered")]
    NotRegistered,

    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("session is already active")]
    AlreadyActive,

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("transport cannot change while a session is running")]
    TransportBusy,

    #[error("invalid bridge address: {0}")]
    InvalidBridgeAddress(String),

    #[error("pairing failed: {0}")]
    PairingFailed(String),

    #[error("device lost: {0}")]
    DeviceLost(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("component not found: {key}[{index}]")]
    NotFound { key: String, index: u32 },

    #[error("component slot listed twice: {key}[{index}]")]
    DuplicateSlot { key: String, index: u32 },
}

/// Failures of the short-range radio pairing sub-protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("no peer with address {0} was found by the last scan")]
    UnknownPeer(String),

    #[error("pairing step timed out")]
    Timeout,

    #[error("pairing aborted")]
    Aborted,

    #[error("peer rejected pairing")]
    Rejected,

    #[error("radio adapter error: {0}")]
    Adapter(String),
}

impl From<PairingError> for ConnectionError {
    fn from(err: PairingError) -> Self {
        ConnectionError::PairingFailed(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_error_maps_to_connection_error() {
        let err: ConnectionError = PairingError::Rejected.into();
        assert_eq!(err, ConnectionError::PairingFailed("peer rejected pairing".into()));
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NotFound {
            key: "battery".into(),
            index: 0,
        };
        assert_eq!(err.to_string(), "component not found: battery[0]");
    }
}
