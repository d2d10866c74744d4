//! App key registration
//!
//! Nothing else in the SDK works until an app key has been verified, either
//! online by the authorization service or from a still-valid cache entry.

pub mod authority;
pub mod cache;
pub mod gate;

pub use authority::{AuthorityError, AuthorizationService, HttpAuthorizationService, Verification};
pub use cache::{CacheLookup, InvalidReason, RegistrationCache};
pub use gate::{validate_app_key, RegistrationGate};

use crate::error::RegistrationError;

/// Proof of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredInfo {
    pub app_key: String,
    pub fingerprint: String,
    pub verified_at_ms: u64,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    Unregistered,
    Pending,
    Registered(RegisteredInfo),
    Failed(RegistrationError),
}

impl RegistrationStatus {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationStatus::Registered(_))
    }
}

/// What the session needs to know about registration
pub trait RegistrationCheck: Send + Sync {
    fn is_registered(&self) -> bool;
}
