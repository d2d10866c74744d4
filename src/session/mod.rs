//! Product sessions
//!
//! A session runs one transport link at a time and tracks the product on
//! the far end of it.

pub mod controller;
pub mod device;

pub use controller::SessionController;
pub use device::{CapabilityDescriptor, Device, DeviceConnectionState, ProductFamily};
