pub mod bluetooth;
#[cfg(feature = "bluez")]
pub mod bt_discovery;
pub mod cable;
pub mod link;
#[cfg(feature = "bluez")]
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use bluetooth::{
    default_radio_adapter, PairingChallenge, PairingState, RadioAdapter, RadioConnector,
    RadioPeer, UnsupportedRadio,
};
#[cfg(feature = "bluez")]
pub use bt_discovery::BluezAdapter;
pub use cable::{CableConnector, SerialTransportStream};
pub use link::{spawn_link, StreamOpener};
pub use tcp::{parse_bridge_address, TcpConnector, TcpTransportStream};
pub use traits::{
    LinkHandle, TransportConnector, TransportEvent, TransportEventSender, TransportKind,
    TransportStream,
};
