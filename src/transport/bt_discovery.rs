//! BlueZ-backed radio adapter: discovery and pairing

use crate::error::PairingError;
use crate::transport::bluetooth::{PairingChallenge, RadioAdapter, RadioPeer};
use crate::transport::rfcomm::RfcommTransportStream;
use crate::transport::traits::TransportStream;
use async_trait::async_trait;
use bluer::{Adapter, Address, Device};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

fn adapter_error(e: impl std::fmt::Display) -> PairingError {
    PairingError::Adapter(e.to_string())
}

fn parse_address(address: &str) -> Result<Address, PairingError> {
    address
        .parse()
        .map_err(|_| PairingError::UnknownPeer(address.to_string()))
}

/// Talks to the default BlueZ adapter over D-Bus
#[derive(Debug, Default)]
pub struct BluezAdapter;

impl BluezAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Get the default Bluetooth adapter
    async fn get_adapter() -> bluer::Result<Adapter> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        Ok(adapter)
    }

    async fn device(address: &str) -> Result<Device, PairingError> {
        let address = parse_address(address)?;
        let adapter = Self::get_adapter().await.map_err(adapter_error)?;
        adapter.device(address).map_err(adapter_error)
    }

    async fn matches(device: &Device, name_prefix: Option<&str>) -> bool {
        match name_prefix {
            None => true,
            Some(prefix) => matches!(device.name().await, Ok(Some(name)) if name.starts_with(prefix)),
        }
    }
}

#[async_trait]
impl RadioAdapter for BluezAdapter {
    async fn scan(
        &self,
        duration: Duration,
        name_prefix: Option<&str>,
    ) -> Result<Vec<RadioPeer>, PairingError> {
        let adapter = Self::get_adapter().await.map_err(adapter_error)?;
        let mut peers = Vec::new();
        let mut seen: HashSet<Address> = HashSet::new();

        let discover = adapter.discover_devices().await.map_err(adapter_error)?;
        tokio::pin!(discover);

        let scan = timeout(duration, async {
            while let Some(event) = discover.next().await {
                let bluer::AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                if !seen.insert(address) {
                    continue;
                }
                let Ok(device) = adapter.device(address) else {
                    continue;
                };
                if Self::matches(&device, name_prefix).await {
                    peers.push(RadioPeer {
                        address: address.to_string(),
                        name: device.name().await.ok().flatten(),
                        rssi: device.rssi().await.ok().flatten(),
                    });
                }
            }
        })
        .await;

        // Timeout is the normal way a scan ends
        if scan.is_err() {
            debug!("[BT] Discovery window closed");
        }

        // Strongest signal first
        peers.sort_by(|a, b| {
            b.rssi
                .unwrap_or(i16::MIN)
                .cmp(&a.rssi.unwrap_or(i16::MIN))
        });
        Ok(peers)
    }

    async fn pair(&self, address: &str) -> Result<PairingChallenge, PairingError> {
        let device = Self::device(address).await?;
        if !device.is_paired().await.map_err(adapter_error)? {
            device.pair().await.map_err(adapter_error)?;
        }
        info!("[BT] Bonded with {}", address);
        // Passkey comparison is handled by the system agent
        Ok(PairingChallenge { passkey: None })
    }

    async fn confirm(&self, address: &str) -> Result<(), PairingError> {
        let device = Self::device(address).await?;
        device.set_trusted(true).await.map_err(adapter_error)
    }

    async fn open(&self, address: &str, channel: u8) -> anyhow::Result<Box<dyn TransportStream>> {
        let address = parse_address(address)?;
        let stream = RfcommTransportStream::connect(address, channel).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert!(parse_address("00:11:22:33:44:55").is_ok());
        assert_eq!(
            parse_address("not-an-address"),
            Err(PairingError::UnknownPeer("not-an-address".into()))
        );
    }
}
