//! USB cable transport over a serial device

use crate::config::{CableConfig, LinkConfig};
use crate::error::ConnectionError;
use crate::transport::link::{spawn_link, StreamOpener};
use crate::transport::traits::{
    LinkHandle, TransportConnector, TransportEventSender, TransportKind, TransportStream,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{SerialPortBuilderExt, SerialPortInfo, SerialPortType, SerialStream};
use tracing::debug;

/// Serial stream wrapper implementing TransportStream
pub struct SerialTransportStream {
    inner: SerialStream,
}

impl AsyncRead for SerialTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for SerialTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        // Serial lines have no half-close; flushing is all there is
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await?;
        Ok(())
    }
}

struct SerialOpener {
    config: CableConfig,
}

#[async_trait]
impl StreamOpener for SerialOpener {
    async fn open(&self) -> Result<Box<dyn TransportStream>> {
        // The device node can change between replugs, so resolve it each time
        let path = find_port(&self.config).ok_or_else(|| anyhow!("no cable attached"))?;
        let inner = tokio_serial::new(&path, self.config.baud_rate).open_native_async()?;
        debug!("[CABLE] Opened {} at {} baud", path, self.config.baud_rate);
        Ok(Box::new(SerialTransportStream { inner }))
    }

    fn describe(&self) -> String {
        match &self.config.port {
            Some(port) => format!("serial://{}", port),
            None => "serial://auto".into(),
        }
    }
}

pub struct CableConnector {
    config: CableConfig,
    link: LinkConfig,
}

impl CableConnector {
    pub fn new(config: CableConfig, link: LinkConfig) -> Self {
        Self { config, link }
    }
}

impl TransportConnector for CableConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Cable
    }

    fn name(&self) -> &'static str {
        "Cable"
    }

    fn connect(&self) -> bool {
        find_port(&self.config).is_some()
    }

    fn activate(&self, events: TransportEventSender) -> Result<LinkHandle, ConnectionError> {
        if find_port(&self.config).is_none() {
            return Err(ConnectionError::TransportUnavailable(
                "no cable attached".into(),
            ));
        }
        let opener = Arc::new(SerialOpener {
            config: self.config.clone(),
        });
        Ok(spawn_link(opener, self.link.clone(), events))
    }
}

fn find_port(config: &CableConfig) -> Option<String> {
    let ports = match tokio_serial::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("[CABLE] Could not enumerate serial ports: {}", e);
            return None;
        }
    };
    select_port(config, &ports)
}

/// Configured port if present, otherwise the first USB port from an
/// accepted vendor (any vendor when the list is empty)
fn select_port(config: &CableConfig, ports: &[SerialPortInfo]) -> Option<String> {
    if let Some(wanted) = &config.port {
        return ports
            .iter()
            .find(|p| &p.port_name == wanted)
            .map(|p| p.port_name.clone());
    }

    ports
        .iter()
        .find(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) => {
                config.usb_vendor_ids.is_empty() || config.usb_vendor_ids.contains(&usb.vid)
            }
            _ => false,
        })
        .map(|p| p.port_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_serial::UsbPortInfo;

    fn usb(name: &str, vid: u16) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.into(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid,
                pid: 0x0001,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        }
    }

    fn builtin(name: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.into(),
            port_type: SerialPortType::Unknown,
        }
    }

    #[test]
    fn test_explicit_port_must_be_present() {
        let config = CableConfig {
            port: Some("/dev/ttyACM1".into()),
            ..CableConfig::default()
        };
        assert_eq!(select_port(&config, &[builtin("/dev/ttyS0")]), None);
        assert_eq!(
            select_port(&config, &[usb("/dev/ttyACM1", 0x2ca3)]),
            Some("/dev/ttyACM1".into())
        );
    }

    #[test]
    fn test_auto_select_filters_vendor() {
        let config = CableConfig {
            usb_vendor_ids: vec![0x2ca3],
            ..CableConfig::default()
        };
        let ports = [builtin("/dev/ttyS0"), usb("/dev/ttyUSB0", 0x0403), usb("/dev/ttyACM0", 0x2ca3)];
        assert_eq!(select_port(&config, &ports), Some("/dev/ttyACM0".into()));
    }

    #[test]
    fn test_auto_select_skips_non_usb() {
        let config = CableConfig {
            usb_vendor_ids: Vec::new(),
            ..CableConfig::default()
        };
        assert_eq!(select_port(&config, &[builtin("/dev/ttyS0")]), None);
    }
}
