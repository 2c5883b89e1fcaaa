//! WS-Discovery Probe/ProbeMatch codec and UDP exchange.
//!
//! Shared by the discovery service (multicast) and the WSD driver, which
//! sends a unicast probe to a known host to learn its transfer address.

use crate::xml;
use openscan_core::{Protocol, ScannerDescriptor, MAX_DURATION};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

/// WS-Discovery IPv4 multicast group.
pub const WS_DISCOVERY_MULTICAST: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// WS-Discovery UDP port.
pub const WS_DISCOVERY_PORT: u16 = 3702;

/// Device type advertised by WS-Scan devices.
pub const SCAN_DEVICE_TYPE: &str = "http://schemas.microsoft.com/windows/2006/08/wdp/scan:ScanDeviceType";

const MAX_DATAGRAM: usize = 65_535;

/// Multicast destination for probes.
#[must_use]
pub fn multicast_target() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(WS_DISCOVERY_MULTICAST), WS_DISCOVERY_PORT)
}

/// Build a Probe envelope asking for scan devices.
#[must_use]
pub fn probe_message(message_id: &Uuid) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:wscn="http://schemas.microsoft.com/windows/2006/08/wdp/scan">
  <s:Header>
    <a:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</a:Action>
    <a:MessageID>urn:uuid:{message_id}</a:MessageID>
    <a:To>urn:schemas-xmlsoap-org:ws:2005:04:discovery</a:To>
  </s:Header>
  <s:Body>
    <d:Probe>
      <d:Types>wscn:ScanDeviceType</d:Types>
    </d:Probe>
  </s:Body>
</s:Envelope>"#
    )
}

/// A ProbeMatch advertising a scan device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMatch {
    /// Endpoint reference address (usually `urn:uuid:...`)
    pub endpoint_reference: Option<String>,
    /// Transfer addresses, in advertised order
    pub xaddrs: Vec<String>,
    /// Raw `Types` value
    pub types: String,
}

impl ProbeMatch {
    /// Parse a ProbeMatch datagram; `None` unless it advertises a scanner.
    #[must_use]
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(datagram).ok()?;
        let block = xml::element_block(text, "ProbeMatch")?;
        let types = xml::element_text(block, "Types")?;
        if !types.contains("ScanDeviceType") {
            return None;
        }
        let xaddrs: Vec<String> = xml::element_text(block, "XAddrs")?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if xaddrs.is_empty() {
            return None;
        }
        let endpoint_reference = xml::element_block(block, "EndpointReference")
            .and_then(|epr| xml::element_text(epr, "Address"));
        Some(Self {
            endpoint_reference,
            xaddrs,
            types,
        })
    }

    /// First transfer address that parses as an http(s) URL.
    #[must_use]
    pub fn transfer_url(&self) -> Option<url::Url> {
        self.xaddrs
            .iter()
            .filter_map(|x| url::Url::parse(x).ok())
            .find(|u| matches!(u.scheme(), "http" | "https"))
    }

    /// Descriptor for the responding device.
    ///
    /// The address is the datagram sender; port and service path come from
    /// the first transfer address.
    #[must_use]
    pub fn descriptor(&self, sender: IpAddr) -> Option<ScannerDescriptor> {
        let transfer = self.transfer_url()?;
        let port = transfer.port_or_known_default().unwrap_or(80);
        let ip = sender.to_string();
        let path = transfer.path();
        let mut descriptor = ScannerDescriptor::new(&ip, port, Protocol::Wsd)
            .with_display_name(format!("WSD Scanner at {ip}"))
            .with_model("WSD Scanner");
        if path != "/" {
            descriptor = descriptor.with_service_path(path);
        }
        Some(descriptor)
    }
}

/// Send one Probe to `target` and collect scanner matches until `window` ends.
///
/// Works for both the multicast group and a unicast host.
///
/// # Errors
/// Returns error if the socket cannot be bound or the probe cannot be sent.
pub async fn probe(target: SocketAddr, window: Duration) -> io::Result<Vec<(ProbeMatch, IpAddr)>> {
    let mut matches = Vec::new();
    probe_with(target, window, |found, from| matches.push((found, from))).await?;
    Ok(matches)
}

/// Send one Probe and hand each scanner match to `on_match` as it arrives.
///
/// # Errors
/// Returns error if the socket cannot be bound or the probe cannot be sent.
pub async fn probe_with<F>(target: SocketAddr, window: Duration, mut on_match: F) -> io::Result<()>
where
    F: FnMut(ProbeMatch, IpAddr),
{
    let bind: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    if target.is_ipv4() {
        socket.set_multicast_ttl_v4(4)?;
    }

    let message_id = Uuid::new_v4();
    socket
        .send_to(probe_message(&message_id).as_bytes(), target)
        .await?;
    debug!(%target, %message_id, "sent WS-Discovery probe");

    let now = Instant::now();
    let deadline = now.checked_add(window).unwrap_or(now + MAX_DURATION);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                debug!("WS-Discovery receive failed: {e}");
                break;
            }
            Ok(Ok((len, from))) => match ProbeMatch::parse(&buf[..len]) {
                Some(found) => on_match(found, from.ip()),
                None => trace!(%from, "ignoring non-scanner WS-Discovery reply"),
            },
        }
    }
    Ok(())
}
