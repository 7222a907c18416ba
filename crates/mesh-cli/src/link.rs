//! UDP link to the message broker
//!
//! Each datagram carries one CMDU addressed at the 1905.1 layer:
//! `[dst_mac 6][src_mac 6][cmdu bytes]`.

use std::net::SocketAddr;
use std::sync::Arc;

use mesh_controller::CmduSender;
use mesh_core::{Cmdu, MacAddress, MeshError};
use tokio::net::UdpSocket;
use tracing::trace;

use crate::error::{CliError, Result};

const MAC_LEN: usize = 6;
pub const FRAME_HEADER_LEN: usize = 2 * MAC_LEN;
/// Largest datagram the link accepts
pub const MAX_DATAGRAM: usize = 65_507;

// ----------------------------------------------------------------------------
// Framing
// ----------------------------------------------------------------------------

/// A decoded broker datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerFrame<'a> {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub cmdu: &'a [u8],
}

pub fn encode_frame(dst: MacAddress, src: MacAddress, cmdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + cmdu.len());
    frame.extend_from_slice(dst.as_bytes());
    frame.extend_from_slice(src.as_bytes());
    frame.extend_from_slice(cmdu);
    frame
}

pub fn decode_frame(bytes: &[u8]) -> Result<BrokerFrame<'_>> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(CliError::Frame(format!(
            "datagram of {} bytes is shorter than the {FRAME_HEADER_LEN} byte header",
            bytes.len()
        )));
    }
    Ok(BrokerFrame {
        dst: MacAddress::from_bytes(&bytes[..MAC_LEN]),
        src: MacAddress::from_bytes(&bytes[MAC_LEN..FRAME_HEADER_LEN]),
        cmdu: &bytes[FRAME_HEADER_LEN..],
    })
}

// ----------------------------------------------------------------------------
// Sender
// ----------------------------------------------------------------------------

/// Outbound half of the link, handed to the controller
pub struct UdpLink {
    socket: Arc<UdpSocket>,
    broker: SocketAddr,
    bridge_mac: MacAddress,
}

impl UdpLink {
    pub fn new(socket: Arc<UdpSocket>, broker: SocketAddr, bridge_mac: MacAddress) -> Self {
        Self {
            socket,
            broker,
            bridge_mac,
        }
    }
}

impl CmduSender for UdpLink {
    fn send_cmdu(&mut self, dst: MacAddress, cmdu: &Cmdu) -> mesh_core::Result<()> {
        let frame = encode_frame(dst, self.bridge_mac, &cmdu.encode()?);
        // the controller runs synchronously; a full socket buffer is a dropped frame
        let sent = self
            .socket
            .try_send_to(&frame, self.broker)
            .map_err(|e| MeshError::transport(format!("send to {} failed: {e}", self.broker)))?;
        trace!(dst = %dst, bytes = sent, "frame sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let dst = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let src = MacAddress::new([0xa, 0xb, 0xc, 0xd, 0xe, 0xf]);
        let frame = encode_frame(dst, src, &[0xaa, 0xbb]);
        assert_eq!(frame, vec![1, 2, 3, 4, 5, 6, 0xa, 0xb, 0xc, 0xd, 0xe, 0xf, 0xaa, 0xbb]);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.dst, dst);
        assert_eq!(decoded.src, src);
        assert_eq!(decoded.cmdu, &[0xaa, 0xbb]);
    }

    #[test]
    fn test_short_frame_is_rejected() {
        assert!(matches!(decode_frame(&[0u8; 11]), Err(CliError::Frame(_))));
        assert!(decode_frame(&[0u8; 12]).unwrap().cmdu.is_empty());
    }
}
