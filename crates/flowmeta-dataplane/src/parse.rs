//! L2-L4 header extraction
//!
//! A read-only projection over the first bytes of a frame. Nothing here is
//! retained past the packet it was built from.

use std::net::Ipv4Addr;

use crate::buffer::{ETH_HDR_LEN, IPV4_HDR_LEN};
use crate::ETHERTYPE_IPV4;

/// IP protocol number of TCP
pub const IPPROTO_TCP: u8 = 6;

/// IP protocol number of UDP
pub const IPPROTO_UDP: u8 = 17;

/// Header parse failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Frame ends before a header it announces
    #[error("truncated frame: {len} bytes, need {need}")]
    Truncated {
        /// Bytes available
        len: usize,
        /// Bytes required
        need: usize,
    },
}

/// IPv4 fields of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4View {
    /// Source address as the raw wire word (no byte swap)
    pub src_addr: u32,
    /// Destination address as the raw wire word (no byte swap)
    pub dst_addr: u32,
    /// IP protocol (TCP=6, UDP=17)
    pub protocol: u8,
    /// L4 source port in host order, TCP/UDP only
    pub src_port: Option<u16>,
    /// L4 destination port in host order, TCP/UDP only
    pub dst_port: Option<u16>,
}

impl Ipv4View {
    /// Source address in dotted form
    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_addr.to_ne_bytes())
    }

    /// Destination address in dotted form
    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_addr.to_ne_bytes())
    }

    /// Whether the L4 header is UDP
    pub fn is_udp(&self) -> bool {
        self.protocol == IPPROTO_UDP
    }

    /// Whether the L4 header is TCP
    pub fn is_tcp(&self) -> bool {
        self.protocol == IPPROTO_TCP
    }
}

/// Parsed header view of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderView {
    /// Ethertype in host order
    pub ethertype: u16,
    /// Present when the ethertype is IPv4
    pub ipv4: Option<Ipv4View>,
}

impl HeaderView {
    /// Parse Ethernet and, for IPv4 frames, the IPv4 and L4 port fields
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < ETH_HDR_LEN {
            return Err(ParseError::Truncated {
                len: data.len(),
                need: ETH_HDR_LEN,
            });
        }

        let ethertype = u16::from_be_bytes([data[12], data[13]]);
        if ethertype != ETHERTYPE_IPV4 {
            return Ok(Self {
                ethertype,
                ipv4: None,
            });
        }

        let l3 = ETH_HDR_LEN;
        if data.len() < l3 + IPV4_HDR_LEN {
            return Err(ParseError::Truncated {
                len: data.len(),
                need: l3 + IPV4_HDR_LEN,
            });
        }

        // Address words are read as they sit in memory
        let src_addr = u32::from_ne_bytes([data[l3 + 12], data[l3 + 13], data[l3 + 14], data[l3 + 15]]);
        let dst_addr = u32::from_ne_bytes([data[l3 + 16], data[l3 + 17], data[l3 + 18], data[l3 + 19]]);
        let protocol = data[l3 + 9];

        let ihl = ((data[l3] & 0x0F) as usize) * 4;
        let l4 = l3 + ihl;
        let (src_port, dst_port) = match protocol {
            IPPROTO_TCP | IPPROTO_UDP if ihl >= IPV4_HDR_LEN && l4 + 4 <= data.len() => (
                Some(u16::from_be_bytes([data[l4], data[l4 + 1]])),
                Some(u16::from_be_bytes([data[l4 + 2], data[l4 + 3]])),
            ),
            _ => (None, None),
        };

        Ok(Self {
            ethertype,
            ipv4: Some(Ipv4View {
                src_addr,
                dst_addr,
                protocol,
                src_port,
                dst_port,
            }),
        })
    }

    /// Whether the frame carries IPv4
    pub fn is_ipv4(&self) -> bool {
        self.ipv4.is_some()
    }
}
