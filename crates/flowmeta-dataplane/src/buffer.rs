//! Packet Buffers
//!
//! Frames travel between the wire and the software loop as reference-counted
//! byte buffers, so handing a burst from receive to transmit never copies
//! payload.

use bytes::Bytes;

/// Ethernet header length
pub const ETH_HDR_LEN: usize = 14;

/// Minimum IPv4 header length
pub const IPV4_HDR_LEN: usize = 20;

/// A received frame plus the metadata the offload stage attached to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Frame bytes starting at the Ethernet header
    data: Bytes,
    /// Packet metadata tag (0 when no rule set one)
    pkt_meta: u32,
}

impl Packet {
    /// Wrap frame bytes
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pkt_meta: 0,
        }
    }

    /// Wrap frame bytes with a metadata tag
    pub fn with_meta(data: impl Into<Bytes>, pkt_meta: u32) -> Self {
        Self {
            data: data.into(),
            pkt_meta,
        }
    }

    /// Get frame data
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the underlying shared buffer
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Get frame length
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Metadata tag written by the matching offload rule
    #[inline(always)]
    pub fn pkt_meta(&self) -> u32 {
        self.pkt_meta
    }

    /// Overwrite the metadata tag
    pub fn set_pkt_meta(&mut self, pkt_meta: u32) {
        self.pkt_meta = pkt_meta;
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}
