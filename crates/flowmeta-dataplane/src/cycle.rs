//! Port Processing Cycle
//!
//! RX burst → classify/count → TX the same burst on the same port and queue.

use crate::buffer::Packet;
use crate::classify::{classify_and_count, Classification};
use crate::flow::FlowCountTable;
use crate::io::PacketIo;
use crate::stats::PortStats;
use crate::{PortId, DEFAULT_QUEUE, PACKET_BURST};

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Packets pulled from the receive queue
    pub received: usize,
    /// Packets the transmit queue accepted
    pub transmitted: usize,
    /// Packets that incremented a bucket
    pub counted: usize,
}

/// Run one receive → classify → transmit cycle on `port`.
///
/// `burst` is scratch space; it is empty on return. A transmit shortfall is
/// recorded in `stats` and otherwise ignored.
pub fn process_port<I>(
    io: &mut I,
    port: PortId,
    table: &mut FlowCountTable,
    stats: &PortStats,
    burst: &mut Vec<Packet>,
) -> CycleReport
where
    I: PacketIo + ?Sized,
{
    burst.clear();
    stats.record_cycle();

    let received = io.rx_burst(port, DEFAULT_QUEUE, burst, PACKET_BURST);
    if received == 0 {
        return CycleReport::default();
    }

    let mut counted = 0;
    let mut bytes = 0u64;
    for pkt in burst.iter() {
        bytes += pkt.len() as u64;
        match classify_and_count(pkt, table) {
            Classification::Counted { .. } => {
                counted += 1;
                stats.record_counted();
            }
            Classification::NotIpv4 { .. } => stats.record_not_ipv4(),
            Classification::Truncated { len } => {
                stats.record_truncated();
                tracing::trace!(port, len, "truncated frame forwarded uncounted");
            }
        }
    }
    stats.record_rx(received as u64, bytes);

    let transmitted = io.tx_burst(port, DEFAULT_QUEUE, burst);
    stats.record_tx(transmitted as u64, received as u64);

    metrics::counter!("flowmeta_rx_packets", "port" => port.to_string()).increment(received as u64);
    metrics::counter!("flowmeta_tx_packets", "port" => port.to_string()).increment(transmitted as u64);
    if transmitted < received {
        metrics::counter!("flowmeta_tx_dropped", "port" => port.to_string())
            .increment((received - transmitted) as u64);
    }

    CycleReport {
        received,
        transmitted,
        counted,
    }
}
