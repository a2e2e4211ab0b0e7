//! flowmeta software data plane
//!
//! Packets that the NIC's offload rules forward to a host queue end up here.
//! Each port is polled in turn, every frame is bucketed by its IPv4 address
//! pair, and the burst goes straight back out the port it arrived on.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      ENGINE (1 thread)                    │
//! │                                                           │
//! │   for port in ports:                                      │
//! │                                                           │
//! │   ┌───────────┐   ┌──────────────┐   ┌───────────┐        │
//! │   │ RX burst  │──▶│ parse + hash │──▶│ TX burst  │        │
//! │   │ (queue 0) │   │ bucket count │   │ (queue 0) │        │
//! │   └───────────┘   └──────┬───────┘   └───────────┘        │
//! │                          │                                │
//! │                          ▼                                │
//! │                 ┌─────────────────┐                       │
//! │                 │ FlowCountTable  │                       │
//! │                 │ [i64; 1000]     │                       │
//! │                 └─────────────────┘                       │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The bucket index is `(src + dst) mod 1000` over the raw address words.
//! Distinct flows can land in the same bucket, so `count_active_flows` is an
//! approximation.

#![warn(missing_docs)]

pub mod buffer;
pub mod classify;
pub mod core;
pub mod cycle;
pub mod flow;
pub mod io;
pub mod parse;
pub mod stats;

pub use buffer::Packet;
pub use classify::{classify_and_count, classify_burst, Classification};
pub use self::core::{Engine, EngineConfig, EngineError, RunningFlag, ShutdownHandle};
pub use cycle::{process_port, CycleReport};
pub use flow::FlowCountTable;
pub use io::{PacketIo, RingIo, WireEnd};
pub use parse::{HeaderView, Ipv4View, ParseError};
pub use stats::{AggregateStats, PortStats, PortStatsSnapshot};

/// Port identifier
pub type PortId = u16;

/// Queue identifier within a port
pub type QueueId = u16;

/// Maximum packets pulled from a receive queue per cycle
pub const PACKET_BURST: usize = 128;

/// Number of buckets in the flow-count table
pub const MAX_FLOW: usize = 1000;

/// The only queue the software loop polls
pub const DEFAULT_QUEUE: QueueId = 0;

/// Ethertype of IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(PACKET_BURST, 128);
        assert_eq!(MAX_FLOW, 1000);
        assert_eq!(ETHERTYPE_IPV4, 2048);
    }
}
