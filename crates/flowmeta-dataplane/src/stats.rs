//! Port Statistics
//!
//! Lock-free counters per port. The engine is the only writer; snapshots may
//! be taken from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::PortId;

/// Per-port stats (cache-line aligned)
#[repr(C, align(64))]
#[derive(Default)]
pub struct PortStats {
    /// Packets received
    pub rx_packets: AtomicU64,
    /// Packets the transmit queue accepted
    pub tx_packets: AtomicU64,
    /// Bytes received
    pub rx_bytes: AtomicU64,
    /// Packets freed unsent after a transmit shortfall
    pub tx_dropped: AtomicU64,
    /// IPv4 packets that incremented a bucket
    pub ipv4_counted: AtomicU64,
    /// Non-IPv4 packets forwarded uncounted
    pub not_ipv4: AtomicU64,
    /// Truncated frames forwarded uncounted
    pub truncated: AtomicU64,
    /// Polling cycles run, empty or not
    pub cycles: AtomicU64,
}

impl PortStats {
    /// Record a receive burst
    #[inline(always)]
    pub fn record_rx(&self, packets: u64, bytes: u64) {
        self.rx_packets.fetch_add(packets, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a transmit of `sent` out of `offered` packets
    #[inline(always)]
    pub fn record_tx(&self, sent: u64, offered: u64) {
        self.tx_packets.fetch_add(sent, Ordering::Relaxed);
        self.tx_dropped
            .fetch_add(offered.saturating_sub(sent), Ordering::Relaxed);
    }

    /// Record one counted IPv4 packet
    #[inline(always)]
    pub fn record_counted(&self) {
        self.ipv4_counted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one non-IPv4 packet
    #[inline(always)]
    pub fn record_not_ipv4(&self) {
        self.not_ipv4.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one truncated frame
    #[inline(always)]
    pub fn record_truncated(&self) {
        self.truncated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one polling cycle
    #[inline(always)]
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> PortStatsSnapshot {
        PortStatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            ipv4_counted: self.ipv4_counted.load(Ordering::Relaxed),
            not_ipv4: self.not_ipv4.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortStatsSnapshot {
    /// Packets received
    pub rx_packets: u64,
    /// Packets transmitted
    pub tx_packets: u64,
    /// Bytes received
    pub rx_bytes: u64,
    /// Packets dropped on transmit
    pub tx_dropped: u64,
    /// IPv4 packets counted
    pub ipv4_counted: u64,
    /// Non-IPv4 packets
    pub not_ipv4: u64,
    /// Truncated frames
    pub truncated: u64,
    /// Polling cycles
    pub cycles: u64,
}

impl PortStatsSnapshot {
    /// Receive rate in millions of packets per second over `elapsed_secs`
    pub fn packet_rate_mpps(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 { return 0.0; }
        self.rx_packets as f64 / (elapsed_secs * 1_000_000.0)
    }

    /// Fraction of received packets that made it back onto the wire
    pub fn tx_ratio(&self) -> f64 {
        if self.rx_packets == 0 { return 0.0; }
        self.tx_packets as f64 / self.rx_packets as f64
    }
}

/// Aggregate stats across all ports
pub struct AggregateStats {
    ports: Vec<PortStats>,
}

impl AggregateStats {
    /// Zeroed stats for `nb_ports` ports
    pub fn new(nb_ports: u16) -> Self {
        let mut ports = Vec::with_capacity(nb_ports as usize);
        for _ in 0..nb_ports {
            ports.push(PortStats::default());
        }
        Self { ports }
    }

    /// Stats of one port, `None` past the last port
    pub fn port(&self, port: PortId) -> Option<&PortStats> {
        self.ports.get(port as usize)
    }

    /// Every port with its id
    pub fn iter(&self) -> impl Iterator<Item = (PortId, &PortStats)> {
        self.ports.iter().enumerate().map(|(i, s)| (i as PortId, s))
    }

    /// Number of ports tracked
    pub fn nb_ports(&self) -> u16 {
        self.ports.len() as u16
    }

    /// Sum over every port
    pub fn total(&self) -> PortStatsSnapshot {
        let mut total = PortStatsSnapshot::default();
        for port in &self.ports {
            let s = port.snapshot();
            total.rx_packets += s.rx_packets;
            total.tx_packets += s.tx_packets;
            total.rx_bytes += s.rx_bytes;
            total.tx_dropped += s.tx_dropped;
            total.ipv4_counted += s.ipv4_counted;
            total.not_ipv4 += s.not_ipv4;
            total.truncated += s.truncated;
            total.cycles += s.cycles;
        }
        total
    }
}
