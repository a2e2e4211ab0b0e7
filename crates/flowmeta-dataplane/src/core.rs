//! Software Fallback Engine
//!
//! Run-to-completion polling of every port on a single thread. The loop only
//! ends when its [`RunningFlag`] is cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::Packet;
use crate::cycle::{process_port, CycleReport};
use crate::flow::FlowCountTable;
use crate::io::PacketIo;
use crate::stats::{AggregateStats, PortStats, PortStatsSnapshot};
use crate::{PortId, PACKET_BURST};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of ports to poll, `0..nb_ports`
    pub nb_ports: u16,
    /// How often the active flow count is logged
    pub report_interval: Duration,
    /// How many of the busiest buckets each report lists
    pub report_top: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nb_ports: 2,
            report_interval: Duration::from_secs(5),
            report_top: 5,
        }
    }
}

/// Shared run/stop flag
#[derive(Debug, Clone)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    /// A flag that starts in the running state
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Check if running
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that stops an engine from another thread or task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: RunningFlag,
}

impl ShutdownHandle {
    /// Ask the engine to leave its run loop after the current sweep
    pub fn shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.flag.stop();
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        !self.flag.is_running()
    }
}

/// Software fallback engine
///
/// Owns the packet I/O backend, the flow-count table and per-port stats.
pub struct Engine<I> {
    config: EngineConfig,
    io: I,
    table: FlowCountTable,
    stats: Arc<AggregateStats>,
    running: RunningFlag,
    burst: Vec<Packet>,
    last_report: Instant,
}

impl<I: PacketIo> Engine<I> {
    /// Create new engine over `io`
    pub fn new(config: EngineConfig, io: I) -> Result<Self, EngineError> {
        if config.nb_ports == 0 {
            return Err(EngineError::NoPorts);
        }
        if config.nb_ports > io.nb_ports() {
            return Err(EngineError::PortMismatch {
                configured: config.nb_ports,
                available: io.nb_ports(),
            });
        }
        if config.report_interval.is_zero() {
            return Err(EngineError::ConfigError("report interval must be nonzero".into()));
        }

        Ok(Self {
            stats: Arc::new(AggregateStats::new(config.nb_ports)),
            config,
            io,
            table: FlowCountTable::new(),
            running: RunningFlag::new(),
            burst: Vec::with_capacity(PACKET_BURST),
            last_report: Instant::now(),
        })
    }

    /// Handle for stopping [`Engine::run`]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.running.clone(),
        }
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// Shared per-port stats
    pub fn stats(&self) -> Arc<AggregateStats> {
        self.stats.clone()
    }

    /// Flow-count table
    pub fn table(&self) -> &FlowCountTable {
        &self.table
    }

    /// Buckets with a nonzero count
    pub fn count_active_flows(&self) -> usize {
        self.table.count_active_flows()
    }

    /// Zero the flow-count table
    pub fn reset_counts(&mut self) {
        self.table.reset_counts();
        tracing::debug!("Flow counts reset");
    }

    /// One pass over every port
    pub fn sweep(&mut self) -> CycleReport {
        let mut total = CycleReport::default();
        for (port, stats) in self.stats.iter() {
            let report = process_port(
                &mut self.io,
                port,
                &mut self.table,
                stats,
                &mut self.burst,
            );
            total.received += report.received;
            total.transmitted += report.transmitted;
            total.counted += report.counted;
        }
        total
    }

    /// Main loop (run-to-completion). Returns once the running flag clears.
    pub fn run(&mut self) -> PortStatsSnapshot {
        tracing::info!(ports = self.config.nb_ports, "Software loop starting");
        self.last_report = Instant::now();

        while self.running.is_running() {
            self.sweep();

            if self.last_report.elapsed() >= self.config.report_interval {
                self.report();
                self.last_report = Instant::now();
            }
        }

        let total = self.stats.total();
        tracing::info!(
            rx = total.rx_packets,
            tx = total.tx_packets,
            tx_dropped = total.tx_dropped,
            active_flows = self.count_active_flows(),
            "Software loop stopped"
        );
        total
    }

    /// Run at most `sweeps` passes, stopping early if the flag clears
    pub fn run_for(&mut self, sweeps: usize) -> CycleReport {
        let mut total = CycleReport::default();
        for _ in 0..sweeps {
            if !self.running.is_running() {
                break;
            }
            let report = self.sweep();
            total.received += report.received;
            total.transmitted += report.transmitted;
            total.counted += report.counted;
        }
        total
    }

    /// Log the current flow picture
    pub fn report(&self) {
        let active = self.count_active_flows();
        metrics::gauge!("flowmeta_active_flows").set(active as f64);

        let total = self.stats.total();
        tracing::info!(
            active_flows = active,
            rx = total.rx_packets,
            tx = total.tx_packets,
            tx_dropped = total.tx_dropped,
            not_ipv4 = total.not_ipv4,
            "current num flows {}",
            active
        );

        for (bucket, count) in self.table.busiest(self.config.report_top) {
            tracing::debug!(bucket, count, "busy bucket");
        }
    }

    /// Per-port stats snapshot, `None` for a port the engine does not poll
    pub fn port_stats(&self, port: PortId) -> Option<PortStatsSnapshot> {
        self.stats.port(port).map(PortStats::snapshot)
    }
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `nb_ports` was zero
    #[error("engine needs at least one port")]
    NoPorts,

    /// More ports configured than the I/O backend provides
    #[error("configured {configured} ports but I/O backend has {available}")]
    PortMismatch {
        /// Ports asked for
        configured: u16,
        /// Ports the backend has
        available: u16,
    },

    /// Any other invalid setting
    #[error("configuration error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::RingIo;

    fn ipv4(src: u32, dst: u32) -> Packet {
        let mut data = vec![0u8; 42];
        data[12] = 0x08; data[13] = 0x00;
        data[14] = 0x45;
        data[26..30].copy_from_slice(&src.to_ne_bytes());
        data[30..34].copy_from_slice(&dst.to_ne_bytes());
        Packet::new(data)
    }

    #[test]
    fn test_engine_config_errors() {
        let (io, _wires) = RingIo::new(1, 1, 8);
        let config = EngineConfig { nb_ports: 2, ..Default::default() };
        assert!(matches!(
            Engine::new(config, io),
            Err(EngineError::PortMismatch { configured: 2, available: 1 })
        ));

        let (io, _wires) = RingIo::new(1, 1, 8);
        let config = EngineConfig { nb_ports: 0, ..Default::default() };
        assert!(matches!(Engine::new(config, io), Err(EngineError::NoPorts)));
    }

    #[test]
    fn test_sweep_all_ports() {
        let (io, wires) = RingIo::new(2, 1, 64);
        let mut engine = Engine::new(EngineConfig::default(), io).unwrap();

        wires[0].inject(0, ipv4(2, 3));
        wires[1].inject(0, ipv4(1000, 1005));
        wires[1].inject(0, ipv4(3, 4));

        let report = engine.sweep();
        assert_eq!(report.received, 3);
        assert_eq!(engine.table().count(5), 2);
        assert_eq!(engine.table().count(7), 1);
        assert_eq!(engine.count_active_flows(), 2);
        assert_eq!(engine.port_stats(1).unwrap().rx_packets, 2);
        assert_eq!(engine.port_stats(2), None);

        assert_eq!(wires[0].drain(0).len(), 1);
        assert_eq!(wires[1].drain(0).len(), 2);
    }

    #[test]
    fn test_reset_counts() {
        let (io, wires) = RingIo::new(1, 1, 8);
        let config = EngineConfig { nb_ports: 1, ..Default::default() };
        let mut engine = Engine::new(config, io).unwrap();

        wires[0].inject(0, ipv4(9, 9));
        engine.run_for(1);
        assert_eq!(engine.count_active_flows(), 1);

        engine.reset_counts();
        assert_eq!(engine.count_active_flows(), 0);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let (io, wires) = RingIo::new(2, 1, 64);
        let mut engine = Engine::new(EngineConfig::default(), io).unwrap();
        let handle = engine.shutdown_handle();
        wires[0].inject(0, ipv4(1, 1));

        let worker = std::thread::spawn(move || {
            let total = engine.run();
            (total, engine.count_active_flows())
        });

        std::thread::sleep(Duration::from_millis(20));
        handle.shutdown();
        assert!(handle.is_shutdown());

        let (total, active) = worker.join().unwrap();
        assert_eq!(total.rx_packets, 1);
        assert_eq!(active, 1);
    }

    #[test]
    fn test_run_for_honors_flag() {
        let (io, wires) = RingIo::new(1, 1, 8);
        let config = EngineConfig { nb_ports: 1, ..Default::default() };
        let mut engine = Engine::new(config, io).unwrap();
        wires[0].inject(0, ipv4(1, 2));

        engine.shutdown_handle().shutdown();
        assert!(!engine.is_running());
        assert_eq!(engine.run_for(10), CycleReport::default());
    }

    #[test]
    fn test_report_sets_active_flows_gauge() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let (io, wires) = RingIo::new(1, 1, 8);
        let config = EngineConfig { nb_ports: 1, ..Default::default() };
        let mut engine = Engine::new(config, io).unwrap();
        wires[0].inject(0, ipv4(1, 2));
        wires[0].inject(0, ipv4(5, 5));

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            engine.run_for(1);
            engine.report();
        });

        let gauge = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "flowmeta_active_flows")
            .map(|(_, _, _, value)| value);
        assert!(matches!(gauge, Some(DebugValue::Gauge(v)) if v.into_inner() == 2.0));
    }
}
