//! Traffic Wire
//!
//! Stands in for the NIC on the far side of the ring I/O: synthesizes frames,
//! runs them through the offload rules, and feeds hits into the receive
//! rings. Whatever the software loop transmits is drained and counted.

use std::thread::JoinHandle;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use flowmeta_dataplane::{HeaderView, Packet, RunningFlag, WireEnd, ETHERTYPE_IPV4};
use flowmeta_offload::rss_meta::{EXAMPLE_DST_PORT, EXAMPLE_SRC_PORT};
use flowmeta_offload::{FlowOffload, SoftwareOffload, Steering};

use crate::config::{TrafficConfig, MAX_TRAFFIC_FLOWS};

const ETHERTYPE_ARP: u16 = 0x0806;
const MIN_FRAME_LEN: usize = 60;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// Frame synthesizer
pub struct FrameGen {
    rng: StdRng,
    flows: u32,
    match_ratio: f64,
}

impl FrameGen {
    pub fn new(config: &TrafficConfig, rng: StdRng) -> Self {
        Self {
            rng,
            flows: config.flows.clamp(1, MAX_TRAFFIC_FLOWS),
            match_ratio: config.match_ratio.clamp(0.0, 1.0),
        }
    }

    /// Next frame of the mix
    pub fn next_frame(&mut self) -> Vec<u8> {
        let flow = self.rng.gen_range(0..self.flows);
        let (src, dst) = flow_addrs(flow);

        if self.rng.gen_bool(self.match_ratio) {
            return ipv4_frame(IPPROTO_UDP, src, dst, EXAMPLE_SRC_PORT, EXAMPLE_DST_PORT);
        }

        match self.rng.gen_range(0..3) {
            0 => {
                let sport = self.rng.gen_range(1024..=u16::MAX);
                // Anything but the tagged destination
                let dport = loop {
                    let port = self.rng.gen::<u16>();
                    if port != EXAMPLE_DST_PORT {
                        break port;
                    }
                };
                ipv4_frame(IPPROTO_UDP, src, dst, sport, dport)
            }
            1 => ipv4_frame(IPPROTO_TCP, src, dst, EXAMPLE_SRC_PORT, EXAMPLE_DST_PORT),
            _ => arp_frame(src, dst),
        }
    }
}

/// Address pair for flow `n`: 10.0.x.y → 10.1.0.1
fn flow_addrs(n: u32) -> ([u8; 4], [u8; 4]) {
    let host = n + 1;
    ([10, 0, (host >> 8) as u8, host as u8], [10, 1, 0, 1])
}

fn eth_header(frame: &mut [u8], ethertype: u16) {
    frame[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x02]);
    frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
    frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
}

fn ipv4_frame(protocol: u8, src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
    let mut frame = vec![0u8; MIN_FRAME_LEN];
    eth_header(&mut frame, ETHERTYPE_IPV4);

    let ip = &mut frame[14..34];
    ip[0] = 0x45;
    let total_len = (MIN_FRAME_LEN - 14) as u16;
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[8] = 64;
    ip[9] = protocol;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);

    frame[34..36].copy_from_slice(&sport.to_be_bytes());
    frame[36..38].copy_from_slice(&dport.to_be_bytes());
    frame
}

fn arp_frame(sender: [u8; 4], target: [u8; 4]) -> Vec<u8> {
    let mut frame = vec![0u8; MIN_FRAME_LEN];
    eth_header(&mut frame, ETHERTYPE_ARP);

    let arp = &mut frame[14..42];
    arp[0..2].copy_from_slice(&1u16.to_be_bytes());
    arp[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    arp[4] = 6;
    arp[5] = 4;
    arp[6..8].copy_from_slice(&1u16.to_be_bytes());
    arp[14..18].copy_from_slice(&sender);
    arp[24..28].copy_from_slice(&target);
    frame
}

/// Frame accounting for one wire run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireReport {
    /// Frames synthesized
    pub offered: u64,
    /// Frames the rules delivered into a receive ring
    pub delivered: u64,
    /// Frames the rules dropped (miss or stopped port)
    pub filtered: u64,
    /// Hits lost to a full receive ring
    pub rx_full: u64,
    /// Frames the software loop sent back
    pub echoed: u64,
}

/// Traffic wire
pub struct TrafficWire {
    config: TrafficConfig,
    offload: SoftwareOffload,
    wires: Vec<WireEnd>,
    gen: FrameGen,
    report: WireReport,
}

impl TrafficWire {
    pub fn new(config: TrafficConfig, offload: SoftwareOffload, wires: Vec<WireEnd>) -> Self {
        Self::with_rng(config, offload, wires, StdRng::from_entropy())
    }

    /// Deterministic wire for tests
    pub fn with_rng(
        config: TrafficConfig,
        offload: SoftwareOffload,
        wires: Vec<WireEnd>,
        rng: StdRng,
    ) -> Self {
        let gen = FrameGen::new(&config, rng);
        Self {
            config,
            offload,
            wires,
            gen,
            report: WireReport::default(),
        }
    }

    /// Offer one tick of frames on every port, then drain transmit rings
    pub fn tick(&mut self) {
        if self.config.enabled {
            for idx in 0..self.wires.len() {
                for _ in 0..self.config.frames_per_tick {
                    let frame = self.gen.next_frame();
                    self.offer(idx, frame);
                }
            }
        }

        for wire in &self.wires {
            self.report.echoed += wire.drain_all().len() as u64;
        }
    }

    fn offer(&mut self, idx: usize, frame: Vec<u8>) {
        self.report.offered += 1;

        let port = self.wires[idx].port();
        let steering = match HeaderView::parse(&frame) {
            Ok(hdr) => self.offload.steer(port, &hdr),
            Err(_) => Steering::Drop,
        };

        let (target, queue, pkt_meta) = match steering {
            Steering::Queue { queue, pkt_meta } => (idx, queue, pkt_meta),
            Steering::Port(out) => match self.wires.iter().position(|w| w.port() == out) {
                Some(target) => (target, 0, 0),
                None => {
                    self.report.filtered += 1;
                    return;
                }
            },
            Steering::Drop => {
                self.report.filtered += 1;
                return;
            }
        };

        if self.wires[target].inject(queue, Packet::with_meta(frame, pkt_meta)) {
            self.report.delivered += 1;
        } else {
            self.report.rx_full += 1;
        }
    }

    pub fn report(&self) -> WireReport {
        self.report
    }

    /// Tick until `running` clears, then tear the offload down
    pub fn run(mut self, running: RunningFlag) -> WireReport {
        let tick = Duration::from_millis(self.config.tick_ms);
        tracing::info!(
            ports = self.wires.len(),
            frames_per_tick = self.config.frames_per_tick,
            "Traffic wire starting"
        );

        while running.is_running() {
            self.tick();
            if !tick.is_zero() {
                std::thread::sleep(tick);
            }
        }

        if let Err(e) = self.offload.stop_ports() {
            tracing::warn!("Failed to stop ports: {e}");
        }
        self.offload.destroy();

        tracing::info!(
            offered = self.report.offered,
            delivered = self.report.delivered,
            filtered = self.report.filtered,
            rx_full = self.report.rx_full,
            echoed = self.report.echoed,
            "Traffic wire stopped"
        );
        self.report()
    }

    /// Run on a dedicated thread
    pub fn spawn(self, running: RunningFlag) -> std::io::Result<JoinHandle<WireReport>> {
        std::thread::Builder::new()
            .name("traffic-wire".into())
            .spawn(move || self.run(running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmeta_dataplane::{Engine, EngineConfig, RingIo};
    use flowmeta_offload::install_rss_meta;

    fn config(match_ratio: f64) -> TrafficConfig {
        TrafficConfig {
            enabled: true,
            frames_per_tick: 16,
            tick_ms: 0,
            flows: 4,
            match_ratio,
        }
    }

    #[test]
    fn test_frame_mix_parses() {
        let mut gen = FrameGen::new(&config(0.5), StdRng::seed_from_u64(7));
        for _ in 0..200 {
            let frame = gen.next_frame();
            assert_eq!(frame.len(), MIN_FRAME_LEN);
            let hdr = HeaderView::parse(&frame).unwrap();
            if let Some(ip) = hdr.ipv4 {
                assert!(ip.is_udp() || ip.is_tcp());
            } else {
                assert_eq!(hdr.ethertype, ETHERTYPE_ARP);
            }
        }
    }

    #[test]
    fn test_all_matching_frames_are_tagged_udp() {
        let mut gen = FrameGen::new(&config(1.0), StdRng::seed_from_u64(1));
        for _ in 0..50 {
            let hdr = HeaderView::parse(&gen.next_frame()).unwrap();
            let ip = hdr.ipv4.unwrap();
            assert!(ip.is_udp());
            assert_eq!(ip.src_port, Some(EXAMPLE_SRC_PORT));
            assert_eq!(ip.dst_port, Some(EXAMPLE_DST_PORT));
        }
    }

    #[test]
    fn test_flow_addrs_distinct() {
        let a = flow_addrs(0);
        let b = flow_addrs(255);
        assert_ne!(a.0, b.0);
        assert_eq!(a.1, b.1);

        // Highest flow index still gets its own source address
        let last = flow_addrs(MAX_TRAFFIC_FLOWS - 1);
        assert_eq!(last.0, [10, 0, 0xFF, 0xFF]);
        assert_ne!(last.0, flow_addrs(MAX_TRAFFIC_FLOWS - 1 - 0x100).0);
    }

    #[test]
    fn test_flows_clamped() {
        let mut cfg = config(1.0);
        cfg.flows = u32::MAX;
        let mut gen = FrameGen::new(&cfg, StdRng::seed_from_u64(4));
        assert_eq!(gen.flows, MAX_TRAFFIC_FLOWS);
        for _ in 0..100 {
            let ip = HeaderView::parse(&gen.next_frame()).unwrap().ipv4.unwrap();
            assert_eq!(ip.src_ip().octets()[..2], [10, 0]);
        }
    }

    #[test]
    fn test_misses_are_filtered() {
        let mut offload = SoftwareOffload::new(1);
        install_rss_meta(&mut offload, 1).unwrap();
        let (_io, wires) = RingIo::new(1, 1, 1024);

        let mut wire = TrafficWire::with_rng(config(0.0), offload, wires, StdRng::seed_from_u64(3));
        wire.tick();

        let report = wire.report();
        assert_eq!(report.offered, 16);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.filtered, 16);
    }

    #[test]
    fn test_wire_feeds_engine() {
        let mut offload = SoftwareOffload::new(1);
        install_rss_meta(&mut offload, 2).unwrap();
        let (io, wires) = RingIo::new(2, 1, 1024);
        let mut engine = Engine::new(EngineConfig::default(), io).unwrap();

        let mut wire = TrafficWire::with_rng(config(1.0), offload, wires, StdRng::seed_from_u64(9));
        wire.tick();
        assert_eq!(wire.report().delivered, 32);

        let cycle = engine.run_for(1);
        assert_eq!(cycle.received, 32);
        assert_eq!(cycle.counted, 32);
        assert!(engine.count_active_flows() <= 4);
        assert!(engine.count_active_flows() >= 1);

        wire.tick();
        assert_eq!(wire.report().echoed, 32);
    }

    #[test]
    fn test_full_rx_ring_counted() {
        let mut offload = SoftwareOffload::new(1);
        install_rss_meta(&mut offload, 1).unwrap();
        let (_io, wires) = RingIo::new(1, 1, 4);

        let mut wire = TrafficWire::with_rng(config(1.0), offload, wires, StdRng::seed_from_u64(5));
        wire.tick();

        let report = wire.report();
        assert_eq!(report.delivered, 4);
        assert_eq!(report.rx_full, 12);
    }

    #[test]
    fn test_run_stops_on_flag() {
        let mut offload = SoftwareOffload::new(1);
        install_rss_meta(&mut offload, 1).unwrap();
        let (_io, wires) = RingIo::new(1, 1, 64);

        let running = RunningFlag::new();
        running.stop();
        let wire = TrafficWire::with_rng(config(1.0), offload, wires, StdRng::seed_from_u64(2));
        let report = wire.spawn(running).unwrap().join().unwrap();
        assert_eq!(report.offered, 0);
    }
}
