//! In-memory offload backend
//!
//! Holds pipes and entries the way a NIC rule table would and evaluates them
//! in software, so the steering decision a NIC would make for a frame can be
//! reproduced without one.

use std::time::Duration;

use flowmeta_dataplane::{HeaderView, PortId, QueueId};

use crate::pipe::{
    EntriesStatus, EntryActions, EntryMatch, FieldMatch, Forward, PipeConfig, PipeType, RssFlags,
};
use crate::{EntryId, FlowOffload, OffloadError, PipeId, Result};

/// Where a frame goes after the rule tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steering {
    /// Delivered to a host receive queue with a metadata tag
    Queue { queue: QueueId, pkt_meta: u32 },
    /// Sent out another port
    Port(PortId),
    /// Discarded
    Drop,
}

#[derive(Debug, Clone)]
struct SwEntry {
    id: EntryId,
    matcher: EntryMatch,
    actions: EntryActions,
}

#[derive(Debug)]
struct SwPipe {
    id: PipeId,
    cfg: PipeConfig,
    entries: Vec<SwEntry>,
    pending: Vec<SwEntry>,
}

#[derive(Debug, Default)]
struct SwPort {
    pipes: Vec<SwPipe>,
    next_entry: u32,
}

/// Software flow-rule tables
#[derive(Debug)]
pub struct SoftwareOffload {
    nb_queues: u16,
    ports: Vec<SwPort>,
    started: bool,
}

impl SoftwareOffload {
    /// Backend for ports with `nb_queues` host receive queues each
    pub fn new(nb_queues: u16) -> Self {
        Self {
            nb_queues,
            ports: Vec::new(),
            started: false,
        }
    }

    /// Number of ports brought up
    pub fn nb_ports(&self) -> u16 {
        self.ports.len() as u16
    }

    /// Number of host receive queues per port
    pub fn nb_queues(&self) -> u16 {
        self.nb_queues
    }

    /// Committed entries across every pipe on `port`
    pub fn entry_count(&self, port: PortId) -> usize {
        self.ports
            .get(port as usize)
            .map(|p| p.pipes.iter().map(|pipe| pipe.entries.len()).sum())
            .unwrap_or(0)
    }

    /// Pipe configuration by handle
    pub fn pipe_config(&self, pipe: PipeId) -> Option<&PipeConfig> {
        self.pipe(pipe).map(|p| &p.cfg)
    }

    fn port_mut(&mut self, port: PortId) -> Result<&mut SwPort> {
        if !self.started {
            return Err(OffloadError::PortsNotInitialized);
        }
        self.ports
            .get_mut(port as usize)
            .ok_or(OffloadError::UnknownPort(port))
    }

    fn pipe(&self, pipe: PipeId) -> Option<&SwPipe> {
        self.ports
            .get(pipe.port as usize)?
            .pipes
            .get(pipe.index as usize)
    }

    /// Evaluate the root pipe of `port` against a frame
    pub fn steer(&self, port: PortId, hdr: &HeaderView) -> Steering {
        if !self.started {
            return Steering::Drop;
        }
        let Some(sw_port) = self.ports.get(port as usize) else {
            return Steering::Drop;
        };
        // Ports without a root pipe hand everything to queue 0 untagged
        let Some(pipe) = sw_port.pipes.iter().find(|p| p.cfg.is_root) else {
            return Steering::Queue { queue: 0, pkt_meta: 0 };
        };

        match pipe.entries.iter().find(|e| entry_matches(&pipe.cfg, e, hdr)) {
            Some(entry) => {
                let meta = entry.actions.pkt_meta & pipe.cfg.actions.pkt_meta_mask;
                forward(&pipe.cfg.fwd, hdr, meta)
            }
            None => forward(&pipe.cfg.fwd_miss, hdr, 0),
        }
    }
}

fn entry_matches(cfg: &PipeConfig, entry: &SwEntry, hdr: &HeaderView) -> bool {
    let m = &cfg.matcher;
    let ip = hdr.ipv4.as_ref();

    if let Some(l4) = m.outer_l4_type {
        match ip {
            Some(ip) if l4.matches(ip) => {}
            _ => return false,
        }
    }

    m.src_port.admits(ip.and_then(|ip| ip.src_port), entry.matcher.src_port)
        && m.dst_port.admits(ip.and_then(|ip| ip.dst_port), entry.matcher.dst_port)
}

fn forward(fwd: &Forward, hdr: &HeaderView, pkt_meta: u32) -> Steering {
    match fwd {
        Forward::Rss { queues, flags } if !queues.is_empty() => {
            let idx = (rss_hash(hdr, *flags) as usize) % queues.len();
            Steering::Queue { queue: queues[idx], pkt_meta }
        }
        Forward::Rss { .. } | Forward::Drop => Steering::Drop,
        Forward::Port(port) => Steering::Port(*port),
    }
}

/// FNV-1a over the header fields selected by `flags`
fn rss_hash(hdr: &HeaderView, flags: RssFlags) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut h = FNV_OFFSET;
    let mut mix = |bytes: &[u8]| {
        for &b in bytes {
            h ^= b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
    };

    if let Some(ip) = &hdr.ipv4 {
        if flags.contains(RssFlags::IPV4) {
            mix(&ip.src_addr.to_ne_bytes());
            mix(&ip.dst_addr.to_ne_bytes());
        }
        let l4 = (flags.contains(RssFlags::UDP) && ip.is_udp())
            || (flags.contains(RssFlags::TCP) && ip.is_tcp());
        if l4 {
            mix(&ip.src_port.unwrap_or(0).to_be_bytes());
            mix(&ip.dst_port.unwrap_or(0).to_be_bytes());
        }
    }

    h
}

fn check_field(name: &str, field: &FieldMatch<u16>, value: Option<u16>) -> Result<()> {
    match (field.is_changeable(), value) {
        (true, None) => Err(OffloadError::EntryRejected(format!(
            "{name} is changeable but the entry gives no value"
        ))),
        (false, Some(_)) => Err(OffloadError::EntryRejected(format!(
            "{name} is not changeable in this pipe"
        ))),
        _ => Ok(()),
    }
}

impl FlowOffload for SoftwareOffload {
    fn init_ports(&mut self, nb_ports: u16) -> Result<()> {
        self.ports = (0..nb_ports).map(|_| SwPort::default()).collect();
        self.started = true;
        tracing::debug!(nb_ports, nb_queues = self.nb_queues, "Software offload ports up");
        Ok(())
    }

    fn create_pipe(&mut self, port: PortId, cfg: PipeConfig) -> Result<PipeId> {
        cfg.validate(self.nb_queues)?;
        if cfg.pipe_type != PipeType::Basic {
            return Err(OffloadError::InvalidPipe(format!(
                "{:?} pipes are not supported in software",
                cfg.pipe_type
            )));
        }

        let sw_port = self.port_mut(port)?;
        let id = PipeId {
            port,
            index: sw_port.pipes.len() as u32,
        };
        tracing::debug!(port, pipe = %cfg.name, "Pipe created");
        sw_port.pipes.push(SwPipe {
            id,
            cfg,
            entries: Vec::new(),
            pending: Vec::new(),
        });
        Ok(id)
    }

    fn add_entry(&mut self, pipe: PipeId, matcher: EntryMatch, actions: EntryActions) -> Result<EntryId> {
        let sw_port = self.port_mut(pipe.port)?;
        let entry_index = sw_port.next_entry;
        let sw_pipe = sw_port
            .pipes
            .get_mut(pipe.index as usize)
            .ok_or(OffloadError::UnknownPipe(pipe))?;

        let cfg = &sw_pipe.cfg;
        check_field("src_port", &cfg.matcher.src_port, matcher.src_port)?;
        check_field("dst_port", &cfg.matcher.dst_port, matcher.dst_port)?;
        if actions.pkt_meta & !cfg.actions.pkt_meta_mask != 0 {
            return Err(OffloadError::EntryRejected(format!(
                "pkt_meta {:#x} outside mask {:#x}",
                actions.pkt_meta, cfg.actions.pkt_meta_mask
            )));
        }
        if actions.action_idx != 0 {
            return Err(OffloadError::EntryRejected(format!(
                "action index {} out of range",
                actions.action_idx
            )));
        }

        let id = EntryId {
            pipe: sw_pipe.id,
            index: entry_index,
        };
        sw_pipe.pending.push(SwEntry { id, matcher, actions });
        sw_port.next_entry += 1;
        Ok(id)
    }

    fn process_entries(
        &mut self,
        port: PortId,
        timeout: Duration,
        expected: u32,
    ) -> Result<EntriesStatus> {
        let sw_port = self.port_mut(port)?;
        let mut status = EntriesStatus::default();

        for pipe in &mut sw_port.pipes {
            for entry in std::mem::take(&mut pipe.pending) {
                if pipe.entries.iter().any(|e| e.matcher == entry.matcher) {
                    tracing::warn!(port, pipe = %pipe.cfg.name, entry = entry.id.index, "Duplicate entry rejected");
                    status.failure = true;
                    continue;
                }
                pipe.entries.push(entry);
                status.nb_processed += 1;
            }
        }

        tracing::debug!(
            port,
            processed = status.nb_processed,
            expected,
            timeout_us = timeout.as_micros() as u64,
            "Entries processed"
        );
        Ok(status)
    }

    fn stop_ports(&mut self) -> Result<()> {
        self.started = false;
        tracing::debug!("Software offload ports stopped");
        Ok(())
    }

    fn destroy(&mut self) {
        self.ports.clear();
        self.started = false;
    }
}
