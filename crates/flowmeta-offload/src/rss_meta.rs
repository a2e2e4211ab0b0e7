//! rss-meta rule set
//!
//! One root pipe per port: UDP with per-entry source and destination ports,
//! a fully masked metadata write, RSS to queue 0 over IPv4+UDP, and drop on
//! miss. A single example entry tags 1025 → 12 traffic with metadata 10.

use flowmeta_dataplane::PortId;

use crate::pipe::{
    EntryActions, EntryMatch, FieldMatch, Forward, L4Type, PipeActions, PipeConfig, PipeMatch,
    RssFlags,
};
use crate::{FlowOffload, OffloadError, PipeId, Result, DEFAULT_TIMEOUT};

/// Pipe name used on every port
pub const RSS_META_PIPE: &str = "RSS_META_PIPE";

/// Example entry source port
pub const EXAMPLE_SRC_PORT: u16 = 1025;

/// Example entry destination port
pub const EXAMPLE_DST_PORT: u16 = 12;

/// Metadata written by the example entry
pub const EXAMPLE_PKT_META: u32 = 10;

/// The rss-meta pipe configuration
pub fn rss_meta_pipe_config() -> PipeConfig {
    PipeConfig::new(RSS_META_PIPE)
        .root(true)
        .with_match(PipeMatch {
            outer_l4_type: Some(L4Type::Udp),
            src_port: FieldMatch::Changeable,
            dst_port: FieldMatch::Changeable,
        })
        .with_actions(PipeActions {
            pkt_meta_mask: u32::MAX,
        })
        .with_fwd(Forward::Rss {
            queues: vec![0],
            flags: RssFlags::IPV4 | RssFlags::UDP,
        })
        .with_fwd_miss(Forward::Drop)
}

/// The example entry: UDP 1025 → 12, pkt_meta 10
pub fn rss_meta_entry() -> (EntryMatch, EntryActions) {
    (
        EntryMatch {
            src_port: Some(EXAMPLE_SRC_PORT),
            dst_port: Some(EXAMPLE_DST_PORT),
        },
        EntryActions {
            pkt_meta: EXAMPLE_PKT_META,
            action_idx: 0,
        },
    )
}

/// Bring up `nb_ports` ports and install the rss-meta pipe and entry on each.
///
/// On any failure the ports are stopped, the backend destroyed, and the
/// error returned.
pub fn install_rss_meta<O>(offload: &mut O, nb_ports: u16) -> Result<Vec<PipeId>>
where
    O: FlowOffload + ?Sized,
{
    offload.init_ports(nb_ports).map_err(|e| {
        tracing::error!("Failed to init ports: {e}");
        offload.destroy();
        e
    })?;

    let mut pipes = Vec::with_capacity(nb_ports as usize);
    for port in 0..nb_ports {
        match install_on_port(offload, port) {
            Ok(pipe) => pipes.push(pipe),
            Err(e) => {
                tracing::error!(port, "Failed to install rss-meta rules: {e}");
                if let Err(stop_err) = offload.stop_ports() {
                    tracing::warn!("Failed to stop ports: {stop_err}");
                }
                offload.destroy();
                return Err(e);
            }
        }
    }

    tracing::info!(ports = nb_ports, "rss-meta rules installed");
    Ok(pipes)
}

fn install_on_port<O>(offload: &mut O, port: PortId) -> Result<PipeId>
where
    O: FlowOffload + ?Sized,
{
    const NUM_OF_ENTRIES: u32 = 1;

    let pipe = offload.create_pipe(port, rss_meta_pipe_config())?;

    let (matcher, actions) = rss_meta_entry();
    offload.add_entry(pipe, matcher, actions)?;

    let status = offload.process_entries(port, DEFAULT_TIMEOUT, NUM_OF_ENTRIES)?;
    if status.nb_processed != NUM_OF_ENTRIES || status.failure {
        return Err(OffloadError::BadState {
            processed: status.nb_processed,
            expected: NUM_OF_ENTRIES,
        });
    }

    tracing::debug!(port, pipe = pipe.index, "rss-meta entry active");
    Ok(pipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::EntriesStatus;
    use crate::software::{SoftwareOffload, Steering};
    use crate::EntryId;
    use flowmeta_dataplane::HeaderView;
    use std::time::Duration;

    fn udp_frame(sport: u16, dport: u16) -> Vec<u8> {
        let mut data = vec![0u8; 42];
        data[12] = 0x08; data[13] = 0x00;
        data[14] = 0x45;
        data[23] = 17;
        data[26..30].copy_from_slice(&[16, 0, 0, 4]);
        data[30..34].copy_from_slice(&[48, 0, 0, 4]);
        data[34..36].copy_from_slice(&sport.to_be_bytes());
        data[36..38].copy_from_slice(&dport.to_be_bytes());
        data
    }

    #[test]
    fn test_pipe_config_shape() {
        let cfg = rss_meta_pipe_config();
        assert_eq!(cfg.name, "RSS_META_PIPE");
        assert!(cfg.is_root);
        assert_eq!(cfg.matcher.outer_l4_type, Some(L4Type::Udp));
        assert!(cfg.matcher.src_port.is_changeable());
        assert_eq!(cfg.actions.pkt_meta_mask, u32::MAX);
        assert_eq!(cfg.fwd_miss, Forward::Drop);
        assert_eq!(cfg.validate(1), Ok(()));
    }

    #[test]
    fn test_install_two_ports() {
        let mut offload = SoftwareOffload::new(1);
        let pipes = install_rss_meta(&mut offload, 2).unwrap();

        assert_eq!(pipes.len(), 2);
        assert_eq!(offload.entry_count(0), 1);
        assert_eq!(offload.entry_count(1), 1);
        assert_eq!(
            offload.pipe_config(pipes[1]).map(|cfg| cfg.name.as_str()),
            Some(RSS_META_PIPE)
        );
        assert!(offload.pipe_config(PipeId { port: 2, index: 0 }).is_none());

        let hit = HeaderView::parse(&udp_frame(1025, 12)).unwrap();
        assert_eq!(offload.steer(1, &hit), Steering::Queue { queue: 0, pkt_meta: 10 });

        let miss = HeaderView::parse(&udp_frame(1026, 12)).unwrap();
        assert_eq!(offload.steer(0, &miss), Steering::Drop);
    }

    /// Delegates to the software backend but fails on a chosen port
    struct FailingOffload {
        inner: SoftwareOffload,
        fail_port: PortId,
        stopped: bool,
        destroyed: bool,
    }

    impl FlowOffload for FailingOffload {
        fn init_ports(&mut self, nb_ports: u16) -> Result<()> {
            self.inner.init_ports(nb_ports)
        }

        fn create_pipe(&mut self, port: PortId, cfg: PipeConfig) -> Result<PipeId> {
            self.inner.create_pipe(port, cfg)
        }

        fn add_entry(&mut self, pipe: PipeId, m: EntryMatch, a: EntryActions) -> Result<EntryId> {
            self.inner.add_entry(pipe, m, a)
        }

        fn process_entries(&mut self, port: PortId, timeout: Duration, expected: u32) -> Result<EntriesStatus> {
            let mut status = self.inner.process_entries(port, timeout, expected)?;
            if port == self.fail_port {
                status.failure = true;
            }
            Ok(status)
        }

        fn stop_ports(&mut self) -> Result<()> {
            self.stopped = true;
            self.inner.stop_ports()
        }

        fn destroy(&mut self) {
            self.destroyed = true;
            self.inner.destroy();
        }
    }

    #[test]
    fn test_entry_failure_cleans_up() {
        let mut offload = FailingOffload {
            inner: SoftwareOffload::new(1),
            fail_port: 1,
            stopped: false,
            destroyed: false,
        };

        let err = install_rss_meta(&mut offload, 2).unwrap_err();
        assert_eq!(err, OffloadError::BadState { processed: 1, expected: 1 });
        assert!(offload.stopped);
        assert!(offload.destroyed);
        assert_eq!(offload.inner.nb_ports(), 0);
    }

    proptest::proptest! {
        #[test]
        fn only_example_ports_hit(sport in proptest::prelude::any::<u16>(), dport in proptest::prelude::any::<u16>()) {
            let mut offload = SoftwareOffload::new(1);
            install_rss_meta(&mut offload, 1).unwrap();

            let hdr = HeaderView::parse(&udp_frame(sport, dport)).unwrap();
            let expected = if (sport, dport) == (EXAMPLE_SRC_PORT, EXAMPLE_DST_PORT) {
                Steering::Queue { queue: 0, pkt_meta: EXAMPLE_PKT_META }
            } else {
                Steering::Drop
            };
            proptest::prop_assert_eq!(offload.steer(0, &hdr), expected);
        }
    }

    #[test]
    fn test_invalid_queue_count() {
        // No host queues at all: RSS to queue 0 is out of range
        let mut offload = SoftwareOffload::new(0);
        let err = install_rss_meta(&mut offload, 2).unwrap_err();
        assert_eq!(err, OffloadError::InvalidQueue { queue: 0, nb_queues: 0 });
    }
}
