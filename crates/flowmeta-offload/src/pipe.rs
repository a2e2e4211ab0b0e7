//! Pipe, match and action model
//!
//! A pipe is a rule table on one port. Its match template says which header
//! fields take part in matching and which of those each entry fills in. Its
//! action template says which fields an entry may write. `fwd` applies to
//! hits and `fwd_miss` to everything else.

use std::ops::BitOr;

use flowmeta_dataplane::parse::Ipv4View;
use flowmeta_dataplane::{PortId, QueueId};

use crate::{OffloadError, Result};

/// Outer L4 protocol selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Type {
    Udp,
    Tcp,
}

impl L4Type {
    /// Whether the IPv4 header carries this L4 protocol
    pub fn matches(&self, ip: &Ipv4View) -> bool {
        match self {
            L4Type::Udp => ip.is_udp(),
            L4Type::Tcp => ip.is_tcp(),
        }
    }
}

/// How a header field takes part in a pipe's match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldMatch<T> {
    /// Not matched
    #[default]
    Ignore,
    /// Fully masked; every entry supplies its own value
    Changeable,
    /// Same value for every entry in the pipe
    Exact(T),
}

impl<T> FieldMatch<T> {
    pub fn is_changeable(&self) -> bool {
        matches!(self, FieldMatch::Changeable)
    }
}

impl<T: PartialEq + Copy> FieldMatch<T> {
    /// Check a packet field against this template and the entry's value
    pub fn admits(&self, packet: Option<T>, entry: Option<T>) -> bool {
        match self {
            FieldMatch::Ignore => true,
            FieldMatch::Exact(v) => packet == Some(*v),
            FieldMatch::Changeable => entry.is_some() && packet == entry,
        }
    }
}

/// Pipe match template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipeMatch {
    /// Outer L4 protocol, `None` for any
    pub outer_l4_type: Option<L4Type>,
    pub src_port: FieldMatch<u16>,
    pub dst_port: FieldMatch<u16>,
}

/// Pipe action template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeActions {
    /// Bits of the packet metadata entries may set; 0 disables the action
    pub pkt_meta_mask: u32,
}

/// RSS hash inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RssFlags(u32);

impl RssFlags {
    pub const IPV4: Self = Self(1);
    pub const IPV6: Self = Self(1 << 1);
    pub const UDP: Self = Self(1 << 2);
    pub const TCP: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for RssFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Where matched (or missed) packets go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forward {
    /// Spread across host receive queues
    Rss { queues: Vec<QueueId>, flags: RssFlags },
    /// Send out another port
    Port(PortId),
    /// Discard
    Drop,
}

/// Pipe kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipeType {
    /// Exact-match pipe built from match/action templates
    #[default]
    Basic,
    /// Priority-ordered control pipe
    Control,
}

/// Full pipe configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    pub name: String,
    pub pipe_type: PipeType,
    /// Root pipes see every packet entering the port
    pub is_root: bool,
    pub matcher: PipeMatch,
    pub actions: PipeActions,
    pub fwd: Forward,
    pub fwd_miss: Forward,
}

impl PipeConfig {
    /// Basic root pipe that drops everything until configured otherwise
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipe_type: PipeType::Basic,
            is_root: true,
            matcher: PipeMatch::default(),
            actions: PipeActions::default(),
            fwd: Forward::Drop,
            fwd_miss: Forward::Drop,
        }
    }

    pub fn with_match(mut self, matcher: PipeMatch) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_actions(mut self, actions: PipeActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_fwd(mut self, fwd: Forward) -> Self {
        self.fwd = fwd;
        self
    }

    pub fn with_fwd_miss(mut self, fwd_miss: Forward) -> Self {
        self.fwd_miss = fwd_miss;
        self
    }

    pub fn root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Check the config against a port with `nb_queues` receive queues
    pub fn validate(&self, nb_queues: u16) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OffloadError::InvalidPipe("pipe name is empty".into()));
        }

        if let Forward::Rss { queues, .. } = &self.fwd {
            if queues.is_empty() {
                return Err(OffloadError::InvalidPipe("RSS forward without queues".into()));
            }
            if let Some(&queue) = queues.iter().find(|&&q| q >= nb_queues) {
                return Err(OffloadError::InvalidQueue { queue, nb_queues });
            }
        }

        if matches!(self.fwd_miss, Forward::Rss { .. }) {
            return Err(OffloadError::InvalidPipe("miss forward cannot be RSS".into()));
        }

        Ok(())
    }
}

/// Per-entry values for a pipe's changeable match fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMatch {
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

/// Per-entry action values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryActions {
    /// Metadata to write on hit
    pub pkt_meta: u32,
    /// Which action template the entry uses
    pub action_idx: u16,
}

/// Outcome of processing queued entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntriesStatus {
    pub nb_processed: u32,
    pub failure: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss(queues: Vec<QueueId>) -> Forward {
        Forward::Rss {
            queues,
            flags: RssFlags::IPV4 | RssFlags::UDP,
        }
    }

    #[test]
    fn test_rss_flags() {
        let flags = RssFlags::IPV4 | RssFlags::UDP;
        assert!(flags.contains(RssFlags::IPV4));
        assert!(flags.contains(RssFlags::UDP));
        assert!(!flags.contains(RssFlags::TCP));
        assert_eq!(flags.bits(), 0b101);
    }

    #[test]
    fn test_field_match() {
        assert!(FieldMatch::<u16>::Ignore.admits(Some(5), None));
        assert!(FieldMatch::Exact(53u16).admits(Some(53), None));
        assert!(!FieldMatch::Exact(53u16).admits(None, None));
        assert!(FieldMatch::<u16>::Changeable.admits(Some(12), Some(12)));
        assert!(!FieldMatch::<u16>::Changeable.admits(Some(12), Some(13)));
        assert!(!FieldMatch::<u16>::Changeable.admits(None, None));
    }

    #[test]
    fn test_validate_ok() {
        let cfg = PipeConfig::new("p").with_fwd(rss(vec![0]));
        assert_eq!(cfg.validate(1), Ok(()));
    }

    #[test]
    fn test_validate_errors() {
        let cfg = PipeConfig::new(" ").with_fwd(rss(vec![0]));
        assert!(matches!(cfg.validate(1), Err(OffloadError::InvalidPipe(_))));

        let cfg = PipeConfig::new("p").with_fwd(rss(vec![]));
        assert!(matches!(cfg.validate(1), Err(OffloadError::InvalidPipe(_))));

        let cfg = PipeConfig::new("p").with_fwd(rss(vec![0, 4]));
        assert_eq!(
            cfg.validate(4),
            Err(OffloadError::InvalidQueue { queue: 4, nb_queues: 4 })
        );

        let cfg = PipeConfig::new("p").with_fwd_miss(rss(vec![0]));
        assert!(matches!(cfg.validate(1), Err(OffloadError::InvalidPipe(_))));
    }
}
