//! flowmeta offload rules
//!
//! Typed model of the NIC flow-programming boundary and the rss-meta rule set
//! installed on every port before the software loop starts.
//!
//! ## Features
//!
//! - **Pipe model**: match template, action template, forward and miss forward
//! - **FlowOffload trait**: the calls a flow SDK exposes (create pipe, add entry,
//!   process entries, stop ports)
//! - **SoftwareOffload**: an in-memory backend that validates and evaluates rules
//! - **install_rss_meta**: per-port UDP match / set meta / RSS to queue 0

pub mod pipe;
pub mod rss_meta;
pub mod software;

pub use pipe::{
    EntriesStatus, EntryActions, EntryMatch, FieldMatch, Forward, L4Type, PipeActions,
    PipeConfig, PipeMatch, PipeType, RssFlags,
};
pub use rss_meta::{install_rss_meta, rss_meta_entry, rss_meta_pipe_config, RSS_META_PIPE};
pub use software::{SoftwareOffload, Steering};

use std::time::Duration;

use flowmeta_dataplane::{PortId, QueueId};
use thiserror::Error;

/// Offload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffloadError {
    #[error("invalid pipe config: {0}")]
    InvalidPipe(String),

    #[error("RSS queue {queue} out of range ({nb_queues} queues)")]
    InvalidQueue { queue: QueueId, nb_queues: u16 },

    #[error("unknown port {0}")]
    UnknownPort(PortId),

    #[error("unknown pipe {0:?}")]
    UnknownPipe(PipeId),

    #[error("entry rejected: {0}")]
    EntryRejected(String),

    #[error("entries not fully processed: {processed}/{expected}")]
    BadState { processed: u32, expected: u32 },

    #[error("ports not initialized")]
    PortsNotInitialized,
}

pub type Result<T> = std::result::Result<T, OffloadError>;

/// Time allowed for entry processing
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// Handle to a created pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId {
    pub port: PortId,
    pub index: u32,
}

/// Handle to an added entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub pipe: PipeId,
    pub index: u32,
}

/// Flow-programming operations used to set up the rule tables
pub trait FlowOffload {
    /// Bring up `nb_ports` ports
    fn init_ports(&mut self, nb_ports: u16) -> Result<()>;

    /// Create a pipe on `port`
    fn create_pipe(&mut self, port: PortId, cfg: PipeConfig) -> Result<PipeId>;

    /// Queue an entry on `pipe`. It takes effect once processed.
    fn add_entry(&mut self, pipe: PipeId, matcher: EntryMatch, actions: EntryActions) -> Result<EntryId>;

    /// Commit pending entries on `port`, waiting up to `timeout` for `expected`
    /// of them. The returned status says how many were applied and whether
    /// any failed.
    fn process_entries(
        &mut self,
        port: PortId,
        timeout: Duration,
        expected: u32,
    ) -> Result<EntriesStatus>;

    /// Stop every port
    fn stop_ports(&mut self) -> Result<()>;

    /// Release all offload state
    fn destroy(&mut self);
}
