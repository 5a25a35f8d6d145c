//! Sync engine: wire protocol, transport, and the cycle state machine.

mod manager;
mod protocol;
mod trace;
mod transport;

pub use manager::{ListenerId, SyncManager, SyncMode, SyncOutcome, BACKOFF_LADDER};
pub use protocol::{
    ChangeOp, MutationEnvelope, MutationResult, MutationStatus, PullRequest, PullResponse,
    PushRequest, PushResponse, RemoteChange,
};
pub use trace::{SyncTrace, TraceEntry};
pub use transport::{HttpSyncTransport, SyncTransport};

use crate::models::SyncConflict;

/// Externally visible state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
    Offline,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event fanned out to subscribed listeners.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Engine state changed
    Status(SyncStatus),
    /// A cycle finished with these apply counts
    Progress { pushed: u64, pulled: u64 },
    /// A conflict was recorded during push or pull
    Conflict(SyncConflict),
    /// A cycle failed with this message
    Error(String),
}

/// Capability boundary for the "are we online" question.
///
/// The engine never probes the network itself; callers decide what offline
/// means for their platform.
pub trait ConnectivityProbe {
    fn is_online(&self) -> impl std::future::Future<Output = bool> + Send;
}

/// Default probe that always reports online, leaving offline detection to
/// transport errors and the backoff ladder.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}
