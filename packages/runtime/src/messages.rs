//! Message types for actor communication.

use ractor::RpcReplyPort;

use crate::driver::Delivery;

/// Messages for the PoolActor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Queue a delivery for execution.
    Push { delivery: Box<Delivery> },

    /// Stop pulling new work. In-flight jobs keep running.
    Pause,

    /// Resume pulling work.
    Resume,

    /// An in-flight job finished.
    Finished,

    /// Get pool stats.
    GetStats { reply: RpcReplyPort<PoolStats> },
}

/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pending: usize,
    pub in_flight: usize,
    pub concurrency: u32,
    pub paused: bool,
}
