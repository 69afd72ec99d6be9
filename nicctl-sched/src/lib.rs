//! Tx scheduler management.
//!
//! The firmware arbitrates Tx bandwidth through a tree of scheduling elements: port root,
//! traffic classes, aggregators, VSIs, queue groups and queue leaves. [`Scheduler`] keeps
//! a host-side copy of that tree, keeps it in sync through control queue commands and
//! maps requested bandwidths onto shared rate limiter profiles.
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use nicctl_transport::{Clock, ControlQueue, CtlqError, DmaMemory, RegisterAccess};
use nicctl_wire::Descriptor;

mod aq;
mod binding;
mod replay;
mod rl;
mod scheduler;
mod stats;
mod tree;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use binding::{AggType, Owner};
pub use replay::BwTypeInfo;
pub use rl::{encode_burst_size, PsmClock, RlEncoding, RlProfile, DFLT_BURST_SIZE, MAX_BW, MIN_BW};
pub use scheduler::{SchedOptions, Scheduler};
pub use stats::SchedStats;
pub use tree::{LayerMap, NodeInfo};

pub use nicctl_wire::rl::RlType;

/// Bandwidth value that restores the default (unlimited) profile.
pub const DFLT_BW: u32 = u32::MAX;
/// Default CIR/EIR weight of new elements.
pub const DFLT_BW_WT: u16 = 4;
/// Id of the aggregator every VSI belongs to until moved.
pub const DFLT_AGG_ID: u32 = 0;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("Invalid parameter: {0}")]
    Param(&'static str),
    #[error("Configuration failed: {0}")]
    Cfg(&'static str),
    #[error("Parent fan-out limit reached")]
    MaxLimit,
    #[error("Destination parent has no room")]
    AqFull,
    #[error("Does not exist")]
    DoesNotExist,
    #[error("In use")]
    InUse,
    #[error("Scheduler tree deeper than the maximum layer count")]
    DepthExceeded,
    #[error("Scheduler not initialized")]
    NotReady,
    #[error("Transport error: {0}")]
    Transport(#[from] CtlqError),
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] nicctl_wire::Error),
}

impl SchedError {
    /// Returns `true` if the error reports a lack of room rather than a bad request.
    pub const fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            Self::MaxLimit
                | Self::AqFull
                | Self::Transport(CtlqError::QueueFull)
                | Self::Transport(CtlqError::NoMemory)
        )
    }

    /// Turns a firmware rejection into a configuration error. Transport failures are kept
    /// as they are.
    pub(crate) fn or_cfg(self, what: &'static str) -> Self {
        match self {
            Self::Transport(CtlqError::Command(rc)) => {
                warn!(%rc, what, "firmware rejected command");
                Self::Cfg(what)
            }
            other => other,
        }
    }
}

/// Synchronous command submission to firmware.
///
/// Implemented by [`ControlQueue`]. The scheduler only needs this one operation, which
/// keeps it independent of the register, DMA and clock types of the queue.
pub trait CommandTransport: Send + Sync {
    /// Sends a command and waits for completion. On return `desc` and `buf` hold the
    /// firmware response.
    fn send_command(&self, desc: &mut Descriptor, buf: Option<&mut [u8]>) -> Result<(), CtlqError>;
}

impl<R, D, C> CommandTransport for ControlQueue<R, D, C>
where
    R: RegisterAccess,
    D: DmaMemory,
    C: Clock,
{
    fn send_command(&self, desc: &mut Descriptor, buf: Option<&mut [u8]>) -> Result<(), CtlqError> {
        ControlQueue::send_command(self, desc, buf)
    }
}

impl<T: CommandTransport + ?Sized> CommandTransport for Arc<T> {
    fn send_command(&self, desc: &mut Descriptor, buf: Option<&mut [u8]>) -> Result<(), CtlqError> {
        (**self).send_command(desc, buf)
    }
}
