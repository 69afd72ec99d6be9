use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;

use nicctl_common::constants::AQ_MAX_BUF_LEN;
use nicctl_wire::{Descriptor, Opcode, ReturnCode};

use crate::{clock::RetryPolicy, dma::DmaError};

mod queue;
mod ring;
mod stats;

pub use queue::ControlQueue;
pub use stats::CtlqStats;

#[derive(Debug, Error)]
pub enum CtlqError {
    #[error("Invalid queue configuration: {0}")]
    Cfg(&'static str),
    #[error("Out of DMA memory")]
    NoMemory,
    #[error("Reset in progress")]
    ResetOngoing,
    #[error("Send queue full")]
    QueueFull,
    #[error("Firmware returned {0}")]
    Command(ReturnCode),
    #[error("Command timed out")]
    Timeout,
    #[error("Firmware reported a critical error")]
    FwCritical,
    #[error("No pending events")]
    NoWork,
    #[error("Queue not initialized")]
    NotReady,
    #[error("Invalid parameter: {0}")]
    Param(&'static str),
    #[error("DMA error: {0}")]
    Dma(#[from] DmaError),
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] nicctl_wire::Error),
}

impl CtlqError {
    /// Returns `true` if the same command may succeed when retried later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::Command(ReturnCode::Busy))
    }

    /// Returns `true` for failures of the queue itself rather than of the command.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout | Self::FwCritical | Self::ResetOngoing)
    }

    /// The firmware return code, if the command was rejected by firmware.
    pub const fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Self::Command(rc) => Some(*rc),
            _ => None,
        }
    }
}

impl From<ReturnCode> for CtlqError {
    fn from(rc: ReturnCode) -> Self {
        Self::Command(rc)
    }
}

/// Shared "a reset is in flight" flag. Sends fail fast while it is set.
#[derive(Debug, Clone, Default)]
pub struct ResetFlag(Arc<AtomicBool>);

impl ResetFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub struct CtlqOptions {
    /// Number of send queue descriptors.
    pub sq_depth: u16,
    /// Size of each send buffer, the largest indirect command that can be sent.
    pub sq_buf_size: usize,
    pub rq_depth: u16,
    pub rq_buf_size: usize,
    pub retry: RetryPolicy,
    /// Opcodes for which a firmware `EBUSY` is retried.
    pub busy_retry_opcodes: Vec<Opcode>,
    pub busy_retry_attempts: usize,
    pub busy_retry_delay: Duration,
}

impl CtlqOptions {
    pub fn with_sq(mut self, depth: u16, buf_size: usize) -> Self {
        self.sq_depth = depth;
        self.sq_buf_size = buf_size;
        self
    }

    pub fn with_rq(mut self, depth: u16, buf_size: usize) -> Self {
        self.rq_depth = depth;
        self.rq_buf_size = buf_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retries `opcode` when firmware reports it is busy.
    pub fn with_busy_retry(mut self, opcode: Opcode) -> Self {
        self.busy_retry_opcodes.push(opcode);
        self
    }
}

impl Default for CtlqOptions {
    fn default() -> Self {
        Self {
            sq_depth: 64,
            sq_buf_size: AQ_MAX_BUF_LEN,
            rq_depth: 64,
            rq_buf_size: AQ_MAX_BUF_LEN,
            retry: RetryPolicy::default(),
            busy_retry_opcodes: Vec::new(),
            busy_retry_attempts: 3,
            busy_retry_delay: Duration::from_millis(10),
        }
    }
}

/// An event drained from the receive queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RqEvent {
    pub desc: Descriptor,
    /// Event payload, truncated to the capacity the caller asked for.
    pub buf: Vec<u8>,
    /// Events still waiting after this one.
    pub pending: u16,
}

impl RqEvent {
    /// The error firmware flagged on this event, if any.
    pub fn error(&self) -> Option<CtlqError> {
        if self.desc.has_flag(nicctl_wire::desc::flags::ERR) {
            return Some(CtlqError::Command(self.desc.return_code()));
        }
        None
    }
}
