//! Control queue transport.
//!
//! A control queue is a pair of DMA-backed descriptor rings shared with NIC firmware: a
//! send queue for synchronous commands and a receive queue for asynchronous events. The
//! hardware collaborators (registers, DMA memory and time) are injected through the
//! [`RegisterAccess`], [`DmaMemory`] and [`Clock`] traits.
use std::sync::Arc;

pub mod clock;
pub mod ctlq;
pub mod dma;
pub mod regs;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, ManualClock, RetryPolicy, SystemClock};
pub use ctlq::{ControlQueue, CtlqError, CtlqOptions, CtlqStats, ResetFlag, RqEvent};
pub use dma::{DmaError, DmaHandle, DmaMemory, HeapDma};
pub use regs::{Channel, ChannelRegisters, QueueRegisters};

/// 32-bit device register access.
pub trait RegisterAccess: Send + Sync {
    fn read32(&self, reg: u32) -> u32;
    fn write32(&self, reg: u32, val: u32);
    /// Flushes posted writes.
    fn flush(&self);
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Arc<T> {
    fn read32(&self, reg: u32) -> u32 {
        (**self).read32(reg)
    }

    fn write32(&self, reg: u32, val: u32) {
        (**self).write32(reg, val)
    }

    fn flush(&self) {
        (**self).flush()
    }
}
