use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use nicctl_common::constants::AQ_LARGE_BUF;
use nicctl_wire::{desc::flags, Descriptor, Opcode};

use super::{ring::Ring, CtlqError, CtlqOptions, CtlqStats, ResetFlag, RqEvent};
use crate::{
    clock::{Clock, SystemClock},
    dma::{DmaMemory, HeapDma},
    regs::{Channel, ChannelRegisters, QueueRegisters},
    RegisterAccess,
};

/// A control queue channel: a send ring for commands and a receive ring for events.
///
/// The send and receive rings have independent locks. A command holds the send lock
/// from the moment it is posted until it completes or times out, so commands on one
/// channel are strictly serialized.
#[derive(Debug)]
pub struct ControlQueue<R, D = HeapDma, C = SystemClock> {
    channel: Channel,
    regs: ChannelRegisters,
    io: R,
    dma: D,
    clock: C,
    options: CtlqOptions,
    reset: ResetFlag,
    sq: Mutex<Ring>,
    rq: Mutex<Ring>,
    stats: CtlqStats,
}

impl<R, D, C> ControlQueue<R, D, C>
where
    R: RegisterAccess,
    D: DmaMemory,
    C: Clock,
{
    /// Creates an uninitialized queue. Call [`ControlQueue::init`] before use.
    pub fn new(channel: Channel, regs: ChannelRegisters, io: R, dma: D, clock: C) -> Self {
        Self {
            channel,
            regs,
            io,
            dma,
            clock,
            options: CtlqOptions::default(),
            reset: ResetFlag::default(),
            sq: Mutex::new(Ring::default()),
            rq: Mutex::new(Ring::default()),
            stats: CtlqStats::default(),
        }
    }

    pub fn with_options(mut self, options: CtlqOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares a reset flag with the rest of the device.
    pub fn with_reset_flag(mut self, reset: ResetFlag) -> Self {
        self.reset = reset;
        self
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn options(&self) -> &CtlqOptions {
        &self.options
    }

    pub fn stats(&self) -> &CtlqStats {
        &self.stats
    }

    pub fn reset_flag(&self) -> &ResetFlag {
        &self.reset
    }

    pub fn is_ready(&self) -> bool {
        self.sq.lock().is_ready() && self.rq.lock().is_ready()
    }

    /// Allocates both rings, programs the queue registers and posts every receive buffer.
    pub fn init(&self) -> Result<(), CtlqError> {
        let CtlqOptions { sq_depth, sq_buf_size, rq_depth, rq_buf_size, .. } = self.options;
        if sq_depth == 0 || rq_depth == 0 || sq_buf_size == 0 || rq_buf_size == 0 {
            return Err(CtlqError::Cfg("zero queue depth or buffer size"));
        }
        if u32::from(sq_depth.max(rq_depth)) > self.regs.len_mask {
            return Err(CtlqError::Cfg("queue depth exceeds length register"));
        }
        if sq_buf_size > u16::MAX as usize || rq_buf_size > u16::MAX as usize {
            return Err(CtlqError::Cfg("buffer size exceeds descriptor length"));
        }

        if self.is_ready() {
            return Err(CtlqError::Cfg("already initialized"));
        }

        // Allocate without holding either lock
        let mut sq = Ring::alloc(&self.dma, sq_depth, sq_buf_size).map_err(|e| {
            error!(channel = %self.channel, "failed to allocate send queue: {e}");
            CtlqError::NoMemory
        })?;
        let mut rq = match Ring::alloc(&self.dma, rq_depth, rq_buf_size) {
            Ok(rq) => rq,
            Err(e) => {
                error!(channel = %self.channel, "failed to allocate receive queue: {e}");
                sq.free(&self.dma);
                return Err(CtlqError::NoMemory);
            }
        };

        // Check, program and install under both locks, sq first as in `is_ready`
        let mut sq_slot = self.sq.lock();
        let mut rq_slot = self.rq.lock();
        let res = if sq_slot.is_ready() || rq_slot.is_ready() {
            Err(CtlqError::Cfg("already initialized"))
        } else {
            self.program(&sq, &rq).map_err(|e| {
                warn!(channel = %self.channel, "failed to program control queue: {e}");
                self.clear_ring_regs(&self.regs.sq);
                self.clear_ring_regs(&self.regs.rq);
                e
            })
        };
        if let Err(e) = res {
            sq.free(&self.dma);
            rq.free(&self.dma);
            return Err(e);
        }

        *sq_slot = sq;
        *rq_slot = rq;
        drop((sq_slot, rq_slot));

        debug!(channel = %self.channel, sq_depth, rq_depth, "control queue initialized");
        Ok(())
    }

    fn program(&self, sq: &Ring, rq: &Ring) -> Result<(), CtlqError> {
        for idx in 0..rq.count {
            rq.post_rx_buf(&self.dma, idx)?;
        }

        self.program_ring(&self.regs.sq, sq)?;
        self.program_ring(&self.regs.rq, rq)?;

        // Hand every receive buffer to firmware
        self.io.write32(self.regs.rq.tail, u32::from(rq.count - 1));
        self.io.flush();
        Ok(())
    }

    fn program_ring(&self, regs: &QueueRegisters, ring: &Ring) -> Result<(), CtlqError> {
        let base = ring.base();

        self.io.write32(regs.head, 0);
        self.io.write32(regs.tail, 0);
        self.io.write32(regs.len, u32::from(ring.count) | self.regs.len_enable);
        self.io.write32(regs.bal, base as u32);
        self.io.write32(regs.bah, (base >> 32) as u32);

        // Check one register to verify the writes landed
        if self.io.read32(regs.bal) != base as u32 {
            return Err(CtlqError::Cfg("base address register did not latch"));
        }

        Ok(())
    }

    /// Sends a command and waits for firmware to complete it.
    ///
    /// On return `desc` holds the descriptor written back by firmware and `buf`, if any,
    /// holds the response buffer. A non-zero firmware return code yields
    /// [`CtlqError::Command`]. Commands whose opcode is in the busy retry set are retried
    /// when firmware reports it is busy.
    pub fn send_command(&self, desc: &mut Descriptor, mut buf: Option<&mut [u8]>) -> Result<(), CtlqError> {
        let retry_busy = Opcode::try_from(desc.opcode)
            .is_ok_and(|op| self.options.busy_retry_opcodes.contains(&op));
        if !retry_busy {
            return self.send_once(desc, buf);
        }

        let orig_desc = *desc;
        let orig_buf = buf.as_deref().map(<[u8]>::to_vec);

        let mut attempt = 0;
        loop {
            match self.send_once(desc, buf.as_deref_mut()) {
                Err(CtlqError::Command(rc)) if rc.is_busy() && attempt < self.options.busy_retry_attempts => {
                    attempt += 1;
                    self.stats.increment_busy_retries();
                    debug!(channel = %self.channel, opcode = desc.opcode, attempt, "firmware busy, retrying");

                    *desc = orig_desc;
                    if let (Some(buf), Some(orig)) = (buf.as_deref_mut(), orig_buf.as_deref()) {
                        buf.copy_from_slice(orig);
                    }
                    self.clock.delay(self.options.busy_retry_delay);
                }
                res => return res,
            }
        }
    }

    fn send_once(&self, desc: &mut Descriptor, buf: Option<&mut [u8]>) -> Result<(), CtlqError> {
        if self.reset.is_set() {
            return Err(CtlqError::ResetOngoing);
        }

        let mut sq = self.sq.lock();
        if !sq.is_ready() {
            return Err(CtlqError::NotReady);
        }

        if let Some(buf) = &buf {
            if buf.is_empty() {
                return Err(CtlqError::Param("empty indirect buffer"));
            }
            if buf.len() > sq.buf_size {
                return Err(CtlqError::Param("buffer larger than send buffer size"));
            }
        }

        self.clean_sq(&mut sq)?;
        if sq.in_flight == sq.count {
            debug!(channel = %self.channel, "send queue full");
            return Err(CtlqError::QueueFull);
        }

        let idx = sq.next_to_use;
        let mut posted = *desc;
        if let Some(buf) = &buf {
            let Some(dma_buf) = sq.bufs.get(idx as usize) else {
                return Err(CtlqError::NotReady);
            };
            self.dma.write(dma_buf, 0, buf)?;

            posted.flags |= flags::BUF;
            if buf.len() > AQ_LARGE_BUF {
                posted.flags |= flags::LB;
            }
            posted.datalen = buf.len() as u16;
            posted.params.set_addr(dma_buf.pa);
        }
        sq.write_desc(&self.dma, idx, &posted)?;

        sq.next_to_use = sq.next(idx);
        sq.in_flight += 1;
        self.stats.increment_sent();
        trace!(channel = %self.channel, opcode = posted.opcode, idx, "posted command");

        let ntu = u32::from(sq.next_to_use);
        self.io.write32(self.regs.sq.tail, ntu);
        self.io.flush();

        let head_mask = self.regs.head_mask;
        let done = self
            .options
            .retry
            .poll(&self.clock, || self.io.read32(self.regs.sq.head) & head_mask == ntu);

        if !done {
            self.stats.increment_timeouts();
            let sq_len = self.io.read32(self.regs.sq.len);
            let rq_len = self.io.read32(self.regs.rq.len);
            if self.regs.is_critical(sq_len) || self.regs.is_critical(rq_len) {
                error!(channel = %self.channel, opcode = posted.opcode, "firmware critical error");
                return Err(CtlqError::FwCritical);
            }

            warn!(channel = %self.channel, opcode = posted.opcode, "command timed out");
            return Err(CtlqError::Timeout);
        }

        let completed = sq.read_desc(&self.dma, idx)?;
        *desc = completed;

        if let Some(buf) = buf {
            let len = completed.datalen as usize;
            if len > buf.len() {
                return Err(CtlqError::Param("response larger than caller buffer"));
            }
            if let Some(dma_buf) = sq.bufs.get(idx as usize) {
                self.dma.read(dma_buf, 0, &mut buf[..len])?;
            }
        }

        let rc = completed.return_code();
        if !rc.is_ok() {
            self.stats.increment_cmd_errors();
            debug!(channel = %self.channel, opcode = completed.opcode, %rc, "command failed");
            return Err(CtlqError::Command(rc));
        }

        Ok(())
    }

    /// Reclaims every slot firmware is done with.
    fn clean_sq(&self, sq: &mut Ring) -> Result<(), CtlqError> {
        let head = (self.io.read32(self.regs.sq.head) & self.regs.head_mask) as u16;

        while sq.in_flight > 0 {
            let ntc = sq.next_to_clean;
            if ntc == head {
                // Equal cursors on a full ring mean firmware either consumed everything or
                // nothing. Only the done flag tells them apart.
                let full = sq.in_flight == sq.count;
                if !full || !sq.read_desc(&self.dma, ntc)?.has_flag(flags::DD) {
                    break;
                }
            }

            sq.write_desc(&self.dma, ntc, &Descriptor::default())?;
            sq.next_to_clean = sq.next(ntc);
            sq.in_flight -= 1;
        }

        Ok(())
    }

    /// Takes the oldest event off the receive queue, copying at most `buf_len` bytes of
    /// its buffer, and hands the slot back to firmware.
    ///
    /// Returns [`CtlqError::NoWork`] when there is nothing to drain.
    pub fn clean_rq(&self, buf_len: usize) -> Result<RqEvent, CtlqError> {
        let mut rq = self.rq.lock();
        if !rq.is_ready() {
            return Err(CtlqError::NotReady);
        }

        let head = (self.io.read32(self.regs.rq.head) & self.regs.head_mask) as u16;
        let ntc = rq.next_to_clean;
        if head == ntc {
            return Err(CtlqError::NoWork);
        }

        let desc = rq.read_desc(&self.dma, ntc)?;
        let len = (desc.datalen as usize).min(buf_len).min(rq.buf_size);
        let mut buf = vec![0u8; len];
        if let Some(dma_buf) = rq.bufs.get(ntc as usize) {
            self.dma.read(dma_buf, 0, &mut buf)?;
        }

        if desc.has_flag(flags::ERR) {
            self.stats.increment_cmd_errors();
            warn!(channel = %self.channel, opcode = desc.opcode, rc = %desc.return_code(), "event carries error");
        }

        rq.post_rx_buf(&self.dma, ntc)?;
        self.io.write32(self.regs.rq.tail, u32::from(ntc));
        rq.next_to_clean = rq.next(ntc);

        let pending = rq.pending(head);
        self.stats.increment_events();
        trace!(channel = %self.channel, opcode = desc.opcode, pending, "drained event");

        Ok(RqEvent { desc, buf, pending })
    }

    /// Disables both rings and frees their memory. Does nothing if the queue is not
    /// initialized.
    pub fn shutdown(&self) {
        let mut sq = self.sq.lock();
        if sq.is_ready() {
            self.clear_ring_regs(&self.regs.sq);
            sq.free(&self.dma);
        }
        drop(sq);

        let mut rq = self.rq.lock();
        if rq.is_ready() {
            self.clear_ring_regs(&self.regs.rq);
            rq.free(&self.dma);
        }
        drop(rq);

        debug!(channel = %self.channel, "control queue shut down");
    }

    fn clear_ring_regs(&self, regs: &QueueRegisters) {
        // Disable first so firmware stops looking at the ring
        self.io.write32(regs.len, 0);
        self.io.write32(regs.head, 0);
        self.io.write32(regs.tail, 0);
        self.io.write32(regs.bal, 0);
        self.io.write32(regs.bah, 0);
        self.io.flush();
    }

    /// Current cursors of the send ring: `(next_to_use, next_to_clean, in_flight)`.
    pub fn sq_cursors(&self) -> (u16, u16, u16) {
        let sq = self.sq.lock();
        (sq.next_to_use, sq.next_to_clean, sq.in_flight)
    }
}
