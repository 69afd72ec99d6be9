//! A simulated device for exercising control queues without hardware.
//!
//! [`SimDevice`] implements [`RegisterAccess`] over a [`HeapDma`]. Writing the send queue
//! tail makes it process every posted descriptor through a [`CommandHandler`] and write
//! the completions back, the way firmware does.
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use nicctl_wire::{desc::flags, Descriptor, DESC_LEN};

use crate::{regs::ChannelRegisters, HeapDma, RegisterAccess};

/// Firmware-side command processing.
pub trait CommandHandler: Send {
    /// Handles one command. `buf` holds the indirect buffer, if any, and is written back
    /// as the response. Set `desc.retval` to fail the command.
    fn handle(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>);
}

impl<F> CommandHandler for F
where
    F: FnMut(&mut Descriptor, &mut Vec<u8>) + Send,
{
    fn handle(&mut self, desc: &mut Descriptor, buf: &mut Vec<u8>) {
        self(desc, buf)
    }
}

/// Completes every command successfully without touching it.
pub fn echo(_: &mut Descriptor, _: &mut Vec<u8>) {}

#[derive(Debug, Default)]
struct SimRegs {
    values: FxHashMap<u32, u32>,
    writes: usize,
    /// Descriptors posted but not yet processed. Head and tail alone can't tell a full
    /// ring from an empty one.
    sq_pending: u32,
    /// Stop processing commands.
    stalled: bool,
    /// Registers that drop writes.
    stuck: Vec<u32>,
}

#[derive(Debug)]
pub struct SimDevice<H> {
    regs: ChannelRegisters,
    dma: HeapDma,
    state: Mutex<SimRegs>,
    handler: Mutex<H>,
}

impl<H: CommandHandler> SimDevice<H> {
    pub fn new(regs: ChannelRegisters, dma: HeapDma, handler: H) -> Self {
        Self { regs, dma, state: Mutex::new(SimRegs::default()), handler: Mutex::new(handler) }
    }

    /// Access to the command handler, e.g. to inspect recorded state.
    pub fn handler(&self) -> parking_lot::MutexGuard<'_, H> {
        self.handler.lock()
    }

    /// Stops (or resumes) completing commands. A stalled device never moves the send
    /// queue head.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
        if !stalled {
            self.process_sq();
        }
    }

    /// Sets or clears the critical error bit in the send queue length register.
    pub fn set_critical(&self, critical: bool) {
        let mut state = self.state.lock();
        let len = state.values.entry(self.regs.sq.len).or_default();
        if critical {
            *len |= self.regs.len_crit;
        } else {
            *len &= !self.regs.len_crit;
        }
    }

    /// Makes `reg` drop (or again accept) writes, like a register that fails to latch.
    pub fn set_stuck(&self, reg: u32, stuck: bool) {
        let mut state = self.state.lock();
        state.stuck.retain(|r| *r != reg);
        if stuck {
            state.stuck.push(reg);
        }
    }

    /// Number of register writes so far.
    pub fn register_writes(&self) -> usize {
        self.state.lock().writes
    }

    pub fn register(&self, reg: u32) -> u32 {
        self.state.lock().values.get(&reg).copied().unwrap_or_default()
    }

    /// Writes an event into the next receive slot owned by firmware. Returns `false` if
    /// the receive queue has no free slot or is not enabled.
    pub fn post_event(&self, mut desc: Descriptor, data: &[u8]) -> bool {
        let mut state = self.state.lock();
        let rq = self.regs.rq;
        let count = state.values.get(&rq.len).copied().unwrap_or_default() & self.regs.len_mask;
        if count == 0 {
            return false;
        }

        let head = state.values.get(&rq.head).copied().unwrap_or_default();
        let tail = state.values.get(&rq.tail).copied().unwrap_or_default();
        if head == tail {
            return false;
        }

        let base = ring_base(&state.values, rq.bal, rq.bah);
        let slot_pa = base + u64::from(head) * DESC_LEN as u64;
        let Some(posted) = self.read_desc(slot_pa) else {
            return false;
        };

        let buf_pa = posted.params.addr();
        let len = data.len().min(posted.datalen as usize);
        if len > 0 && self.dma.write_phys(buf_pa, &data[..len]).is_err() {
            return false;
        }

        desc.flags |= flags::DD | flags::CMP | (posted.flags & (flags::BUF | flags::LB));
        desc.datalen = len as u16;
        desc.params.set_addr(buf_pa);
        if self.dma.write_phys(slot_pa, &desc.to_bytes()).is_err() {
            return false;
        }

        state.values.insert(rq.head, (head + 1) % count);
        true
    }

    fn read_desc(&self, pa: u64) -> Option<Descriptor> {
        let mut raw = [0u8; DESC_LEN];
        self.dma.read_phys(pa, &mut raw).ok()?;
        Descriptor::from_bytes(&raw).ok()
    }

    /// Completes every descriptor between head and tail.
    fn process_sq(&self) {
        let sq = self.regs.sq;
        let mut state = self.state.lock();
        if state.stalled {
            return;
        }

        let count = state.values.get(&sq.len).copied().unwrap_or_default() & self.regs.len_mask;
        if count == 0 {
            return;
        }
        let base = ring_base(&state.values, sq.bal, sq.bah);
        let mut head = state.values.get(&sq.head).copied().unwrap_or_default();

        while state.sq_pending > 0 {
            let slot_pa = base + u64::from(head) * DESC_LEN as u64;
            if let Some(desc) = self.read_desc(slot_pa) {
                self.complete(slot_pa, desc);
            }
            head = (head + 1) % count;
            state.sq_pending -= 1;
        }

        state.values.insert(sq.head, head);
    }

    fn complete(&self, slot_pa: u64, mut desc: Descriptor) {
        let buf_pa = desc.params.addr();
        let has_buf = desc.has_flag(flags::BUF);

        let mut buf = vec![0u8; if has_buf { desc.datalen as usize } else { 0 }];
        if has_buf && self.dma.read_phys(buf_pa, &mut buf).is_err() {
            buf.clear();
        }

        self.handler.lock().handle(&mut desc, &mut buf);

        if has_buf {
            // The device can't write past the posted buffer but reports the full length.
            let room = self.dma.remaining_at(buf_pa).unwrap_or_default();
            let _ = self.dma.write_phys(buf_pa, &buf[..buf.len().min(room)]);
            desc.datalen = buf.len() as u16;
        }

        desc.flags |= flags::DD | flags::CMP;
        if desc.retval & 0xff != 0 {
            desc.flags |= flags::ERR;
        }
        let _ = self.dma.write_phys(slot_pa, &desc.to_bytes());
    }
}

fn ring_base(values: &FxHashMap<u32, u32>, bal: u32, bah: u32) -> u64 {
    let low = values.get(&bal).copied().unwrap_or_default();
    let high = values.get(&bah).copied().unwrap_or_default();
    (u64::from(high) << 32) | u64::from(low)
}

impl<H: CommandHandler> RegisterAccess for SimDevice<H> {
    fn read32(&self, reg: u32) -> u32 {
        self.register(reg)
    }

    fn write32(&self, reg: u32, val: u32) {
        {
            let mut state = self.state.lock();
            state.writes += 1;
            if state.stuck.contains(&reg) {
                return;
            }

            if reg == self.regs.sq.len {
                state.sq_pending = 0;
            } else if reg == self.regs.sq.tail {
                let count = state.values.get(&self.regs.sq.len).copied().unwrap_or_default()
                    & self.regs.len_mask;
                let old = state.values.get(&reg).copied().unwrap_or_default();
                if count > 0 {
                    state.sq_pending += (val + count - old) % count;
                }
            }

            // Writes never clear the critical bit
            let val = if reg == self.regs.sq.len || reg == self.regs.rq.len {
                let crit = state.values.get(&reg).copied().unwrap_or_default() & self.regs.len_crit;
                val | crit
            } else {
                val
            };
            state.values.insert(reg, val);
        }

        if reg == self.regs.sq.tail {
            self.process_sq();
        }
    }

    fn flush(&self) {}
}
