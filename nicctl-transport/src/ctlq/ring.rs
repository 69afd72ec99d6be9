use nicctl_common::constants::AQ_LARGE_BUF;
use nicctl_wire::{desc::flags, Descriptor, DESC_LEN};

use crate::dma::{DmaError, DmaHandle, DmaMemory};

/// One descriptor ring and its per-slot buffers.
///
/// `count == 0` means the ring is not initialized.
#[derive(Debug, Default)]
pub(crate) struct Ring {
    pub(crate) desc: Option<DmaHandle>,
    pub(crate) bufs: Vec<DmaHandle>,
    pub(crate) count: u16,
    pub(crate) buf_size: usize,
    /// Next slot to hand to firmware.
    pub(crate) next_to_use: u16,
    /// Next slot to reclaim.
    pub(crate) next_to_clean: u16,
    /// Posted descriptors not yet reclaimed. Tells a full ring from an empty one when
    /// both cursors are equal.
    pub(crate) in_flight: u16,
}

impl Ring {
    /// Allocates the descriptor ring and one buffer per slot. Frees everything allocated
    /// so far on failure.
    pub(crate) fn alloc<D: DmaMemory>(dma: &D, count: u16, buf_size: usize) -> Result<Self, DmaError> {
        let mut ring = Self { count, buf_size, ..Default::default() };
        let res = ring.alloc_inner(dma);
        if let Err(e) = res {
            ring.free(dma);
            return Err(e);
        }
        Ok(ring)
    }

    fn alloc_inner<D: DmaMemory>(&mut self, dma: &D) -> Result<(), DmaError> {
        self.desc = Some(dma.alloc(self.count as usize * DESC_LEN)?);
        self.bufs.reserve(self.count as usize);
        for _ in 0..self.count {
            self.bufs.push(dma.alloc(self.buf_size)?);
        }
        Ok(())
    }

    /// Frees all memory and resets the ring to uninitialized.
    pub(crate) fn free<D: DmaMemory>(&mut self, dma: &D) {
        for buf in self.bufs.drain(..) {
            dma.free(buf);
        }
        if let Some(desc) = self.desc.take() {
            dma.free(desc);
        }
        *self = Self::default();
    }

    #[inline]
    pub(crate) const fn is_ready(&self) -> bool {
        self.count > 0
    }

    #[inline]
    pub(crate) const fn next(&self, idx: u16) -> u16 {
        if idx + 1 == self.count {
            0
        } else {
            idx + 1
        }
    }

    pub(crate) fn base(&self) -> u64 {
        self.desc.as_ref().map(|d| d.pa).unwrap_or_default()
    }

    pub(crate) fn read_desc<D: DmaMemory>(&self, dma: &D, idx: u16) -> Result<Descriptor, DmaError> {
        let mut raw = [0u8; DESC_LEN];
        if let Some(ring) = &self.desc {
            dma.read(ring, idx as usize * DESC_LEN, &mut raw)?;
        }
        // 32 bytes always decode
        Ok(Descriptor::from_bytes(&raw).unwrap_or_default())
    }

    pub(crate) fn write_desc<D: DmaMemory>(
        &self,
        dma: &D,
        idx: u16,
        desc: &Descriptor,
    ) -> Result<(), DmaError> {
        match &self.desc {
            Some(ring) => dma.write(ring, idx as usize * DESC_LEN, &desc.to_bytes()),
            None => Ok(()),
        }
    }

    /// Hands slot `idx` back to firmware as an empty receive buffer.
    pub(crate) fn post_rx_buf<D: DmaMemory>(&self, dma: &D, idx: u16) -> Result<(), DmaError> {
        let Some(buf) = self.bufs.get(idx as usize) else {
            return Ok(());
        };

        let mut desc = Descriptor { flags: flags::BUF, datalen: self.buf_size as u16, ..Default::default() };
        if self.buf_size > AQ_LARGE_BUF {
            desc.flags |= flags::LB;
        }
        desc.params.set_addr(buf.pa);
        self.write_desc(dma, idx, &desc)
    }

    /// Number of entries between `next_to_clean` and firmware `head`.
    pub(crate) const fn pending(&self, head: u16) -> u16 {
        let ntc = self.next_to_clean;
        if ntc > head {
            self.count - ntc + head
        } else {
            head - ntc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapDma;

    #[test]
    fn alloc_unwinds_on_failure() {
        // Ring (4 * 32) and three 64 byte buffers fit, the fourth does not.
        let dma = HeapDma::new().with_limit(128 + 3 * 64);
        assert!(Ring::alloc(&dma, 4, 64).is_err());
        assert_eq!(dma.regions(), 0);
    }

    #[test]
    fn cursor_wraps() {
        let dma = HeapDma::new();
        let mut ring = Ring::alloc(&dma, 3, 64).unwrap();
        assert_eq!(ring.next(0), 1);
        assert_eq!(ring.next(2), 0);

        ring.next_to_clean = 2;
        assert_eq!(ring.pending(1), 2);
        assert_eq!(ring.pending(2), 0);
        ring.free(&dma);
        assert!(!ring.is_ready());
        assert_eq!(dma.allocated(), 0);
    }

    #[test]
    fn rx_buffers_are_posted() {
        let dma = HeapDma::new();
        let ring = Ring::alloc(&dma, 2, 1024).unwrap();
        ring.post_rx_buf(&dma, 1).unwrap();

        let desc = ring.read_desc(&dma, 1).unwrap();
        assert_eq!(desc.flags, flags::BUF | flags::LB);
        assert_eq!(desc.datalen, 1024);
        assert_eq!(desc.params.addr(), ring.bufs[1].pa);
    }
}
