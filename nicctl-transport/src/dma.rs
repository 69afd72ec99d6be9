use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DmaError {
    #[error("Out of DMA memory allocating {0} bytes")]
    NoMemory(usize),
    #[error("Access of {len} bytes at offset {offset} outside region of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },
    #[error("Unknown DMA region {0:#x}")]
    UnknownRegion(u64),
}

/// A DMA-coherent region. The physical address is what the device sees.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaHandle {
    pub pa: u64,
    pub size: usize,
}

/// DMA memory allocator and accessor.
pub trait DmaMemory: Send + Sync {
    fn alloc(&self, size: usize) -> Result<DmaHandle, DmaError>;
    fn free(&self, handle: DmaHandle);
    /// Copies host data into the region (host to device).
    fn write(&self, handle: &DmaHandle, offset: usize, data: &[u8]) -> Result<(), DmaError>;
    /// Copies region contents out (device to host).
    fn read(&self, handle: &DmaHandle, offset: usize, out: &mut [u8]) -> Result<(), DmaError>;
}

const PAGE: u64 = 4096;

#[derive(Debug)]
struct HeapState {
    regions: BTreeMap<u64, Vec<u8>>,
    next_pa: u64,
    allocated: usize,
    limit: Option<usize>,
}

/// Host memory posing as DMA memory, addressable by physical address.
///
/// Clones share the same memory, so a simulated device can hold one to read and write
/// the regions a queue allocated.
#[derive(Debug, Clone)]
pub struct HeapDma {
    inner: Arc<Mutex<HeapState>>,
}

impl Default for HeapDma {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapDma {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HeapState {
                regions: BTreeMap::new(),
                // Above 4 GiB so the high address register matters.
                next_pa: 0x1_0000_0000,
                allocated: 0,
                limit: None,
            })),
        }
    }

    /// Limits the total number of bytes that can be allocated at once.
    pub fn with_limit(self, limit: usize) -> Self {
        self.inner.lock().limit = Some(limit);
        self
    }

    /// Bytes currently allocated.
    pub fn allocated(&self) -> usize {
        self.inner.lock().allocated
    }

    /// Number of live regions.
    pub fn regions(&self) -> usize {
        self.inner.lock().regions.len()
    }

    /// Writes `data` at physical address `pa`.
    pub fn write_phys(&self, pa: u64, data: &[u8]) -> Result<(), DmaError> {
        let mut state = self.inner.lock();
        let (base, region) =
            state.regions.range_mut(..=pa).next_back().ok_or(DmaError::UnknownRegion(pa))?;
        let offset = (pa - *base) as usize;
        let size = region.len();
        region
            .get_mut(offset..offset + data.len())
            .ok_or(DmaError::OutOfBounds { offset, len: data.len(), size })?
            .copy_from_slice(data);
        Ok(())
    }

    /// Reads `out.len()` bytes at physical address `pa`.
    pub fn read_phys(&self, pa: u64, out: &mut [u8]) -> Result<(), DmaError> {
        let state = self.inner.lock();
        let (base, region) =
            state.regions.range(..=pa).next_back().ok_or(DmaError::UnknownRegion(pa))?;
        let offset = (pa - *base) as usize;
        let src = region.get(offset..offset + out.len()).ok_or(DmaError::OutOfBounds {
            offset,
            len: out.len(),
            size: region.len(),
        })?;
        out.copy_from_slice(src);
        Ok(())
    }

    /// Size of the region starting at or containing `pa`, minus the offset into it.
    pub fn remaining_at(&self, pa: u64) -> Option<usize> {
        let state = self.inner.lock();
        let (base, region) = state.regions.range(..=pa).next_back()?;
        region.len().checked_sub((pa - *base) as usize)
    }
}

impl DmaMemory for HeapDma {
    fn alloc(&self, size: usize) -> Result<DmaHandle, DmaError> {
        let mut state = self.inner.lock();
        if size == 0 || state.limit.is_some_and(|limit| state.allocated + size > limit) {
            return Err(DmaError::NoMemory(size));
        }

        let pa = state.next_pa;
        state.next_pa += (size as u64).div_ceil(PAGE) * PAGE;
        state.allocated += size;
        state.regions.insert(pa, vec![0; size]);

        Ok(DmaHandle { pa, size })
    }

    fn free(&self, handle: DmaHandle) {
        let mut state = self.inner.lock();
        if state.regions.remove(&handle.pa).is_some() {
            state.allocated -= handle.size;
        }
    }

    fn write(&self, handle: &DmaHandle, offset: usize, data: &[u8]) -> Result<(), DmaError> {
        if offset + data.len() > handle.size {
            return Err(DmaError::OutOfBounds { offset, len: data.len(), size: handle.size });
        }
        self.write_phys(handle.pa + offset as u64, data)
    }

    fn read(&self, handle: &DmaHandle, offset: usize, out: &mut [u8]) -> Result<(), DmaError> {
        if offset + out.len() > handle.size {
            return Err(DmaError::OutOfBounds { offset, len: out.len(), size: handle.size });
        }
        self.read_phys(handle.pa + offset as u64, out)
    }
}
