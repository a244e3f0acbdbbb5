//! Host-side allocator for unit tests: table levels live on the heap and the
//! [`IdentityMapper`](crate::IdentityMapper) turns their addresses back into pointers.
//! Registers are plain values that remember every write.

use std::alloc::{Layout, alloc, dealloc};
use std::collections::HashMap;

use kernel_registers::{IdAa64Mmfr0El1, IdAa64Mmfr1El1, MairEl1, SctlrEl1, TcrEl1, Ttbr};

use crate::{BootAllocator, PhysicalAddress, SystemRegisters};

#[derive(Default)]
pub struct HeapAllocator {
    live: HashMap<u64, Layout>,
    pub allocations: usize,
    pub frees: usize,
    /// Refuse every allocation once this many have succeeded.
    pub limit: Option<usize>,
}

impl HeapAllocator {
    pub fn with_limit(limit: usize) -> Self {
        let mut heap = Self::default();
        heap.limit = Some(limit);
        heap
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }
}

impl BootAllocator for HeapAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Option<PhysicalAddress> {
        if self.limit.is_some_and(|limit| self.allocations >= limit) {
            return None;
        }
        let layout = Layout::from_size_align(size, align).ok()?;
        // Garbage first, so a missing zero-fill shows up in the tests.
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return None;
        }
        unsafe { ptr.write_bytes(0xA5, size) };
        self.allocations += 1;
        self.live.insert(ptr as u64, layout);
        Some(PhysicalAddress::from_ptr(ptr))
    }

    unsafe fn free(&mut self, pa: PhysicalAddress, size: usize) {
        let layout = self
            .live
            .remove(&pa.as_u64())
            .expect("freeing memory that was not allocated");
        assert_eq!(layout.size(), size);
        self.frees += 1;
        unsafe { dealloc(pa.as_u64() as *mut u8, layout) };
    }
}

impl Drop for HeapAllocator {
    fn drop(&mut self) {
        for (addr, layout) in self.live.drain() {
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}

/// Register writes in the order they happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterWrite {
    Mair(u64),
    Ttbr0(u64),
    Ttbr1(u64),
    Tcr(u64),
    Sctlr(u64),
    Barrier,
}

/// System registers held in memory.
pub struct RecordingRegisters {
    pub mmfr0: IdAa64Mmfr0El1,
    pub mmfr1: IdAa64Mmfr1El1,
    pub mair: MairEl1,
    pub sctlr: SctlrEl1,
    pub tcr: TcrEl1,
    pub ttbr0: Ttbr,
    pub ttbr1: Ttbr,
    pub writes: Vec<RegisterWrite>,
}

impl RecordingRegisters {
    /// A core with the given `PARange` and a 4 KiB granule.
    pub fn with_pa_range(pa_range: u8) -> Self {
        Self {
            mmfr0: IdAa64Mmfr0El1::new().with_pa_range(pa_range),
            mmfr1: IdAa64Mmfr1El1::new(),
            mair: MairEl1::new(),
            sctlr: SctlrEl1::new(),
            tcr: TcrEl1::new(),
            ttbr0: Ttbr::new(),
            ttbr1: Ttbr::new(),
            writes: Vec::new(),
        }
    }
}

impl SystemRegisters for RecordingRegisters {
    fn id_aa64mmfr0(&self) -> IdAa64Mmfr0El1 {
        self.mmfr0
    }

    fn id_aa64mmfr1(&self) -> IdAa64Mmfr1El1 {
        self.mmfr1
    }

    fn mair(&self) -> MairEl1 {
        self.mair
    }

    fn sctlr(&self) -> SctlrEl1 {
        self.sctlr
    }

    fn tcr(&self) -> TcrEl1 {
        self.tcr
    }

    fn write_mair(&mut self, mair: MairEl1) {
        self.mair = mair;
        self.writes.push(RegisterWrite::Mair(mair.into_bits()));
    }

    fn write_ttbr0(&mut self, ttbr: Ttbr) {
        self.ttbr0 = ttbr;
        self.writes.push(RegisterWrite::Ttbr0(ttbr.into_bits()));
    }

    fn write_ttbr1(&mut self, ttbr: Ttbr) {
        self.ttbr1 = ttbr;
        self.writes.push(RegisterWrite::Ttbr1(ttbr.into_bits()));
    }

    fn write_tcr(&mut self, tcr: TcrEl1) {
        self.tcr = tcr;
        self.writes.push(RegisterWrite::Tcr(tcr.into_bits()));
    }

    fn write_sctlr(&mut self, sctlr: SctlrEl1) {
        self.sctlr = sctlr;
        self.writes.push(RegisterWrite::Sctlr(sctlr.into_bits()));
    }

    fn barrier(&mut self) {
        self.writes.push(RegisterWrite::Barrier);
    }
}
