#![allow(dead_code)]

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::collections::HashMap;

use kernel_registers::{IdAa64Mmfr0El1, IdAa64Mmfr1El1, MairEl1, SctlrEl1, TcrEl1, Ttbr};
use kernel_vmem::{
    BootAllocator, DeviceTree, KernelLayout, MemoryRegion, PhysicalAddress, SystemRegisters,
};

/// Boot allocator backed by the test process heap.
#[derive(Default)]
pub struct Heap {
    live: HashMap<u64, Layout>,
    pub allocations: usize,
}

impl Heap {
    pub fn live(&self) -> usize {
        self.live.len()
    }
}

impl BootAllocator for Heap {
    fn allocate(&mut self, size: usize, align: usize) -> Option<PhysicalAddress> {
        let layout = Layout::from_size_align(size, align).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        self.allocations += 1;
        self.live.insert(ptr as u64, layout);
        Some(PhysicalAddress::new(ptr as u64))
    }

    unsafe fn free(&mut self, pa: PhysicalAddress, size: usize) {
        let layout = self.live.remove(&pa.as_u64()).expect("unknown allocation");
        assert_eq!(layout.size(), size, "freed with a different size");
        unsafe { dealloc(pa.as_u64() as *mut u8, layout) };
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for (addr, layout) in self.live.drain() {
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}

/// A core whose system registers are plain fields.
pub struct Core {
    pub mmfr0: IdAa64Mmfr0El1,
    pub mmfr1: IdAa64Mmfr1El1,
    pub mair: MairEl1,
    pub sctlr: SctlrEl1,
    pub tcr: TcrEl1,
    pub ttbr0: Ttbr,
    pub ttbr1: Ttbr,
    pub log: Vec<&'static str>,
}

impl Core {
    pub fn new(pa_range: u8) -> Self {
        Self {
            mmfr0: IdAa64Mmfr0El1::new().with_pa_range(pa_range),
            mmfr1: IdAa64Mmfr1El1::new(),
            mair: MairEl1::new(),
            sctlr: SctlrEl1::new(),
            tcr: TcrEl1::new(),
            ttbr0: Ttbr::new(),
            ttbr1: Ttbr::new(),
            log: Vec::new(),
        }
    }
}

impl SystemRegisters for Core {
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
        self.log.push("mair");
    }

    fn write_ttbr0(&mut self, ttbr: Ttbr) {
        self.ttbr0 = ttbr;
        self.log.push("ttbr0");
    }

    fn write_ttbr1(&mut self, ttbr: Ttbr) {
        self.ttbr1 = ttbr;
        self.log.push("ttbr1");
    }

    fn write_tcr(&mut self, tcr: TcrEl1) {
        self.tcr = tcr;
        self.log.push("tcr");
    }

    fn write_sctlr(&mut self, sctlr: SctlrEl1) {
        self.sctlr = sctlr;
        self.log.push("sctlr");
    }

    fn barrier(&mut self) {
        self.log.push("barrier");
    }
}

/// A device tree with fixed memory nodes.
pub struct Fdt {
    pub memory: Vec<MemoryRegion>,
    pub blob: MemoryRegion,
}

impl DeviceTree for Fdt {
    fn for_each_memory_region(&self, f: &mut dyn FnMut(MemoryRegion)) {
        for region in &self.memory {
            f(*region);
        }
    }

    fn blob(&self) -> MemoryRegion {
        self.blob
    }
}

pub const fn region(base: u64, size: u64) -> MemoryRegion {
    MemoryRegion::new(PhysicalAddress::new(base), size)
}

/// Two banks of RAM at 1 GiB and 3 GiB, with the kernel and blob in the first.
pub fn virt_board() -> (Fdt, KernelLayout) {
    let fdt = Fdt {
        memory: vec![region(0x4000_0000, 0x4000_0000), region(0xC000_0000, 0x2000_0000)],
        blob: region(0x4800_0000, 0x1_0000),
    };
    let layout = KernelLayout {
        text: region(0x4008_0000, 0x8_0000),
        rodata: region(0x4010_0000, 0x2_0000),
    };
    (fdt, layout)
}
