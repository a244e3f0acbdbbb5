//! # MMU Bring-Up
//!
//! Two phases:
//!
//! 1. [`arch_paging_init`] runs once on the boot core. It builds the TTBR0
//!    identity map (everything as device memory, then RAM, the kernel image,
//!    and the device tree blob on top) and an empty TTBR1 table.
//! 2. [`per_cpu_paging_init`] runs on every core, the boot core included. It
//!    programs `MAIR_EL1`, both base registers and `TCR_EL1` from the shared
//!    [`MmuContext`], then turns translation on.
//!
//! Register access goes through [`SystemRegisters`], so the whole sequence
//! can run against in-memory registers on the host.

use kernel_registers::id_aa64mmfr0::pa_range_for_bits;
use kernel_registers::{IdAa64Mmfr0El1, IdAa64Mmfr1El1, MairEl1, SctlrEl1, TcrEl1, Ttbr};
use log::{debug, error, info, warn};

use crate::descriptor::OUTPUT_ADDRESS_BITS;
use crate::dump::{DumpOptions, log_page_table};
use crate::geometry::TableFlags;
use crate::page_table::PageTable;
use crate::permissions::MairIndex;
use crate::{BootAllocator, PagingError, PhysMapper, PhysicalAddress, VirtualAddress};

/// The EL1 system registers touched while enabling translation.
///
/// Implementations are bound to the current core.
pub trait SystemRegisters {
    fn id_aa64mmfr0(&self) -> IdAa64Mmfr0El1;
    fn id_aa64mmfr1(&self) -> IdAa64Mmfr1El1;
    fn mair(&self) -> MairEl1;
    fn sctlr(&self) -> SctlrEl1;
    fn tcr(&self) -> TcrEl1;

    fn write_mair(&mut self, mair: MairEl1);
    fn write_ttbr0(&mut self, ttbr: Ttbr);
    fn write_ttbr1(&mut self, ttbr: Ttbr);
    fn write_tcr(&mut self, tcr: TcrEl1);
    fn write_sctlr(&mut self, sctlr: SctlrEl1);

    /// `dsb ish; isb`.
    fn barrier(&mut self);

    /// Sets `SCTLR_EL1.M` and clears `WXN`.
    fn enable_mmu(&mut self) {
        let sctlr = self
            .sctlr()
            .with_mmu_enable(true)
            .with_write_execute_never(false);
        self.write_sctlr(sctlr);
        self.barrier();
    }
}

/// The registers of the executing core.
#[cfg(all(feature = "asm", target_arch = "aarch64"))]
#[derive(Debug)]
pub struct HardwareRegisters {
    _private: (),
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl HardwareRegisters {
    /// # Safety
    /// The caller must run at EL1, and any table written to a base register
    /// through this value must stay alive while it is installed.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl SystemRegisters for HardwareRegisters {
    fn id_aa64mmfr0(&self) -> IdAa64Mmfr0El1 {
        use kernel_registers::LoadRegisterUnsafe;
        unsafe { IdAa64Mmfr0El1::load_unsafe() }
    }

    fn id_aa64mmfr1(&self) -> IdAa64Mmfr1El1 {
        use kernel_registers::LoadRegisterUnsafe;
        unsafe { IdAa64Mmfr1El1::load_unsafe() }
    }

    fn mair(&self) -> MairEl1 {
        use kernel_registers::LoadRegisterUnsafe;
        unsafe { MairEl1::load_unsafe() }
    }

    fn sctlr(&self) -> SctlrEl1 {
        use kernel_registers::LoadRegisterUnsafe;
        unsafe { SctlrEl1::load_unsafe() }
    }

    fn tcr(&self) -> TcrEl1 {
        use kernel_registers::LoadRegisterUnsafe;
        unsafe { TcrEl1::load_unsafe() }
    }

    fn write_mair(&mut self, mair: MairEl1) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { mair.store_unsafe() }
    }

    fn write_ttbr0(&mut self, ttbr: Ttbr) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { kernel_registers::Ttbr0El1(ttbr).store_unsafe() }
    }

    fn write_ttbr1(&mut self, ttbr: Ttbr) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { kernel_registers::Ttbr1El1(ttbr).store_unsafe() }
    }

    fn write_tcr(&mut self, tcr: TcrEl1) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { tcr.store_unsafe() }
    }

    fn write_sctlr(&mut self, sctlr: SctlrEl1) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { sctlr.store_unsafe() }
    }

    fn barrier(&mut self) {
        kernel_registers::barrier::dsb_isb();
    }
}

/// A physically contiguous range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: PhysicalAddress,
    pub size: u64,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: PhysicalAddress, size: u64) -> Self {
        Self { base, size }
    }
}

/// What booting needs from the flattened device tree.
pub trait DeviceTree {
    /// Calls `f` once for every `reg` entry of every `memory` node.
    fn for_each_memory_region(&self, f: &mut dyn FnMut(MemoryRegion));

    /// Where the blob itself lives.
    fn blob(&self) -> MemoryRegion;
}

/// Kernel image sections, as placed by the linker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KernelLayout {
    pub text: MemoryRegion,
    pub rodata: MemoryRegion,
}

/// Knobs for [`arch_paging_init`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PagingConfig {
    /// Upper bound for the identity mapped physical range, in bits.
    pub max_pa_bits: u8,
    /// Region size of the TTBR1 table; defaults to the TTBR0 one.
    pub ttbr1_tnsz: Option<u8>,
    /// Tables belong to the secure world.
    pub secure: bool,
    /// Keep table descriptor permissions in effect. Turning this off only
    /// takes effect if the core implements `HPDS`.
    pub hierarchical_permissions: bool,
    /// Log both tables once they are built.
    pub dump_tables: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            max_pa_bits: 48,
            ttbr1_tnsz: None,
            secure: false,
            hierarchical_permissions: true,
            dump_tables: false,
        }
    }
}

/// An IO window requested by a driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IoMapping {
    pub va: VirtualAddress,
    pub pa: PhysicalAddress,
    pub size: u64,
    /// Set once the window has been handed to the page tables.
    pub enabled: bool,
}

impl IoMapping {
    #[must_use]
    pub const fn new(va: VirtualAddress, pa: PhysicalAddress, size: u64) -> Self {
        Self {
            va,
            pa,
            size,
            enabled: false,
        }
    }
}

/// Both translation tables plus the register values derived while building them.
///
/// Built once by [`arch_paging_init`] and shared by every core.
pub struct MmuContext<'m, M: PhysMapper> {
    ttbr0: PageTable<'m, M>,
    ttbr1: PageTable<'m, M>,
    pa_range: u8,
    hierarchy_disabled: bool,
}

impl<'m, M: PhysMapper> MmuContext<'m, M> {
    /// The low (identity) table.
    #[must_use]
    pub const fn ttbr0(&self) -> &PageTable<'m, M> {
        &self.ttbr0
    }

    /// The high table.
    #[must_use]
    pub const fn ttbr1(&self) -> &PageTable<'m, M> {
        &self.ttbr1
    }

    /// `PARange` encoding of the identity mapped physical range, used as `TCR_EL1.IPS`.
    #[must_use]
    pub const fn pa_range(&self) -> u8 {
        self.pa_range
    }

    #[must_use]
    pub const fn hierarchy_disabled(&self) -> bool {
        self.hierarchy_disabled
    }

    /// `current` with the device and normal attribute slots programmed.
    #[must_use]
    pub const fn mair(current: MairEl1) -> MairEl1 {
        current
            .with_attr(MairIndex::DEVICE.into_bits(), MairEl1::DEVICE_NGNRNE)
            .with_attr(MairIndex::NORMAL.into_bits(), MairEl1::NORMAL_WRITE_BACK)
    }

    /// `current` with both translation regimes configured for these tables.
    #[must_use]
    pub fn tcr(&self, current: TcrEl1) -> TcrEl1 {
        let low = self.ttbr0.config();
        let high = self.ttbr1.config();
        current
            .with_t0sz(low.tnsz())
            .with_epd0(false)
            .with_irgn0(TcrEl1::WALK_WRITE_BACK_NO_WRITE_ALLOCATE)
            .with_orgn0(TcrEl1::WALK_WRITE_BACK_NO_WRITE_ALLOCATE)
            .with_sh0(TcrEl1::INNER_SHAREABLE)
            .with_tg0(low.granule().tg0())
            .with_tbi0(false)
            .with_hpd0(self.hierarchy_disabled)
            .with_t1sz(high.tnsz())
            .with_epd1(false)
            .with_irgn1(TcrEl1::WALK_WRITE_BACK_NO_WRITE_ALLOCATE)
            .with_orgn1(TcrEl1::WALK_WRITE_BACK_NO_WRITE_ALLOCATE)
            .with_sh1(TcrEl1::INNER_SHAREABLE)
            .with_tg1(high.granule().tg1())
            .with_tbi1(false)
            .with_hpd1(self.hierarchy_disabled)
            .with_a1(false)
            .with_asid16(false)
            .with_ips(self.pa_range)
    }

    /// Maps an IO window as device memory in the low table.
    ///
    /// A mapping that is already enabled is left alone. The flag is set
    /// before the tables are touched, so a failed attempt is not retried.
    ///
    /// # Errors
    /// See [`PageTable::drill_range`].
    pub fn map_io<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        mapping: &mut IoMapping,
    ) -> Result<(), PagingError> {
        if mapping.enabled {
            return Ok(());
        }
        mapping.enabled = true;

        // TODO: invalidate the TLB on every core once IO windows can change while the MMU is on.
        self.ttbr0
            .init_device(alloc, mapping.va, mapping.pa, mapping.size)
            .map(|_| ())
    }

    /// # Errors
    /// Always [`PagingError::Unsupported`]; IO windows are never taken down.
    pub fn unmap_io(&mut self, mapping: &IoMapping) -> Result<(), PagingError> {
        warn!(target: "paging", "cannot unmap IO window at {}", mapping.va);
        Err(PagingError::Unsupported)
    }

    /// Releases both tables.
    ///
    /// # Errors
    /// See [`PageTable::free`].
    pub fn free<A: BootAllocator>(mut self, alloc: &mut A) -> Result<(), PagingError> {
        self.ttbr0.free(alloc)?;
        self.ttbr1.free(alloc)
    }
}

/// Builds the boot translation tables.
///
/// TTBR0 identity maps the physical range the core can address (capped by
/// [`PagingConfig::max_pa_bits`]) in this order, later steps overriding
/// earlier ones:
///
/// 1. everything as device memory,
/// 2. every device tree memory node as normal memory,
/// 3. the kernel text,
/// 4. the kernel rodata and the device tree blob.
///
/// TTBR1 gets a root that maps nothing.
///
/// # Errors
/// - [`PagingError::Unsupported4KbGranule`] if the core lacks the 4 KiB granule.
/// - Any error from building the tables; both are released in that case.
pub fn arch_paging_init<'m, M, A, R, D>(
    mapper: &'m M,
    alloc: &mut A,
    regs: &R,
    fdt: &D,
    layout: &KernelLayout,
    config: &PagingConfig,
) -> Result<MmuContext<'m, M>, PagingError>
where
    M: PhysMapper,
    A: BootAllocator,
    R: SystemRegisters + ?Sized,
    D: DeviceTree + ?Sized,
{
    let mmfr0 = regs.id_aa64mmfr0();
    if !mmfr0.supports_4kb_granule() {
        error!(target: "paging", "4 KiB translation granule not implemented");
        return Err(PagingError::Unsupported4KbGranule);
    }

    #[allow(clippy::cast_possible_truncation)]
    let limit = OUTPUT_ADDRESS_BITS as u8;
    let pa_bits = mmfr0.pa_bits().unwrap_or(limit).min(config.max_pa_bits).min(limit);
    let tnsz = 64u8.saturating_sub(pa_bits);
    let pa_range = pa_range_for_bits(pa_bits);
    info!(target: "paging", "identity mapping {pa_bits} bits of physical address space (tnsz {tnsz})");

    let hierarchy_disabled =
        !config.hierarchical_permissions && regs.id_aa64mmfr1().hierarchical_disable_supported();
    if !config.hierarchical_permissions && !hierarchy_disabled {
        warn!(target: "paging", "core cannot disable hierarchical permissions");
    }
    let flags = TableFlags::new()
        .with_hierarchy_enabled(!hierarchy_disabled)
        .with_secure(config.secure);

    let mut ttbr0 = PageTable::create_4kb(mapper, tnsz, flags)?;
    if let Err(err) = build_identity_map(&mut ttbr0, alloc, pa_bits, fdt, layout) {
        error!(target: "paging", "building the low table failed: {err}");
        release(&mut ttbr0, alloc);
        return Err(err);
    }

    let ttbr1_tnsz = config.ttbr1_tnsz.unwrap_or(tnsz);
    let mut ttbr1 = match PageTable::create_4kb(mapper, ttbr1_tnsz, flags.with_high_half(true)) {
        Ok(table) => table,
        Err(err) => {
            release(&mut ttbr0, alloc);
            return Err(err);
        }
    };
    if let Err(err) = ttbr1.init_invalid(alloc) {
        error!(target: "paging", "building the high table failed: {err}");
        release(&mut ttbr0, alloc);
        return Err(err);
    }

    if config.dump_tables {
        info!(target: "paging", "TTBR0 table:");
        log_page_table(&ttbr0, DumpOptions::default());
        info!(target: "paging", "TTBR1 table:");
        log_page_table(&ttbr1, DumpOptions::default());
    }

    Ok(MmuContext {
        ttbr0,
        ttbr1,
        pa_range,
        hierarchy_disabled,
    })
}

fn build_identity_map<M, A, D>(
    table: &mut PageTable<'_, M>,
    alloc: &mut A,
    pa_bits: u8,
    fdt: &D,
    layout: &KernelLayout,
) -> Result<(), PagingError>
where
    M: PhysMapper,
    A: BootAllocator,
    D: DeviceTree + ?Sized,
{
    let identity = |region: MemoryRegion| VirtualAddress::new(region.base.as_u64());

    table.init_device(
        alloc,
        VirtualAddress::new(0),
        PhysicalAddress::new(0),
        1u64 << pa_bits,
    )?;

    let mut first_error = None;
    fdt.for_each_memory_region(&mut |region| {
        if first_error.is_some() {
            return;
        }
        if let Err(err) = table.init_normal(alloc, identity(region), region.base, region.size) {
            first_error = Some(err);
        }
    });
    if let Some(err) = first_error {
        return Err(err);
    }

    let text = layout.text;
    table.init_text(alloc, identity(text), text.base, text.size)?;
    let rodata = layout.rodata;
    table.init_rodata(alloc, identity(rodata), rodata.base, rodata.size)?;
    let blob = fdt.blob();
    table.init_rodata(alloc, identity(blob), blob.base, blob.size)?;
    Ok(())
}

fn release<M: PhysMapper, A: BootAllocator>(table: &mut PageTable<'_, M>, alloc: &mut A) {
    if let Err(err) = table.free(alloc) {
        warn!(target: "paging", "leaking table levels: {err}");
    }
}

/// Programs the current core's MMU registers from `ctx` and enables translation.
///
/// Order: `MAIR_EL1`, `TTBR0_EL1`, `TTBR1_EL1`, `TCR_EL1`, barrier, `SCTLR_EL1`.
///
/// # Errors
/// - [`PagingError::AlreadyEnabled`] if this core already translates.
/// - [`PagingError::MissingRoot`] if either table has no root.
pub fn per_cpu_paging_init<M, R>(ctx: &MmuContext<'_, M>, regs: &mut R) -> Result<(), PagingError>
where
    M: PhysMapper,
    R: SystemRegisters + ?Sized,
{
    if regs.sctlr().mmu_enable() {
        warn!(target: "paging", "MMU already enabled on this core");
        return Err(PagingError::AlreadyEnabled);
    }

    let low = ctx.ttbr0.root().ok_or(PagingError::MissingRoot)?;
    let high = ctx.ttbr1.root().ok_or(PagingError::MissingRoot)?;

    let mair = MmuContext::<M>::mair(regs.mair());
    regs.write_mair(mair);
    debug!(target: "paging", "MAIR_EL1 = {:#018x}", mair.into_bits());

    regs.write_ttbr0(Ttbr::from_root(low));
    regs.write_ttbr1(Ttbr::from_root(high));
    debug!(target: "paging", "TTBR0_EL1 = {low}, TTBR1_EL1 = {high}");

    let tcr = ctx.tcr(regs.tcr());
    regs.write_tcr(tcr);
    debug!(target: "paging", "TCR_EL1 = {:#018x}", tcr.into_bits());

    regs.barrier();
    regs.enable_mmu();
    info!(target: "paging", "MMU enabled");
    Ok(())
}
