//! Synchronization barriers.
//!
//! On targets without the `asm` feature these are no-ops so the callers can
//! stay unconditional.

/// `dsb ish` followed by `isb`: completes prior table and register writes and
/// resynchronizes the instruction stream.
#[inline]
pub fn dsb_isb() {
    #[cfg(all(feature = "asm", target_arch = "aarch64"))]
    unsafe {
        core::arch::asm!("dsb ish", "isb", options(nostack, preserves_flags));
    }
}
