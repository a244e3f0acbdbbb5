//! # Memory Address Types
//!
//! Strongly typed virtual and physical addresses used by the AArch64 paging
//! code, plus the leaf sizes a 4 KiB-granule translation table can map.
//!
//! | Marker   | Size    | Leaf level |
//! |----------|---------|------------|
//! | `Size4K` | 4 KiB   | L3 page    |
//! | `Size2M` | 2 MiB   | L2 block   |
//! | `Size1G` | 1 GiB   | L1 block   |
//!
//! Keeping the address kinds apart at the type level stops a physical table
//! address from being fed to the walker as a virtual address (and vice versa).
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x4020_1000);
//! assert!(va.is_aligned::<Size4K>());
//! assert_eq!(va.align_down::<Size2M>().as_u64(), 0x4020_0000);
//! assert_eq!(align_up(0x4020_1001, Size4K::SIZE), Some(0x4020_2000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod page_size;
mod physical_address;
mod virtual_address;

pub use page_size::{PageSize, Size1G, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Rounds `value` down to a multiple of `alignment` (a power of two).
#[inline]
#[must_use]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// Rounds `value` up to a multiple of `alignment` (a power of two).
///
/// Returns `None` if the result does not fit into 64 bits.
#[inline]
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> Option<u64> {
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_down(0x1fff, 0x1000), 0x1000);
        assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x2000, 0x1000), Some(0x2000));
        assert_eq!(align_up(u64::MAX, 0x1000), None);
    }

    #[test]
    fn physical_alignment_by_leaf_size() {
        let pa = PhysicalAddress::new(0x4000_0000);
        assert!(pa.is_aligned::<Size1G>());
        assert!(pa.is_aligned::<Size2M>());
        let pa = pa + 0x20_1000;
        assert!(!pa.is_aligned::<Size2M>());
        assert!(pa.is_aligned::<Size4K>());
        assert_eq!(pa.align_down::<Size2M>().as_u64(), 0x4020_0000);
        assert_eq!(pa.offset::<Size2M>(), 0x1000);
    }

    #[test]
    fn virtual_table_index() {
        // L1 index of 0x4000_0000 with 1 GiB entries and a 512 entry table.
        let va = VirtualAddress::new(0x4000_0000);
        assert_eq!(va.table_index(30, 512), 1);
        // L3 index wraps within its table.
        let va = VirtualAddress::new(0x0020_3000);
        assert_eq!(va.table_index(12, 512), 3);
        // A root with only four entries masks off the higher bits.
        let va = VirtualAddress::new(0x1_4000_0000);
        assert_eq!(va.table_index(30, 4), 1);
    }

    #[test]
    fn checked_add_overflow() {
        assert_eq!(VirtualAddress::new(u64::MAX - 1).checked_add(2), None);
        assert_eq!(
            PhysicalAddress::new(0x1000).checked_add(0x1000),
            Some(PhysicalAddress::new(0x2000))
        );
    }

    #[test]
    fn leaf_levels() {
        assert_eq!(Size4K::LEVEL, 3);
        assert_eq!(Size2M::LEVEL, 2);
        assert_eq!(Size1G::LEVEL, 1);
        assert_eq!(Size2M::SIZE, 1 << Size2M::SHIFT);
    }
}
