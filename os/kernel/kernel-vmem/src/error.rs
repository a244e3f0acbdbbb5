use crate::descriptor::DescriptorError;
use crate::geometry::GeometryError;

/// Errors reported by table construction, walking, and MMU bring-up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("out of memory allocating a level {level} table")]
    OutOfMemory { level: i8 },
    #[error("allocator returned {address:#x}, which is not aligned to {alignment:#x}")]
    MisalignedAllocation { address: u64, alignment: u64 },
    #[error("tables with root level {root_level} cannot be walked")]
    UnsupportedRootLevel { root_level: i8 },
    #[error("level {level} descriptors cannot be split into a finer table")]
    CannotSplitPage { level: i8 },
    #[error("range [{start:#x}, {end:#x}) is not page aligned")]
    Unaligned { start: u64, end: u64 },
    #[error("virtual address {0:#x} is outside the region translated by this table")]
    NonCanonical(u64),
    #[error("address range overflows the 64-bit address space")]
    RangeOverflow,
    #[error("the table has no root level")]
    MissingRoot,
    #[error("the CPU does not implement the 4 KiB translation granule")]
    Unsupported4KbGranule,
    #[error("the MMU is already enabled on this core")]
    AlreadyEnabled,
    #[error("operation is not supported")]
    Unsupported,
}
