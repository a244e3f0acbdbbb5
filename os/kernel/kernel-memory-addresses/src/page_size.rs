use core::fmt;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the output sizes a 4 KiB-granule translation table can map.
///
/// Each marker corresponds to one leaf level: pages at level 3, blocks at
/// levels 2 and 1.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Display + fmt::Debug
{
    /// Size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
    /// Translation level at which a leaf of this size lives.
    const LEVEL: i8;

    fn as_str() -> &'static str;
}

/// 4 KiB page, mapped by a level 3 page descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
    const LEVEL: i8 = 3;

    fn as_str() -> &'static str {
        "4K"
    }
}

/// 2 MiB block, mapped by a level 2 block descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size2M;
impl sealed::Sealed for Size2M {}
impl PageSize for Size2M {
    const SIZE: u64 = 2 * 1024 * 1024;
    const SHIFT: u32 = 21;
    const LEVEL: i8 = 2;

    fn as_str() -> &'static str {
        "2M"
    }
}

/// 1 GiB block, mapped by a level 1 block descriptor.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size1G;
impl sealed::Sealed for Size1G {}
impl PageSize for Size1G {
    const SIZE: u64 = 1024 * 1024 * 1024;
    const SHIFT: u32 = 30;
    const LEVEL: i8 = 1;

    fn as_str() -> &'static str {
        "1G"
    }
}

macro_rules! impl_display_debug {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(<$ty as PageSize>::as_str())
                }
            }

            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({:#x})", stringify!($ty), <$ty as PageSize>::SIZE)
                }
            }
        )*
    };
}

impl_display_debug!(Size4K, Size2M, Size1G);
