//! # Typed `AArch64` System Registers
//!
//! Bitfield views of the EL1 system registers the paging code reads and
//! programs. Hardware access is only compiled with the `asm` feature on an
//! `aarch64` target; everywhere else the types are plain values, which is
//! what host-side tests use.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod barrier;
pub mod id_aa64mmfr0;
pub mod id_aa64mmfr1;
pub mod mair;
pub mod sctlr;
pub mod tcr;
pub mod ttbr;

pub use id_aa64mmfr0::IdAa64Mmfr0El1;
pub use id_aa64mmfr1::IdAa64Mmfr1El1;
pub use mair::MairEl1;
pub use sctlr::SctlrEl1;
pub use tcr::TcrEl1;
pub use ttbr::{Ttbr, Ttbr0El1, Ttbr1El1};

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require EL1.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, writing a translation control register with the MMU
    /// enabled changes the meaning of every subsequent memory access.
    unsafe fn store_unsafe(self);
}

/// Implements `mrs`/`msr` based accessors for a bitfield register type.
macro_rules! system_register {
    (load store $ty:ty, $name:literal) => {
        system_register!(load $ty, $name);
        system_register!(store $ty, $name);
    };
    (load $ty:ty, $name:literal) => {
        #[cfg(all(feature = "asm", target_arch = "aarch64"))]
        impl $crate::LoadRegisterUnsafe for $ty {
            #[inline]
            unsafe fn load_unsafe() -> Self {
                let raw: u64;
                unsafe {
                    core::arch::asm!(
                        concat!("mrs {}, ", $name),
                        out(reg) raw,
                        options(nomem, nostack, preserves_flags)
                    );
                }
                Self::from_bits(raw)
            }
        }
    };
    (store $ty:ty, $name:literal) => {
        #[cfg(all(feature = "asm", target_arch = "aarch64"))]
        impl $crate::StoreRegisterUnsafe for $ty {
            #[inline]
            unsafe fn store_unsafe(self) {
                let raw = self.into_bits();
                unsafe {
                    core::arch::asm!(
                        concat!("msr ", $name, ", {}"),
                        in(reg) raw,
                        options(nostack, preserves_flags)
                    );
                }
            }
        }
    };
}

pub(crate) use system_register;
