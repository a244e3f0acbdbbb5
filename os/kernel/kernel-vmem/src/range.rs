//! # Range Driller
//!
//! Maps a virtual range onto a physical range with the largest leaves that
//! fit. Drilling happens in two phases:
//!
//! 1. [`PageTable::plan_range`] applies the [`Rounding`] policy, checks that
//!    the whole range is translatable and representable, and yields a
//!    [`DrillPlan`]: an iterator over runs of equally sized leaves that tile
//!    the adjusted range exactly.
//! 2. [`PageTable::drill_range`] walks the plan and writes one leaf per block.
//!
//! A 1 GiB block is only used if the table's root is at level 1 or above it,
//! a 2 MiB block if the root is at level 2 or above it. Within those limits a
//! leaf size is chosen when both the virtual and the physical cursor are
//! aligned to it, and at least one whole leaf fits before the end of the range.
//!
//! Validation covers everything that does not depend on memory, so a
//! rejected range never touches the table. An allocation failure during the
//! second phase stops the drill; the leaves written before it stay in place.

use log::{debug, error};

use crate::descriptor::{Descriptor, DescriptorError, OUTPUT_ADDRESS_BITS};
use crate::page_table::PageTable;
use crate::permissions::Permissions;
use crate::{BootAllocator, PagingError, PhysMapper, PhysicalAddress, VirtualAddress};

/// How a range that is not page aligned is adjusted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Rounding {
    /// Both ends must already be page aligned.
    #[default]
    None,
    /// Round the start down and the end up: the mapping covers at least the range.
    Out,
    /// Round the start up and the end down: the mapping covers at most the range.
    In,
}

/// Range fitting applied to the whole request (page size) and, with
/// `FillEnd`, to every candidate leaf size while planning.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Fit {
    Exact,
    Out,
    In,
    /// Start must be aligned; the end is rounded down.
    FillEnd,
}

impl From<Rounding> for Fit {
    fn from(value: Rounding) -> Self {
        match value {
            Rounding::None => Self::Exact,
            Rounding::Out => Self::Out,
            Rounding::In => Self::In,
        }
    }
}

impl Fit {
    /// Adjusted `[start, end)`; `None` if the policy cannot be satisfied.
    ///
    /// Ends are kept as `u128` so that a range may end at `2^64`.
    fn apply(self, start: u128, end: u128, align: u128) -> Option<(u128, u128)> {
        let mask = align - 1;
        let down = |v: u128| v & !mask;
        let up = |v: u128| (v + mask) & !mask;
        let aligned = |v: u128| v & mask == 0;
        match self {
            Self::Exact => (aligned(start) && aligned(end)).then_some((start, end)),
            Self::Out => Some((down(start), up(end))),
            Self::In => {
                let start = up(start);
                Some((start, down(end).max(start)))
            }
            Self::FillEnd => aligned(start).then_some((start, down(end))),
        }
    }
}

/// One past the highest virtual or physical address.
const ADDRESS_SPACE_END: u128 = 1 << 64;

/// The low 64 bits of `value`; an end of `2^64` becomes `0`.
#[allow(clippy::cast_possible_truncation)]
const fn wrap(value: u128) -> u64 {
    value as u64
}

/// A run of `count` adjacent leaves of `block_size` bytes at `level`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DrillRun {
    pub va: VirtualAddress,
    pub pa: PhysicalAddress,
    pub level: i8,
    pub block_size: u64,
    pub count: u64,
}

impl DrillRun {
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.block_size * self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// End (exclusive) of the run; `0` for a run that ends at `2^64`.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.va.as_u64().wrapping_add(self.len()))
    }
}

/// Validated plan for a range drill; iterates the leaf runs in address order.
#[derive(Clone, Debug)]
pub struct DrillPlan {
    start: u128,
    end: u128,
    cursor: u128,
    /// `pa - va`, modulo 2^64.
    delta: u64,
    first_level: i8,
    page_level: i8,
    /// Leaf size per level, indexed by level.
    sizes: [u64; 4],
}

impl DrillPlan {
    /// Adjusted start of the range.
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        VirtualAddress::new(wrap(self.start))
    }

    /// Adjusted end (exclusive) of the range; `0` for a range that ends at
    /// the top of the address space.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(wrap(self.end))
    }

    /// Number of bytes the plan maps.
    #[must_use]
    pub const fn len(&self) -> u128 {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[allow(clippy::cast_sign_loss)]
    const fn size(&self, level: i8) -> u64 {
        self.sizes[level as usize]
    }
}

impl Iterator for DrillPlan {
    type Item = DrillRun;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        let cursor = self.cursor;
        let pa = wrap(cursor).wrapping_add(self.delta);

        for level in self.first_level..=self.page_level {
            let size = self.size(level);
            if pa & (size - 1) != 0 {
                continue;
            }
            let Some((_, limit)) = Fit::FillEnd.apply(cursor, self.end, u128::from(size)) else {
                continue;
            };
            if limit <= cursor {
                continue;
            }

            // Stop where a larger leaf could take over.
            let mut run_end = limit;
            if level > self.first_level {
                let larger = u128::from(self.size(level - 1));
                let boundary = (cursor + larger - 1) & !(larger - 1);
                if boundary > cursor && boundary < run_end {
                    run_end = boundary;
                }
            }

            self.cursor = run_end;
            return Some(DrillRun {
                va: VirtualAddress::new(wrap(cursor)),
                pa: PhysicalAddress::new(pa),
                level,
                block_size: size,
                count: wrap((run_end - cursor) / u128::from(size)),
            });
        }

        // Unreachable for a validated plan: the page level always fits.
        error!(target: "paging", "no leaf size fits at {cursor:#x}; dropping the rest of the range");
        self.cursor = self.end;
        None
    }
}

/// Outcome of a range drill.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DrilledRange {
    pub start: VirtualAddress,
    /// End (exclusive); `0` if the range ends at the top of the address space.
    pub end: VirtualAddress,
    /// Number of leaf descriptors written.
    pub leaves: u64,
}

impl<M: PhysMapper> PageTable<'_, M> {
    /// Validates a range drill and returns its plan, without touching the table.
    ///
    /// # Errors
    /// - [`PagingError::Unaligned`] with [`Rounding::None`] and an unaligned range.
    /// - [`PagingError::RangeOverflow`] if either range wraps around.
    /// - [`PagingError::NonCanonical`] if the range leaves the translated region.
    /// - [`PagingError::Descriptor`] if the physical range needs more than 48 bits.
    /// - [`PagingError::UnsupportedRootLevel`] for tables rooted above level 0.
    #[allow(clippy::cast_sign_loss)]
    pub fn plan_range(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        rounding: Rounding,
    ) -> Result<DrillPlan, PagingError> {
        let config = *self.config();
        let geometry = config.geometry()?;
        let root_level = config.root_level();
        let page_level = config.page_level();
        if root_level < 0 {
            return Err(PagingError::UnsupportedRootLevel { root_level });
        }

        let page_size = geometry.entry_size(page_level)?;
        let requested_start = u128::from(va.as_u64());
        let requested_end = requested_start + u128::from(size);
        if requested_end > ADDRESS_SPACE_END {
            return Err(PagingError::RangeOverflow);
        }
        let Some((start, end)) =
            Fit::from(rounding).apply(requested_start, requested_end, u128::from(page_size))
        else {
            error!(
                target: "paging",
                "range [{requested_start:#x}, {requested_end:#x}) is not page aligned"
            );
            return Err(PagingError::Unaligned {
                start: wrap(requested_start),
                end: wrap(requested_end),
            });
        };
        if end > ADDRESS_SPACE_END {
            return Err(PagingError::RangeOverflow);
        }

        let delta = pa.as_u64().wrapping_sub(va.as_u64());
        if start < end {
            self.check_canonical(VirtualAddress::new(wrap(start)))?;
            self.check_canonical(VirtualAddress::new(wrap(end - 1)))?;

            // The physical range must neither wrap nor exceed the output size.
            let pa_start = if start >= requested_start {
                u128::from(pa.as_u64()) + (start - requested_start)
            } else {
                u128::from(pa.as_u64())
                    .checked_sub(requested_start - start)
                    .ok_or(PagingError::RangeOverflow)?
            };
            let pa_end = pa_start + (end - start);
            if pa_end > ADDRESS_SPACE_END {
                return Err(PagingError::RangeOverflow);
            }
            if pa_end > 1 << OUTPUT_ADDRESS_BITS {
                error!(target: "paging", "physical range ends at {pa_end:#x}, beyond 48 bits");
                return Err(DescriptorError::NotRepresentable {
                    address: wrap(pa_start.max(1 << OUTPUT_ADDRESS_BITS)),
                }
                .into());
            }
        }

        let mut sizes = [0; 4];
        for level in 0..=page_level {
            sizes[level as usize] = geometry.entry_size(level)?;
        }

        Ok(DrillPlan {
            start,
            end,
            cursor: start,
            delta,
            first_level: root_level.max(geometry.first_block_level()),
            page_level,
            sizes,
        })
    }

    /// Maps `[va, va + size)` to `[pa, pa + size)` with `permissions`, using
    /// the largest leaves that fit (after applying `rounding`).
    ///
    /// Drilling the same range twice produces the same table.
    ///
    /// # Errors
    /// Everything [`plan_range`](Self::plan_range) rejects, before any change
    /// is made, and [`PagingError::OutOfMemory`] while writing.
    pub fn drill_range<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        permissions: Permissions,
        rounding: Rounding,
    ) -> Result<DrilledRange, PagingError> {
        let plan = self.plan_range(va, pa, size, rounding)?;
        let (start, end) = (plan.start(), plan.end());
        let pa_start = start.as_u64().wrapping_add(pa.as_u64().wrapping_sub(va.as_u64()));

        let mut leaves = 0;
        for run in plan {
            for index in 0..run.count {
                let offset = index * run.block_size;
                let slot = self.drill(alloc, run.va + offset, run.level)?;
                if let Descriptor::Table(finer) = self.decode(slot) {
                    // A coarser leaf replaces a finer mapping.
                    self.free_subtree(alloc, finer.address(), run.level + 1)?;
                }
                let leaf = self.leaf_descriptor(run.pa + offset, run.level, permissions)?;
                self.store(slot, leaf);
                leaves += 1;
            }
        }

        debug!(
            target: "paging",
            "drilled [{start}, {end}) -> {pa_start:#018x} with {leaves} leaves"
        );
        Ok(DrilledRange { start, end, leaves })
    }
}
