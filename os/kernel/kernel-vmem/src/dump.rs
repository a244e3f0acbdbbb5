//! # Table Dumper
//!
//! Prints one line per table descriptor and per leaf, depth first, with the
//! effective permissions at that point of the walk. Lines look like
//!
//! ```text
//! VA[0x0000000040000000 - 0x0000000080000000] perm = 0 (L1 TABLE) (raw=0x0000000040083003)
//! VA[0x0000000040000000 - 0x0000000040200000] -> PA[0x0000000040000000 - 0x0000000040200000] Normal PXN UXN ACCESS (L2 BLOCK) (raw=0x0060000040000605)
//! ```

use core::fmt::{self, Write};

use log::info;

use crate::descriptor::{Descriptor, RawDescriptor};
use crate::page_table::PageTable;
use crate::permissions::{MairIndex, Permissions};
use crate::{PhysMapper, PhysicalAddress};

/// Knobs for [`dump_page_table`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DumpOptions {
    /// Also print invalid slots; every slot of every reachable table then
    /// produces one line.
    pub include_invalid: bool,
}

/// Writes the contents of `table` to `out`.
///
/// # Errors
/// Only errors of `out` are returned.
pub fn dump_page_table<M: PhysMapper, W: Write>(
    table: &PageTable<'_, M>,
    options: DumpOptions,
    out: &mut W,
) -> fmt::Result {
    let root_level = table.config().root_level();
    let Some(root) = table.root() else {
        return writeln!(out, "table has no root");
    };
    if root_level < 0 {
        return writeln!(out, "cannot print a table with root level {root_level}");
    }
    Dumper {
        table,
        options,
        out,
    }
    .level(root, root_level, table.config().va_base(), Permissions::OPEN)
}

/// Sends the dump of `table` to the logger, one record per line.
pub fn log_page_table<M: PhysMapper>(table: &PageTable<'_, M>, options: DumpOptions) {
    let mut lines = LogLines::default();
    // `LogLines` never fails.
    let _ = dump_page_table(table, options, &mut lines);
    lines.flush();
}

struct Dumper<'t, 'm, M: PhysMapper, W> {
    table: &'t PageTable<'m, M>,
    options: DumpOptions,
    out: &'t mut W,
}

impl<M: PhysMapper, W: Write> Dumper<'_, '_, M, W> {
    fn level(
        &mut self,
        array: PhysicalAddress,
        level: i8,
        va_base: u64,
        inherited: Permissions,
    ) -> fmt::Result {
        let config = *self.table.config();
        let (Ok(entries), Ok(size)) = (config.entries_per_level(level), config.entry_size(level))
        else {
            return writeln!(self.out, "level {level} has no valid geometry");
        };

        for index in 0..entries {
            let slot = PageTable::<M>::slot_at(array, level, index);
            let raw = self.table.load(slot);
            let va = va_base + index as u64 * size;
            // The last entry of a high table ends at 2^64, printed as 0.
            let end = va.wrapping_add(size);
            let mut perm = if config.hierarchy_enabled() {
                inherited
            } else {
                Permissions::OPEN
            };

            match Descriptor::decode(raw, level, config.page_level()) {
                Descriptor::Table(next) => {
                    perm.accumulate_table(next);
                    write!(self.out, "VA[{va:#018x} - {end:#018x}]")?;
                    self.secure(perm)?;
                    self.restrictions(perm)?;
                    writeln!(
                        self.out,
                        " perm = {:x} (L{level} TABLE) (raw={:#018x})",
                        perm.into_bits(),
                        raw.into_bits()
                    )?;
                    self.level(next.address(), level + 1, va, perm)?;
                }
                leaf @ (Descriptor::Block(_) | Descriptor::Page(_)) => {
                    perm.add_from_leaf(leaf);
                    let pa = leaf.address().map_or(0, PhysicalAddress::as_u64);
                    let (kind, no_translation) = match leaf {
                        Descriptor::Block(block) => ("BLOCK", block.no_translation()),
                        _ => ("PAGE", false),
                    };
                    write!(
                        self.out,
                        "VA[{va:#018x} - {end:#018x}] -> PA[{pa:#018x} - {:#018x}]",
                        pa + size
                    )?;
                    self.out.write_str(match perm.mair_index {
                        MairIndex::DEVICE => " Device",
                        MairIndex::NORMAL => " Normal",
                        _ => " [UNKNOWN MAIR INDEX]",
                    })?;
                    self.secure(perm)?;
                    self.restrictions(perm)?;
                    flag(self.out, perm.contiguous, " CONTIGUOUS")?;
                    flag(self.out, perm.non_global, " NON-GLOBAL")?;
                    flag(self.out, perm.guarded, " GUARDED")?;
                    flag(self.out, no_translation, " nT")?;
                    flag(self.out, perm.access_flag, " ACCESS")?;
                    writeln!(self.out, " (L{level} {kind}) (raw={:#018x})", raw.into_bits())?;
                }
                Descriptor::Invalid(raw) if self.options.include_invalid => {
                    self.invalid(raw, level, va, end)?;
                }
                Descriptor::Invalid(_) => {}
            }
        }
        Ok(())
    }

    fn invalid(&mut self, raw: RawDescriptor, level: i8, va: u64, end: u64) -> fmt::Result {
        if level == self.table.config().page_level() {
            writeln!(
                self.out,
                "VA[{va:#018x} - {end:#018x}] -> INVALID (L{level} PAGE) (raw={:#018x})",
                raw.into_bits()
            )
        } else if raw.is_table_or_page() {
            writeln!(
                self.out,
                "VA[{va:#018x} - {end:#018x}] -> INVALID (L{level} TABLE) (raw={:#018x})",
                raw.into_bits()
            )
        } else {
            writeln!(
                self.out,
                "VA[{va:#018x} - {end:#018x}] -> INVALID (L{level} BLOCK) (raw={:#018x})",
                raw.into_bits()
            )
        }
    }

    fn secure(&mut self, perm: Permissions) -> fmt::Result {
        let secure_table = self.table.config().flags().secure();
        flag(self.out, secure_table && !perm.non_secure, " SECURE")
    }

    fn restrictions(&mut self, perm: Permissions) -> fmt::Result {
        flag(self.out, perm.priv_exec_never, " PXN")?;
        flag(self.out, perm.unpriv_exec_never, " UXN")?;
        flag(self.out, perm.readonly, " RD_ONLY")?;
        flag(self.out, perm.user, " USER")
    }
}

fn flag<W: Write>(out: &mut W, set: bool, text: &str) -> fmt::Result {
    if set { out.write_str(text) } else { Ok(()) }
}

/// Line buffer that emits one `info!` record per line.
struct LogLines {
    buf: [u8; 256],
    len: usize,
}

impl Default for LogLines {
    fn default() -> Self {
        Self {
            buf: [0; 256],
            len: 0,
        }
    }
}

impl LogLines {
    fn flush(&mut self) {
        if self.len == 0 {
            return;
        }
        let line = core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<unprintable line>");
        info!(target: "paging", "{line}");
        self.len = 0;
    }
}

impl Write for LogLines {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.flush();
                continue;
            }
            if self.len == self.buf.len() {
                self.flush();
            }
            self.buf[self.len] = byte;
            self.len += 1;
        }
        Ok(())
    }
}
