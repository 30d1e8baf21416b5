//! Immutable, allocation-free parser and validator over an SLF buffer.

use log::{debug, trace};
use scroll::{Pread, LE};

use crate::error::{Error, Result};
use crate::header::{self, SymbolSize};
use crate::relocations::RelocationTable;
use crate::strings::StringTable;
use crate::symbols::SymbolTable;

/// Options controlling how strictly [`View::open`] validates a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// When set, every symbol and relocation `data_offset` must satisfy
    /// `data_offset + symbol_size <= section_size`.
    pub validate_symbols: bool,
}

impl OpenOptions {
    /// An `OpenOptions` with every check at its default (off).
    pub fn new() -> Self {
        OpenOptions::default()
    }

    /// Builder method to toggle symbol/relocation bounds validation.
    pub fn validate_symbols(mut self, yes: bool) -> Self {
        self.validate_symbols = yes;
        self
    }
}

/// An immutable, validated view over an SLF buffer.
///
/// A `View` borrows its input; its lifetime is bounded by the borrowed
/// slice. After a successful [`View::open`], every accessor returns a
/// table that requires no further bounds checking by callers.
#[derive(Debug, Clone, Copy)]
pub struct View<'a> {
    buffer: &'a [u8],
    export_table: u32,
    import_table: u32,
    relocs_table: u32,
    string_table: u32,
    section_start: u32,
    section_size: u32,
    symbol_size: SymbolSize,
}

struct StringTableInfo {
    offset: u32,
    total_length: u32,
}

impl<'a> View<'a> {
    /// Parse and validate `buffer`, returning a navigable view or the
    /// validation failure.
    pub fn open(buffer: &'a [u8], options: OpenOptions) -> Result<Self> {
        if buffer.len() < 4 {
            return Err(Error::InvalidHeader(format!(
                "buffer of {} bytes is shorter than the magic",
                buffer.len()
            )));
        }
        if buffer[0..4] != header::MAGIC {
            return Err(Error::InvalidHeader(format!(
                "magic {:02x?} does not match expected {:02x?}",
                &buffer[0..4],
                header::MAGIC
            )));
        }
        if (buffer.len() as u64) < header::HEADER_SIZE as u64 {
            return Err(Error::InvalidData(format!(
                "buffer of {} bytes is shorter than the {}-byte header",
                buffer.len(),
                header::HEADER_SIZE
            )));
        }

        let export_table: u32 = buffer.pread_with(header::OFF_EXPORT_TABLE, LE)?;
        let import_table: u32 = buffer.pread_with(header::OFF_IMPORT_TABLE, LE)?;
        let relocs_table: u32 = buffer.pread_with(header::OFF_RELOCS_TABLE, LE)?;
        let string_table: u32 = buffer.pread_with(header::OFF_STRING_TABLE, LE)?;
        let section_start: u32 = buffer.pread_with(header::OFF_SECTION_START, LE)?;
        let section_size: u32 = buffer.pread_with(header::OFF_SECTION_SIZE, LE)?;
        let symbol_size_byte: u8 = buffer.pread_with(header::OFF_SYMBOL_SIZE, LE)?;
        let symbol_size = SymbolSize::from_byte(symbol_size_byte)?;

        trace!(
            "header: export={:#x} import={:#x} relocs={:#x} strings={:#x} \
             section=[{:#x}, {:#x}) symbol_size={:?}",
            export_table,
            import_table,
            relocs_table,
            string_table,
            section_start,
            section_size,
            symbol_size
        );

        if (section_start as u64) + (section_size as u64) > buffer.len() as u64 {
            return Err(Error::InvalidData(format!(
                "section [{:#x}, {:#x}) exceeds buffer length {:#x}",
                section_start,
                section_start as u64 + section_size as u64,
                buffer.len()
            )));
        }

        for (name, offset) in [
            ("export_table", export_table),
            ("import_table", import_table),
            ("relocs_table", relocs_table),
            ("string_table", string_table),
        ] {
            if offset != 0 && offset as u64 + 4 > buffer.len() as u64 {
                return Err(Error::InvalidData(format!(
                    "{} offset {:#x} does not leave room for its count header",
                    name, offset
                )));
            }
        }

        let string_info = if string_table != 0 {
            Some(Self::validate_string_table(buffer, string_table)?)
        } else {
            None
        };

        Self::validate_symbol_table(
            buffer,
            "export_table",
            export_table,
            string_info.as_ref(),
            section_size,
            symbol_size,
            options.validate_symbols,
        )?;
        Self::validate_symbol_table(
            buffer,
            "import_table",
            import_table,
            string_info.as_ref(),
            section_size,
            symbol_size,
            options.validate_symbols,
        )?;
        Self::validate_relocation_table(
            buffer,
            relocs_table,
            section_size,
            symbol_size,
            options.validate_symbols,
        )?;

        debug!(
            "View::open succeeded: section_size={:#x} symbol_size={:?}",
            section_size, symbol_size
        );

        Ok(View {
            buffer,
            export_table,
            import_table,
            relocs_table,
            string_table,
            section_start,
            section_size,
            symbol_size,
        })
    }

    fn validate_string_table(buffer: &[u8], table_offset: u32) -> Result<StringTableInfo> {
        let total: u32 = buffer.pread_with(table_offset as usize, LE)?;
        if table_offset as u64 + total as u64 > buffer.len() as u64 {
            return Err(Error::InvalidData(format!(
                "string table [{:#x}, {:#x}) exceeds buffer length {:#x}",
                table_offset,
                table_offset as u64 + total as u64,
                buffer.len()
            )));
        }

        let mut offset: u32 = 4;
        while offset != total {
            if offset > total {
                return Err(Error::InvalidData(
                    "string table entry overshoots declared total length".into(),
                ));
            }
            if offset.checked_add(4).map_or(true, |v| v > total) {
                return Err(Error::InvalidData(format!(
                    "string entry at relative offset {:#x} does not leave room for its length header",
                    offset
                )));
            }
            let len: u32 = buffer.pread_with((table_offset + offset) as usize, LE)?;
            let entry_end = offset
                .checked_add(len)
                .and_then(|v| v.checked_add(5))
                .ok_or_else(|| Error::InvalidData("string table entry length overflow".into()))?;
            if entry_end > total {
                return Err(Error::InvalidData(format!(
                    "string entry at relative offset {:#x} overflows total length {:#x}",
                    offset, total
                )));
            }
            let terminator_pos = (table_offset + offset + len + 4) as usize;
            if buffer[terminator_pos] != 0 {
                return Err(Error::InvalidData(format!(
                    "string entry at relative offset {:#x} is missing its zero terminator",
                    offset
                )));
            }
            offset = entry_end;
        }

        Ok(StringTableInfo {
            offset: table_offset,
            total_length: total,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_symbol_table(
        buffer: &[u8],
        label: &str,
        table_offset: u32,
        strings: Option<&StringTableInfo>,
        section_size: u32,
        symbol_size: SymbolSize,
        validate_symbols: bool,
    ) -> Result<()> {
        if table_offset == 0 {
            return Ok(());
        }
        let count: u32 = buffer.pread_with(table_offset as usize, LE)?;
        let entries_end = table_offset as u64 + 4 + count as u64 * 8;
        if entries_end > buffer.len() as u64 {
            return Err(Error::InvalidData(format!(
                "{} claims {} entries but overruns the buffer",
                label, count
            )));
        }
        if count > 0 && strings.is_none() {
            return Err(Error::InvalidData(format!(
                "{} has entries but no string table is present",
                label
            )));
        }
        for i in 0..count {
            let entry_offset = (table_offset + 4 + i * 8) as usize;
            let name_offset: u32 = buffer.pread_with(entry_offset, LE)?;
            let data_offset: u32 = buffer.pread_with(entry_offset + 4, LE)?;

            if let Some(strings) = strings {
                let min_room = 4 + 1; // length header + terminator
                if name_offset < strings.offset
                    || name_offset as u64 + min_room > strings.offset as u64 + strings.total_length as u64
                {
                    return Err(Error::InvalidData(format!(
                        "{} entry {} has name_offset {:#x} outside the string table",
                        label, i, name_offset
                    )));
                }
            }

            if validate_symbols
                && data_offset as u64 + symbol_size.bytes() as u64 > section_size as u64
            {
                return Err(Error::InvalidData(format!(
                    "{} entry {} data_offset {:#x} exceeds section_size {:#x}",
                    label, i, data_offset, section_size
                )));
            }
        }
        Ok(())
    }

    fn validate_relocation_table(
        buffer: &[u8],
        table_offset: u32,
        section_size: u32,
        symbol_size: SymbolSize,
        validate_symbols: bool,
    ) -> Result<()> {
        if table_offset == 0 {
            return Ok(());
        }
        let count: u32 = buffer.pread_with(table_offset as usize, LE)?;
        let entries_end = table_offset as u64 + 4 + count as u64 * 4;
        if entries_end > buffer.len() as u64 {
            return Err(Error::InvalidData(format!(
                "relocs_table claims {} entries but overruns the buffer",
                count
            )));
        }
        if validate_symbols {
            for i in 0..count {
                let entry_offset = (table_offset + 4 + i * 4) as usize;
                let reloc_offset: u32 = buffer.pread_with(entry_offset, LE)?;
                if reloc_offset as u64 + symbol_size.bytes() as u64 > section_size as u64 {
                    return Err(Error::InvalidData(format!(
                        "relocation {} offset {:#x} exceeds section_size {:#x}",
                        i, reloc_offset, section_size
                    )));
                }
            }
        }
        Ok(())
    }

    /// The export symbol table, or `None` if the file has no exports.
    pub fn exports(&self) -> Option<SymbolTable<'a>> {
        self.table_if_present(self.export_table)
    }

    /// The import symbol table, or `None` if the file has no imports.
    pub fn imports(&self) -> Option<SymbolTable<'a>> {
        self.table_if_present(self.import_table)
    }

    fn table_if_present(&self, offset: u32) -> Option<SymbolTable<'a>> {
        if offset == 0 {
            return None;
        }
        let count: u32 = self
            .buffer
            .pread_with(offset as usize, LE)
            .expect("validated by open");
        Some(SymbolTable::new(self.buffer, offset, count))
    }

    /// The relocation table, or `None` if the file has no relocations.
    pub fn relocations(&self) -> Option<RelocationTable<'a>> {
        if self.relocs_table == 0 {
            return None;
        }
        let count: u32 = self
            .buffer
            .pread_with(self.relocs_table as usize, LE)
            .expect("validated by open");
        Some(RelocationTable::new(self.buffer, self.relocs_table, count))
    }

    /// The string table, or `None` if the file has no strings.
    pub fn strings(&self) -> Option<StringTable<'a>> {
        if self.string_table == 0 {
            return None;
        }
        let total: u32 = self
            .buffer
            .pread_with(self.string_table as usize, LE)
            .expect("validated by open");
        Some(StringTable::new(self.buffer, self.string_table, total))
    }

    /// The data section's bytes.
    pub fn data(&self) -> &'a [u8] {
        let start = self.section_start as usize;
        let end = start + self.section_size as usize;
        &self.buffer[start..end]
    }

    /// The byte width of a patched pointer in this file.
    pub fn symbol_size(&self) -> SymbolSize {
        self.symbol_size
    }
}
