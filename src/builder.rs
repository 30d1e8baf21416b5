//! Stateful, appending writer that emits a well-formed SLF buffer.

use std::io::{Seek, SeekFrom, Write};

use indexmap::IndexMap;
use indexmap::IndexSet;
use log::debug;
use scroll::{IOwrite, LE};
use string_interner::StringInterner;

use crate::align_up;
use crate::error::Result;
use crate::header::{self, SymbolSize};

type StringId = string_interner::DefaultSymbol;

/// Stateful writer that emits a well-formed SLF buffer.
///
/// A `Builder` owns its string-interning arena and the in-progress
/// import/export/relocation indexes; it does not own the output stream,
/// which is borrowed and must outlive [`Builder::finalize`].
pub struct Builder<'s, S> {
    stream: &'s mut S,
    symbol_size: SymbolSize,
    strings: StringInterner<StringId>,
    string_order: IndexSet<StringId>,
    exports: IndexMap<StringId, u32>,
    imports: IndexMap<StringId, u32>,
    relocs: Vec<u32>,
}

impl<'s, S> Builder<'s, S>
where
    S: Write + Seek,
{
    /// Start a new builder, writing the stub header immediately.
    ///
    /// The stream cursor is left at `0x20`, ready for [`Builder::append`].
    pub fn new(symbol_size: SymbolSize, stream: &'s mut S) -> Result<Self> {
        stream.write_all(&header::MAGIC)?;
        // export_table, import_table, relocs_table, string_table: 0xAA placeholders.
        stream.write_all(&[0xAA; 16])?;
        stream.iowrite_with(header::DEFAULT_SECTION_START, LE)?;
        // section_size placeholder.
        stream.write_all(&[0xAA; 4])?;
        stream.write_all(&[symbol_size.to_byte()])?;
        stream.write_all(&[0u8; 3])?;

        debug_assert_eq!(
            stream.seek(SeekFrom::Current(0))? as u32,
            header::DEFAULT_SECTION_START
        );

        Ok(Builder {
            stream,
            symbol_size,
            strings: StringInterner::new(),
            string_order: IndexSet::new(),
            exports: IndexMap::new(),
            imports: IndexMap::new(),
            relocs: Vec::new(),
        })
    }

    /// The current section-relative write cursor.
    pub fn offset(&mut self) -> Result<u32> {
        let pos = self.stream.seek(SeekFrom::Current(0))?;
        Ok(pos as u32 - header::DEFAULT_SECTION_START)
    }

    /// Append bytes to the data section, advancing the write cursor.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    fn intern(&mut self, name: &str) -> StringId {
        let id = self.strings.get_or_intern(name);
        self.string_order.insert(id);
        id
    }

    /// Declare an export. `offset` defaults to the current write cursor.
    ///
    /// Re-declaring the same `name` replaces its offset (last-write wins).
    pub fn add_export<T: AsRef<str>>(&mut self, name: T, offset: Option<u32>) -> Result<()> {
        let offset = match offset {
            Some(offset) => offset,
            None => self.offset()?,
        };
        let id = self.intern(name.as_ref());
        self.exports.insert(id, offset);
        Ok(())
    }

    /// Declare an import. `offset` defaults to the current write cursor.
    ///
    /// Re-declaring the same `name` replaces its offset (last-write wins).
    pub fn add_import<T: AsRef<str>>(&mut self, name: T, offset: Option<u32>) -> Result<()> {
        let offset = match offset {
            Some(offset) => offset,
            None => self.offset()?,
        };
        let id = self.intern(name.as_ref());
        self.imports.insert(id, offset);
        Ok(())
    }

    /// Record an internal relocation at `offset` (defaults to the current
    /// write cursor). Duplicates are preserved.
    pub fn add_relocation(&mut self, offset: Option<u32>) -> Result<()> {
        let offset = match offset {
            Some(offset) => offset,
            None => self.offset()?,
        };
        self.relocs.push(offset);
        Ok(())
    }

    /// Commit the string, export, import, and relocation tables, then
    /// patch the header with their real positions.
    ///
    /// Consumes the builder: its state is invalid after this point.
    pub fn finalize(self) -> Result<()> {
        let Builder {
            stream,
            symbol_size: _,
            strings,
            string_order,
            exports,
            imports,
            relocs,
        } = self;

        let data_end = stream.seek(SeekFrom::Current(0))? as u32;

        let string_table_pos = align_up(data_end as u64, 4) as u32;
        stream.seek(SeekFrom::Start(string_table_pos as u64))?;
        let total_length: u32 = 4 + string_order
            .iter()
            .map(|&id| strings.resolve(id).expect("interned").len() as u32 + 5)
            .sum::<u32>();
        stream.iowrite_with(total_length, LE)?;
        let mut string_offsets: IndexMap<StringId, u32> = IndexMap::new();
        for &id in string_order.iter() {
            let text = strings.resolve(id).expect("interned");
            let entry_offset = stream.seek(SeekFrom::Current(0))? as u32;
            stream.iowrite_with(text.len() as u32, LE)?;
            stream.write_all(text.as_bytes())?;
            stream.write_all(&[0u8])?;
            string_offsets.insert(id, entry_offset);
        }
        let string_table_end = stream.seek(SeekFrom::Current(0))? as u32;

        let export_table_pos = align_up(string_table_end as u64, 4) as u32;
        stream.seek(SeekFrom::Start(export_table_pos as u64))?;
        stream.iowrite_with(exports.len() as u32, LE)?;
        for (&id, &data_offset) in exports.iter() {
            stream.iowrite_with(string_offsets[&id], LE)?;
            stream.iowrite_with(data_offset, LE)?;
        }
        let export_table_end = stream.seek(SeekFrom::Current(0))? as u32;

        let import_table_pos = align_up(export_table_end as u64, 4) as u32;
        stream.seek(SeekFrom::Start(import_table_pos as u64))?;
        stream.iowrite_with(imports.len() as u32, LE)?;
        for (&id, &data_offset) in imports.iter() {
            stream.iowrite_with(string_offsets[&id], LE)?;
            stream.iowrite_with(data_offset, LE)?;
        }
        let import_table_end = stream.seek(SeekFrom::Current(0))? as u32;

        let relocs_table_pos = align_up(import_table_end as u64, 4) as u32;
        stream.seek(SeekFrom::Start(relocs_table_pos as u64))?;
        stream.iowrite_with(relocs.len() as u32, LE)?;
        for &offset in relocs.iter() {
            stream.iowrite_with(offset, LE)?;
        }
        let end = stream.seek(SeekFrom::Current(0))?;

        debug!(
            "finalize: strings={:#x} exports={:#x} imports={:#x} relocs={:#x} section_size={:#x}",
            string_table_pos,
            export_table_pos,
            import_table_pos,
            relocs_table_pos,
            data_end - header::DEFAULT_SECTION_START
        );

        stream.seek(SeekFrom::Start(header::OFF_EXPORT_TABLE as u64))?;
        stream.iowrite_with(export_table_pos, LE)?;
        stream.iowrite_with(import_table_pos, LE)?;
        stream.iowrite_with(relocs_table_pos, LE)?;
        stream.iowrite_with(string_table_pos, LE)?;
        stream.iowrite_with(header::DEFAULT_SECTION_START, LE)?;
        stream.iowrite_with(data_end - header::DEFAULT_SECTION_START, LE)?;

        stream.seek(SeekFrom::Start(end))?;

        Ok(())
    }
}
