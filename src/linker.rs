//! Concatenates SLF modules into one output image, resolving imports
//! against exports and applying relocations.

use std::io::{Read, Seek, SeekFrom, Write};

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use scroll::{IOread, IOwrite, LE};

use crate::align_up;
use crate::error::{Error, Result};
use crate::header::SymbolSize;
use crate::view::View;

/// Configuration for [`Linker::link`].
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    /// Every module's base offset is rounded up to a multiple of this
    /// value, which must be a positive power of two.
    pub module_alignment: u32,
    /// Override the link-wide symbol size. When `None`, the first module's
    /// `symbol_size` is adopted.
    pub symbol_size: Option<SymbolSize>,
    /// The logical address at which the concatenated image is loaded.
    pub base_address: u64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            module_alignment: 16,
            symbol_size: None,
            base_address: 0,
        }
    }
}

impl LinkOptions {
    /// Options with every knob at its default.
    pub fn new() -> Self {
        LinkOptions::default()
    }

    /// Builder method to set the module alignment.
    pub fn module_alignment(mut self, align: u32) -> Self {
        self.module_alignment = align;
        self
    }

    /// Builder method to force a particular symbol size.
    pub fn symbol_size(mut self, size: SymbolSize) -> Self {
        self.symbol_size = Some(size);
        self
    }

    /// Builder method to set the base load address.
    pub fn base_address(mut self, address: u64) -> Self {
        self.base_address = address;
        self
    }
}

/// The result of a successful [`Linker::link`] call.
///
/// Formatting this for human consumption (a symbol-table dump, an
/// unresolved-symbols report) is left to the caller.
#[derive(Debug, Clone, Default)]
pub struct LinkReport {
    /// Every published export, keyed by name, mapped to its absolute
    /// address in the output image.
    pub symbols: IndexMap<String, u64>,
    /// Names that were imported by some module but never resolved against
    /// any export.
    pub unresolved: Vec<String>,
}

/// Links a sequence of [`View`]s into one output image.
///
/// Later modules' exports shadow earlier ones (see `spec.md` §4.4 and §9,
/// "Last-write shadowing").
pub struct Linker;

enum PatchMode {
    Replace,
    Add,
}

impl Linker {
    /// Concatenate `modules` into `output`, resolving symbols and applying
    /// relocations per `options`.
    pub fn link<S>(modules: &[View], options: &LinkOptions, output: &mut S) -> Result<LinkReport>
    where
        S: Read + Write + Seek,
    {
        if modules.is_empty() {
            return Err(Error::NothingToLink);
        }

        let symbol_size = match options.symbol_size {
            Some(size) => size,
            None => modules[0].symbol_size(),
        };

        let mut bases = Vec::with_capacity(modules.len());
        let mut cursor = options.base_address;
        for module in modules {
            if module.symbol_size() != symbol_size {
                return Err(Error::MismatchingSymbolSize {
                    expected: symbol_size,
                    found: module.symbol_size(),
                });
            }
            bases.push(cursor);
            let aligned_len = align_up(module.data().len() as u64, options.module_alignment as u64);
            cursor = cursor
                .checked_add(aligned_len)
                .ok_or(Error::IntegerOverflow { width: 64 })?;
        }

        debug!(
            "link: {} modules, base_address={:#x}, module_alignment={}, symbol_size={:?}",
            modules.len(),
            options.base_address,
            options.module_alignment,
            symbol_size
        );

        let mut symbol_table: IndexMap<String, u64> = IndexMap::new();
        let mut pending: Vec<(u64, String)> = Vec::new();

        for (module, &base) in modules.iter().zip(bases.iter()) {
            debug!("module base_offset={:#x}", base);
            output.seek(SeekFrom::Start(base))?;
            output.write_all(module.data())?;

            if let Some(imports) = module.imports() {
                for symbol in imports.iter() {
                    let name = resolve_name(module, symbol.name_offset);
                    let patch_site = base
                        .checked_add(symbol.data_offset as u64)
                        .ok_or(Error::IntegerOverflow { width: 64 })?;
                    match symbol_table.get(&name) {
                        Some(&address) => {
                            output.seek(SeekFrom::Start(patch_site))?;
                            patch(output, symbol_size, address, PatchMode::Replace)?;
                        }
                        None => pending.push((patch_site, name)),
                    }
                }
            }

            if let Some(exports) = module.exports() {
                for symbol in exports.iter() {
                    let name = resolve_name(module, symbol.name_offset);
                    let address = base
                        .checked_add(symbol.data_offset as u64)
                        .ok_or(Error::IntegerOverflow { width: 64 })?;
                    symbol_table.insert(name, address);
                }
            }

            let mut i = 0;
            while i < pending.len() {
                if let Some(&address) = symbol_table.get(&pending[i].1) {
                    let (patch_site, _) = pending.swap_remove(i);
                    output.seek(SeekFrom::Start(patch_site))?;
                    patch(output, symbol_size, address, PatchMode::Replace)?;
                } else {
                    i += 1;
                }
            }

            if let Some(relocs) = module.relocations() {
                for offset in relocs.iter() {
                    let site = base
                        .checked_add(offset as u64)
                        .ok_or(Error::IntegerOverflow { width: 64 })?;
                    output.seek(SeekFrom::Start(site))?;
                    patch(output, symbol_size, base, PatchMode::Add)?;
                }
            }
        }

        let mut unresolved = IndexSet::new();
        for (_, name) in &pending {
            warn!("unresolved external: {}", name);
            unresolved.insert(name.clone());
        }

        Ok(LinkReport {
            symbols: symbol_table,
            unresolved: unresolved.into_iter().collect(),
        })
    }
}

fn resolve_name(module: &View, name_offset: u32) -> String {
    let strings = module
        .strings()
        .expect("a module with symbols always has a string table");
    let entry = strings.get(name_offset);
    String::from_utf8_lossy(entry.text).into_owned()
}

fn read_uint<S: Read>(stream: &mut S, size: SymbolSize) -> Result<u64> {
    Ok(match size {
        SymbolSize::Bits8 => stream.ioread_with::<u8>(LE)? as u64,
        SymbolSize::Bits16 => stream.ioread_with::<u16>(LE)? as u64,
        SymbolSize::Bits32 => stream.ioread_with::<u32>(LE)? as u64,
        SymbolSize::Bits64 => stream.ioread_with::<u64>(LE)?,
    })
}

fn write_uint<S: Write>(stream: &mut S, size: SymbolSize, value: u64) -> Result<()> {
    match size {
        SymbolSize::Bits8 => stream.iowrite_with(value as u8, LE)?,
        SymbolSize::Bits16 => stream.iowrite_with(value as u16, LE)?,
        SymbolSize::Bits32 => stream.iowrite_with(value as u32, LE)?,
        SymbolSize::Bits64 => stream.iowrite_with(value, LE)?,
    }
    Ok(())
}

/// Read-modify-write a `size`-wide little-endian integer at the stream's
/// current position, leaving the position unchanged afterwards.
fn patch<S: Read + Write + Seek>(
    stream: &mut S,
    size: SymbolSize,
    value: u64,
    mode: PatchMode,
) -> Result<()> {
    let pos = stream.seek(SeekFrom::Current(0))?;
    let old = read_uint(stream, size)?;
    let new = match mode {
        PatchMode::Replace => {
            if value > size.max_value() {
                return Err(Error::ValueDoesNotFit {
                    value,
                    width: size.bits(),
                });
            }
            value
        }
        PatchMode::Add => old.wrapping_add(value) & size.max_value(),
    };
    stream.seek(SeekFrom::Start(pos))?;
    write_uint(stream, size, new)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn replace_patch_writes_value() {
        let mut buf = Cursor::new(vec![0u8; 4]);
        patch(&mut buf, SymbolSize::Bits32, 0x1234_5678, PatchMode::Replace).unwrap();
        assert_eq!(buf.into_inner(), vec![0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn replace_patch_rejects_oversized_value() {
        let mut buf = Cursor::new(vec![0u8; 2]);
        let err = patch(&mut buf, SymbolSize::Bits16, 0x1_0000, PatchMode::Replace).unwrap_err();
        assert!(matches!(err, Error::ValueDoesNotFit { .. }));
    }

    #[test]
    fn add_patch_wraps() {
        let mut buf = Cursor::new(vec![0xFF, 0xFF]);
        patch(&mut buf, SymbolSize::Bits16, 2, PatchMode::Add).unwrap();
        assert_eq!(buf.into_inner(), vec![0x01, 0x00]);
    }

    #[test]
    fn patch_restores_stream_position() {
        let mut buf = Cursor::new(vec![0u8; 8]);
        buf.seek(SeekFrom::Start(2)).unwrap();
        patch(&mut buf, SymbolSize::Bits32, 1, PatchMode::Replace).unwrap();
        assert_eq!(buf.seek(SeekFrom::Current(0)).unwrap(), 2);
    }
}
