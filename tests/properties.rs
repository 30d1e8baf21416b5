//! Property-based checks for the `"for all"` invariants that a handful of
//! fixed examples can't cover well: round-tripping, interning, and
//! patch-arithmetic determinism.

use std::io::Cursor;

use proptest::collection::vec as pvec;
use proptest::prelude::*;
use slf::{Builder, LinkOptions, Linker, OpenOptions, SymbolSize, View};

fn symbol_size_strategy() -> impl Strategy<Value = SymbolSize> {
    prop_oneof![
        Just(SymbolSize::Bits8),
        Just(SymbolSize::Bits16),
        Just(SymbolSize::Bits32),
        Just(SymbolSize::Bits64),
    ]
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,15}"
}

proptest! {
    #[test]
    fn builder_data_round_trips(size in symbol_size_strategy(), data in pvec(any::<u8>(), 0..64)) {
        let mut stream = Cursor::new(Vec::new());
        let mut builder = Builder::new(size, &mut stream).unwrap();
        builder.append(&data).unwrap();
        builder.finalize().unwrap();

        let buffer = stream.into_inner();
        let view = View::open(&buffer, OpenOptions::new()).unwrap();
        prop_assert_eq!(view.data(), data.as_slice());
        prop_assert_eq!(view.symbol_size(), size);
    }

    #[test]
    fn duplicate_string_interns_once(size in symbol_size_strategy(), name in name_strategy()) {
        let mut stream = Cursor::new(Vec::new());
        let mut builder = Builder::new(size, &mut stream).unwrap();
        builder.add_export(&name, Some(0)).unwrap();
        builder.add_import(&name, Some(0)).unwrap();
        builder.finalize().unwrap();

        let buffer = stream.into_inner();
        let view = View::open(&buffer, OpenOptions::new()).unwrap();
        let strings = view.strings().unwrap();
        prop_assert_eq!(strings.iter().count(), 1);

        let export_name_offset = view.exports().unwrap().get(0).name_offset;
        let import_name_offset = view.imports().unwrap().get(0).name_offset;
        prop_assert_eq!(export_name_offset, import_name_offset);
    }

    #[test]
    fn reexport_of_same_name_keeps_last_offset(
        size in symbol_size_strategy(),
        name in name_strategy(),
        first in 0u32..1000,
        second in 0u32..1000,
    ) {
        let mut stream = Cursor::new(Vec::new());
        let mut builder = Builder::new(size, &mut stream).unwrap();
        builder.add_export(&name, Some(first)).unwrap();
        builder.add_export(&name, Some(second)).unwrap();
        builder.finalize().unwrap();

        let buffer = stream.into_inner();
        let view = View::open(&buffer, OpenOptions::new()).unwrap();
        let exports = view.exports().unwrap();
        prop_assert_eq!(exports.len(), 1);
        prop_assert_eq!(exports.get(0).data_offset, second);
    }

    #[test]
    fn link_is_deterministic(
        size in symbol_size_strategy(),
        data in pvec(any::<u8>(), 0..32),
        base_address in 0u64..0x10000,
    ) {
        let mut stream = Cursor::new(Vec::new());
        let mut module = Builder::new(size, &mut stream).unwrap();
        module.append(&data).unwrap();
        module.finalize().unwrap();
        let buffer = stream.into_inner();
        let view = View::open(&buffer, OpenOptions::new()).unwrap();

        let options = LinkOptions::new().base_address(base_address);

        let capacity = (base_address as usize) + 256;
        let mut out1 = Cursor::new(vec![0u8; capacity]);
        let mut out2 = Cursor::new(vec![0u8; capacity]);
        Linker::link(&[view], &options, &mut out1).unwrap();
        Linker::link(&[view], &options, &mut out2).unwrap();

        prop_assert_eq!(out1.into_inner(), out2.into_inner());
    }
}
