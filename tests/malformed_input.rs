//! Table-driven checks that malformed buffers are rejected with the right
//! error kind, plus the handful of scenarios that need bespoke layouts.

use slf::{Error, OpenOptions, View};

enum Kind {
    InvalidHeader,
    InvalidData,
}

fn le(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// A full 32-byte header with every table offset absent (zero).
fn bare_header(symbol_size_byte: u8, section_start: u32, section_size: u32) -> Vec<u8> {
    let mut v = vec![0xFB, 0xAD, 0xB6, 0x02];
    v.extend_from_slice(&le(0)); // export_table
    v.extend_from_slice(&le(0)); // import_table
    v.extend_from_slice(&le(0)); // relocs_table
    v.extend_from_slice(&le(0)); // string_table
    v.extend_from_slice(&le(section_start));
    v.extend_from_slice(&le(section_size));
    v.push(symbol_size_byte);
    v.extend_from_slice(&[0, 0, 0]);
    v
}

fn table_offset_near_end() -> Vec<u8> {
    let mut v = bare_header(2, 0x20, 0);
    let len = v.len() as u32; // 32
    let near_end = len - 3;
    v[4..8].copy_from_slice(&le(near_end)); // export_table
    v
}

fn string_table_with_terminator(terminator: u8, total_length: u32) -> Vec<u8> {
    let mut v = bare_header(2, 0x20, 0);
    v[16..20].copy_from_slice(&le(32)); // string_table offset
    v.extend_from_slice(&le(total_length));
    v.extend_from_slice(&le(4)); // entry length
    v.extend_from_slice(b"test");
    v.push(terminator);
    v
}

#[test]
fn rejection_table() {
    let cases: Vec<(&str, Vec<u8>, Kind)> = vec![
        ("empty input", vec![], Kind::InvalidHeader),
        (
            "wrong magic",
            vec![0x00, 0x11, 0x22, 0x33],
            Kind::InvalidHeader,
        ),
        (
            "correct magic, nothing else",
            vec![0xFB, 0xAD, 0xB6, 0x02],
            Kind::InvalidData,
        ),
        (
            "header one byte short",
            bare_header(2, 0x20, 0)[..28].to_vec(),
            Kind::InvalidData,
        ),
        ("symbol_size 0", bare_header(0, 0x20, 0), Kind::InvalidData),
        ("symbol_size 3", bare_header(3, 0x20, 0), Kind::InvalidData),
        ("symbol_size 5", bare_header(5, 0x20, 0), Kind::InvalidData),
        ("symbol_size 7", bare_header(7, 0x20, 0), Kind::InvalidData),
        ("symbol_size 9", bare_header(9, 0x20, 0), Kind::InvalidData),
        (
            "table offset too close to end",
            table_offset_near_end(),
            Kind::InvalidData,
        ),
        (
            "string entry nonzero terminator",
            string_table_with_terminator(1, 13),
            Kind::InvalidData,
        ),
        (
            "string entry overflows declared total length",
            string_table_with_terminator(0, 8),
            Kind::InvalidData,
        ),
    ];

    for (name, buffer, expected) in cases {
        let result = View::open(&buffer, OpenOptions::new());
        match (&result, &expected) {
            (Err(Error::InvalidHeader(_)), Kind::InvalidHeader) => {}
            (Err(Error::InvalidData(_)), Kind::InvalidData) => {}
            (other, _) => panic!("case {:?}: unexpected result {:?}", name, other),
        }
    }
}
