#![allow(dead_code)]

use dotmatrix_engines::pattern::{MIN_ROM_LEN, header_checksum};

/// Smallest cartridge image with a valid header.
pub fn cartridge(title: &str) -> Vec<u8> {
    let mut rom = vec![0u8; MIN_ROM_LEN * 2];
    rom[0x134..0x134 + title.len()].copy_from_slice(title.as_bytes());
    rom[0x14D] = header_checksum(&rom).unwrap();
    rom
}
