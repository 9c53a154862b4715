//! Shared builders for synthetic ELF64 game binaries and metadata blobs.
//!
//! The binary layout is fixed: an executable text segment at 0x0..0x1000
//! and a read-only data segment at 0x1000..0x3000 (virtual == file offset)
//! holding the two registration structures when a scenario includes them.
//! The code table sits at 0x1000 and the metadata table at 0x2000, shifted
//! off pointer alignment for the symbol-only scenario.

#![allow(dead_code)]

pub const METHOD_COUNT: u64 = 10;
pub const TYPE_COUNT: u64 = 5;
pub const USAGE_PAIR_COUNT: u64 = 3;

pub const CODE_TABLE: u64 = 0x1000;
pub const METADATA_TABLE: u64 = 0x2000;
const METHOD_ARRAY: u64 = 0x1800;
const TYPES_ARRAY: u64 = 0x2100;
const SIZES_ARRAY: u64 = 0x2180;

const DYNSYM_OFF: usize = 0x2B00;
const DYNSTR_OFF: usize = 0x2B80;
const SHDR_OFF: usize = 0x2C00;

const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;
const SHT_STRTAB: u32 = 3;
const SHT_DYNSYM: u32 = 11;

fn put(buf: &mut [u8], at: u64, value: u64) {
    let at = at as usize;
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn put32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

struct Shape {
    text_flags: u32,
    structures: bool,
    /// Added to both struct bases; 4 knocks them off pointer alignment.
    shift: u64,
    symbols: bool,
}

fn elf64(shape: Shape) -> Vec<u8> {
    let mut data = vec![0u8; 0x3000];
    data[0..4].copy_from_slice(b"\x7fELF");
    data[4] = 2; // ELFCLASS64
    data[5] = 1; // little endian
    put(&mut data, 0x20, 0x40); // e_phoff
    data[0x36..0x38].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
    data[0x38..0x3A].copy_from_slice(&2u16.to_le_bytes()); // e_phnum

    // Text: offset 0, vaddr 0, 0x1000 bytes.
    let ph = 0x40usize;
    put32(&mut data, ph, PT_LOAD);
    put32(&mut data, ph + 4, shape.text_flags);
    put(&mut data, (ph + 32) as u64, 0x1000); // p_filesz

    // Data: offset 0x1000, vaddr 0x1000, 0x2000 bytes, read-only.
    let ph = ph + 56;
    put32(&mut data, ph, PT_LOAD);
    put32(&mut data, ph + 4, PF_R);
    put(&mut data, (ph + 8) as u64, 0x1000); // p_offset
    put(&mut data, (ph + 16) as u64, 0x1000); // p_vaddr
    put(&mut data, (ph + 32) as u64, 0x2000); // p_filesz

    if shape.structures {
        let code = CODE_TABLE + shape.shift;
        let meta = METADATA_TABLE + shape.shift;

        // Code table: method count, then method-pointer array.
        put(&mut data, code, METHOD_COUNT);
        put(&mut data, code + 8, METHOD_ARRAY);
        for i in 0..METHOD_COUNT {
            put(&mut data, METHOD_ARRAY + i * 8, 0x100 + i * 8);
        }

        // Metadata table: types pair at slots 6/7, type-sizes pair at
        // 12/13, usage-pair count at 14.
        put(&mut data, meta + 6 * 8, TYPE_COUNT);
        put(&mut data, meta + 7 * 8, TYPES_ARRAY);
        put(&mut data, meta + 12 * 8, TYPE_COUNT);
        put(&mut data, meta + 13 * 8, SIZES_ARRAY);
        put(&mut data, meta + 14 * 8, USAGE_PAIR_COUNT);
        for i in 0..TYPE_COUNT {
            put(&mut data, TYPES_ARRAY + i * 8, 0x2200 + i * 0x10);
        }
        put(&mut data, SIZES_ARRAY, 0x2280);
    }

    if shape.symbols {
        // .dynstr: "\0g_CodeRegistration\0g_MetadataRegistration\0"
        let strtab = b"\0g_CodeRegistration\0g_MetadataRegistration\0";
        data[DYNSTR_OFF..DYNSTR_OFF + strtab.len()].copy_from_slice(strtab);

        // .dynsym: null entry plus the two globals (shndx 1 = defined).
        let sym = |data: &mut [u8], index: usize, name_idx: u32, value: u64| {
            let base = DYNSYM_OFF + index * 24;
            put32(data, base, name_idx);
            data[base + 6..base + 8].copy_from_slice(&1u16.to_le_bytes());
            put(data, (base + 8) as u64, value);
        };
        sym(&mut data, 1, 1, CODE_TABLE + shape.shift);
        sym(&mut data, 2, 20, METADATA_TABLE + shape.shift);

        // Section headers: null, .dynsym (link -> 2), .dynstr.
        put(&mut data, 0x28, SHDR_OFF as u64); // e_shoff
        data[0x3A..0x3C].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        data[0x3C..0x3E].copy_from_slice(&3u16.to_le_bytes()); // e_shnum

        let sh = SHDR_OFF + 64;
        put32(&mut data, sh + 4, SHT_DYNSYM);
        put(&mut data, (sh + 24) as u64, DYNSYM_OFF as u64);
        put(&mut data, (sh + 32) as u64, 72);
        put32(&mut data, sh + 40, 2);
        put(&mut data, (sh + 56) as u64, 24);

        let sh = sh + 64;
        put32(&mut data, sh + 4, SHT_STRTAB);
        put(&mut data, (sh + 24) as u64, DYNSTR_OFF as u64);
        put(&mut data, (sh + 32) as u64, strtab.len() as u64);
    }
    data
}

/// Classified binary with both structures present at aligned addresses.
pub fn binary_classified() -> Vec<u8> {
    elf64(Shape {
        text_flags: PF_R | PF_X,
        structures: true,
        shift: 0,
        symbols: false,
    })
}

/// Same structures, but no executable classification anywhere.
pub fn binary_unclassified() -> Vec<u8> {
    elf64(Shape {
        text_flags: PF_R,
        structures: true,
        shift: 0,
        symbols: false,
    })
}

/// Well-formed binary without the registration structures.
pub fn binary_empty() -> Vec<u8> {
    elf64(Shape {
        text_flags: PF_R | PF_X,
        structures: false,
        shift: 0,
        symbols: false,
    })
}

/// Structures knocked off pointer alignment (invisible to both scan
/// strategies) but reachable through exported dynamic symbols.
pub fn binary_symbols_only() -> Vec<u8> {
    elf64(Shape {
        text_flags: PF_R,
        structures: true,
        shift: 4,
        symbols: true,
    })
}

/// A metadata blob declaring `version`, sized for the default scenario:
/// 10 method records (all with compiled bodies), 5 type records, and a
/// 3-entry usage-pair table.
pub fn metadata_blob(version: i32) -> Vec<u8> {
    // Record widths for the pre-24.2 layout family the scenarios use.
    const METHOD_RECORD: usize = 52;
    const TYPE_RECORD: usize = 100;
    const COMPILED_INDEX_OFFSET: usize = 20;

    let methods_off = 0x200usize;
    let methods_size = METHOD_COUNT as usize * METHOD_RECORD;
    let types_off = methods_off + methods_size;
    let types_size = TYPE_COUNT as usize * TYPE_RECORD;
    let usages_off = 0x100usize;
    let usages_size = USAGE_PAIR_COUNT as usize * 8;

    let mut blob = vec![0u8; types_off + types_size];
    blob[0..4].copy_from_slice(&0xFAB1_1BAFu32.to_le_bytes());
    blob[4..8].copy_from_slice(&version.to_le_bytes());

    let mut pair = |at: usize, offset: usize, size: usize| {
        blob[at..at + 4].copy_from_slice(&(offset as u32).to_le_bytes());
        blob[at + 4..at + 8].copy_from_slice(&(size as u32).to_le_bytes());
    };
    pair(0x30, methods_off, methods_size); // methods
    pair(0xA0, types_off, types_size); // typeDefinitions
    pair(0xC0, usages_off, usages_size); // metadataUsagePairs

    for i in 0..METHOD_COUNT as usize {
        let at = methods_off + i * METHOD_RECORD + COMPILED_INDEX_OFFSET;
        blob[at..at + 4].copy_from_slice(&(i as i32).to_le_bytes());
    }
    blob
}
