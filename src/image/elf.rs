//! ELF 32/64 loader.
//!
//! Program headers drive the address-space mapping (`PT_LOAD` with perms
//! from `p_flags`); section headers, when the image still has them, supply
//! the dynamic-symbol exports used by the symbol search strategy.

use crate::error::{Error, Result};
use crate::image::address_space::{AddressSpace, Perms, Record};
use crate::image::read::{read_cstring, ReadLe};
use crate::image::{Export, Image, ImageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

const PT_LOAD: u32 = 1;
const SHT_DYNSYM: u32 = 11;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

/// Below this load address an image cannot be a re-saved memory dump;
/// linked shared objects start at (or near) zero, loaded ones do not.
const DUMP_FLOOR_ELF64: u64 = 0x1_0000_0000;
const DUMP_FLOOR_ELF32: u64 = 0xC000_0000;

struct ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
}

struct SectionHeader {
    sh_type: u32,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
    sh_entsize: u64,
}

fn corrupt(what: &str) -> impl Fn(Error) -> Error + '_ {
    move |e| {
        if e.is_local_fault() {
            Error::CorruptImage(format!("{what}: {e}"))
        } else {
            e
        }
    }
}

/// A re-saved memory dump mirrors its load layout: file offsets equal the
/// virtual addresses, and the base sits where the OS loader put it rather
/// than where the linker did.
fn detect_dump(loads: &[&ProgramHeader], image_base: u64, floor: u64) -> bool {
    !loads.is_empty() && loads.iter().all(|p| p.p_offset == p.p_vaddr) && image_base >= floor
}

pub fn load(data: &[u8], class: ElfClass) -> Result<Image> {
    let (kind, ptr_size) = match class {
        ElfClass::Elf32 => (ImageKind::Elf32, 4u8),
        ElfClass::Elf64 => (ImageKind::Elf64, 8u8),
    };

    let phdrs = parse_program_headers(data, class).map_err(corrupt("ELF program headers"))?;
    let loads: Vec<&ProgramHeader> = phdrs.iter().filter(|p| p.p_type == PT_LOAD).collect();
    if loads.is_empty() {
        return Err(Error::CorruptImage("ELF image has no PT_LOAD segments".to_string()));
    }

    let mut records = Vec::with_capacity(loads.len());
    for p in &loads {
        if p.p_offset.checked_add(p.p_filesz).map_or(true, |end| end > data.len() as u64) {
            return Err(Error::CorruptImage(format!(
                "PT_LOAD at {:#x} extends past end of file",
                p.p_offset
            )));
        }
        let virt_end = p.p_vaddr.checked_add(p.p_filesz).ok_or_else(|| {
            Error::CorruptImage(format!(
                "PT_LOAD at {:#x} wraps the address space",
                p.p_vaddr
            ))
        })?;
        let mut perms = Perms::empty();
        if p.p_flags & PF_R != 0 {
            perms |= Perms::READ;
        }
        if p.p_flags & PF_W != 0 {
            perms |= Perms::WRITE;
        }
        if p.p_flags & PF_X != 0 {
            perms |= Perms::EXEC;
        }
        records.push(Record {
            virt_start: p.p_vaddr,
            virt_end,
            file_offset: p.p_offset,
            perms,
            name: None,
        });
    }

    let image_base = loads.iter().map(|p| p.p_vaddr).min().unwrap_or(0);
    let dump_floor = match class {
        ElfClass::Elf32 => DUMP_FLOOR_ELF32,
        ElfClass::Elf64 => DUMP_FLOOR_ELF64,
    };
    let is_dumped = detect_dump(&loads, image_base, dump_floor);

    let exports = parse_dynamic_symbols(data, class).unwrap_or_default();

    Ok(Image {
        kind,
        space: AddressSpace::new(data.to_vec(), records),
        ptr_size,
        image_base,
        exports,
        is_dumped,
    })
}

fn parse_program_headers(data: &[u8], class: ElfClass) -> Result<Vec<ProgramHeader>> {
    let (phoff, phentsize, phnum) = match class {
        ElfClass::Elf32 => (
            data.read_u32(0x1C)? as u64,
            data.read_u16(0x2A)? as usize,
            data.read_u16(0x2C)? as usize,
        ),
        ElfClass::Elf64 => (
            data.read_u64(0x20)?,
            data.read_u16(0x36)? as usize,
            data.read_u16(0x38)? as usize,
        ),
    };
    let expected = match class {
        ElfClass::Elf32 => 32,
        ElfClass::Elf64 => 56,
    };
    if phnum > 0 && phentsize != expected {
        return Err(Error::CorruptImage(format!(
            "invalid e_phentsize: expected {expected}, got {phentsize}"
        )));
    }

    let mut headers = Vec::with_capacity(phnum);
    for i in 0..phnum {
        let base = phoff as usize + i * phentsize;
        let header = match class {
            ElfClass::Elf32 => ProgramHeader {
                p_type: data.read_u32(base)?,
                p_offset: data.read_u32(base + 4)? as u64,
                p_vaddr: data.read_u32(base + 8)? as u64,
                p_filesz: data.read_u32(base + 16)? as u64,
                p_flags: data.read_u32(base + 24)?,
            },
            ElfClass::Elf64 => ProgramHeader {
                p_type: data.read_u32(base)?,
                p_flags: data.read_u32(base + 4)?,
                p_offset: data.read_u64(base + 8)?,
                p_vaddr: data.read_u64(base + 16)?,
                p_filesz: data.read_u64(base + 32)?,
            },
        };
        headers.push(header);
    }
    Ok(headers)
}

fn parse_section_headers(data: &[u8], class: ElfClass) -> Result<Vec<SectionHeader>> {
    let (shoff, shentsize, shnum) = match class {
        ElfClass::Elf32 => (
            data.read_u32(0x20)? as u64,
            data.read_u16(0x2E)? as usize,
            data.read_u16(0x30)? as usize,
        ),
        ElfClass::Elf64 => (
            data.read_u64(0x28)?,
            data.read_u16(0x3A)? as usize,
            data.read_u16(0x3C)? as usize,
        ),
    };
    if shoff == 0 || shnum == 0 {
        return Ok(Vec::new());
    }

    let mut headers = Vec::with_capacity(shnum);
    for i in 0..shnum {
        let base = shoff as usize + i * shentsize;
        let header = match class {
            ElfClass::Elf32 => SectionHeader {
                sh_type: data.read_u32(base + 4)?,
                sh_offset: data.read_u32(base + 16)? as u64,
                sh_size: data.read_u32(base + 20)? as u64,
                sh_link: data.read_u32(base + 24)?,
                sh_entsize: data.read_u32(base + 36)? as u64,
            },
            ElfClass::Elf64 => SectionHeader {
                sh_type: data.read_u32(base + 4)?,
                sh_offset: data.read_u64(base + 24)?,
                sh_size: data.read_u64(base + 32)?,
                sh_link: data.read_u32(base + 40)?,
                sh_entsize: data.read_u64(base + 56)?,
            },
        };
        headers.push(header);
    }
    Ok(headers)
}

/// Collect exported dynamic symbols, tolerating stripped images (empty list).
fn parse_dynamic_symbols(data: &[u8], class: ElfClass) -> Result<Vec<Export>> {
    let sections = parse_section_headers(data, class)?;
    let dynsym = match sections.iter().find(|s| s.sh_type == SHT_DYNSYM) {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };
    let strtab = match sections.get(dynsym.sh_link as usize) {
        Some(s) => s,
        None => return Ok(Vec::new()),
    };
    let strtab_bytes = strtab
        .sh_offset
        .checked_add(strtab.sh_size)
        .and_then(|end| data.get(strtab.sh_offset as usize..end as usize))
        .unwrap_or(&[]);

    let entsize = if dynsym.sh_entsize != 0 {
        dynsym.sh_entsize as usize
    } else {
        match class {
            ElfClass::Elf32 => 16,
            ElfClass::Elf64 => 24,
        }
    };
    let count = (dynsym.sh_size / entsize as u64) as usize;

    let mut exports = Vec::new();
    for i in 0..count {
        let base = dynsym.sh_offset as usize + i * entsize;
        let (name_idx, value, shndx) = match class {
            ElfClass::Elf32 => (
                data.read_u32(base)?,
                data.read_u32(base + 4)? as u64,
                data.read_u16(base + 14)?,
            ),
            ElfClass::Elf64 => (
                data.read_u32(base)?,
                data.read_u64(base + 8)?,
                data.read_u16(base + 6)?,
            ),
        };
        // Skip undefined and unnamed entries.
        if shndx == 0 || value == 0 || name_idx == 0 {
            continue;
        }
        if let Ok(name) = read_cstring(strtab_bytes, name_idx as usize) {
            if !name.is_empty() {
                exports.push(Export {
                    name: name.to_string(),
                    addr: value,
                });
            }
        }
    }
    Ok(exports)
}
