//! PE loader.
//!
//! The section table drives the primary mapping; the export directory, when
//! present, supplies symbols for the symbol search strategy. On Windows a
//! secondary loader ([`load_mapped`]) re-maps the file through the OS loader
//! (relocations and import bindings resolved natively) and rebuilds it as a
//! flat address space; elsewhere that fallback does not exist.

use crate::error::{Error, Result};
use crate::image::address_space::{AddressSpace, Perms, Record};
use crate::image::read::{read_cstring, read_name, ReadLe};
use crate::image::{Export, Image, ImageKind};

const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const OPT_MAGIC_PE32: u16 = 0x10B;
const OPT_MAGIC_PE32_PLUS: u16 = 0x20B;

const SCN_CNT_CODE: u32 = 0x0000_0020;
const SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const SCN_MEM_READ: u32 = 0x4000_0000;
const SCN_MEM_WRITE: u32 = 0x8000_0000;

struct OptionalHeader {
    ptr_size: u8,
    image_base: u64,
    export_rva: u32,
    export_size: u32,
}

pub fn load(data: &[u8]) -> Result<Image> {
    let e_lfanew = data
        .read_u32(0x3C)
        .map_err(|_| Error::CorruptImage("DOS header truncated".to_string()))? as usize;
    if data.read_u32(e_lfanew).ok() != Some(PE_SIGNATURE) {
        return Err(Error::CorruptImage("missing PE signature".to_string()));
    }

    let coff = e_lfanew + 4;
    let num_sections = data
        .read_u16(coff + 2)
        .map_err(|_| Error::CorruptImage("COFF header truncated".to_string()))?
        as usize;
    let size_of_optional = data.read_u16(coff + 16)? as usize;
    let opt_base = coff + 20;
    let opt = parse_optional_header(data, opt_base)
        .map_err(|_| Error::CorruptImage("optional header truncated".to_string()))?;

    let mut records = Vec::with_capacity(num_sections);
    let section_base = opt_base + size_of_optional;
    for i in 0..num_sections {
        let base = section_base + i * 40;
        let name = read_name(data, base, 8)
            .map_err(|_| Error::CorruptImage("section table truncated".to_string()))?;
        let virtual_address = data.read_u32(base + 12)? as u64;
        let raw_size = data.read_u32(base + 16)? as u64;
        let raw_ptr = data.read_u32(base + 20)? as u64;
        let characteristics = data.read_u32(base + 36)?;

        if raw_ptr.checked_add(raw_size).map_or(true, |end| end > data.len() as u64) {
            return Err(Error::CorruptImage(format!(
                "section {name} raw data extends past end of file"
            )));
        }

        let mut perms = Perms::empty();
        if characteristics & SCN_MEM_READ != 0 {
            perms |= Perms::READ;
        }
        if characteristics & SCN_MEM_WRITE != 0 {
            perms |= Perms::WRITE;
        }
        if characteristics & (SCN_MEM_EXECUTE | SCN_CNT_CODE) != 0 {
            perms |= Perms::EXEC;
        }
        let virt_start = opt
            .image_base
            .checked_add(virtual_address)
            .ok_or_else(|| {
                Error::CorruptImage(format!("section {name} wraps the address space"))
            })?;
        let virt_end = virt_start.checked_add(raw_size).ok_or_else(|| {
            Error::CorruptImage(format!("section {name} wraps the address space"))
        })?;
        records.push(Record {
            virt_start,
            virt_end,
            file_offset: raw_ptr,
            perms,
            name: Some(name),
        });
    }

    let space = AddressSpace::new(data.to_vec(), records);
    let exports = if opt.export_rva != 0 && opt.export_size != 0 {
        parse_exports(&space, opt.image_base, opt.export_rva).unwrap_or_default()
    } else {
        Vec::new()
    };

    Ok(Image {
        kind: ImageKind::Pe,
        space,
        ptr_size: opt.ptr_size,
        image_base: opt.image_base,
        exports,
        is_dumped: false,
    })
}

fn parse_optional_header(data: &[u8], base: usize) -> Result<OptionalHeader> {
    let magic = data.read_u16(base)?;
    let (ptr_size, image_base, dir_base) = match magic {
        OPT_MAGIC_PE32 => (4u8, data.read_u32(base + 28)? as u64, base + 96),
        OPT_MAGIC_PE32_PLUS => (8u8, data.read_u64(base + 24)?, base + 112),
        other => {
            return Err(Error::CorruptImage(format!(
                "unknown optional header magic {other:#06x}"
            )))
        }
    };
    let num_dirs = match magic {
        OPT_MAGIC_PE32 => data.read_u32(base + 92)?,
        _ => data.read_u32(base + 108)?,
    };
    let (export_rva, export_size) = if num_dirs > 0 {
        (data.read_u32(dir_base)?, data.read_u32(dir_base + 4)?)
    } else {
        (0, 0)
    };
    Ok(OptionalHeader {
        ptr_size,
        image_base,
        export_rva,
        export_size,
    })
}

/// Walk the export directory. Any fault just yields an empty list; a broken
/// export table only disables the symbol strategy, it does not fail the load.
fn parse_exports(space: &AddressSpace, image_base: u64, export_rva: u32) -> Result<Vec<Export>> {
    let dir = image_base + export_rva as u64;
    let number_of_names = space.read_u32(dir + 24)? as u64;
    let functions_rva = space.read_u32(dir + 28)? as u64;
    let names_rva = space.read_u32(dir + 32)? as u64;
    let ordinals_rva = space.read_u32(dir + 36)? as u64;

    let mut exports = Vec::with_capacity(number_of_names as usize);
    for i in 0..number_of_names {
        let name_rva = space.read_u32(image_base + names_rva + i * 4)? as u64;
        let name_off = space.virt_to_file(image_base + name_rva)? as usize;
        let name = read_cstring(space.data(), name_off)?;

        let ordinal_addr = image_base + ordinals_rva + i * 2;
        let ordinal = u16::from_le_bytes(space.read_bytes(ordinal_addr, 2)?.try_into().unwrap());
        let func_rva = space.read_u32(image_base + functions_rva + u64::from(ordinal) * 4)?;
        if func_rva == 0 {
            continue;
        }
        exports.push(Export {
            name: name.to_string(),
            addr: image_base + func_rva as u64,
        });
    }
    Ok(exports)
}

/// Re-load a PE through the OS loader and snapshot the mapped image.
///
/// Only meaningful on an OS that can load PE images natively; the snapshot
/// becomes a single read/write/execute record at the actual load base, which
/// is what the search strategies would have seen in a live process.
#[cfg(windows)]
pub fn load_mapped(path: &std::path::Path) -> Result<Image> {
    use libloading::os::windows::Library;

    // DONT_RESOLVE_DLL_REFERENCES is deliberately not used: import binding
    // is the point of this fallback.
    let library = unsafe { Library::new(path) }
        .map_err(|e| Error::CorruptImage(format!("OS loader rejected PE image: {e}")))?;

    // HMODULE is the image base. Leaked on purpose so the mapping stays
    // valid while we snapshot it.
    let base = library.into_raw() as usize;
    let header = unsafe { std::slice::from_raw_parts(base as *const u8, 0x1000) };
    let e_lfanew = header.read_u32(0x3C)? as usize;
    let size_of_image = header.read_u32(e_lfanew + 4 + 20 + 56)? as usize;

    let bytes = unsafe { std::slice::from_raw_parts(base as *const u8, size_of_image) }.to_vec();
    let record = Record {
        virt_start: base as u64,
        virt_end: base as u64 + size_of_image as u64,
        file_offset: 0,
        perms: Perms::READ | Perms::WRITE | Perms::EXEC,
        name: Some("mapped".to_string()),
    };

    let ptr_size = if cfg!(target_pointer_width = "64") { 8 } else { 4 };
    Ok(Image {
        kind: ImageKind::Pe,
        space: AddressSpace::new(bytes, vec![record]),
        ptr_size,
        image_base: base as u64,
        exports: Vec::new(),
        is_dumped: false,
    })
}
