//! Mach-O 32/64 loader.
//!
//! Segment load commands build the mapping (perms from `initprot`); the
//! `LC_SYMTAB` command supplies exported symbols, which on Mach-O carry a
//! leading underscore. Fat containers never reach this module; they are
//! rejected at magic detection.

use crate::error::{Error, Result};
use crate::image::address_space::{AddressSpace, Perms, Record};
use crate::image::read::{read_cstring, read_name, ReadLe};
use crate::image::{Export, Image, ImageKind};

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_SEGMENT_64: u32 = 0x19;

const VM_PROT_READ: u32 = 1;
const VM_PROT_WRITE: u32 = 2;
const VM_PROT_EXECUTE: u32 = 4;

const N_EXT: u8 = 0x01;
const N_TYPE: u8 = 0x0E;
const N_SECT: u8 = 0x0E;

pub fn load(data: &[u8], is_64: bool) -> Result<Image> {
    let (kind, ptr_size, header_size) = if is_64 {
        (ImageKind::MachO64, 8u8, 32usize)
    } else {
        (ImageKind::MachO32, 4u8, 28usize)
    };

    let ncmds = data
        .read_u32(16)
        .map_err(|_| Error::CorruptImage("Mach-O header truncated".to_string()))?;

    let mut records = Vec::new();
    let mut image_base = u64::MAX;
    let mut symtab: Option<(u32, u32, u32, u32)> = None;

    let mut offset = header_size;
    for _ in 0..ncmds {
        let cmd = data
            .read_u32(offset)
            .map_err(|_| Error::CorruptImage("load commands truncated".to_string()))?;
        let cmdsize = data.read_u32(offset + 4)? as usize;
        if cmdsize < 8 {
            return Err(Error::CorruptImage(format!(
                "load command at {offset:#x} has size {cmdsize}"
            )));
        }

        match cmd {
            LC_SEGMENT if !is_64 => {
                let name = read_name(data, offset + 8, 16)?;
                let vmaddr = data.read_u32(offset + 24)? as u64;
                let fileoff = data.read_u32(offset + 32)? as u64;
                let filesize = data.read_u32(offset + 36)? as u64;
                let initprot = data.read_u32(offset + 44)?;
                push_segment(&mut records, data, name, vmaddr, fileoff, filesize, initprot)?;
                if filesize > 0 {
                    image_base = image_base.min(vmaddr);
                }
            }
            LC_SEGMENT_64 if is_64 => {
                let name = read_name(data, offset + 8, 16)?;
                let vmaddr = data.read_u64(offset + 24)?;
                let fileoff = data.read_u64(offset + 40)?;
                let filesize = data.read_u64(offset + 48)?;
                let initprot = data.read_u32(offset + 60)?;
                push_segment(&mut records, data, name, vmaddr, fileoff, filesize, initprot)?;
                if filesize > 0 {
                    image_base = image_base.min(vmaddr);
                }
            }
            LC_SYMTAB => {
                symtab = Some((
                    data.read_u32(offset + 8)?,
                    data.read_u32(offset + 12)?,
                    data.read_u32(offset + 16)?,
                    data.read_u32(offset + 20)?,
                ));
            }
            _ => {}
        }
        offset += cmdsize;
    }

    if records.is_empty() {
        return Err(Error::CorruptImage("Mach-O image has no mapped segments".to_string()));
    }

    let exports = symtab
        .map(|(symoff, nsyms, stroff, strsize)| {
            parse_symtab(data, is_64, symoff, nsyms, stroff, strsize).unwrap_or_default()
        })
        .unwrap_or_default();

    Ok(Image {
        kind,
        space: AddressSpace::new(data.to_vec(), records),
        ptr_size,
        image_base: if image_base == u64::MAX { 0 } else { image_base },
        exports,
        is_dumped: false,
    })
}

fn push_segment(
    records: &mut Vec<Record>,
    data: &[u8],
    name: String,
    vmaddr: u64,
    fileoff: u64,
    filesize: u64,
    initprot: u32,
) -> Result<()> {
    if fileoff.checked_add(filesize).map_or(true, |end| end > data.len() as u64) {
        return Err(Error::CorruptImage(format!(
            "segment {name} extends past end of file"
        )));
    }
    let virt_end = vmaddr.checked_add(filesize).ok_or_else(|| {
        Error::CorruptImage(format!("segment {name} wraps the address space"))
    })?;
    let mut perms = Perms::empty();
    if initprot & VM_PROT_READ != 0 {
        perms |= Perms::READ;
    }
    if initprot & VM_PROT_WRITE != 0 {
        perms |= Perms::WRITE;
    }
    if initprot & VM_PROT_EXECUTE != 0 {
        perms |= Perms::EXEC;
    }
    records.push(Record {
        virt_start: vmaddr,
        virt_end,
        file_offset: fileoff,
        perms,
        name: Some(name),
    });
    Ok(())
}

fn parse_symtab(
    data: &[u8],
    is_64: bool,
    symoff: u32,
    nsyms: u32,
    stroff: u32,
    strsize: u32,
) -> Result<Vec<Export>> {
    let strtab = data
        .get(stroff as usize..(u64::from(stroff) + u64::from(strsize)) as usize)
        .unwrap_or(&[]);
    let entsize = if is_64 { 16 } else { 12 };

    let mut exports = Vec::new();
    for i in 0..nsyms as usize {
        let base = symoff as usize + i * entsize;
        let n_strx = data.read_u32(base)?;
        let n_type = data.read_u8(base + 4)?;
        let n_value = if is_64 {
            data.read_u64(base + 8)?
        } else {
            data.read_u32(base + 8)? as u64
        };
        if n_type & N_EXT == 0 || n_type & N_TYPE != N_SECT || n_value == 0 || n_strx == 0 {
            continue;
        }
        if let Ok(name) = read_cstring(strtab, n_strx as usize) {
            if !name.is_empty() {
                exports.push(Export {
                    name: name.to_string(),
                    addr: n_value,
                });
            }
        }
    }
    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal 64-bit Mach-O: __TEXT (r-x), __DATA (rw-), and a symtab with
    /// one exported symbol.
    fn minimal_macho64() -> Vec<u8> {
        let mut data = vec![0u8; 0x400];
        data[0..4].copy_from_slice(&0xFEED_FACFu32.to_le_bytes());
        data[16..20].copy_from_slice(&3u32.to_le_bytes()); // ncmds

        // LC_SEGMENT_64 __TEXT
        let cmd = 32;
        data[cmd..cmd + 4].copy_from_slice(&LC_SEGMENT_64.to_le_bytes());
        data[cmd + 4..cmd + 8].copy_from_slice(&72u32.to_le_bytes());
        data[cmd + 8..cmd + 14].copy_from_slice(b"__TEXT");
        data[cmd + 24..cmd + 32].copy_from_slice(&0x1_0000u64.to_le_bytes()); // vmaddr
        data[cmd + 40..cmd + 48].copy_from_slice(&0u64.to_le_bytes()); // fileoff
        data[cmd + 48..cmd + 56].copy_from_slice(&0x200u64.to_le_bytes()); // filesize
        data[cmd + 60..cmd + 64]
            .copy_from_slice(&(VM_PROT_READ | VM_PROT_EXECUTE).to_le_bytes());

        // LC_SEGMENT_64 __DATA
        let cmd = cmd + 72;
        data[cmd..cmd + 4].copy_from_slice(&LC_SEGMENT_64.to_le_bytes());
        data[cmd + 4..cmd + 8].copy_from_slice(&72u32.to_le_bytes());
        data[cmd + 8..cmd + 14].copy_from_slice(b"__DATA");
        data[cmd + 24..cmd + 32].copy_from_slice(&0x2_0000u64.to_le_bytes());
        data[cmd + 40..cmd + 48].copy_from_slice(&0x200u64.to_le_bytes());
        data[cmd + 48..cmd + 56].copy_from_slice(&0x100u64.to_le_bytes());
        data[cmd + 60..cmd + 64]
            .copy_from_slice(&(VM_PROT_READ | VM_PROT_WRITE).to_le_bytes());

        // LC_SYMTAB: one nlist_64 at 0x300, strings at 0x320
        let cmd = cmd + 72;
        data[cmd..cmd + 4].copy_from_slice(&LC_SYMTAB.to_le_bytes());
        data[cmd + 4..cmd + 8].copy_from_slice(&24u32.to_le_bytes());
        data[cmd + 8..cmd + 12].copy_from_slice(&0x300u32.to_le_bytes()); // symoff
        data[cmd + 12..cmd + 16].copy_from_slice(&1u32.to_le_bytes()); // nsyms
        data[cmd + 16..cmd + 20].copy_from_slice(&0x320u32.to_le_bytes()); // stroff
        data[cmd + 20..cmd + 24].copy_from_slice(&0x40u32.to_le_bytes()); // strsize

        data[0x300..0x304].copy_from_slice(&1u32.to_le_bytes()); // n_strx
        data[0x304] = N_EXT | N_SECT; // n_type
        data[0x308..0x310].copy_from_slice(&0x2_0040u64.to_le_bytes()); // n_value
        data[0x321..0x336].copy_from_slice(b"_g_CodeRegistration\0\0");
        data
    }

    #[test]
    fn test_load_minimal_macho64() {
        let data = minimal_macho64();
        let image = load(&data, true).unwrap();
        assert_eq!(image.kind, ImageKind::MachO64);
        assert_eq!(image.ptr_size, 8);
        assert_eq!(image.image_base, 0x1_0000);
        assert_eq!(image.space.records().len(), 2);
        assert!(image.space.has_classification());
        assert_eq!(image.export("_g_CodeRegistration"), Some(0x2_0040));
    }

    #[test]
    fn test_segment_past_eof_is_corrupt() {
        let mut data = minimal_macho64();
        data[32 + 48..32 + 56].copy_from_slice(&0x10_0000u64.to_le_bytes());
        assert!(matches!(load(&data, true), Err(Error::CorruptImage(_))));
    }

    #[test]
    fn test_vmaddr_near_max_is_corrupt() {
        let mut data = minimal_macho64();
        // __TEXT vmaddr + filesize would wrap past u64::MAX.
        data[32 + 24..32 + 32].copy_from_slice(&(u64::MAX - 0x10).to_le_bytes());
        assert!(matches!(load(&data, true), Err(Error::CorruptImage(_))));
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        assert!(matches!(
            load(&[0xCF, 0xFA, 0xED, 0xFE], true),
            Err(Error::CorruptImage(_))
        ));
    }
}
