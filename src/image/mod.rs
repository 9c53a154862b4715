//! Binary-image abstraction: container format detection and loading.
//!
//! Each supported container is a variant of a closed [`ImageKind`] enum; the
//! per-format loaders normalize everything into the same [`AddressSpace`]
//! read/translate contract so the locator never sees format differences.

pub mod address_space;
pub mod elf;
pub mod macho;
pub mod nso;
pub mod pe;
pub mod read;
pub mod wasm;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::progress::ProgressSink;
use address_space::AddressSpace;
use read::ReadLe;

/// Supported executable container kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    Elf32,
    Elf64,
    Pe,
    MachO32,
    MachO64,
    Nso,
    Wasm,
}

impl ImageKind {
    pub fn name(&self) -> &'static str {
        match self {
            ImageKind::Elf32 => "ELF32",
            ImageKind::Elf64 => "ELF64",
            ImageKind::Pe => "PE",
            ImageKind::MachO32 => "MachO32",
            ImageKind::MachO64 => "MachO64",
            ImageKind::Nso => "NSO",
            ImageKind::Wasm => "WebAssembly",
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An exported/dynamic symbol usable by the symbol search strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub addr: u64,
}

/// A loaded image: format tag, normalized address space, and the
/// format-specific facts the locator needs (pointer width, export list,
/// dump detection).
#[derive(Debug)]
pub struct Image {
    pub kind: ImageKind,
    pub space: AddressSpace,
    /// Pointer width in bytes (4 or 8).
    pub ptr_size: u8,
    pub image_base: u64,
    pub exports: Vec<Export>,
    /// True when the file looks like a re-saved memory dump rather than a
    /// linked object; the load bias of such images is unknown.
    pub is_dumped: bool,
}

impl Image {
    /// Look up an export by exact name.
    pub fn export(&self, name: &str) -> Option<u64> {
        self.exports.iter().find(|e| e.name == name).map(|e| e.addr)
    }
}

const MAGIC_WASM: u32 = 0x6D73_6100;
const MAGIC_NSO: u32 = 0x304F_534E;
const MAGIC_PE: u32 = 0x0090_5A4D;
const MAGIC_ELF: u32 = 0x464C_457F;
const MAGIC_MACHO_64: u32 = 0xFEED_FACF;
const MAGIC_MACHO_32: u32 = 0xFEED_FACE;
const MAGIC_MACHO_FAT: u32 = 0xCAFE_BABE;
const MAGIC_MACHO_FAT_SWAPPED: u32 = 0xBEBA_FECA;

/// Detect the container kind from the first bytes of the file.
///
/// Fat Mach-O containers are recognized but explicitly unsupported: the
/// sub-image choice would need user input, which this engine does not take.
pub fn detect_kind(data: &[u8]) -> Result<ImageKind> {
    let magic = data
        .read_u32(0)
        .map_err(|_| Error::UnsupportedFormat("file shorter than 4 bytes".to_string()))?;
    match magic {
        MAGIC_WASM => Ok(ImageKind::Wasm),
        MAGIC_NSO => Ok(ImageKind::Nso),
        m if m & 0x00FF_FFFF == MAGIC_PE => Ok(ImageKind::Pe),
        MAGIC_ELF => match data.read_u8(4)? {
            2 => Ok(ImageKind::Elf64),
            _ => Ok(ImageKind::Elf32),
        },
        MAGIC_MACHO_64 => Ok(ImageKind::MachO64),
        MAGIC_MACHO_32 => Ok(ImageKind::MachO32),
        MAGIC_MACHO_FAT | MAGIC_MACHO_FAT_SWAPPED => Err(Error::UnsupportedFormat(
            "fat Mach-O containers are not supported".to_string(),
        )),
        other => Err(Error::UnsupportedFormat(format!("unknown magic {other:#010x}"))),
    }
}

/// Load an image, auto-detecting the container format.
pub fn load(data: &[u8], sink: &mut dyn ProgressSink) -> Result<Image> {
    let kind = detect_kind(data)?;
    sink.report(&format!("Detected file format: {kind}"));
    let image = match kind {
        ImageKind::Elf32 => elf::load(data, elf::ElfClass::Elf32)?,
        ImageKind::Elf64 => elf::load(data, elf::ElfClass::Elf64)?,
        ImageKind::Pe => pe::load(data)?,
        ImageKind::MachO32 => macho::load(data, false)?,
        ImageKind::MachO64 => macho::load(data, true)?,
        ImageKind::Nso => nso::load(data, sink)?,
        ImageKind::Wasm => wasm::load(data)?,
    };
    Ok(image)
}
