//! NSO loader (console-compressed format).
//!
//! The three segments (text/rodata/data) are optionally LZ4 block-compressed
//! in the file; decompression happens exactly once at load, after which the
//! image is materialized as a flat memory buffer whose records are
//! identity-mapped (virtual address == buffer offset).

use crate::error::{Error, Result};
use crate::image::address_space::{AddressSpace, Perms, Record};
use crate::image::read::ReadLe;
use crate::image::{Image, ImageKind};
use crate::progress::ProgressSink;

const FLAG_TEXT_COMPRESSED: u32 = 1 << 0;
const FLAG_RODATA_COMPRESSED: u32 = 1 << 1;
const FLAG_DATA_COMPRESSED: u32 = 1 << 2;

/// Upper bound on the rebuilt memory image; header-supplied offsets must
/// not be able to demand a multi-gigabyte allocation from a tiny file.
const MAX_IMAGE_SIZE: u64 = 1 << 30;

struct SegmentHeader {
    file_offset: u32,
    memory_offset: u32,
    size: u32,
}

fn segment_header(data: &[u8], offset: usize) -> Result<SegmentHeader> {
    Ok(SegmentHeader {
        file_offset: data.read_u32(offset)?,
        memory_offset: data.read_u32(offset + 4)?,
        size: data.read_u32(offset + 8)?,
    })
}

pub fn load(data: &[u8], sink: &mut dyn ProgressSink) -> Result<Image> {
    let corrupt = |e: Error| {
        if e.is_local_fault() {
            Error::CorruptImage(format!("NSO header: {e}"))
        } else {
            e
        }
    };

    let flags = data.read_u32(0x0C).map_err(corrupt)?;
    let text = segment_header(data, 0x10).map_err(corrupt)?;
    let rodata = segment_header(data, 0x20).map_err(corrupt)?;
    let segment = segment_header(data, 0x30).map_err(corrupt)?;
    let text_compressed_size = data.read_u32(0x60).map_err(corrupt)?;
    let rodata_compressed_size = data.read_u32(0x64).map_err(corrupt)?;
    let data_compressed_size = data.read_u32(0x68).map_err(corrupt)?;

    if flags & (FLAG_TEXT_COMPRESSED | FLAG_RODATA_COMPRESSED | FLAG_DATA_COMPRESSED) != 0 {
        sink.report("Decompressing NSO segments...");
    }
    let text_bytes = segment_bytes(data, &text, flags & FLAG_TEXT_COMPRESSED != 0, text_compressed_size)?;
    let rodata_bytes = segment_bytes(
        data,
        &rodata,
        flags & FLAG_RODATA_COMPRESSED != 0,
        rodata_compressed_size,
    )?;
    let data_bytes = segment_bytes(
        data,
        &segment,
        flags & FLAG_DATA_COMPRESSED != 0,
        data_compressed_size,
    )?;

    // Lay the decompressed segments out at their memory offsets.
    let end = [
        u64::from(text.memory_offset) + text_bytes.len() as u64,
        u64::from(rodata.memory_offset) + rodata_bytes.len() as u64,
        u64::from(segment.memory_offset) + data_bytes.len() as u64,
    ]
    .into_iter()
    .max()
    .unwrap_or(0);
    if end > MAX_IMAGE_SIZE {
        return Err(Error::CorruptImage(format!(
            "NSO memory image of {end:#x} bytes exceeds the materialization limit"
        )));
    }

    let mut memory = vec![0u8; end as usize];
    memory[text.memory_offset as usize..text.memory_offset as usize + text_bytes.len()]
        .copy_from_slice(&text_bytes);
    memory[rodata.memory_offset as usize..rodata.memory_offset as usize + rodata_bytes.len()]
        .copy_from_slice(&rodata_bytes);
    memory[segment.memory_offset as usize..segment.memory_offset as usize + data_bytes.len()]
        .copy_from_slice(&data_bytes);

    let record = |seg: &SegmentHeader, len: usize, perms: Perms, name: &str| Record {
        virt_start: seg.memory_offset as u64,
        virt_end: seg.memory_offset as u64 + len as u64,
        file_offset: seg.memory_offset as u64,
        perms,
        name: Some(name.to_string()),
    };
    let records = vec![
        record(&text, text_bytes.len(), Perms::READ | Perms::EXEC, ".text"),
        record(&rodata, rodata_bytes.len(), Perms::READ, ".rodata"),
        record(&segment, data_bytes.len(), Perms::READ | Perms::WRITE, ".data"),
    ];

    Ok(Image {
        kind: ImageKind::Nso,
        space: AddressSpace::new(memory, records),
        ptr_size: 8,
        image_base: 0,
        exports: Vec::new(),
        is_dumped: false,
    })
}

fn segment_bytes(
    data: &[u8],
    seg: &SegmentHeader,
    compressed: bool,
    compressed_size: u32,
) -> Result<Vec<u8>> {
    let stored = if compressed { compressed_size } else { seg.size };
    let start = seg.file_offset as usize;
    let end = start
        .checked_add(stored as usize)
        .filter(|&e| e <= data.len())
        .ok_or_else(|| {
            Error::CorruptImage(format!(
                "NSO segment at {:#x} extends past end of file",
                seg.file_offset
            ))
        })?;
    let raw = &data[start..end];
    if compressed {
        lz4_flex::block::decompress(raw, seg.size as usize)
            .map_err(|e| Error::CorruptImage(format!("NSO LZ4 decompression failed: {e}")))
    } else {
        Ok(raw.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;

    fn build_nso(compress: bool) -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
        let text: Vec<u8> = (0u8..64).collect();
        let rodata = vec![0xAAu8; 32];
        let data_seg = vec![0x55u8; 32];

        let (text_stored, rodata_stored, data_stored, flags) = if compress {
            (
                lz4_flex::block::compress(&text),
                lz4_flex::block::compress(&rodata),
                lz4_flex::block::compress(&data_seg),
                FLAG_TEXT_COMPRESSED | FLAG_RODATA_COMPRESSED | FLAG_DATA_COMPRESSED,
            )
        } else {
            (text.clone(), rodata.clone(), data_seg.clone(), 0)
        };

        let mut file = vec![0u8; 0x100];
        file[0..4].copy_from_slice(b"NSO0");
        file[0x0C..0x10].copy_from_slice(&flags.to_le_bytes());

        let mut cursor = 0x100usize;
        let mut write_seg = |header_at: usize, mem_off: u32, bytes: &[u8], size: u32| {
            file[header_at..header_at + 4].copy_from_slice(&(cursor as u32).to_le_bytes());
            file[header_at + 4..header_at + 8].copy_from_slice(&mem_off.to_le_bytes());
            file[header_at + 8..header_at + 12].copy_from_slice(&size.to_le_bytes());
            let at = cursor;
            cursor += bytes.len();
            (at, bytes.to_vec())
        };
        let (_, t) = write_seg(0x10, 0x0, &text_stored, text.len() as u32);
        let (_, r) = write_seg(0x20, 0x1000, &rodata_stored, rodata.len() as u32);
        let (_, d) = write_seg(0x30, 0x2000, &data_stored, data_seg.len() as u32);
        file[0x60..0x64].copy_from_slice(&(text_stored.len() as u32).to_le_bytes());
        file[0x64..0x68].copy_from_slice(&(rodata_stored.len() as u32).to_le_bytes());
        file[0x68..0x6C].copy_from_slice(&(data_stored.len() as u32).to_le_bytes());
        file.extend_from_slice(&t);
        file.extend_from_slice(&r);
        file.extend_from_slice(&d);
        (file, text, rodata, data_seg)
    }

    #[test]
    fn test_load_uncompressed() {
        let (file, text, rodata, data_seg) = build_nso(false);
        let image = load(&file, &mut NullSink).unwrap();
        assert_eq!(image.kind, ImageKind::Nso);
        assert_eq!(image.space.read_bytes(0, text.len()).unwrap(), &text[..]);
        assert_eq!(image.space.read_bytes(0x1000, rodata.len()).unwrap(), &rodata[..]);
        assert_eq!(image.space.read_bytes(0x2000, data_seg.len()).unwrap(), &data_seg[..]);
        // Identity mapping: virtual address equals rebuilt-buffer offset.
        assert_eq!(image.space.virt_to_file(0x1000).unwrap(), 0x1000);
    }

    #[test]
    fn test_load_compressed_matches_uncompressed() {
        let (file, text, _, _) = build_nso(true);
        let image = load(&file, &mut NullSink).unwrap();
        assert_eq!(image.space.read_bytes(0, text.len()).unwrap(), &text[..]);
        assert!(image.space.has_classification());
    }

    #[test]
    fn test_corrupt_compressed_stream() {
        let (mut file, _, _, _) = build_nso(true);
        // Zero the text segment's stored bytes: a zero token demands a
        // zero-offset match, which no LZ4 decoder accepts.
        for b in &mut file[0x100..0x110] {
            *b = 0;
        }
        assert!(matches!(load(&file, &mut NullSink), Err(Error::CorruptImage(_))));
    }

    #[test]
    fn test_huge_memory_offset_is_corrupt() {
        let (mut file, _, _, _) = build_nso(false);
        // Data segment placed far past the materialization limit.
        file[0x34..0x38].copy_from_slice(&0xF000_0000u32.to_le_bytes());
        assert!(matches!(
            load(&file, &mut NullSink),
            Err(Error::CorruptImage(_))
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            load(b"NSO0\0\0\0\0", &mut NullSink),
            Err(Error::CorruptImage(_))
        ));
    }
}
