//! WebAssembly loader.
//!
//! The module is reinterpreted as flat linear memory: active data segments
//! are materialized at their `i32.const` offsets into one buffer, and each
//! segment becomes a read/write record with virtual address == memory
//! offset. Wasm carries no executable/data classification for linear
//! memory, so the cross-reference strategy is structurally unavailable
//! here.

use crate::error::{Error, Result};
use crate::image::address_space::{AddressSpace, Perms, Record};
use crate::image::read::{read_uleb128, ReadLe};
use crate::image::{Image, ImageKind};

const SECTION_DATA: u8 = 11;
const OP_I32_CONST: u8 = 0x41;
const OP_END: u8 = 0x0B;

/// Upper bound on materialized linear memory; a tiny module must not be
/// able to demand a multi-gigabyte allocation through its segment offsets.
const MAX_LINEAR_MEMORY: u64 = 1 << 30;

struct DataSegment {
    memory_offset: u64,
    bytes_start: usize,
    bytes_len: usize,
}

fn read_sleb128(data: &[u8], offset: usize) -> Result<(i64, usize)> {
    let mut value = 0i64;
    let mut shift = 0u32;
    let mut len = 0usize;
    loop {
        let byte = data.read_u8(offset + len)?;
        len += 1;
        value |= i64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                value |= -1i64 << shift;
            }
            return Ok((value, len));
        }
        if shift >= 64 {
            return Err(Error::CorruptImage(format!(
                "unterminated LEB128 at {offset:#x}"
            )));
        }
    }
}

pub fn load(data: &[u8]) -> Result<Image> {
    let corrupt = |e: Error| {
        if e.is_local_fault() {
            Error::CorruptImage(format!("wasm module: {e}"))
        } else {
            e
        }
    };

    let segments = parse_data_segments(data).map_err(corrupt)?;

    let mut end = 0u64;
    for seg in &segments {
        let seg_end = seg
            .memory_offset
            .checked_add(seg.bytes_len as u64)
            .ok_or_else(|| {
                Error::CorruptImage(format!(
                    "wasm data segment at {:#x} wraps linear memory",
                    seg.memory_offset
                ))
            })?;
        end = end.max(seg_end);
    }
    if end > MAX_LINEAR_MEMORY {
        return Err(Error::CorruptImage(format!(
            "wasm linear memory of {end:#x} bytes exceeds the materialization limit"
        )));
    }
    let mut memory = vec![0u8; end as usize];
    let mut records = Vec::with_capacity(segments.len());
    for seg in &segments {
        let dst = seg.memory_offset as usize;
        memory[dst..dst + seg.bytes_len]
            .copy_from_slice(&data[seg.bytes_start..seg.bytes_start + seg.bytes_len]);
        records.push(Record {
            virt_start: seg.memory_offset,
            virt_end: seg.memory_offset + seg.bytes_len as u64,
            file_offset: seg.memory_offset,
            perms: Perms::READ | Perms::WRITE,
            name: None,
        });
    }

    Ok(Image {
        kind: ImageKind::Wasm,
        space: AddressSpace::new(memory, records),
        ptr_size: 4,
        image_base: 0,
        exports: Vec::new(),
        is_dumped: false,
    })
}

fn parse_data_segments(data: &[u8]) -> Result<Vec<DataSegment>> {
    let mut offset = 8; // magic + version
    let mut segments = Vec::new();

    while offset < data.len() {
        let id = data.read_u8(offset)?;
        offset += 1;
        let (size, len) = read_uleb128(data, offset)?;
        offset += len;
        let body_end = offset
            .checked_add(size as usize)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| {
                Error::CorruptImage(format!("wasm section {id} extends past end of file"))
            })?;

        if id == SECTION_DATA {
            let mut pos = offset;
            let (count, len) = read_uleb128(data, pos)?;
            pos += len;
            for _ in 0..count {
                let (flags, len) = read_uleb128(data, pos)?;
                pos += len;
                match flags {
                    // Active segment: offset expression, then payload.
                    0 | 2 => {
                        if flags == 2 {
                            let (_memidx, len) = read_uleb128(data, pos)?;
                            pos += len;
                        }
                        if data.read_u8(pos)? != OP_I32_CONST {
                            return Err(Error::CorruptImage(
                                "wasm data segment offset is not an i32.const".to_string(),
                            ));
                        }
                        pos += 1;
                        let (value, len) = read_sleb128(data, pos)?;
                        pos += len;
                        if data.read_u8(pos)? != OP_END {
                            return Err(Error::CorruptImage(
                                "wasm data segment offset expression not terminated".to_string(),
                            ));
                        }
                        pos += 1;
                        let (byte_len, len) = read_uleb128(data, pos)?;
                        pos += len;
                        if pos + byte_len as usize > body_end {
                            return Err(Error::CorruptImage(
                                "wasm data segment payload extends past its section".to_string(),
                            ));
                        }
                        if value < 0 {
                            return Err(Error::CorruptImage(
                                "wasm data segment offset is negative".to_string(),
                            ));
                        }
                        segments.push(DataSegment {
                            memory_offset: value as u64,
                            bytes_start: pos,
                            bytes_len: byte_len as usize,
                        });
                        pos += byte_len as usize;
                    }
                    // Passive segment: payload only, not mapped at load.
                    1 => {
                        let (byte_len, len) = read_uleb128(data, pos)?;
                        pos += len + byte_len as usize;
                    }
                    other => {
                        return Err(Error::CorruptImage(format!(
                            "unknown wasm data segment flags {other}"
                        )))
                    }
                }
            }
        }
        offset = body_end;
    }
    Ok(segments)
}
