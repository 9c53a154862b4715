//! Bounds-checked little-endian reads over raw header bytes.
//!
//! Every supported IL2CPP target ships little-endian, so the readers do not
//! carry an endianness parameter.

use crate::error::{Error, Result};

/// Trait for truncation-checked primitive reads.
pub trait ReadLe {
    fn read_u8(&self, offset: usize) -> Result<u8>;
    fn read_u16(&self, offset: usize) -> Result<u16>;
    fn read_u32(&self, offset: usize) -> Result<u32>;
    fn read_u64(&self, offset: usize) -> Result<u64>;
    fn read_i32(&self, offset: usize) -> Result<i32>;
}

impl ReadLe for [u8] {
    fn read_u8(&self, offset: usize) -> Result<u8> {
        self.get(offset).copied().ok_or(Error::Truncated {
            offset: offset as u64,
            needed: 1,
        })
    }

    fn read_u16(&self, offset: usize) -> Result<u16> {
        let bytes = take(self, offset, 2)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        let bytes = take(self, offset, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64(&self, offset: usize) -> Result<u64> {
        let bytes = take(self, offset, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&self, offset: usize) -> Result<i32> {
        let bytes = take(self, offset, 4)?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

fn take(data: &[u8], offset: usize, needed: usize) -> Result<&[u8]> {
    if offset.checked_add(needed).map_or(true, |end| end > data.len()) {
        return Err(Error::Truncated {
            offset: offset as u64,
            needed,
        });
    }
    Ok(&data[offset..offset + needed])
}

/// Read a pointer-sized value (4 or 8 bytes) as a u64.
pub fn read_ptr(data: &[u8], offset: usize, ptr_size: u8) -> Result<u64> {
    match ptr_size {
        4 => data.read_u32(offset).map(u64::from),
        _ => data.read_u64(offset),
    }
}

/// Read a fixed-width ASCII field, trimming trailing NULs.
pub fn read_name(data: &[u8], offset: usize, width: usize) -> Result<String> {
    let bytes = take(data, offset, width)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(width);
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Read a NUL-terminated string starting at `offset`.
pub fn read_cstring(data: &[u8], offset: usize) -> Result<&str> {
    if offset >= data.len() {
        return Err(Error::Truncated {
            offset: offset as u64,
            needed: 1,
        });
    }
    let slice = &data[offset..];
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    std::str::from_utf8(&slice[..end])
        .map_err(|_| Error::CorruptImage(format!("non-UTF8 string at {offset:#x}")))
}

/// Decode an unsigned LEB128 value; returns (value, bytes consumed).
pub fn read_uleb128(data: &[u8], offset: usize) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut len = 0usize;
    loop {
        let byte = data.read_u8(offset + len)?;
        len += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, len));
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::CorruptImage(format!(
                "unterminated LEB128 at {offset:#x}"
            )));
        }
    }
}
