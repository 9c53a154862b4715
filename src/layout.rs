//! Runtime-version binding: selecting the byte layout used to interpret raw
//! bytes as the code table, the metadata table, and per-method/per-type
//! records.
//!
//! Layout selection is a pure function of the version: the same version
//! always yields the identical [`LayoutTable`], and a version outside the
//! known set fails with `UnsupportedVersion` rather than guessing. A
//! caller-forced version always beats the one declared by the metadata
//! blob (some blobs lie about their own version).

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An ordered IL2CPP runtime version, e.g. `24.2`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Version as declared by a metadata blob (integer only).
    pub fn from_declared(version: i32) -> Self {
        Self::new(version.max(0) as u32, 0)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

impl FromStr for RuntimeVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, '.');
        let parse = |part: Option<&str>| -> Result<u32> {
            part.unwrap_or("0")
                .parse()
                .map_err(|_| Error::UnsupportedVersion(s.to_string()))
        };
        let major = parse(parts.next())?;
        let minor = if let Some(rest) = parts.next() {
            parse(Some(rest))?
        } else {
            0
        };
        Ok(Self::new(major, minor))
    }
}

/// Field slots (pointer-sized units from struct start) of the code-table
/// header. Byte offsets are resolved against the image's pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeTableLayout {
    pub method_count_slot: u32,
    pub method_array_slot: u32,
    pub total_slots: u32,
}

/// Field slots of the metadata-table header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTableLayout {
    pub types_count_slot: u32,
    pub types_array_slot: u32,
    pub type_sizes_count_slot: u32,
    pub type_sizes_array_slot: u32,
    /// Metadata-usage pair slot; the table was retired in 27.
    pub usages_count_slot: Option<u32>,
    pub total_slots: u32,
}

/// Per-method-definition record layout inside the metadata blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRecordLayout {
    pub size: u32,
    /// Byte offset of the compiled-body index; methods with a negative
    /// index have no compiled body. Dropped from the record in 24.2.
    pub compiled_index_offset: Option<u32>,
}

/// Per-type-definition record layout inside the metadata blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecordLayout {
    pub size: u32,
}

/// Generic-usage record widths (method specs and the generic method table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericUsageLayout {
    pub method_spec_size: u32,
    pub table_entry_size: u32,
}

/// The version-specific set of field offsets/widths used to interpret raw
/// bytes as target structures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutTable {
    pub version: RuntimeVersion,
    pub code: CodeTableLayout,
    pub meta: MetadataTableLayout,
    pub method_record: MethodRecordLayout,
    pub type_record: TypeRecordLayout,
    pub generic_usage: GenericUsageLayout,
    /// Caller-supplied upper bound on metadata-usage entries, consumed by
    /// the signature strategy's pre-27 consistency check.
    pub usages_hint: u64,
}

/// Every runtime version with a shipped layout.
static KNOWN_VERSIONS: Lazy<Vec<RuntimeVersion>> = Lazy::new(|| {
    let mut versions = vec![
        RuntimeVersion::new(16, 0),
        RuntimeVersion::new(19, 0),
        RuntimeVersion::new(20, 0),
        RuntimeVersion::new(21, 0),
        RuntimeVersion::new(22, 0),
        RuntimeVersion::new(23, 0),
    ];
    versions.extend((0..=5).map(|minor| RuntimeVersion::new(24, minor)));
    versions.extend((0..=2).map(|minor| RuntimeVersion::new(27, minor)));
    versions.push(RuntimeVersion::new(29, 0));
    versions.push(RuntimeVersion::new(29, 1));
    versions.push(RuntimeVersion::new(31, 0));
    versions
});

pub fn is_known(version: RuntimeVersion) -> bool {
    KNOWN_VERSIONS.contains(&version)
}

/// Bind a version to its layout table.
pub fn bind(version: RuntimeVersion, usages_hint: u64) -> Result<LayoutTable> {
    if !is_known(version) {
        return Err(Error::UnsupportedVersion(version.to_string()));
    }

    let v24_2 = RuntimeVersion::new(24, 2);
    let v27 = RuntimeVersion::new(27, 0);

    let code = if version < v24_2 {
        CodeTableLayout {
            method_count_slot: 0,
            method_array_slot: 1,
            total_slots: 14,
        }
    } else if version < v27 {
        // Direct method pointers moved behind the per-module tables; the
        // locator pair shifts past the reverse-pinvoke pair.
        CodeTableLayout {
            method_count_slot: 2,
            method_array_slot: 3,
            total_slots: 16,
        }
    } else {
        CodeTableLayout {
            method_count_slot: 2,
            method_array_slot: 3,
            total_slots: 14,
        }
    };

    let meta = MetadataTableLayout {
        types_count_slot: 6,
        types_array_slot: 7,
        type_sizes_count_slot: 12,
        type_sizes_array_slot: 13,
        usages_count_slot: if version < v27 { Some(14) } else { None },
        total_slots: if version < v27 { 16 } else { 14 },
    };

    let method_record = if version < v24_2 {
        MethodRecordLayout {
            size: 52,
            compiled_index_offset: Some(20),
        }
    } else {
        MethodRecordLayout {
            size: 32,
            compiled_index_offset: None,
        }
    };

    let type_record = TypeRecordLayout {
        size: if version < v24_2 {
            100
        } else if version < v27 {
            92
        } else {
            88
        },
    };

    Ok(LayoutTable {
        version,
        code,
        meta,
        method_record,
        type_record,
        generic_usage: GenericUsageLayout {
            method_spec_size: 12,
            table_entry_size: 16,
        },
        usages_hint,
    })
}
