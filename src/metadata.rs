//! Companion metadata blob (`global-metadata.dat`) header parsing.
//!
//! Header-only scope: sanity magic, declared version, and the two table
//! spans the locator needs for its expected-cardinality hints. Decoding the
//! table contents beyond that belongs to the executor.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::read::ReadLe;
use crate::layout::{LayoutTable, RuntimeVersion};

const SANITY: u32 = 0xFAB1_1BAF;

// Table directory entries stable across the supported version range.
const METHODS_AT: usize = 0x30;
const TYPE_DEFINITIONS_AT: usize = 0xA0;
const USAGE_PAIRS_AT: usize = 0xC0;
const USAGE_PAIR_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy)]
struct Span {
    offset: u32,
    size: u32,
}

/// Parsed blob: declared version plus the raw table spans.
#[derive(Debug)]
pub struct Metadata<'data> {
    data: &'data [u8],
    pub declared_version: RuntimeVersion,
    methods: Span,
    type_definitions: Span,
    usage_pairs: Option<Span>,
}

/// The counts handed to the locator, plus the version they were read under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeader {
    pub version: RuntimeVersion,
    /// Methods with a compiled body.
    pub method_count: u64,
    pub type_count: u64,
    pub usages_hint: u64,
}

impl<'data> Metadata<'data> {
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let invalid = |e: Error| {
            if e.is_local_fault() {
                Error::InvalidMetadata(format!("header truncated: {e}"))
            } else {
                e
            }
        };

        let sanity = data.read_u32(0).map_err(invalid)?;
        if sanity != SANITY {
            return Err(Error::InvalidMetadata(format!(
                "bad sanity magic {sanity:#010x}"
            )));
        }
        let declared_version = RuntimeVersion::from_declared(data.read_i32(4).map_err(invalid)?);

        let span = |at: usize| -> Result<Span> {
            let offset = data.read_u32(at).map_err(invalid)?;
            let size = data.read_u32(at + 4).map_err(invalid)?;
            if u64::from(offset) + u64::from(size) > data.len() as u64 {
                return Err(Error::InvalidMetadata(format!(
                    "table at directory entry {at:#x} extends past end of blob"
                )));
            }
            Ok(Span { offset, size })
        };

        let methods = span(METHODS_AT)?;
        let type_definitions = span(TYPE_DEFINITIONS_AT)?;
        // The usage-pair table only exists between 19 and 27.
        let usage_pairs = if declared_version >= RuntimeVersion::new(19, 0)
            && declared_version < RuntimeVersion::new(27, 0)
        {
            span(USAGE_PAIRS_AT).ok()
        } else {
            None
        };

        Ok(Self {
            data,
            declared_version,
            methods,
            type_definitions,
            usage_pairs,
        })
    }

    /// Upper bound on metadata-usage entries, for the pre-27 signature check.
    pub fn usages_hint(&self) -> u64 {
        self.usage_pairs
            .map(|s| u64::from(s.size) / USAGE_PAIR_SIZE)
            .unwrap_or(0)
    }

    /// Resolve the expected table cardinalities under a bound layout.
    pub fn header(&self, layout: &LayoutTable) -> Result<MetadataHeader> {
        let type_count = u64::from(self.type_definitions.size) / u64::from(layout.type_record.size);

        let record_size = layout.method_record.size as usize;
        let total_methods = self.methods.size as usize / record_size;
        let method_count = match layout.method_record.compiled_index_offset {
            None => total_methods as u64,
            Some(field_offset) => {
                let base = self.methods.offset as usize;
                let mut count = 0u64;
                for i in 0..total_methods {
                    let index = self
                        .data
                        .read_i32(base + i * record_size + field_offset as usize)
                        .map_err(|e| Error::InvalidMetadata(format!("method table: {e}")))?;
                    if index >= 0 {
                        count += 1;
                    }
                }
                count
            }
        };

        Ok(MetadataHeader {
            version: layout.version,
            method_count,
            type_count,
            usages_hint: self.usages_hint(),
        })
    }
}
