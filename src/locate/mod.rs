//! The structure-location cascade.
//!
//! Three strategies run in a fixed order; each is a pure function of the
//! image, the bound layout, and the metadata-derived hints. The first
//! candidate that survives the shared consistency gate wins and later
//! strategies are never invoked. Exhaustion is reported with the list of
//! attempted strategy names. Locating the same inputs twice yields the same
//! result; nothing here mutates the image.

pub mod plus_search;
pub mod signature;
pub mod symbol;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::image::Image;
use crate::layout::LayoutTable;
use crate::progress::ProgressSink;

/// Expected table cardinalities derived from the metadata blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hints {
    pub method_count: u64,
    pub type_count: u64,
}

/// The recovered virtual addresses of the two registration structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocatedStructures {
    pub code_table: u64,
    pub metadata_table: u64,
    /// Name of the strategy that produced the result.
    pub strategy: &'static str,
}

type Strategy = fn(&Image, &LayoutTable, &Hints, &mut dyn ProgressSink) -> Option<LocatedStructures>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("PlusSearch", plus_search::run),
    ("Search", signature::run),
    ("SymbolSearch", symbol::run),
];

/// Run the cascade until one strategy produces a consistent result.
pub fn locate(
    image: &Image,
    layout: &LayoutTable,
    hints: &Hints,
    sink: &mut dyn ProgressSink,
) -> Result<LocatedStructures> {
    sink.report("Searching...");
    let mut attempted = Vec::with_capacity(STRATEGIES.len());
    for (name, run) in STRATEGIES {
        attempted.push(name.to_string());
        debug!(strategy = name, "attempting");
        match run(image, layout, hints, sink) {
            Some(found) if consistent(image, layout, hints, &found) => {
                sink.report(&format!("CodeRegistration : {:#x}", found.code_table));
                sink.report(&format!("MetadataRegistration : {:#x}", found.metadata_table));
                debug!(strategy = name, code_table = format_args!("{:#x}", found.code_table), "located");
                return Ok(found);
            }
            Some(_) => debug!(strategy = name, "candidate rejected by consistency gate"),
            None => debug!(strategy = name, "no candidate"),
        }
    }
    Err(Error::StructuresNotFound { attempted })
}

/// Gate shared by all strategies: both addresses non-zero and translatable,
/// and the count fields they claim to carry within a sane multiple of the
/// metadata-derived hints.
fn consistent(image: &Image, layout: &LayoutTable, hints: &Hints, found: &LocatedStructures) -> bool {
    if found.code_table == 0 || found.metadata_table == 0 {
        return false;
    }
    let space = &image.space;
    if space.virt_to_file(found.code_table).is_err()
        || space.virt_to_file(found.metadata_table).is_err()
    {
        return false;
    }
    let ptr = u64::from(image.ptr_size);
    let methods = match space.read_ptr(
        found.code_table + u64::from(layout.code.method_count_slot) * ptr,
        image.ptr_size,
    ) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let types = match space.read_ptr(
        found.metadata_table + u64::from(layout.meta.types_count_slot) * ptr,
        image.ptr_size,
    ) {
        Ok(v) => v,
        Err(_) => return false,
    };
    count_plausible(methods, hints.method_count) && count_plausible(types, hints.type_count)
}

fn count_plausible(actual: u64, hint: u64) -> bool {
    if hint == 0 {
        return actual > 0;
    }
    actual >= hint && actual <= hint.saturating_mul(4)
}
