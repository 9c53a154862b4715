//! Cross-reference strategy.
//!
//! Walks data-classified records at pointer-aligned addresses looking for a
//! count field equal to the metadata-derived hint, then validates the
//! neighboring array slot: the code table's method array must point into
//! executable records, the metadata table's type array into mapped data.
//! Needs an executable/data classification, so formats without one (wasm,
//! stripped dumps) skip straight to the byte scan.

use tracing::debug;

use crate::image::Image;
use crate::layout::LayoutTable;
use crate::locate::{Hints, LocatedStructures};
use crate::progress::ProgressSink;

/// Entries sampled from each candidate pointer array.
const SAMPLE: u64 = 16;

pub fn run(
    image: &Image,
    layout: &LayoutTable,
    hints: &Hints,
    _sink: &mut dyn ProgressSink,
) -> Option<LocatedStructures> {
    if !image.space.has_classification() {
        debug!("image carries no executable classification, skipping");
        return None;
    }
    if hints.method_count == 0 || hints.type_count == 0 {
        return None;
    }

    let code_table = find_code_table(image, layout, hints)?;
    let metadata_table = find_metadata_table(image, layout, hints)?;
    Some(LocatedStructures {
        code_table,
        metadata_table,
        strategy: "PlusSearch",
    })
}

fn find_code_table(image: &Image, layout: &LayoutTable, hints: &Hints) -> Option<u64> {
    let ptr = u64::from(image.ptr_size);
    let count_off = u64::from(layout.code.method_count_slot) * ptr;
    let array_off = u64::from(layout.code.method_array_slot) * ptr;

    scan(image, hints.method_count, |base_candidate| {
        let base = base_candidate.checked_sub(count_off)?;
        let space = &image.space;
        space.virt_to_file(base).ok()?;
        let array = space.read_ptr(base + array_off, image.ptr_size).ok()?;
        if array == 0 {
            return None;
        }
        // Every sampled method pointer must land in executable code.
        for i in 0..hints.method_count.min(SAMPLE) {
            let entry = space.read_ptr(array + i * ptr, image.ptr_size).ok()?;
            if !image
                .space
                .executable_records()
                .any(|r| r.contains_virt(entry))
            {
                return None;
            }
        }
        Some(base)
    })
}

fn find_metadata_table(image: &Image, layout: &LayoutTable, hints: &Hints) -> Option<u64> {
    let ptr = u64::from(image.ptr_size);
    let count_off = u64::from(layout.meta.types_count_slot) * ptr;
    let array_off = u64::from(layout.meta.types_array_slot) * ptr;
    let sizes_count_off = u64::from(layout.meta.type_sizes_count_slot) * ptr;
    let sizes_array_off = u64::from(layout.meta.type_sizes_array_slot) * ptr;

    scan(image, hints.type_count, |count_addr| {
        let base = count_addr.checked_sub(count_off)?;
        let space = &image.space;
        space.virt_to_file(base).ok()?;

        let types_array = space.read_ptr(base + array_off, image.ptr_size).ok()?;
        if types_array == 0 || !space.contains_virt(types_array) {
            return None;
        }
        for i in 0..hints.type_count.min(SAMPLE) {
            let entry = space.read_ptr(types_array + i * ptr, image.ptr_size).ok()?;
            if !space.contains_virt(entry) {
                return None;
            }
        }

        // The type-sizes pair carries the same cardinality.
        let sizes_count = space.read_ptr(base + sizes_count_off, image.ptr_size).ok()?;
        if sizes_count != hints.type_count {
            return None;
        }
        let sizes_array = space.read_ptr(base + sizes_array_off, image.ptr_size).ok()?;
        if sizes_array == 0 || !space.contains_virt(sizes_array) {
            return None;
        }
        Some(base)
    })
}

/// Walk every data record at pointer alignment; where the pointer-sized value
/// equals `target`, hand the address to `probe` until it accepts one.
fn scan(image: &Image, target: u64, mut probe: impl FnMut(u64) -> Option<u64>) -> Option<u64> {
    let ptr = u64::from(image.ptr_size);
    for record in image.space.data_records() {
        let mut addr = align_up(record.virt_start, ptr);
        while addr + ptr <= record.virt_end {
            let hit = image
                .space
                .read_ptr(addr, image.ptr_size)
                .map_or(false, |v| v == target);
            if hit {
                if let Some(base) = probe(addr) {
                    return Some(base);
                }
            }
            addr += ptr;
        }
    }
    None
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}
