//! Byte-scan strategy.
//!
//! Classification-independent fallback: the expected method and type counts
//! are encoded as little-endian pointer-width needles and searched across
//! the whole buffer with a memmem prefilter. A hit at a pointer-aligned file
//! offset nominates a struct base (hit minus the count slot); the candidate
//! survives only if its companion fields are self-consistent.

use memchr::memmem;
use tracing::debug;

use crate::image::Image;
use crate::layout::LayoutTable;
use crate::locate::{Hints, LocatedStructures};
use crate::progress::ProgressSink;

pub fn run(
    image: &Image,
    layout: &LayoutTable,
    hints: &Hints,
    _sink: &mut dyn ProgressSink,
) -> Option<LocatedStructures> {
    if hints.method_count == 0 || hints.type_count == 0 {
        return None;
    }

    let code_table = find_code_table(image, layout, hints)?;
    debug!(code_table = format_args!("{code_table:#x}"), "code table candidate accepted");
    let metadata_table = find_metadata_table(image, layout, hints)?;
    Some(LocatedStructures {
        code_table,
        metadata_table,
        strategy: "Search",
    })
}

fn needle(value: u64, ptr_size: u8) -> Vec<u8> {
    match ptr_size {
        4 => (value as u32).to_le_bytes().to_vec(),
        _ => value.to_le_bytes().to_vec(),
    }
}

fn find_code_table(image: &Image, layout: &LayoutTable, hints: &Hints) -> Option<u64> {
    let space = &image.space;
    let ptr = u64::from(image.ptr_size);
    let count_off = u64::from(layout.code.method_count_slot) * ptr;
    let array_off = u64::from(layout.code.method_array_slot) * ptr;
    let needle = needle(hints.method_count, image.ptr_size);

    for hit in memmem::find_iter(space.data(), &needle) {
        let hit = hit as u64;
        if hit % ptr != 0 {
            continue;
        }
        let base_off = match hit.checked_sub(count_off) {
            Some(v) => v,
            None => continue,
        };
        let base = match space.file_to_virt(base_off) {
            Ok(v) => v,
            Err(_) => continue,
        };

        // The method-array slot must hold a mapped, non-null pointer whose
        // first entry is itself mapped.
        let ok = (|| {
            let array = space.read_ptr(base + array_off, image.ptr_size).ok()?;
            if array == 0 {
                return None;
            }
            let first = space.read_ptr(array, image.ptr_size).ok()?;
            if first == 0 || !space.contains_virt(first) {
                return None;
            }
            Some(())
        })();
        if ok.is_some() {
            return Some(base);
        }
    }
    None
}

fn find_metadata_table(image: &Image, layout: &LayoutTable, hints: &Hints) -> Option<u64> {
    let space = &image.space;
    let ptr = u64::from(image.ptr_size);
    let count_off = u64::from(layout.meta.types_count_slot) * ptr;
    let array_off = u64::from(layout.meta.types_array_slot) * ptr;
    let sizes_count_off = u64::from(layout.meta.type_sizes_count_slot) * ptr;
    let sizes_array_off = u64::from(layout.meta.type_sizes_array_slot) * ptr;
    let needle = needle(hints.type_count, image.ptr_size);

    for hit in memmem::find_iter(space.data(), &needle) {
        let hit = hit as u64;
        if hit % ptr != 0 {
            continue;
        }
        let base_off = match hit.checked_sub(count_off) {
            Some(v) => v,
            None => continue,
        };
        let base = match space.file_to_virt(base_off) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let ok = (|| {
            // Both pairs carry the same cardinality, and both arrays map.
            let sizes_count = space.read_ptr(base + sizes_count_off, image.ptr_size).ok()?;
            if sizes_count != hints.type_count {
                return None;
            }
            let types_array = space.read_ptr(base + array_off, image.ptr_size).ok()?;
            if types_array == 0 || !space.contains_virt(types_array) {
                return None;
            }
            let sizes_array = space.read_ptr(base + sizes_array_off, image.ptr_size).ok()?;
            if sizes_array == 0 || !space.contains_virt(sizes_array) {
                return None;
            }
            // Layouts that still carry the usage-pair table bound its count
            // by the blob's cardinality.
            if let Some(slot) = layout.meta.usages_count_slot {
                if layout.usages_hint > 0 {
                    let usages = space
                        .read_ptr(base + u64::from(slot) * ptr, image.ptr_size)
                        .ok()?;
                    if usages > layout.usages_hint {
                        return None;
                    }
                }
            }
            Some(())
        })();
        if ok.is_some() {
            return Some(base);
        }
    }
    None
}
