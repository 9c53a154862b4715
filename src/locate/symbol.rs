//! Symbol-table strategy.
//!
//! Last resort: some builds historically exported the registration globals
//! by name. Consults the image's export/dynamic-symbol list for the pair;
//! Mach-O symbols carry a leading underscore. Unavailable when the list is
//! empty or either name is absent.

use tracing::debug;

use crate::image::{Image, ImageKind};
use crate::layout::LayoutTable;
use crate::locate::{Hints, LocatedStructures};
use crate::progress::ProgressSink;

const CODE_SYMBOL: &str = "g_CodeRegistration";
const METADATA_SYMBOL: &str = "g_MetadataRegistration";

pub fn run(
    image: &Image,
    _layout: &LayoutTable,
    _hints: &Hints,
    _sink: &mut dyn ProgressSink,
) -> Option<LocatedStructures> {
    if image.exports.is_empty() {
        return None;
    }
    let prefixed = matches!(image.kind, ImageKind::MachO32 | ImageKind::MachO64);
    let lookup = |name: &str| {
        if prefixed {
            image.export(&format!("_{name}"))
        } else {
            image.export(name)
        }
    };

    let code_table = lookup(CODE_SYMBOL)?;
    let metadata_table = lookup(METADATA_SYMBOL)?;
    debug!(
        code_table = format_args!("{code_table:#x}"),
        metadata_table = format_args!("{metadata_table:#x}"),
        "registration globals found in export list"
    );
    Some(LocatedStructures {
        code_table,
        metadata_table,
        strategy: "SymbolSearch",
    })
}
