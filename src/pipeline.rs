//! End-to-end analysis pipeline.
//!
//! Single-threaded glue over the other modules, advancing one way through
//! metadata parse, image load, version binding, the dump gate, and the
//! locator cascade. The address space and layout table are built once and
//! shared read-only; a completed [`Analysis`] is immutable.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::image::{self, Image, ImageKind};
use crate::layout::{self, LayoutTable, RuntimeVersion};
use crate::locate::{self, Hints, LocatedStructures};
use crate::metadata::{Metadata, MetadataHeader};
use crate::progress::ProgressSink;

/// Caller knobs. The forced version always beats the one the metadata blob
/// declares; some blobs lie.
#[derive(Debug, Default, Clone)]
pub struct Options {
    pub force_version: Option<RuntimeVersion>,
}

/// The complete result of one run.
#[derive(Debug, Serialize)]
pub struct Analysis {
    pub image_kind: ImageKind,
    pub is_dumped: bool,
    pub version: RuntimeVersion,
    pub layout: LayoutTable,
    pub metadata: MetadataHeader,
    pub located: LocatedStructures,
}

impl Analysis {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Analyze an in-memory binary plus its metadata blob.
pub fn analyze_bytes(
    binary: &[u8],
    metadata_blob: &[u8],
    options: &Options,
    sink: &mut dyn ProgressSink,
) -> Result<Analysis> {
    sink.report("Initializing metadata...");
    let metadata = Metadata::parse(metadata_blob)?;
    sink.report(&format!("Metadata Version: {}", metadata.declared_version));

    let version = resolve_version(options, metadata.declared_version);
    if version != metadata.declared_version {
        info!(%version, declared = %metadata.declared_version, "version forced by caller");
    }

    sink.report("Initializing il2cpp file...");
    let image = image::load(binary, sink)?;
    finish(image, &metadata, version, sink)
}

/// Analyze from file paths. On Windows, a PE whose cascade exhausts is
/// re-loaded through the OS loader (relocations and imports resolved) and
/// the cascade retried once against the mapped snapshot.
pub fn analyze_files(
    binary_path: &Path,
    metadata_path: &Path,
    options: &Options,
    sink: &mut dyn ProgressSink,
) -> Result<Analysis> {
    let binary = fs::read(binary_path)?;
    let metadata_blob = fs::read(metadata_path)?;
    let result = analyze_bytes(&binary, &metadata_blob, options, sink);

    #[cfg(windows)]
    if matches!(result, Err(Error::StructuresNotFound { .. }))
        && matches!(image::detect_kind(&binary), Ok(ImageKind::Pe))
    {
        sink.report("Retrying with OS-mapped PE image...");
        let metadata = Metadata::parse(&metadata_blob)?;
        let version = resolve_version(options, metadata.declared_version);
        let image = image::pe::load_mapped(binary_path)?;
        return finish(image, &metadata, version, sink);
    }

    result
}

fn resolve_version(options: &Options, declared: RuntimeVersion) -> RuntimeVersion {
    options.force_version.unwrap_or(declared)
}

/// Dumped images of version 27+ moved the usage tables into the blob and
/// lost the only anchor for recovering the load bias; guessing would return
/// wrong addresses silently, so this fails outright.
fn dump_gate(version: RuntimeVersion, is_dumped: bool) -> Result<()> {
    if is_dumped && version >= RuntimeVersion::new(27, 0) {
        return Err(Error::AmbiguousDumpAddress {
            version: version.to_string(),
        });
    }
    Ok(())
}

fn finish(
    image: Image,
    metadata: &Metadata<'_>,
    version: RuntimeVersion,
    sink: &mut dyn ProgressSink,
) -> Result<Analysis> {
    let layout = layout::bind(version, metadata.usages_hint())?;
    sink.report(&format!("Il2Cpp Version: {version}"));

    dump_gate(version, image.is_dumped)?;

    let header = metadata.header(&layout)?;
    let hints = Hints {
        method_count: header.method_count,
        type_count: header.type_count,
    };
    info!(
        methods = hints.method_count,
        types = hints.type_count,
        "expected table cardinalities"
    );

    let located = locate::locate(&image, &layout, &hints, sink)?;

    Ok(Analysis {
        image_kind: image.kind,
        is_dumped: image.is_dumped,
        version,
        layout,
        metadata: header,
        located,
    })
}
