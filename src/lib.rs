//! Ancalagon: IL2CPP registration-structure recovery.
//!
//! Given a shipped IL2CPP game binary (ELF, PE, Mach-O, NSO, or
//! WebAssembly) and its companion `global-metadata.dat` blob, this crate
//! recovers the virtual addresses of the two runtime registration
//! structures — `CodeRegistration` and `MetadataRegistration` — that every
//! downstream dumper, decompiler, or script writer needs as its entry
//! point.
//!
//! The pipeline normalizes the container into an [`image::Image`] with a
//! bidirectional address translator, binds the declared (or forced) runtime
//! version to a field-layout table, derives expected table cardinalities
//! from the metadata blob, and runs a fixed cascade of location strategies:
//! cross-reference walk, byte-pattern scan, exported-symbol lookup.
//!
//! ```no_run
//! use ancalagon::pipeline::{analyze_bytes, Options};
//! use ancalagon::progress::TracingSink;
//!
//! # fn main() -> ancalagon::Result<()> {
//! let binary = std::fs::read("libil2cpp.so")?;
//! let blob = std::fs::read("global-metadata.dat")?;
//! let analysis = analyze_bytes(&binary, &blob, &Options::default(), &mut TracingSink)?;
//! println!("{}", analysis.to_json()?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod layout;
pub mod locate;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod progress;

pub use error::{Error, Result};
pub use image::{Image, ImageKind};
pub use layout::RuntimeVersion;
pub use locate::LocatedStructures;
pub use pipeline::{analyze_bytes, analyze_files, Analysis, Options};
