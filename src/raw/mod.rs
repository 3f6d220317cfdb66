//! Byte-for-byte PE/COFF struct overlays (`#[repr(C)]`, `bytemuck::Pod`).
//!
//! This is the substrate the parser and serializer read and write directly;
//! the architecture-neutral [`crate::image::Image`] value object is built
//! from these, not the other way around.

/// COFF file header definitions and helper functions
pub mod coff;
/// Optional header definitions and helper functions
pub mod optional;
/// Section header definitions and helper functions
pub mod section;
/// Import descriptor, export directory, base relocation block and load-config overlays
pub mod directory;
