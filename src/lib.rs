//! # pe-loader: PE parsing, re-serialization, and an in-process Win32 image loader.
//!
//! `pe-loader` parses Portable Executables into an architecture-neutral
//! [`Image`](image::Image), can re-serialize that `Image` back into valid PE
//! bytes, and can map and run one as a guest inside a host process through
//! the [`HostServices`](host::HostServices) boundary.
//!
//! ## Examples
//! ```
//! # use std::rc::Rc;
//! use pe_loader::datasource::{DataSource, MemoryDataSource};
//! use pe_loader::parser;
//!
//! # fn main() -> Result<(), pe_loader::error::Error> {
//! # let binary: Vec<u8> = vec![];
//! # if binary.is_empty() { return Ok(()); }
//! let source: Rc<dyn DataSource> = Rc::new(MemoryDataSource::new(binary));
//! let image = parser::parse_from_file(source, "example.exe", ".")?;
//! println!("{}", image);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Raw, byte-overlay struct definitions for the on-disk PE/COFF format.
pub mod raw;

/// Error type shared by every component in this crate.
pub mod error;

/// Small re-exports used throughout the crate.
pub mod prelude;

/// The architecture-neutral `Image` value object.
pub mod image;

/// `DataSource`/`DataView`: the byte-provenance abstraction behind the
/// parser and serializer.
pub mod datasource;

/// The PE Parser: raw bytes in, an `Image` out.
pub mod parser;

/// The PE Serializer: an `Image` back out to valid PE bytes.
pub mod serializer;

/// The Import Resolver: bare library name to file on disk.
pub mod resolver;

/// The API-Set Redirector.
pub mod apiset;

/// The host boundary the loader runs against.
pub mod host;

/// Maps, links and runs `Image`s against a `HostServices` implementation.
pub mod loader;

/// Ambient loader configuration.
pub mod config;
