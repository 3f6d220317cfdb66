use core::fmt;

/// Crate-wide error type.
///
/// Parser/serializer failures (`NotPe`, `UnsupportedMagic`, ...) abort the
/// current parse — the caller decides whether to skip the file or bail out.
/// `ImportNotFound`/`ExportNotFound` are never raised through this type at
/// load time: per the loader's deferred-fault policy a missing import or
/// export resolves to a null IAT slot / null address instead (see
/// `loader::Loader::process_imports`, `loader::Loader::get_function_address`).
/// They exist here for the Import Resolver's own `Result`-returning API.
#[derive(Debug)]
pub enum Error {
    /// No `e_lfanew`, or the NT signature at `e_lfanew` isn't `"PE\0\0"`.
    NotPe,
    /// Optional header `Magic` is neither `0x10B` nor `0x20B`.
    UnsupportedMagic(u16),
    /// A read fell outside the bounds of the backing buffer.
    OffsetOutOfRange {
        /// Offset the read started at.
        offset: usize,
        /// Length of the backing buffer.
        len: usize,
    },
    /// A string field wasn't valid UTF-8.
    BadString(std::string::FromUtf8Error),
    /// `IMAGE_FILE_HEADER` didn't fit or didn't decode.
    MissingCoffHeader,
    /// The optional header didn't fit or didn't decode for its declared magic.
    MissingOptionalHeader,
    /// A section header didn't fit or didn't decode.
    BadSectionHeader,
    /// `loadLibrary` could not resolve a module name to a file on disk.
    ImportNotFound(String),
    /// `getFunctionAddress` could not resolve a name/ordinal in a module.
    ExportNotFound(String),
    /// A `HostServices` operation failed; fatal, never retried.
    HostFailure(String),
    /// Filesystem I/O failure while reading a module from disk.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotPe => write!(f, "not a PE image (missing or invalid NT signature)"),
            Error::UnsupportedMagic(magic) => write!(f, "unsupported optional header magic {:#06x}", magic),
            Error::OffsetOutOfRange { offset, len } => {
                write!(f, "read at offset {offset} out of range for buffer of length {len}")
            }
            Error::BadString(e) => write!(f, "invalid UTF-8 string: {e}"),
            Error::MissingCoffHeader => write!(f, "missing or truncated COFF file header"),
            Error::MissingOptionalHeader => write!(f, "missing or truncated optional header"),
            Error::BadSectionHeader => write!(f, "missing or truncated section header"),
            Error::ImportNotFound(name) => write!(f, "import module not found: {name}"),
            Error::ExportNotFound(name) => write!(f, "export not found: {name}"),
            Error::HostFailure(msg) => write!(f, "host services failure: {msg}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BadString(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::BadString(e)
    }
}
