//! The architecture-neutral `Image` value object (`spec.md` §3).
//!
//! Everything downstream of the PE Parser — the Serializer, the Import
//! Resolver, the API-Set Redirector and the Loader — operates on `Image`,
//! never on the raw [`crate::raw`] struct overlays directly.

use bitflags::bitflags;
use core::fmt;

/// The two image formats this loader understands (`spec.md` §1: "Win32 (x86)
/// and Win32-AMD64").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// 32-bit x86 (`IMAGE_NT_OPTIONAL_HDR32_MAGIC`).
    Win32,
    /// 64-bit x64 (`IMAGE_NT_OPTIONAL_HDR64_MAGIC`).
    Win32AMD64,
}

impl Architecture {
    /// Width in bytes of a pointer-sized field for this architecture (used
    /// for relocations and IAT slots, which are 4 bytes on Win32 and 8 bytes
    /// on Win32-AMD64).
    pub fn pointer_size(self) -> usize {
        match self {
            Architecture::Win32 => 4,
            Architecture::Win32AMD64 => 8,
        }
    }
}

bitflags! {
    /// Image-level flags (`spec.md` §3: "flags (bit: IsLibrary)").
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ImageFlags: u32 {
        /// Set from `IMAGE_FILE_HEADER.Characteristics & IMAGE_FILE_DLL`.
        const IS_LIBRARY = 0x1;
    }
}

/// Architecture-neutral image metadata.
#[derive(Clone, Debug)]
pub struct ImageInfo {
    /// Target architecture.
    pub architecture: Architecture,
    /// Preferred load address (`ImageBase`).
    pub base_address: u64,
    /// RVA of the entry point (`AddressOfEntryPoint`); 0 if none.
    pub entry_point: u64,
    /// Total virtual size of the image (`SizeOfImage`).
    pub size: u64,
    /// `IsLibrary` and any future image-level bits.
    pub flags: ImageFlags,
    /// Preferred-base VA stored in `IMAGE_LOAD_CONFIG_DIRECTORY{32,64}.SecurityCookie`
    /// (the value of the field, not its own RVA), or 0 if there is no
    /// load-config directory.
    pub security_cookie_va: u64,
    /// RVA of the TLS directory (`spec.md` §4.1: "not further processed").
    pub tls_directory_rva: u64,
}

impl ImageInfo {
    /// Whether this image is a DLL.
    pub fn is_library(&self) -> bool {
        self.flags.contains(ImageFlags::IS_LIBRARY)
    }
}

bitflags! {
    /// Section-level flags translated from `IMAGE_SECTION_HEADER.Characteristics`
    /// (`spec.md` §4.1 flag-translation table).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// `IMAGE_SCN_CNT_CODE`.
        const CODE = 0x01;
        /// `IMAGE_SCN_CNT_INITIALIZED_DATA`.
        const INIT_DATA = 0x02;
        /// `IMAGE_SCN_CNT_UNINITIALIZED_DATA`.
        const UNINIT_DATA = 0x04;
        /// `IMAGE_SCN_MEM_READ`.
        const READ = 0x08;
        /// `IMAGE_SCN_MEM_WRITE`.
        const WRITE = 0x10;
        /// `IMAGE_SCN_MEM_EXECUTE`.
        const EXECUTE = 0x20;
    }
}

/// A single PE section, normalized into owned bytes.
///
/// `data` holds exactly the section's raw bytes; per `spec.md` §3 the
/// invariant `data.len() <= multiple_of(virtual_size, file_alignment)` holds,
/// and any byte in `[0, virtual_size)` beyond `data.len()` is implicitly
/// zero when the section is mapped (`loader::Loader::map_image` relies on
/// this: it only copies `data.len()` bytes and leaves the rest of the
/// allocation zeroed).
#[derive(Clone, Debug)]
pub struct Section {
    /// Up to 8 bytes, as stored in the section header (may contain embedded NULs).
    pub name: String,
    /// RVA of the first byte of this section when loaded.
    pub base_address: u64,
    /// `VirtualSize` — the section's size once mapped.
    pub virtual_size: u64,
    /// Raw on-disk (or in-memory, when parsed `from_memory`) bytes.
    pub data: Vec<u8>,
    /// Translated characteristics.
    pub flags: SectionFlags,
}

impl Section {
    /// `true` if `rva` falls within `[base_address, base_address + virtual_size)`.
    pub fn contains_rva(&self, rva: u64) -> bool {
        rva >= self.base_address && rva < self.base_address + self.virtual_size
    }
}

/// One entry of an import's thunk array.
#[derive(Clone, Debug)]
pub struct ImportFunction {
    /// Non-zero iff this is an ordinal import (`name` is then empty).
    pub ordinal: u16,
    /// Import-by-name; empty iff `ordinal != 0` binds this entry.
    pub name: String,
    /// RVA within the importing image where the resolved address is written.
    pub iat_rva: u64,
}

impl ImportFunction {
    /// Whether this entry binds by ordinal rather than by name.
    pub fn is_ordinal(&self) -> bool {
        self.name.is_empty()
    }
}

/// One `IMAGE_IMPORT_DESCRIPTOR`, fully walked.
#[derive(Clone, Debug)]
pub struct Import {
    /// The DLL this descriptor imports from, e.g. `"KERNEL32.dll"`.
    pub library_name: String,
    /// Thunk-ordered list of imported functions.
    pub functions: Vec<ImportFunction>,
}

/// One entry of the export table, after the named/nameless split described
/// in `spec.md` §3.
#[derive(Clone, Debug, Default)]
pub struct ExportFunction {
    /// Biased by the export directory's `Base`.
    pub ordinal: u16,
    /// Empty for nameless exports.
    pub name: String,
    /// RVA of the function, or (if forwarded) an RVA inside the export
    /// directory range that is not meaningful on its own.
    pub address: u64,
    /// `"module.function"` or `"module.#ordinal"`; empty unless forwarded.
    pub forward: String,
}

impl ExportFunction {
    /// Whether this export is a forwarder to another module.
    pub fn is_forwarder(&self) -> bool {
        !self.forward.is_empty()
    }
}

/// The architecture-neutral, fully-parsed representation of a PE image.
#[derive(Clone, Debug)]
pub struct Image {
    /// Architecture-neutral metadata.
    pub info: ImageInfo,
    /// File name only, e.g. `"kernel32.dll"`.
    pub file_name: String,
    /// Directory containing the file, used as an import-search hint.
    pub file_path: String,
    /// Verbatim copy of the first `SizeOfHeaders` bytes (DOS+NT+optional+section headers).
    pub header: Vec<u8>,
    /// Section table, in file order.
    pub sections: Vec<Section>,
    /// Import descriptors, in file order.
    pub imports: Vec<Import>,
    /// Exports: `[0..name_export_len)` named and sorted by name,
    /// `[name_export_len..)` nameless, per `spec.md` §3/§4.1.
    pub exports: Vec<ExportFunction>,
    /// Boundary between named and nameless exports.
    pub name_export_len: usize,
    /// RVAs requiring the load-time delta (`spec.md` §4.1 relocation parsing).
    pub relocations: Vec<u64>,
}

impl Image {
    /// Binary-search the named-export prefix by byte-wise name comparison
    /// (`spec.md` P4 / §4.5.5 step 1).
    pub fn find_export_by_name(&self, name: &str) -> Option<&ExportFunction> {
        let named = &self.exports[..self.name_export_len];
        named
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &named[i])
    }

    /// Linear-scan every export for a matching ordinal (`spec.md` §4.5.5 step 2).
    pub fn find_export_by_ordinal(&self, ordinal: u16) -> Option<&ExportFunction> {
        self.exports.iter().find(|e| e.ordinal == ordinal)
    }

    /// Locate the section containing `rva`, if any (`spec.md` §4.1 "RVA resolver").
    pub fn section_containing(&self, rva: u64) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image: {}", self.file_name)?;
        writeln!(
            f,
            "  architecture: {:?}, base: {:#x}, entry: {:#x}, size: {:#x}",
            self.info.architecture, self.info.base_address, self.info.entry_point, self.info.size
        )?;
        writeln!(f, "  sections: {}", self.sections.len())?;
        for s in &self.sections {
            writeln!(
                f,
                "    {:<8} rva={:#010x} vsize={:#x} raw={:#x} flags={:?}",
                s.name.trim_end_matches('\0'),
                s.base_address,
                s.virtual_size,
                s.data.len(),
                s.flags
            )?;
        }
        writeln!(f, "  imports: {}", self.imports.len())?;
        for i in &self.imports {
            writeln!(f, "    {} ({} functions)", i.library_name, i.functions.len())?;
        }
        writeln!(
            f,
            "  exports: {} ({} named)",
            self.exports.len(),
            self.name_export_len
        )?;
        writeln!(f, "  relocations: {}", self.relocations.len())?;
        Ok(())
    }
}
