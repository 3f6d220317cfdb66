//! Ambient loader configuration (`spec.md` §6.3: constants the loader
//! consumes but does not itself produce).

/// Preferred base address used by the CLI driver when mapping a
/// freestanding PE for inspection or execution
/// (`examples/original_source/Packer/Win32Loader.cpp` maps at the image's
/// own `ImageBase` by default; this is the fallback used when that address
/// is already taken).
pub const WIN32_STUB_BASE_ADDRESS: u64 = 0x0040_0000;

/// Section name the packed stub's own code section is conventionally
/// labelled with.
pub const MAIN_SECTION_NAME: &str = ".main";
/// Section name the packed stub's import-thunk section is conventionally
/// labelled with.
pub const IMPORT_SECTION_NAME: &str = ".imp";

/// Loader-wide knobs, gathered in one place so callers (the CLI binary,
/// tests) don't have to thread individual constants through.
///
/// Passed to [`crate::loader::Loader`] via `Loader::with_config`; defaults
/// to [`Default::default`] when not supplied.
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Fallback base address used when an image has no preferred `ImageBase`
    /// of its own (`base_address == 0`).
    pub fallback_base_address: u64,
    /// Extra directories searched for imports, ahead of the importing
    /// image's own folder and `PATH` (`spec.md` §4.3).
    pub import_search_hints: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            fallback_base_address: WIN32_STUB_BASE_ADDRESS,
            import_search_hints: Vec::new(),
        }
    }
}
