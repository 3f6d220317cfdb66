use bytemuck::{Pod, Zeroable};

/// One entry of the import directory. The array is terminated by an
/// all-zero descriptor (`OriginalFirstThunk == 0` is the terminator check
/// this crate relies on, matching the rest of the toolchain).
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageImportDescriptor {
    /// RVA to the unbound import address table (a.k.a. the "original first thunk").
    pub original_first_thunk: u32,
    /// The low 32 bits of the time stamp.
    pub time_date_stamp: u32,
    /// The index of the first forwarder reference, or -1 if no forwarders.
    pub forwarder_chain: u32,
    /// RVA of an ASCII string containing the name of the DLL.
    pub name: u32,
    /// RVA of the import address table (bound import table).
    pub first_thunk: u32,
}

/// Flag bit marking a thunk entry as an ordinal import (32-bit thunks).
pub const IMAGE_ORDINAL_FLAG32: u32 = 0x8000_0000;
/// Flag bit marking a thunk entry as an ordinal import (64-bit thunks).
pub const IMAGE_ORDINAL_FLAG64: u64 = 0x8000_0000_0000_0000;

/// Header of one base relocation block. Followed by
/// `(size_of_block - 8) / 2` packed `(type:4 | offset:12)` `u16` entries.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageBaseRelocation {
    /// RVA of the page this block's entries are relative to.
    pub virtual_address: u32,
    /// Total size of this block, including this header.
    pub size_of_block: u32,
}

/// A padding relocation entry, used to round a block to a 4-byte boundary.
pub const IMAGE_REL_BASED_ABSOLUTE: u8 = 0;
/// A 32-bit base relocation (Win32).
pub const IMAGE_REL_BASED_HIGHLOW: u8 = 3;
/// A 64-bit base relocation (Win32-AMD64).
pub const IMAGE_REL_BASED_DIR64: u8 = 10;

/// Export directory table.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageExportDirectory {
    /// Reserved, must be 0.
    pub characteristics: u32,
    /// The time and date the export data was created.
    pub time_date_stamp: u32,
    /// The major version number.
    pub major_version: u16,
    /// The minor version number.
    pub minor_version: u16,
    /// RVA of the ASCII string containing the name of the DLL.
    pub name: u32,
    /// The starting ordinal number for exports in this image.
    pub base: u32,
    /// The number of entries in the export address table.
    pub number_of_functions: u32,
    /// The number of entries in the name pointer table.
    pub number_of_names: u32,
    /// RVA of the export address table.
    pub address_of_functions: u32,
    /// RVA of the export name pointer table.
    pub address_of_names: u32,
    /// RVA of the ordinal table.
    pub address_of_name_ordinals: u32,
}

/// Offset of `SecurityCookie` within `IMAGE_LOAD_CONFIG_DIRECTORY32`.
pub const LOAD_CONFIG_SECURITY_COOKIE_OFFSET_32: usize = 0x3C;
/// Offset of `SecurityCookie` within `IMAGE_LOAD_CONFIG_DIRECTORY64`.
pub const LOAD_CONFIG_SECURITY_COOKIE_OFFSET_64: usize = 0x58;
