//! The PE Parser (`spec.md` §4.1): raw bytes, wherever they came from, in —
//! an architecture-neutral [`Image`] out.
//!
//! Grounded on `examples/IsaacMarovitz-pe-parser/src/pe.rs`'s header walk
//! (DOS stub → NT signature → COFF header → optional header → section
//! table) and on `examples/original_source/Packer/PEFormat.cpp`'s
//! `loadHeader`/`processImport`/`processExport`/`processRelocation`, which
//! additionally walk the import, export and base-relocation directories that
//! the teacher's parser stopped short of.

use crate::datasource::DataSource;
use crate::error::Error;
use crate::image::{
    Architecture, ExportFunction, Image, ImageFlags, ImageInfo, Import, ImportFunction, Section,
    SectionFlags,
};
use crate::raw::coff::{Characteristics, CoffFileHeader};
use crate::raw::directory::{
    ImageBaseRelocation, ImageExportDirectory, ImageImportDescriptor, IMAGE_ORDINAL_FLAG32,
    IMAGE_ORDINAL_FLAG64, IMAGE_REL_BASED_ABSOLUTE, LOAD_CONFIG_SECURITY_COOKIE_OFFSET_32,
    LOAD_CONFIG_SECURITY_COOKIE_OFFSET_64,
};
use crate::raw::optional::{Magic, Optional, OptionalHeader32, OptionalHeader64};
use crate::raw::section::{parse_section_table, section_header, SectionFlags as RawSectionFlags};
use bytemuck::checked::try_from_bytes;
use num_traits::FromPrimitive;
use std::rc::Rc;

const IMAGE_DOS_PE_SIGNATURE_OFFSET: usize = 0x3c;
const NT_SIGNATURE: &[u8; 4] = b"PE\0\0";

const DIRECTORY_TLS: usize = 9;
const DIRECTORY_LOAD_CONFIG: usize = 10;

/// Parse a PE image read from a file on disk (`from_memory = false`: section
/// data is read from `PointerToRawData`/`SizeOfRawData`).
pub fn parse_from_file(
    source: Rc<dyn DataSource>,
    file_name: &str,
    file_path: &str,
) -> Result<Image, Error> {
    parse(source, file_name, file_path, false)
}

/// Parse a PE image that is already mapped into a process's address space
/// (`from_memory = true`: section data is read at `VirtualAddress`, since the
/// source is laid out the way the loader maps it, not the way it sits on
/// disk). Used when the loader re-reads an already-loaded module, e.g. to
/// read a system DLL's export table out of a `HostServices`-backed view.
pub fn parse_from_memory(
    source: Rc<dyn DataSource>,
    file_name: &str,
    file_path: &str,
) -> Result<Image, Error> {
    parse(source, file_name, file_path, true)
}

fn parse(
    source: Rc<dyn DataSource>,
    file_name: &str,
    file_path: &str,
    from_memory: bool,
) -> Result<Image, Error> {
    let binary = source.read(0, source.len() as usize)?;

    let mut offset: usize = read_u16(&binary, IMAGE_DOS_PE_SIGNATURE_OFFSET)? as usize;

    let signature = binary
        .get(offset..offset + 4)
        .ok_or(Error::OffsetOutOfRange {
            offset,
            len: binary.len(),
        })?;
    if signature != NT_SIGNATURE {
        return Err(Error::NotPe);
    }
    offset += 4;

    let coff_slice = binary
        .get(offset..offset + core::mem::size_of::<CoffFileHeader>())
        .ok_or(Error::OffsetOutOfRange {
            offset,
            len: binary.len(),
        })?;
    let coff = *try_from_bytes::<CoffFileHeader>(coff_slice).map_err(|_| Error::MissingCoffHeader)?;
    offset += core::mem::size_of::<CoffFileHeader>();

    if coff.size_of_optional_header == 0 {
        return Err(Error::MissingOptionalHeader);
    }
    let magic_value = read_u16(&binary, offset)?;
    let magic = Magic::from_u16(magic_value).ok_or(Error::UnsupportedMagic(magic_value))?;

    let optional_header_offset = offset;
    let (architecture, base_address, entry_point, size, header_size, data_directories);
    match magic {
        Magic::PE32 => {
            let header = OptionalHeader32::parse_optional_header(&binary, &mut offset)?;
            architecture = Architecture::Win32;
            base_address = header.image_base as u64;
            entry_point = header.address_of_entry_point as u64;
            size = header.size_of_image as u64;
            header_size = header.size_of_headers as usize;
            data_directories = header.data_directories;
        }
        Magic::PE64 => {
            let header = OptionalHeader64::parse_optional_header(&binary, &mut offset)?;
            architecture = Architecture::Win32AMD64;
            base_address = header.image_base;
            entry_point = header.address_of_entry_point as u64;
            size = header.size_of_image as u64;
            header_size = header.size_of_headers as usize;
            data_directories = header.data_directories;
        }
    }
    // `parse_optional_header` only advances by size_of::<Self>(); the real
    // optional header may declare a different size (extra/fewer directory
    // entries), so trust the COFF header's own field for where the section
    // table actually starts.
    offset = optional_header_offset + coff.size_of_optional_header as usize;

    let characteristics = coff.get_characteristics().unwrap_or(Characteristics::empty());
    let mut flags = ImageFlags::empty();
    if characteristics.contains(Characteristics::IMAGE_FILE_DLL) {
        flags |= ImageFlags::IS_LIBRARY;
    }

    let headers = parse_section_table(&binary, offset, coff.number_of_sections);
    let mut sections = Vec::with_capacity(headers.len());
    for header in &headers {
        sections.push(build_section(header, &binary, from_memory)?);
    }

    let load_config_dir = data_directories_entry(&data_directories, DIRECTORY_LOAD_CONFIG);
    let tls_dir = data_directories_entry(&data_directories, DIRECTORY_TLS);

    let imports = process_imports(
        &sections,
        data_directories.import_table.virtual_address as u64,
        architecture,
    );
    let (exports, name_export_len) = process_exports(
        &sections,
        data_directories.export_table.virtual_address as u64,
        data_directories.export_table.size as u64,
    );
    let relocations = process_relocations(
        &sections,
        data_directories.base_relocation_table.virtual_address as u64,
        data_directories.base_relocation_table.size as u64,
    );

    let security_cookie_va = load_config_dir
        .filter(|d| d.virtual_address != 0)
        .and_then(|d| read_security_cookie_va(&sections, d.virtual_address as u64, architecture))
        .unwrap_or(0);
    let tls_directory_rva = tls_dir.map(|d| d.virtual_address as u64).unwrap_or(0);

    let header = binary
        .get(0..header_size.min(binary.len()))
        .unwrap_or(&[])
        .to_vec();

    Ok(Image {
        info: ImageInfo {
            architecture,
            base_address,
            entry_point,
            size,
            flags,
            security_cookie_va,
            tls_directory_rva,
        },
        file_name: file_name.to_string(),
        file_path: file_path.to_string(),
        header,
        sections,
        imports,
        exports,
        name_export_len,
        relocations,
    })
}

fn data_directories_entry<'a>(
    dirs: &'a crate::raw::optional::DataDirectories,
    index: usize,
) -> Option<&'a crate::raw::optional::DataDirectory> {
    // `DataDirectories` is a fixed sequence of 16 `DataDirectory` entries in
    // directory-index order; reinterpret it as a slice rather than matching
    // on each named field.
    let slice: &[crate::raw::optional::DataDirectory; 16] = bytemuck::cast_ref(dirs);
    slice.get(index)
}

fn build_section(header: &section_header, binary: &[u8], from_memory: bool) -> Result<Section, Error> {
    let raw_flags = header.get_characteristics().unwrap_or(RawSectionFlags::empty());
    let mut flags = SectionFlags::empty();
    if raw_flags.contains(RawSectionFlags::IMAGE_SCN_CNT_CODE) {
        flags |= SectionFlags::CODE;
    }
    if raw_flags.contains(RawSectionFlags::IMAGE_SCN_CNT_INITALIZED_DATA) {
        flags |= SectionFlags::INIT_DATA;
    }
    if raw_flags.contains(RawSectionFlags::IMAGE_SCN_CNT_UNINITALIZED_DATA) {
        flags |= SectionFlags::UNINIT_DATA;
    }
    if raw_flags.contains(RawSectionFlags::IMAGE_SCN_MEM_READ) {
        flags |= SectionFlags::READ;
    }
    if raw_flags.contains(RawSectionFlags::IMAGE_SCN_MEM_WRITE) {
        flags |= SectionFlags::WRITE;
    }
    if raw_flags.contains(RawSectionFlags::IMAGE_SCN_MEM_EXECUTE) {
        flags |= SectionFlags::EXECUTE;
    }

    let name = header
        .get_name()
        .unwrap_or_default()
        .split('\0')
        .next()
        .unwrap_or("")
        .to_string();

    let (data_offset, data_size) = if from_memory {
        (header.virtual_address as usize, header.size_of_raw_data as usize)
    } else {
        (header.pointer_to_raw_data as usize, header.size_of_raw_data as usize)
    };

    let data = if data_size == 0 {
        Vec::new()
    } else {
        match binary.get(data_offset..data_offset.saturating_add(data_size)) {
            Some(slice) => slice.to_vec(),
            None => Vec::new(),
        }
    };

    Ok(Section {
        name,
        base_address: header.virtual_address as u64,
        virtual_size: header.virtual_size as u64,
        data,
        flags,
    })
}

/// Find the section containing `rva` and return a byte slice from that
/// offset to the end of its data (`examples/original_source/Packer/PEFormat.cpp`'s
/// `getDataPointerOfRVA`).
fn resolve_rva<'a>(sections: &'a [Section], rva: u64) -> Option<&'a [u8]> {
    if rva == 0 {
        return None;
    }
    for section in sections {
        if rva >= section.base_address && rva < section.base_address + section.virtual_size {
            let within = (rva - section.base_address) as usize;
            return section.data.get(within..);
        }
    }
    None
}

fn read_cstr_at(sections: &[Section], rva: u64) -> String {
    match resolve_rva(sections, rva) {
        Some(bytes) => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        None => String::new(),
    }
}

fn read_u32_at(sections: &[Section], rva: u64) -> Option<u32> {
    let bytes = resolve_rva(sections, rva)?;
    Some(u32::from_le_bytes(bytes.get(0..4)?.try_into().ok()?))
}

fn read_u16_le(bytes: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(offset..offset + 2)?.try_into().ok()?))
}

fn read_u64_le(bytes: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.get(offset..offset + 8)?.try_into().ok()?))
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(offset..offset + 4)?.try_into().ok()?))
}

fn process_imports(sections: &[Section], import_rva: u64, architecture: Architecture) -> Vec<Import> {
    if import_rva == 0 {
        return Vec::new();
    }
    let mut imports = Vec::new();
    let descriptor_size = core::mem::size_of::<ImageImportDescriptor>();
    let mut cursor = import_rva;
    loop {
        let bytes = match resolve_rva(sections, cursor) {
            Some(b) if b.len() >= descriptor_size => b,
            _ => break,
        };
        let descriptor: &ImageImportDescriptor = match try_from_bytes(&bytes[..descriptor_size]) {
            Ok(d) => d,
            Err(_) => break,
        };
        if descriptor.original_first_thunk == 0 {
            break;
        }

        let library_name = read_cstr_at(sections, descriptor.name as u64);
        let mut functions = Vec::new();
        let mut thunk_rva = descriptor.original_first_thunk as u64;
        let mut iat = descriptor.first_thunk as u64;
        let entry_size = architecture.pointer_size() as u64;

        loop {
            let thunk_bytes = match resolve_rva(sections, thunk_rva) {
                Some(b) => b,
                None => break,
            };
            let (raw, is_zero) = match architecture {
                Architecture::Win32AMD64 => match read_u64_le(thunk_bytes, 0) {
                    Some(v) => (v, v == 0),
                    None => break,
                },
                Architecture::Win32 => match read_u32_le(thunk_bytes, 0) {
                    Some(v) => (v as u64, v == 0),
                    None => break,
                },
            };
            if is_zero {
                break;
            }

            let is_ordinal = match architecture {
                Architecture::Win32AMD64 => raw & IMAGE_ORDINAL_FLAG64 != 0,
                Architecture::Win32 => raw & IMAGE_ORDINAL_FLAG32 as u64 != 0,
            };

            let function = if is_ordinal {
                ImportFunction {
                    ordinal: (raw & 0xffff) as u16,
                    name: String::new(),
                    iat_rva: iat,
                }
            } else {
                let name_rva = raw as u32 as u64;
                // `IMAGE_IMPORT_BY_NAME` is a u16 `Hint` followed by the name string.
                let name = resolve_rva(sections, name_rva + 2)
                    .map(|bytes| {
                        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                        String::from_utf8_lossy(&bytes[..end]).into_owned()
                    })
                    .unwrap_or_default();
                ImportFunction {
                    ordinal: 0,
                    name,
                    iat_rva: iat,
                }
            };
            functions.push(function);

            thunk_rva += entry_size;
            iat += entry_size;
        }

        imports.push(Import {
            library_name,
            functions,
        });

        cursor += descriptor_size as u64;
    }
    imports
}

/// Resolve a forwarder string for an export whose address falls inside the
/// export directory's own RVA range.
fn check_export_forwarder(sections: &[Section], export_base: u64, export_size: u64, address: u64) -> String {
    if address >= export_base && address < export_base + export_size {
        read_cstr_at(sections, address)
    } else {
        String::new()
    }
}

fn process_exports(
    sections: &[Section],
    export_rva: u64,
    export_size: u64,
) -> (Vec<ExportFunction>, usize) {
    if export_rva == 0 {
        return (Vec::new(), 0);
    }
    let dir_size = core::mem::size_of::<ImageExportDirectory>();
    let bytes = match resolve_rva(sections, export_rva) {
        Some(b) if b.len() >= dir_size => b,
        _ => return (Vec::new(), 0),
    };
    let directory: &ImageExportDirectory = match try_from_bytes(&bytes[..dir_size]) {
        Ok(d) => d,
        Err(_) => return (Vec::new(), 0),
    };

    let mut seen_ordinal = vec![false; directory.number_of_functions as usize];
    let mut exports = Vec::with_capacity(directory.number_of_names as usize);

    for i in 0..directory.number_of_names as u64 {
        let name_rva =
            read_u32_at(sections, directory.address_of_names as u64 + i * 4).unwrap_or(0);
        let name = if name_rva != 0 {
            read_cstr_at(sections, name_rva as u64)
        } else {
            String::new()
        };

        let ordinal_bytes = resolve_rva(sections, directory.address_of_name_ordinals as u64 + i * 2);
        let ordinal = ordinal_bytes
            .and_then(|b| read_u16_le(b, 0))
            .unwrap_or(0);

        let address =
            read_u32_at(sections, directory.address_of_functions as u64 + ordinal as u64 * 4)
                .unwrap_or(0) as u64;

        if let Some(slot) = seen_ordinal.get_mut(ordinal as usize) {
            *slot = true;
        }

        let forward = check_export_forwarder(sections, export_rva, export_size, address);

        exports.push(ExportFunction {
            ordinal: ordinal + directory.base as u16,
            name,
            address,
            forward,
        });
    }

    let name_export_len = exports.len();

    for (i, seen) in seen_ordinal.iter().enumerate() {
        if *seen {
            continue;
        }
        let address =
            read_u32_at(sections, directory.address_of_functions as u64 + i as u64 * 4).unwrap_or(0)
                as u64;
        let forward = check_export_forwarder(sections, export_rva, export_size, address);
        exports.push(ExportFunction {
            ordinal: i as u16 + directory.base as u16,
            name: String::new(),
            address,
            forward,
        });
    }

    (exports, name_export_len)
}

fn process_relocations(sections: &[Section], reloc_rva: u64, reloc_size: u64) -> Vec<u64> {
    if reloc_rva == 0 || reloc_size == 0 {
        return Vec::new();
    }
    let block_header_size = core::mem::size_of::<ImageBaseRelocation>() as u64;
    let mut relocations = Vec::new();
    let mut cursor = 0u64;

    while cursor < reloc_size {
        let bytes = match resolve_rva(sections, reloc_rva + cursor) {
            Some(b) if b.len() as u64 >= block_header_size => b,
            _ => break,
        };
        let block: &ImageBaseRelocation = match try_from_bytes(&bytes[..block_header_size as usize]) {
            Ok(b) => b,
            Err(_) => break,
        };
        if block.size_of_block == 0 {
            break;
        }

        let entry_count = (block.size_of_block as u64 - block_header_size) / 2;
        for i in 0..entry_count {
            let entry_offset = block_header_size as usize + (i * 2) as usize;
            let entry = match read_u16_le(bytes, entry_offset) {
                Some(v) => v,
                None => break,
            };
            let reloc_type = (entry >> 12) as u8;
            let page_offset = (entry & 0x0fff) as u64;
            // Type 0 is padding and terminates the block early
            // (`PEFormat.cpp:163-164`'s `if(type == 0) break;`).
            if reloc_type == IMAGE_REL_BASED_ABSOLUTE {
                break;
            }
            relocations.push(block.virtual_address as u64 + page_offset);
        }

        cursor += block.size_of_block as u64;
    }

    relocations
}

fn read_security_cookie_va(
    sections: &[Section],
    load_config_rva: u64,
    architecture: Architecture,
) -> Option<u64> {
    let offset = match architecture {
        Architecture::Win32 => LOAD_CONFIG_SECURITY_COOKIE_OFFSET_32,
        Architecture::Win32AMD64 => LOAD_CONFIG_SECURITY_COOKIE_OFFSET_64,
    };
    // `SecurityCookie` itself holds the preferred-base VA of the `/GS`
    // cookie variable, not an RVA (`PEFormat.cpp:130-132`). The loader
    // rebases it by `base - image.info.base_address` at fix-up time.
    let bytes = resolve_rva(sections, load_config_rva)?;
    match architecture {
        Architecture::Win32 => read_u32_le(bytes, offset).map(|v| v as u64),
        Architecture::Win32AMD64 => read_u64_le(bytes, offset),
    }
}

fn read_u16(binary: &[u8], offset: usize) -> Result<u16, Error> {
    binary
        .get(offset..offset + 2)
        .and_then(|s| s.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or(Error::OffsetOutOfRange {
            offset,
            len: binary.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::bytes_of;

    fn section(base_address: u64, data: Vec<u8>) -> Section {
        Section {
            name: ".test".to_string(),
            base_address,
            virtual_size: data.len().max(0x1000) as u64,
            data,
            flags: SectionFlags::READ,
        }
    }

    #[test]
    fn security_cookie_reads_the_field_value_not_its_rva() {
        let mut load_config = vec![0u8; LOAD_CONFIG_SECURITY_COOKIE_OFFSET_32 + 4];
        load_config[LOAD_CONFIG_SECURITY_COOKIE_OFFSET_32..LOAD_CONFIG_SECURITY_COOKIE_OFFSET_32 + 4]
            .copy_from_slice(&0x0040_7788u32.to_le_bytes());
        let sections = vec![section(0x4000, load_config)];

        let va = read_security_cookie_va(&sections, 0x4000, Architecture::Win32);

        assert_eq!(va, Some(0x0040_7788));
    }

    #[test]
    fn security_cookie_reads_a_64_bit_value_on_amd64() {
        let mut load_config = vec![0u8; LOAD_CONFIG_SECURITY_COOKIE_OFFSET_64 + 8];
        load_config[LOAD_CONFIG_SECURITY_COOKIE_OFFSET_64..LOAD_CONFIG_SECURITY_COOKIE_OFFSET_64 + 8]
            .copy_from_slice(&0x0000_7ff6_0000_1122u64.to_le_bytes());
        let sections = vec![section(0x4000, load_config)];

        let va = read_security_cookie_va(&sections, 0x4000, Architecture::Win32AMD64);

        assert_eq!(va, Some(0x0000_7ff6_0000_1122));
    }

    fn relocation_block(virtual_address: u32, entries: &[u16]) -> Vec<u8> {
        let size_of_block = (core::mem::size_of::<ImageBaseRelocation>() + entries.len() * 2) as u32;
        let mut bytes = bytes_of(&ImageBaseRelocation { virtual_address, size_of_block }).to_vec();
        for entry in entries {
            bytes.extend_from_slice(&entry.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn absolute_padding_entry_terminates_the_block() {
        // First entry is type 0 (padding); it must stop the scan before the
        // HIGHLOW entry right after it is ever read.
        let block = relocation_block(0x1000, &[0x0000, 0x3010]);
        let reloc_size = block.len() as u64;
        let sections = vec![section(0x5000, block)];

        let relocations = process_relocations(&sections, 0x5000, reloc_size);

        assert!(relocations.is_empty());
    }

    #[test]
    fn non_highlow_dir64_entries_are_still_appended() {
        // Type 1 (IMAGE_REL_BASED_HIGH) is neither HIGHLOW nor DIR64, but it
        // is not padding either, so it must still be recorded.
        let block = relocation_block(0x2000, &[0x1020, 0x3030]);
        let reloc_size = block.len() as u64;
        let sections = vec![section(0x6000, block)];

        let relocations = process_relocations(&sections, 0x6000, reloc_size);

        assert_eq!(relocations, vec![0x2020, 0x2030]);
    }
}
