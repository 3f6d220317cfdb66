//! Integration tests exercising the parser, serializer and `Image` helpers
//! together against a synthetic PE32, built by hand at the byte level
//! (`bytemuck::bytes_of` over the crate's own raw structs, rather than a
//! checked-in fixture binary) so the test has no external dependency on a
//! real Windows toolchain or sample corpus.

use bytemuck::bytes_of;
use pe_loader::datasource::{DataSource, MemoryDataSource};
use pe_loader::image::{Image, Section, SectionFlags};
use pe_loader::parser;
use pe_loader::raw::coff::CoffFileHeader;
use pe_loader::raw::directory::{ImageExportDirectory, ImageImportDescriptor};
use pe_loader::raw::optional::{DataDirectory, OptionalHeader32};
use pe_loader::raw::section::section_header;
use pe_loader::serializer;
use std::rc::Rc;

use pe_loader::config::MAIN_SECTION_NAME;

const E_LFANEW: usize = 0x40;
const COFF_OFFSET: usize = E_LFANEW + 4;
const OPTIONAL_OFFSET: usize = COFF_OFFSET + core::mem::size_of::<CoffFileHeader>();
const SECTION_HEADER_SIZE: usize = 40;
const NUMBER_OF_SECTIONS: usize = 3;
const SECTION_TABLE_OFFSET: usize = OPTIONAL_OFFSET + core::mem::size_of::<OptionalHeader32>();
const HEADERS_END: usize = SECTION_TABLE_OFFSET + SECTION_HEADER_SIZE * NUMBER_OF_SECTIONS;

const TEXT_RVA: u32 = 0x1000;
const IDATA_RVA: u32 = 0x2000;
const EDATA_RVA: u32 = 0x3000;

fn section_name(name: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    let bytes = name.as_bytes();
    let n = bytes.len().min(8);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// One KERNEL32.dll/ExitProcess import descriptor, its thunk arrays and its
/// backing strings, laid out starting at RVA [IDATA_RVA].
fn build_idata() -> Vec<u8> {
    let mut buf = Vec::new();

    // Two descriptor slots: [0] the real one, [1] the all-zero terminator.
    buf.resize(2 * core::mem::size_of::<ImageImportDescriptor>(), 0);

    let thunk_offset = buf.len() as u32;
    let original_first_thunk = IDATA_RVA + thunk_offset;
    buf.extend_from_slice(&0u32.to_le_bytes()); // patched below
    buf.extend_from_slice(&0u32.to_le_bytes()); // terminator

    let iat_offset = buf.len() as u32;
    let first_thunk = IDATA_RVA + iat_offset;
    buf.extend_from_slice(&0u32.to_le_bytes()); // patched below
    buf.extend_from_slice(&0u32.to_le_bytes()); // terminator

    let by_name_offset = buf.len() as u32;
    let by_name_rva = IDATA_RVA + by_name_offset;
    buf.extend_from_slice(&0u16.to_le_bytes()); // Hint
    push_cstr(&mut buf, "ExitProcess");

    let dll_name_offset = buf.len() as u32;
    let dll_name_rva = IDATA_RVA + dll_name_offset;
    push_cstr(&mut buf, "KERNEL32.dll");

    buf[thunk_offset as usize..thunk_offset as usize + 4].copy_from_slice(&by_name_rva.to_le_bytes());
    buf[iat_offset as usize..iat_offset as usize + 4].copy_from_slice(&by_name_rva.to_le_bytes());
    let _ = dll_name_offset;

    let descriptor = ImageImportDescriptor {
        original_first_thunk,
        time_date_stamp: 0,
        forwarder_chain: 0,
        name: dll_name_rva,
        first_thunk,
    };
    buf[0..core::mem::size_of::<ImageImportDescriptor>()].copy_from_slice(bytes_of(&descriptor));

    buf
}

/// One named export, `DoStuff`, forwarding nowhere, pointing at [TEXT_RVA].
fn build_edata() -> Vec<u8> {
    let mut buf = vec![0u8; core::mem::size_of::<ImageExportDirectory>()];

    let address_of_functions = EDATA_RVA + buf.len() as u32;
    buf.extend_from_slice(&TEXT_RVA.to_le_bytes());

    let address_of_names = EDATA_RVA + buf.len() as u32;
    let name_rva_placeholder_offset = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes());

    let address_of_name_ordinals = EDATA_RVA + buf.len() as u32;
    buf.extend_from_slice(&0u16.to_le_bytes());

    let export_name_rva = EDATA_RVA + buf.len() as u32;
    push_cstr(&mut buf, "DoStuff");
    buf[name_rva_placeholder_offset..name_rva_placeholder_offset + 4]
        .copy_from_slice(&export_name_rva.to_le_bytes());

    let module_name_rva = EDATA_RVA + buf.len() as u32;
    push_cstr(&mut buf, "synthetic.dll");

    let directory = ImageExportDirectory {
        characteristics: 0,
        time_date_stamp: 0,
        major_version: 0,
        minor_version: 0,
        name: module_name_rva,
        base: 1,
        number_of_functions: 1,
        number_of_names: 1,
        address_of_functions,
        address_of_names,
        address_of_name_ordinals,
    };
    buf[0..core::mem::size_of::<ImageExportDirectory>()].copy_from_slice(bytes_of(&directory));

    buf
}

/// Builds a minimal-but-complete PE32 image exercising the DOS/NT/COFF/
/// optional/section headers, one import and one export, entirely in memory.
fn build_synthetic_pe32() -> Vec<u8> {
    let idata = build_idata();
    let edata = build_edata();
    let text: Vec<u8> = vec![0x90; 16]; // NOP sled, stands in for code.

    let text_raw_offset = HEADERS_END as u32;
    let idata_raw_offset = text_raw_offset + text.len() as u32;
    let edata_raw_offset = idata_raw_offset + idata.len() as u32;
    let file_len = edata_raw_offset as usize + edata.len();

    let mut out = vec![0u8; file_len];
    out[0x3c..0x3e].copy_from_slice(&(E_LFANEW as u16).to_le_bytes());
    out[E_LFANEW..E_LFANEW + 4].copy_from_slice(b"PE\0\0");

    let coff = CoffFileHeader {
        machine: 0x14c, // IMAGE_FILE_MACHINE_I386
        number_of_sections: NUMBER_OF_SECTIONS as u16,
        time_date_stamp: 0,
        pointer_to_symbol_table: 0,
        number_of_symbols: 0,
        size_of_optional_header: core::mem::size_of::<OptionalHeader32>() as u16,
        characteristics: 0x0002 | 0x0100, // EXECUTABLE_IMAGE | 32BIT_MACHINE
    };
    out[COFF_OFFSET..COFF_OFFSET + core::mem::size_of::<CoffFileHeader>()].copy_from_slice(bytes_of(&coff));

    let mut data_directories = [DataDirectory::default(); 16];
    data_directories[0] = DataDirectory {
        virtual_address: EDATA_RVA,
        size: 0x1000,
    }; // export table
    data_directories[1] = DataDirectory {
        virtual_address: IDATA_RVA,
        size: idata.len() as u32,
    }; // import table
    let data_directories: pe_loader::raw::optional::DataDirectories = bytemuck::cast(data_directories);

    let optional = OptionalHeader32 {
        magic: 0x10b,
        major_linker_version: 14,
        minor_linker_version: 0,
        size_of_code: text.len() as u32,
        size_of_initialized_data: (idata.len() + edata.len()) as u32,
        size_of_uninitialized_data: 0,
        address_of_entry_point: TEXT_RVA,
        base_of_code: TEXT_RVA,
        base_of_data: IDATA_RVA,
        image_base: 0x0040_0000,
        section_alignment: 0x1000,
        file_alignment: 0x200,
        major_operating_system_version: 6,
        minor_operating_system_version: 0,
        major_image_version: 1,
        minor_image_version: 0,
        major_subsystem_version: 6,
        minor_subsystem_version: 0,
        win32_version_value: 0,
        size_of_image: 0x4000,
        size_of_headers: HEADERS_END as u32,
        check_sum: 0,
        subsystem: 3, // WindowsCUI
        dll_characteristics: 0,
        size_of_stack_reserve: 0x10_0000,
        size_of_stack_commit: 0x1000,
        size_of_heap_reserve: 0x10_0000,
        size_of_heap_commit: 0x1000,
        loader_flags: 0,
        number_of_rva_and_sizes: 16,
        data_directories,
    };
    out[OPTIONAL_OFFSET..OPTIONAL_OFFSET + core::mem::size_of::<OptionalHeader32>()]
        .copy_from_slice(bytes_of(&optional));

    let sections = [
        (
            section_name(".text"),
            TEXT_RVA,
            0x1000u32,
            text.len() as u32,
            text_raw_offset,
            0x6000_0020u32, // CODE | MEM_EXECUTE | MEM_READ
        ),
        (
            section_name(".idata"),
            IDATA_RVA,
            0x1000u32,
            idata.len() as u32,
            idata_raw_offset,
            0x4000_0040u32, // INITIALIZED_DATA | MEM_READ
        ),
        (
            section_name(".edata"),
            EDATA_RVA,
            0x1000u32,
            edata.len() as u32,
            edata_raw_offset,
            0x4000_0040u32,
        ),
    ];
    for (i, (name, rva, vsize, raw_size, raw_offset, characteristics)) in sections.iter().enumerate() {
        let header = section_header {
            name: *name,
            virtual_size: *vsize,
            virtual_address: *rva,
            size_of_raw_data: *raw_size,
            pointer_to_raw_data: *raw_offset,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: *characteristics,
        };
        let offset = SECTION_TABLE_OFFSET + i * SECTION_HEADER_SIZE;
        out[offset..offset + SECTION_HEADER_SIZE].copy_from_slice(bytes_of(&header));
    }

    out[text_raw_offset as usize..text_raw_offset as usize + text.len()].copy_from_slice(&text);
    out[idata_raw_offset as usize..idata_raw_offset as usize + idata.len()].copy_from_slice(&idata);
    out[edata_raw_offset as usize..edata_raw_offset as usize + edata.len()].copy_from_slice(&edata);

    out
}

fn parse_synthetic() -> Image {
    let binary = build_synthetic_pe32();
    let source: Rc<dyn DataSource> = Rc::new(MemoryDataSource::new(binary));
    parser::parse_from_file(source, "synthetic.exe", ".").expect("synthetic PE32 should parse")
}

#[test]
fn parses_header_and_sections() {
    let image = parse_synthetic();
    assert_eq!(image.info.base_address, 0x0040_0000);
    assert_eq!(image.info.entry_point, TEXT_RVA as u64);
    assert!(!image.info.is_library());
    assert_eq!(image.sections.len(), 3);
    assert_eq!(image.sections[0].name, ".text");
    assert!(image.sections[0].flags.contains(SectionFlags::CODE));
    assert!(image.sections[0].flags.contains(SectionFlags::EXECUTE));
}

#[test]
fn parses_one_import_by_name() {
    let image = parse_synthetic();
    assert_eq!(image.imports.len(), 1);
    let import = &image.imports[0];
    assert_eq!(import.library_name, "KERNEL32.dll");
    assert_eq!(import.functions.len(), 1);
    assert_eq!(import.functions[0].name, "ExitProcess");
    assert!(!import.functions[0].is_ordinal());
}

#[test]
fn parses_one_named_export() {
    let image = parse_synthetic();
    assert_eq!(image.exports.len(), 1);
    assert_eq!(image.name_export_len, 1);
    let export = image.find_export_by_name("DoStuff").expect("DoStuff should be found");
    assert_eq!(export.address, TEXT_RVA as u64);
    assert!(!export.is_forwarder());
    assert!(image.find_export_by_ordinal(1).is_some());
}

#[test]
fn has_no_base_relocations() {
    let image = parse_synthetic();
    assert!(image.relocations.is_empty());
}

#[test]
fn serializer_round_trip_preserves_sections_and_directories() {
    let image = parse_synthetic();
    let reserialized = serializer::serialize(&image).expect("serialization should succeed");

    let source: Rc<dyn DataSource> = Rc::new(MemoryDataSource::new(reserialized));
    let reparsed = parser::parse_from_file(source, "synthetic.exe", ".")
        .expect("reserialized PE32 should reparse");

    assert_eq!(reparsed.sections.len(), image.sections.len());
    for (original, round_tripped) in image.sections.iter().zip(reparsed.sections.iter()) {
        assert_eq!(original.base_address, round_tripped.base_address);
        assert_eq!(original.virtual_size, round_tripped.virtual_size);
        assert_eq!(original.data, round_tripped.data);
    }

    // Data directories are copied verbatim, so the import/export RVAs still
    // resolve against the re-laid-out section data.
    assert_eq!(reparsed.imports.len(), 1);
    assert_eq!(reparsed.imports[0].library_name, "KERNEL32.dll");
    assert_eq!(
        reparsed.find_export_by_name("DoStuff").map(|e| e.address),
        Some(TEXT_RVA as u64)
    );
}

#[test]
fn builds_an_image_from_scratch_and_serializes_it() {
    // Exercises the serializer against a hand-built `Image` with no
    // import/export directories at all, the packer's own common case.
    let mut header = vec![0u8; HEADERS_END];
    header[0x3c..0x3e].copy_from_slice(&(E_LFANEW as u16).to_le_bytes());
    header[E_LFANEW..E_LFANEW + 4].copy_from_slice(b"PE\0\0");
    let coff = CoffFileHeader {
        machine: 0x14c,
        number_of_sections: 1,
        time_date_stamp: 0,
        pointer_to_symbol_table: 0,
        number_of_symbols: 0,
        size_of_optional_header: core::mem::size_of::<OptionalHeader32>() as u16,
        characteristics: 0x0002 | 0x0100,
    };
    header[COFF_OFFSET..COFF_OFFSET + core::mem::size_of::<CoffFileHeader>()].copy_from_slice(bytes_of(&coff));
    let optional = OptionalHeader32 {
        magic: 0x10b,
        image_base: 0x0040_0000,
        section_alignment: 0x1000,
        file_alignment: 0x200,
        number_of_rva_and_sizes: 16,
        ..Default::default()
    };
    header[OPTIONAL_OFFSET..OPTIONAL_OFFSET + core::mem::size_of::<OptionalHeader32>()]
        .copy_from_slice(bytes_of(&optional));

    let image = Image {
        info: pe_loader::image::ImageInfo {
            architecture: pe_loader::image::Architecture::Win32,
            base_address: 0x0040_0000,
            entry_point: TEXT_RVA as u64,
            size: 0x2000,
            flags: Default::default(),
            security_cookie_va: 0,
            tls_directory_rva: 0,
        },
        file_name: "packed.exe".to_string(),
        file_path: ".".to_string(),
        header,
        sections: vec![Section {
            name: MAIN_SECTION_NAME.to_string(),
            base_address: TEXT_RVA as u64,
            virtual_size: 0x1000,
            data: vec![0x90; 16],
            flags: SectionFlags::CODE | SectionFlags::READ | SectionFlags::EXECUTE,
        }],
        imports: Vec::new(),
        exports: Vec::new(),
        name_export_len: 0,
        relocations: Vec::new(),
    };

    let bytes = serializer::serialize(&image).expect("serialization should succeed");
    let source: Rc<dyn DataSource> = Rc::new(MemoryDataSource::new(bytes));
    let reparsed = parser::parse_from_file(source, "packed.exe", ".").expect("should reparse");
    assert_eq!(reparsed.sections.len(), 1);
    assert_eq!(reparsed.sections[0].name, MAIN_SECTION_NAME);
    assert_eq!(reparsed.sections[0].data, vec![0x90; 16]);
}
