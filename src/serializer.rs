//! The PE Serializer (`spec.md` §4.2): write an [`Image`] back out as a
//! valid PE.
//!
//! Grounded on `examples/original_source/Packer/PEFormat.cpp`'s `save`:
//! section headers are rebuilt from scratch (alignment, raw-data offsets,
//! characteristics), but the DOS stub and optional header are copied
//! verbatim from `Image::header` and only patched in place
//! (`SizeOfImage`/`FileAlignment`/`SectionAlignment`, `NumberOfSections`).
//! Data directories are deliberately left untouched — this is the same
//! simplification the original makes (see `spec.md` §4.2: "the serializer
//! does not rebuild the import/export/reloc directories").

use crate::error::Error;
use crate::image::{Architecture, Image, SectionFlags};
use crate::raw::coff::CoffFileHeader;

/// File-alignment used for section raw data.
pub const FILE_ALIGNMENT: u32 = 0x200;
/// Section-alignment used for `SizeOfImage`.
pub const SECTION_ALIGNMENT: u32 = 0x1000;
/// Reserved space for DOS stub + headers + section table before the first section's raw data.
pub const HEADER_RESERVATION: u32 = 0x400;

fn multiple_of(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

struct BuiltSectionHeader {
    name: [u8; 8],
    virtual_address: u32,
    virtual_size: u32,
    size_of_raw_data: u32,
    pointer_to_raw_data: u32,
    characteristics: u32,
}

/// Serialize `image` into a fresh buffer of well-formed PE bytes.
pub fn serialize(image: &Image) -> Result<Vec<u8>, Error> {
    let mut section_headers = Vec::with_capacity(image.sections.len());
    let mut data_offset = HEADER_RESERVATION;
    let mut image_size = 0u32;

    for section in &image.sections {
        let mut name = [0u8; 8];
        let name_bytes = section.name.as_bytes();
        let n = name_bytes.len().min(8);
        name[..n].copy_from_slice(&name_bytes[..n]);

        let size_of_raw_data = multiple_of(section.data.len() as u32, FILE_ALIGNMENT);
        let pointer_to_raw_data = if size_of_raw_data > 0 { data_offset } else { 0 };

        let mut characteristics = 0u32;
        if section.flags.contains(SectionFlags::INIT_DATA) {
            characteristics |= 0x0000_0040; // IMAGE_SCN_CNT_INITIALIZED_DATA
        }
        if section.flags.contains(SectionFlags::UNINIT_DATA) {
            characteristics |= 0x0000_0080; // IMAGE_SCN_CNT_UNINITIALIZED_DATA
        }
        if section.flags.contains(SectionFlags::CODE) {
            characteristics |= 0x0000_0020; // IMAGE_SCN_CNT_CODE
        }
        if section.flags.contains(SectionFlags::READ) {
            characteristics |= 0x4000_0000; // IMAGE_SCN_MEM_READ
        }
        if section.flags.contains(SectionFlags::WRITE) {
            characteristics |= 0x8000_0000; // IMAGE_SCN_MEM_WRITE
        }
        if section.flags.contains(SectionFlags::EXECUTE) {
            characteristics |= 0x2000_0000; // IMAGE_SCN_MEM_EXECUTE
        }

        let virtual_address = section.base_address as u32;
        let virtual_size = section.virtual_size as u32;

        section_headers.push(BuiltSectionHeader {
            name,
            virtual_address,
            virtual_size,
            size_of_raw_data,
            pointer_to_raw_data,
            characteristics,
        });

        data_offset += multiple_of(size_of_raw_data, FILE_ALIGNMENT);
        image_size = virtual_address + virtual_size;
    }

    let header = &image.header;
    if header.len() < 4 {
        return Err(Error::MissingCoffHeader);
    }
    let e_lfanew = u16::from_le_bytes(
        header
            .get(0x3c..0x3e)
            .ok_or(Error::OffsetOutOfRange {
                offset: 0x3c,
                len: header.len(),
            })?
            .try_into()
            .unwrap(),
    ) as usize;

    let coff_offset = e_lfanew + 4;
    let coff_size = core::mem::size_of::<CoffFileHeader>();
    let mut coff_bytes = header
        .get(coff_offset..coff_offset + coff_size)
        .ok_or(Error::OffsetOutOfRange {
            offset: coff_offset,
            len: header.len(),
        })?
        .to_vec();
    // NumberOfSections is the second u16 field of IMAGE_FILE_HEADER.
    coff_bytes[2..4].copy_from_slice(&(image.sections.len() as u16).to_le_bytes());

    let optional_header_offset = coff_offset + coff_size;
    let optional_header_size = match image.info.architecture {
        Architecture::Win32 => core::mem::size_of::<crate::raw::optional::OptionalHeader32>(),
        Architecture::Win32AMD64 => core::mem::size_of::<crate::raw::optional::OptionalHeader64>(),
    };
    let mut optional_header_bytes = header
        .get(optional_header_offset..optional_header_offset + optional_header_size)
        .ok_or(Error::OffsetOutOfRange {
            offset: optional_header_offset,
            len: header.len(),
        })?
        .to_vec();

    let size_of_image = multiple_of(image_size, SECTION_ALIGNMENT);
    patch_optional_header(&mut optional_header_bytes, image.info.architecture, size_of_image);

    let section_table_offset = optional_header_offset + optional_header_size;
    let section_header_size = 40usize; // sizeof(IMAGE_SECTION_HEADER)
    let section_table_size = section_header_size * section_headers.len();

    let total_size = (data_offset as usize).max(section_table_offset + section_table_size);
    let mut out = vec![0u8; total_size.max(HEADER_RESERVATION as usize)];

    out[0..e_lfanew].copy_from_slice(&header[0..e_lfanew]);
    out[e_lfanew..e_lfanew + 4].copy_from_slice(b"PE\0\0");
    out[coff_offset..coff_offset + coff_size].copy_from_slice(&coff_bytes);
    out[optional_header_offset..optional_header_offset + optional_header_size]
        .copy_from_slice(&optional_header_bytes);

    let mut offset = section_table_offset;
    for section_header in &section_headers {
        write_section_header(&mut out, offset, section_header);
        offset += section_header_size;
    }

    for (section, built) in image.sections.iter().zip(section_headers.iter()) {
        if built.size_of_raw_data == 0 {
            continue;
        }
        let start = built.pointer_to_raw_data as usize;
        let end = start + section.data.len();
        if end > out.len() {
            out.resize(end, 0);
        }
        out[start..end].copy_from_slice(&section.data);
    }

    Ok(out)
}

fn patch_optional_header(bytes: &mut [u8], architecture: Architecture, size_of_image: u32) {
    // Field layout (both PE32 and PE32+ agree on these offsets):
    // SizeOfImage @ 56, FileAlignment @ 36, SectionAlignment @ 32.
    const SIZE_OF_IMAGE_OFFSET: usize = 56;
    const FILE_ALIGNMENT_OFFSET: usize = 36;
    const SECTION_ALIGNMENT_OFFSET: usize = 32;
    let _ = architecture;

    if bytes.len() >= SIZE_OF_IMAGE_OFFSET + 4 {
        bytes[SIZE_OF_IMAGE_OFFSET..SIZE_OF_IMAGE_OFFSET + 4]
            .copy_from_slice(&size_of_image.to_le_bytes());
    }
    if bytes.len() >= FILE_ALIGNMENT_OFFSET + 4 {
        bytes[FILE_ALIGNMENT_OFFSET..FILE_ALIGNMENT_OFFSET + 4]
            .copy_from_slice(&FILE_ALIGNMENT.to_le_bytes());
    }
    if bytes.len() >= SECTION_ALIGNMENT_OFFSET + 4 {
        bytes[SECTION_ALIGNMENT_OFFSET..SECTION_ALIGNMENT_OFFSET + 4]
            .copy_from_slice(&SECTION_ALIGNMENT.to_le_bytes());
    }
}

fn write_section_header(out: &mut [u8], offset: usize, header: &BuiltSectionHeader) {
    out[offset..offset + 8].copy_from_slice(&header.name);
    out[offset + 8..offset + 12].copy_from_slice(&header.virtual_size.to_le_bytes());
    out[offset + 12..offset + 16].copy_from_slice(&header.virtual_address.to_le_bytes());
    out[offset + 16..offset + 20].copy_from_slice(&header.size_of_raw_data.to_le_bytes());
    out[offset + 20..offset + 24].copy_from_slice(&header.pointer_to_raw_data.to_le_bytes());
    // pointer_to_relocations, pointer_to_linenumbers, number_of_relocations,
    // number_of_linenumbers: left zeroed, matching the original (executable
    // images never populate these).
    out[offset + 36..offset + 40].copy_from_slice(&header.characteristics.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_of_rounds_up() {
        assert_eq!(multiple_of(1, 0x200), 0x200);
        assert_eq!(multiple_of(0x200, 0x200), 0x200);
        assert_eq!(multiple_of(0x201, 0x200), 0x400);
        assert_eq!(multiple_of(0, 0x200), 0);
    }
}
