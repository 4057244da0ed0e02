//! pe.rs — embedded section resolver for the executing stub image.
//!
//! The stub carries its payloads as named PE/COFF sections (`.linux`,
//! `.initrd`, `.cmdline`, `.splash`, `.dtb`) glued onto the signed binary at
//! build time. Since the image is already loaded, sections are located by
//! their virtual address and size, and every span is validated against the
//! loaded-image bounds before anyone dereferences it.

use uefi::prelude::*;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

pub const SECTION_CMDLINE: &[u8] = b".cmdline";
pub const SECTION_LINUX: &[u8] = b".linux";
pub const SECTION_INITRD: &[u8] = b".initrd";
pub const SECTION_SPLASH: &[u8] = b".splash";
pub const SECTION_DTB: &[u8] = b".dtb";

const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_MAGIC: &[u8; 4] = b"PE\0\0";
const DOS_HEADER_LFANEW_OFFSET: usize = 0x3c;

/// One located section: offset and length relative to the image base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionView {
    pub offset: usize,
    pub size: usize,
}

/// The named sections the stub cares about. A section that is missing or has
/// zero length is absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubSections {
    pub cmdline: Option<SectionView>,
    pub linux: Option<SectionView>,
    pub initrd: Option<SectionView>,
    pub splash: Option<SectionView>,
    pub dtb: Option<SectionView>,
}

/// COFF file header, directly after the PE signature.
#[derive(FromBytes, Unaligned, Clone, Copy)]
#[repr(C)]
struct CoffHeader {
    machine: U16<LittleEndian>,
    number_of_sections: U16<LittleEndian>,
    time_date_stamp: U32<LittleEndian>,
    pointer_to_symbol_table: U32<LittleEndian>,
    number_of_symbols: U32<LittleEndian>,
    size_of_optional_header: U16<LittleEndian>,
    characteristics: U16<LittleEndian>,
}

/// COFF section table entry.
#[derive(FromBytes, Unaligned, Clone, Copy)]
#[repr(C)]
struct SectionHeader {
    name: [u8; 8],
    virtual_size: U32<LittleEndian>,
    virtual_address: U32<LittleEndian>,
    size_of_raw_data: U32<LittleEndian>,
    pointer_to_raw_data: U32<LittleEndian>,
    pointer_to_relocations: U32<LittleEndian>,
    pointer_to_linenumbers: U32<LittleEndian>,
    number_of_relocations: U16<LittleEndian>,
    number_of_linenumbers: U16<LittleEndian>,
    characteristics: U32<LittleEndian>,
}

impl SectionHeader {
    /// Section name with NUL padding trimmed.
    fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        &self.name[..end]
    }
}

/// Walk the section table of the loaded image and pick out the stub
/// sections. Fails with `LOAD_ERROR` on a malformed image or a section span
/// that escapes the image; absence of any individual section is not an
/// error here (the sequencer decides which ones are mandatory).
pub fn locate_sections(image: &[u8]) -> uefi::Result<StubSections> {
    let section_table = section_table(image)?;

    let mut found = StubSections::default();
    for header in section_table.iter() {
        let size = header.virtual_size.get() as usize;
        if size == 0 {
            continue;
        }
        let offset = header.virtual_address.get() as usize;

        // Every span handed out must lie inside the loaded image.
        let end = offset.checked_add(size).ok_or(Status::LOAD_ERROR)?;
        if end > image.len() {
            return Err(Status::LOAD_ERROR.into());
        }

        let view = Some(SectionView { offset, size });
        match header.name() {
            n if n == SECTION_CMDLINE => found.cmdline = view,
            n if n == SECTION_LINUX => found.linux = view,
            n if n == SECTION_INITRD => found.initrd = view,
            n if n == SECTION_SPLASH => found.splash = view,
            n if n == SECTION_DTB => found.dtb = view,
            _ => {}
        }
    }

    Ok(found)
}

fn section_table(image: &[u8]) -> Result<LayoutVerified<&[u8], [SectionHeader]>, uefi::Error> {
    if image.len() < DOS_HEADER_LFANEW_OFFSET + 4 || &image[..2] != DOS_MAGIC {
        return Err(Status::LOAD_ERROR.into());
    }

    let lfanew = u32::from_le_bytes([
        image[DOS_HEADER_LFANEW_OFFSET],
        image[DOS_HEADER_LFANEW_OFFSET + 1],
        image[DOS_HEADER_LFANEW_OFFSET + 2],
        image[DOS_HEADER_LFANEW_OFFSET + 3],
    ]) as usize;

    let sig_end = lfanew.checked_add(PE_MAGIC.len()).ok_or(Status::LOAD_ERROR)?;
    if sig_end > image.len() || &image[lfanew..sig_end] != PE_MAGIC {
        return Err(Status::LOAD_ERROR.into());
    }

    let (coff, rest) = LayoutVerified::<&[u8], CoffHeader>::new_unaligned_from_prefix(
        &image[sig_end..],
    )
    .ok_or(Status::LOAD_ERROR)?;

    // The section table starts right after the optional header.
    let opt_len = coff.size_of_optional_header.get() as usize;
    if opt_len > rest.len() {
        return Err(Status::LOAD_ERROR.into());
    }

    LayoutVerified::<&[u8], [SectionHeader]>::new_slice_unaligned_from_prefix(
        &rest[opt_len..],
        coff.number_of_sections.get() as usize,
    )
    .map(|(table, _)| table)
    .ok_or_else(|| Status::LOAD_ERROR.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Build a minimal loaded image: DOS stub, PE signature, COFF header
    /// with no optional header, then one section header per entry.
    fn synthetic_image(sections: &[(&[u8], u32, u32)], image_len: usize) -> Vec<u8> {
        let mut img = vec![0u8; image_len];
        img[0] = b'M';
        img[1] = b'Z';
        img[DOS_HEADER_LFANEW_OFFSET..DOS_HEADER_LFANEW_OFFSET + 4]
            .copy_from_slice(&0x40u32.to_le_bytes());
        img[0x40..0x44].copy_from_slice(PE_MAGIC);

        // COFF header: only number_of_sections and size_of_optional_header
        // matter for section-table walking.
        img[0x46..0x48].copy_from_slice(&(sections.len() as u16).to_le_bytes());

        let mut at = 0x44 + 20;
        for (name, va, vsize) in sections {
            img[at..at + name.len()].copy_from_slice(name);
            img[at + 8..at + 12].copy_from_slice(&vsize.to_le_bytes());
            img[at + 12..at + 16].copy_from_slice(&va.to_le_bytes());
            at += 40;
        }
        img
    }

    #[test]
    fn locates_named_sections() {
        let img = synthetic_image(
            &[
                (SECTION_LINUX, 0x1000, 4096),
                (SECTION_INITRD, 0x2000, 100),
                (SECTION_CMDLINE, 0x3000, 13),
            ],
            0x4000,
        );
        let s = locate_sections(&img).unwrap();
        assert_eq!(s.linux, Some(SectionView { offset: 0x1000, size: 4096 }));
        assert_eq!(s.initrd, Some(SectionView { offset: 0x2000, size: 100 }));
        assert_eq!(s.cmdline, Some(SectionView { offset: 0x3000, size: 13 }));
        assert!(s.splash.is_none());
        assert!(s.dtb.is_none());
    }

    #[test]
    fn missing_kernel_section_is_reported_absent() {
        let img = synthetic_image(&[(SECTION_INITRD, 0x1000, 64)], 0x2000);
        let s = locate_sections(&img).unwrap();
        assert!(s.linux.is_none());
        assert!(s.initrd.is_some());
    }

    #[test]
    fn zero_length_section_is_absent() {
        let img = synthetic_image(&[(SECTION_INITRD, 0x1000, 0)], 0x2000);
        let s = locate_sections(&img).unwrap();
        assert!(s.initrd.is_none());
    }

    #[test]
    fn section_escaping_the_image_is_rejected() {
        let img = synthetic_image(&[(SECTION_LINUX, 0x1000, 0x10000)], 0x2000);
        let err = locate_sections(&img).unwrap_err();
        assert_eq!(err.status(), Status::LOAD_ERROR);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut img = synthetic_image(&[(SECTION_LINUX, 0x1000, 16)], 0x2000);
        img[0x41] = b'X';
        assert!(locate_sections(&img).is_err());
    }
}
