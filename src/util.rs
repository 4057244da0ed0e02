//! util.rs — small shared helpers for the stub.

use alloc::vec::Vec;

use uefi::prelude::*;
use uefi::CStr16;

/// Truncate each UCS-2 code unit to its low 8 bits, in order.
///
/// This is the narrow transcoding the kernel command line and cpio member
/// names use. It is lossy on purpose and must stay that way for
/// compatibility with consumers of the narrow form; no UTF-8 re-encoding.
pub fn ucs2_to_narrow_lossy(units: impl Iterator<Item = u16>) -> Vec<u8> {
    units.map(|u| u as u8).collect()
}

/// Interpret a raw little-endian byte buffer as UCS-2 code units. A trailing
/// odd byte is ignored, matching how firmware load options are sized.
pub fn bytes_as_ucs2(raw: &[u8]) -> impl Iterator<Item = u16> + '_ {
    raw.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]))
}

/// UTF-16 value bytes for a firmware variable, terminator included.
pub fn utf16_bytes_with_nul(s: &CStr16) -> Vec<u8> {
    let mut out = Vec::with_capacity((s.num_chars() + 1) * 2);
    for c in s.iter() {
        out.extend_from_slice(&u16::from(*c).to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// The raw EFI system table behind the `uefi` wrapper.
///
/// `SystemTable<Boot>` is a single-pointer wrapper around the firmware table
/// (the `#[entry]` ABI depends on that layout), so reading the wrapper's
/// storage yields the `EFI_SYSTEM_TABLE` pointer itself. Needed for the two
/// services the high-level crate does not expose: `InstallConfigurationTable`
/// and the system-table argument of the kernel handover call.
pub fn raw_system_table(st: &SystemTable<Boot>) -> *mut r_efi::efi::SystemTable {
    unsafe { core::mem::transmute_copy(st) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_transcode_truncates_per_unit() {
        let wide = [0x0063u16, 0x006F, 0x0141, 0x2603, 0x0000];
        let narrow = ucs2_to_narrow_lossy(wide.iter().copied());
        assert_eq!(narrow, [0x63, 0x6F, 0x41, 0x03, 0x00]);
    }

    #[test]
    fn ucs2_view_drops_trailing_odd_byte() {
        let raw = [0x61, 0x00, 0x62, 0x00, 0x7F];
        let units: alloc::vec::Vec<u16> = bytes_as_ucs2(&raw).collect();
        assert_eq!(units, [0x61, 0x62]);
    }
}
