//! devicetree.rs — platform-configuration (devicetree) installer.
//!
//! Copies the embedded `.dtb` section into firmware-owned memory and
//! publishes it as the devicetree configuration table, where the kernel
//! expects to find it. The high-level bindings expose no
//! `InstallConfigurationTable`, so that single call goes through the raw
//! `r-efi` table.

use core::ffi::c_void;

use uefi::prelude::*;
use uefi::table::boot::{AllocateType, MemoryType};

use crate::initrd::pages_for;
use crate::util::raw_system_table;

/// EFI_DTB_TABLE_GUID
const DTB_TABLE_GUID: r_efi::efi::Guid = r_efi::efi::Guid::from_fields(
    0xb1b621d5,
    0xf19c,
    0x41a5,
    0x83,
    0x0b,
    &[0xd9, 0x15, 0x2c, 0x69, 0xaa, 0xe0],
);

/// Install `dtb` as the devicetree configuration table.
///
/// The blob is copied into ACPI-reclaim pages: the kernel parses it long
/// after boot services (and our image) are gone. Failure leaves whatever
/// configuration table the platform already has.
pub fn install(st: &SystemTable<Boot>, dtb: &[u8]) -> uefi::Result<()> {
    let bs = st.boot_services();

    let pages = pages_for(dtb.len());
    let base = bs.allocate_pages(
        AllocateType::AnyPages,
        MemoryType::ACPI_RECLAIM,
        pages,
    )?;

    // SAFETY: `base` addresses `pages` fresh firmware-owned pages.
    unsafe {
        core::ptr::copy_nonoverlapping(dtb.as_ptr(), base as usize as *mut u8, dtb.len());
    }

    let raw_st = raw_system_table(st);
    // SAFETY: boot services are live for the whole stub lifetime; the GUID
    // and table pointer stay valid until the kernel owns the machine.
    let status = unsafe {
        ((*(*raw_st).boot_services).install_configuration_table)(
            &DTB_TABLE_GUID as *const _ as *mut _,
            base as usize as *mut c_void,
        )
    };

    if status != r_efi::efi::Status::SUCCESS {
        let _ = bs.free_pages(base, pages); // non-fatal
        return Err(Status::DEVICE_ERROR.into());
    }

    Ok(())
}
