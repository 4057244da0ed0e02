//! platform.rs — the firmware-backed [`Platform`] implementation.
//!
//! Binds the sequencer's collaborator seam to the live system table and the
//! loaded image: PE section resolution, GOP splash, TCG2 measurement,
//! variable export, cpio packaging, page allocation and the kernel
//! handover.

use alloc::format;
use alloc::string::ToString;
use alloc::vec::Vec;

use uefi::prelude::*;
use uefi::proto::device_path::text::{AllowShortcuts, DevicePathToText, DisplayOnly};
use uefi::proto::device_path::DevicePath;
use uefi::proto::loaded_image::LoadedImage;
use uefi::table::boot::{
    AllocateType, BootServices, MemoryType, OpenProtocolAttributes, OpenProtocolParams,
};
use uefi::{CStr16, CString16};

use crate::disk;
use crate::efivar::{self, EfiVariableStore, LoaderIdentity};
use crate::graphics;
use crate::initrd::{pages_for, PageAllocator};
use crate::linux;
use crate::loader::{ArchiveRequest, Platform};
use crate::log::logger::{log_info, log_warn};
use crate::measure;
use crate::pe::{self, SectionView, StubSections};
use crate::secure_boot;
use crate::{cpio, devicetree};

pub struct FirmwarePlatform {
    st: SystemTable<Boot>,
    image: Handle,
    image_base: *const u8,
    image_size: usize,
    device: Handle,
    /// Textual device path of our own image, if the chain loader provided
    /// one.
    file_path: Option<CString16>,
    load_options: Option<Vec<u8>>,
}

impl FirmwarePlatform {
    /// Gather everything about the executing image up front; the rest of
    /// the boot only consumes it.
    pub fn new(image: Handle, st: SystemTable<Boot>) -> uefi::Result<Self> {
        let bs = st.boot_services();

        // GET_PROTOCOL: the firmware itself keeps LoadedImage open on us.
        let loaded_image = unsafe {
            bs.open_protocol::<LoadedImage>(
                OpenProtocolParams {
                    handle: image,
                    agent: image,
                    controller: None,
                },
                OpenProtocolAttributes::GetProtocol,
            )
        }?;

        let (image_base, image_size) = loaded_image.info();
        let device = loaded_image.device();
        let file_path = loaded_image
            .file_path()
            .and_then(|path| device_path_text(bs, path));
        let load_options = loaded_image.load_options_as_bytes().map(<[u8]>::to_vec);
        drop(loaded_image);

        Ok(FirmwarePlatform {
            st,
            image,
            image_base: image_base.cast(),
            image_size: image_size as usize,
            device,
            file_path,
            load_options,
        })
    }
}

impl PageAllocator for FirmwarePlatform {
    fn allocate_below(&mut self, max_address: u64, bytes: usize) -> uefi::Result<u64> {
        let base = self.st.boot_services().allocate_pages(
            AllocateType::MaxAddress(max_address),
            MemoryType::LOADER_DATA,
            pages_for(bytes),
        )?;
        Ok(base as u64)
    }
}

impl Platform for FirmwarePlatform {
    fn image(&self) -> &'static [u8] {
        // SAFETY: the firmware keeps the image mapped until control moves to
        // the kernel, which outlives every use of this view.
        unsafe { core::slice::from_raw_parts(self.image_base, self.image_size) }
    }

    fn image_sections(&mut self) -> uefi::Result<StubSections> {
        pe::locate_sections(self.image())
    }

    fn show_splash(&mut self, bmp: SectionView) {
        let data = self.section_data(bmp);
        if let Err(err) = graphics::splash(self.st.boot_services(), data) {
            log_warn(
                "splash",
                &format!("splash not rendered: {:?}", err.status()),
            ); // non-fatal
        }
    }

    fn secure_boot_enabled(&self) -> bool {
        secure_boot::secure_boot_enabled(self.st.runtime_services())
    }

    fn load_options(&self) -> Option<Vec<u8>> {
        self.load_options.clone()
    }

    fn measure(&mut self, pcrs: &[u32], event_data: &[u8], data: &[u8]) -> uefi::Result<()> {
        for pcr in pcrs {
            measure::measure(self.st.boot_services(), *pcr, event_data, data)?;
        }
        Ok(())
    }

    fn export_loader_variables(&mut self) {
        let identity = LoaderIdentity {
            partition_uuid: disk::partition_uuid(self.st.boot_services(), self.image, self.device),
            image_identifier: self.file_path.clone(),
            firmware_vendor: self.st.firmware_vendor().into(),
            firmware_revision: self.st.firmware_revision(),
            uefi_major: self.st.uefi_revision().major(),
            uefi_minor: self.st.uefi_revision().minor(),
        };
        let mut store = EfiVariableStore::new(self.st.runtime_services());
        efivar::export_loader_variables(&mut store, &identity);
    }

    fn pack_archive(&mut self, request: &ArchiveRequest) -> Option<Vec<u8>> {
        let image_dir = self.file_path.as_deref().and_then(parent_directory);

        match cpio::pack_cpio(
            self.st.boot_services(),
            self.image,
            image_dir.as_deref(),
            request,
        ) {
            Ok(Some(archive)) => {
                for pcr in request.pcrs {
                    let _ = measure::measure(
                        self.st.boot_services(),
                        *pcr,
                        request.label.as_bytes(),
                        &archive,
                    ); // non-fatal
                }
                log_info(
                    "cpio",
                    &format!("{}: packed {} bytes", request.label, archive.len()),
                );
                Some(archive)
            }
            Ok(None) => None,
            Err(err) => {
                log_warn(
                    "cpio",
                    &format!("{}: packaging failed: {:?}", request.label, err.status()),
                ); // non-fatal
                None
            }
        }
    }

    fn install_devicetree(&mut self, dtb: SectionView) -> uefi::Result<()> {
        let data = self.section_data(dtb);
        devicetree::install(&self.st, data)
    }

    fn execute_kernel(
        &mut self,
        cmdline: Option<&[u8]>,
        kernel: (u64, usize),
        initrd: (u64, usize),
    ) -> uefi::Result<()> {
        // SAFETY: `kernel` was derived from a validated section of our own
        // mapped image.
        let kernel = unsafe {
            core::slice::from_raw_parts(kernel.0 as usize as *const u8, kernel.1)
        };
        let status = linux::exec(&self.st, self.image, cmdline, kernel, initrd);
        Err(status.into())
    }

    fn reset_console(&mut self) {
        let _ = self.st.stdout().reset(false); // non-fatal
    }
}

fn device_path_text(bs: &BootServices, path: &DevicePath) -> Option<CString16> {
    let handle = bs.get_handle_for_protocol::<DevicePathToText>().ok()?;
    let converter = bs.open_protocol_exclusive::<DevicePathToText>(handle).ok()?;
    let text = converter
        .convert_device_path_to_text(bs, path, DisplayOnly(false), AllowShortcuts(false))
        .ok()?;
    Some(CString16::from(&*text))
}

/// Directory half of a backslash-separated image path
/// (`\EFI\Linux\stub.efi` -> `\EFI\Linux`).
fn parent_directory(path: &CStr16) -> Option<CString16> {
    let narrow = path.to_string();
    let (dir, _file) = narrow.rsplit_once('\\')?;
    if dir.is_empty() {
        return CString16::try_from("\\").ok();
    }
    CString16::try_from(dir).ok()
}
