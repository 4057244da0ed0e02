//! loader.rs — boot orchestration sequencer.
//!
//! One linear pass per boot, no loops, no retries: resolve the embedded
//! sections, pick the command line, export loader identity, synthesize the
//! auxiliary archives, build the final initrd and hand the machine to the
//! kernel. Fatal steps return an error for the entry shim to report and
//! stall on; best-effort steps log and keep going. The firmware side is
//! reached through [`Platform`], so the whole sequence also runs against an
//! in-memory fake in the tests below.

use alloc::format;
use alloc::vec::Vec;

use uefi::prelude::*;
use uefi::{cstr16, CStr16};

use crate::cmdline;
use crate::initrd::{self, PageAllocator};
use crate::log::logger::{log_error_status, log_info, log_warn};
use crate::measure::{PCR_INITRD, PCR_KERNEL_PARAMETERS, PCR_KERNEL_PARAMETERS_COMPAT};
use crate::pe::{SectionView, StubSections};

/// One auxiliary-archive request handed to the packager.
pub struct ArchiveRequest {
    /// Source directory on the boot volume; `None` means the directory the
    /// stub image itself was loaded from.
    pub base_dir: Option<&'static CStr16>,
    /// Only files carrying this suffix are packed.
    pub suffix: &'static CStr16,
    /// Directory prefix the files land under inside the archive.
    pub target_prefix: &'static str,
    pub dir_mode: u32,
    pub file_mode: u32,
    /// PCRs the archive is measured into before it is consumed.
    pub pcrs: &'static [u32],
    pub label: &'static str,
}

const CREDENTIALS: ArchiveRequest = ArchiveRequest {
    base_dir: None,
    suffix: cstr16!(".cred"),
    target_prefix: ".extra/credentials",
    dir_mode: 0o500,
    file_mode: 0o400,
    pcrs: &[PCR_KERNEL_PARAMETERS, PCR_KERNEL_PARAMETERS_COMPAT],
    label: "Credentials initrd",
};

const GLOBAL_CREDENTIALS: ArchiveRequest = ArchiveRequest {
    base_dir: Some(cstr16!("\\loader\\credentials")),
    suffix: cstr16!(".cred"),
    target_prefix: ".extra/global_credentials",
    dir_mode: 0o500,
    file_mode: 0o400,
    pcrs: &[PCR_KERNEL_PARAMETERS, PCR_KERNEL_PARAMETERS_COMPAT],
    label: "Global credentials initrd",
};

const SYSEXT: ArchiveRequest = ArchiveRequest {
    base_dir: None,
    suffix: cstr16!(".raw"),
    target_prefix: ".extra/sysext",
    dir_mode: 0o555,
    file_mode: 0o444,
    pcrs: &[PCR_INITRD],
    label: "System extension initrd",
};

/// Everything the sequencer needs from the machine. The production
/// implementation is [`crate::platform::FirmwarePlatform`].
pub trait Platform: PageAllocator {
    /// The loaded stub image. It stays mapped until the kernel owns the
    /// machine, hence the `'static` view.
    fn image(&self) -> &'static [u8];

    fn image_sections(&mut self) -> uefi::Result<StubSections>;

    /// Render the splash section. Failures stay inside; cosmetics never
    /// steer the boot.
    fn show_splash(&mut self, bmp: SectionView);

    fn secure_boot_enabled(&self) -> bool;

    /// Raw UCS-2 load-option bytes from the boot option, if any.
    fn load_options(&self) -> Option<Vec<u8>>;

    /// Extend `data` into each listed PCR, logging `event_data` with it.
    fn measure(&mut self, pcrs: &[u32], event_data: &[u8], data: &[u8]) -> uefi::Result<()>;

    /// Set-if-absent export of the loader identity variables (best-effort
    /// throughout, including its internal lookups).
    fn export_loader_variables(&mut self);

    /// Pack one auxiliary archive. `None` covers both "no source files" and
    /// packaging failure; neither disturbs the boot.
    fn pack_archive(&mut self, request: &ArchiveRequest) -> Option<Vec<u8>>;

    fn install_devicetree(&mut self, dtb: SectionView) -> uefi::Result<()>;

    /// Hand the machine to the kernel. Returning `Err` — or at all, outside
    /// of tests — means the transfer failed.
    fn execute_kernel(
        &mut self,
        cmdline: Option<&[u8]>,
        kernel: (u64, usize),
        initrd: (u64, usize),
    ) -> uefi::Result<()>;

    fn reset_console(&mut self);

    fn section_data(&self, section: SectionView) -> &'static [u8] {
        &self.image()[section.offset..section.offset + section.size]
    }

    fn section_phys(&self, section: SectionView) -> u64 {
        self.image().as_ptr() as u64 + section.offset as u64
    }
}

/// Run the boot sequence. An `Err` is fatal: the caller reports it and
/// stalls forever. `Ok` is unreachable on real firmware, since a successful
/// kernel transfer never returns.
pub fn run(p: &mut impl Platform) -> uefi::Result<()> {
    let sections = p
        .image_sections()
        .map_err(|err| log_error_status(err.status(), "Unable to resolve stub image sections"))?;
    let Some(linux) = sections.linux else {
        return Err(log_error_status(
            Status::NOT_FOUND,
            "Unable to locate embedded .linux section",
        )
        .into());
    };

    // Show the splash as early as possible.
    if let Some(splash) = sections.splash {
        p.show_splash(splash);
    }

    let embedded_cmdline = sections.cmdline.map(|s| p.section_data(s));
    let load_options = p.load_options();
    let cmdline = cmdline::select(
        embedded_cmdline,
        load_options.as_deref(),
        p.secure_boot_enabled(),
    );
    if cmdline.is_override() {
        if let Some(raw) = load_options.as_deref() {
            // Possibly a duplicate of what a boot menu already measured, but
            // this stub must also hold up when chain-loaded directly.
            let _ = p.measure(
                &[PCR_KERNEL_PARAMETERS, PCR_KERNEL_PARAMETERS_COMPAT],
                raw,
                raw,
            ); // non-fatal
        }
        log_info("cmdline", "boot-option command line accepted");
    }

    p.export_loader_variables();

    let credentials = p.pack_archive(&CREDENTIALS);
    let global_credentials = p.pack_archive(&GLOBAL_CREDENTIALS);
    let sysext = p.pack_archive(&SYSEXT);

    let kernel = (p.section_phys(linux), linux.size);

    let initrd = if credentials.is_some() || global_credentials.is_some() || sysext.is_some() {
        let primary = sections.initrd.map(|s| p.section_data(s));
        let combined = initrd::combine(
            p,
            primary,
            [
                credentials.as_deref(),
                global_credentials.as_deref(),
                sysext.as_deref(),
            ],
        )
        .map_err(|err| log_error_status(err.status(), "Failed to combine initrd"))?;

        // These can be large; free them before the kernel takes over the
        // address space.
        drop(credentials);
        drop(global_credentials);
        drop(sysext);

        combined
    } else {
        match sections.initrd {
            Some(s) => (p.section_phys(s), s.size),
            None => (0, 0),
        }
    };

    if let Some(dtb) = sections.dtb {
        if let Err(err) = p.install_devicetree(dtb) {
            // The platform keeps whatever configuration table it already has.
            log_warn(
                "devicetree",
                &format!("embedded devicetree not installed: {:?}", err.status()),
            ); // non-fatal
        }
    }

    log_info("stub", "transferring control to the embedded kernel");
    let err = match p.execute_kernel(cmdline.bytes(), kernel, initrd) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    p.reset_console();
    Err(log_error_status(err.status(), "Execution of embedded kernel image failed").into())
}
