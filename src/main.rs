//! NØNOS Kernel Boot Stub — UEFI entry shim.
//!
//! Thin wrapper around [`nonos_stub::loader::run`]: initialize firmware
//! services, stand the platform up, run the boot sequence, and if anything
//! comes back, report it and stall.

#![cfg_attr(target_os = "uefi", no_std)]
#![cfg_attr(target_os = "uefi", no_main)]

/// Identification string other tools look for in the binary image.
#[used]
#[link_section = ".sdmagic"]
static LOADER_MAGIC: [u8; 38] = *b"#### LoaderInfo: nonos-stub 0.1.0 ####";

#[cfg(target_os = "uefi")]
mod entry {
    use uefi::prelude::*;

    use nonos_stub::log::logger::log_info;
    use nonos_stub::platform::FirmwarePlatform;
    use nonos_stub::ui;

    #[entry]
    fn efi_main(image: Handle, mut system_table: SystemTable<Boot>) -> Status {
        if uefi_services::init(&mut system_table).is_err() {
            // No allocator, no console; nothing sensible left to do.
            return Status::ABORTED;
        }

        log_info("stub", nonos_stub::STUB_INFO);

        let platform_table = unsafe { system_table.unsafe_clone() };
        let mut platform = match FirmwarePlatform::new(image, platform_table) {
            Ok(platform) => platform,
            Err(err) => ui::fail_and_stall(
                &mut system_table,
                err.status(),
                "Cannot access the loaded stub image",
            ),
        };

        match nonos_stub::loader::run(&mut platform) {
            // A successful handover never returns, so reaching either arm
            // means the boot attempt is over.
            Ok(()) => ui::fail_and_stall(
                &mut system_table,
                Status::LOAD_ERROR,
                "Kernel handover returned",
            ),
            Err(err) => {
                ui::fail_and_stall(&mut system_table, err.status(), "Boot sequence failed")
            }
        }
    }
}

/// The stub only means anything on UEFI; host builds exist so the test
/// suite of the library half can be compiled and run.
#[cfg(not(target_os = "uefi"))]
fn main() {}
