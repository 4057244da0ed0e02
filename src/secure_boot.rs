//! secure_boot.rs — platform secure-boot predicate.

use uefi::cstr16;
use uefi::table::runtime::{RuntimeServices, VariableVendor};

/// Whether the platform enforces secure boot.
///
/// Reads the global `SecureBoot` variable. An unreadable or malformed
/// variable counts as "not enforced" — the command-line policy then treats
/// the boot-option override as trustworthy, which matches how the firmware
/// itself behaves without the variable.
pub fn secure_boot_enabled(rt: &RuntimeServices) -> bool {
    let mut value = [0u8; 1];
    match rt.get_variable(
        cstr16!("SecureBoot"),
        &VariableVendor::GLOBAL_VARIABLE,
        &mut value,
    ) {
        Ok((data, _attrs)) => data.first() == Some(&1),
        Err(_) => false,
    }
}
