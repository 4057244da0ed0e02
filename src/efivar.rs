//! efivar.rs — loader identity export.
//!
//! Publishes five identity variables under the loader vendor GUID so later
//! boot stages can tell where and how the system was booted. Each variable
//! is set only if it has no value yet; a value that is already present is
//! never touched, no matter who wrote it. The whole routine is best-effort
//! and re-derived every boot — it must never change the outcome of one.

use alloc::format;

use uefi::table::runtime::{RuntimeServices, VariableAttributes, VariableVendor};
use uefi::{cstr16, guid, CStr16, CString16};

use crate::log::logger::log_warn;
use crate::util::utf16_bytes_with_nul;

/// Vendor GUID of the boot-loader interface variables.
pub const LOADER_VENDOR: VariableVendor =
    VariableVendor(guid!("4a67b082-0a4c-41cf-b6c7-440b29bb8c4f"));

const VAR_DEVICE_PART_UUID: &CStr16 = cstr16!("LoaderDevicePartUUID");
const VAR_IMAGE_IDENTIFIER: &CStr16 = cstr16!("LoaderImageIdentifier");
const VAR_FIRMWARE_INFO: &CStr16 = cstr16!("LoaderFirmwareInfo");
const VAR_FIRMWARE_TYPE: &CStr16 = cstr16!("LoaderFirmwareType");
const VAR_STUB_INFO: &CStr16 = cstr16!("StubInfo");

/// Variable get/set collaborator. The stub never caches its own belief about
/// what is set; every decision re-reads the store.
pub trait VariableStore {
    fn contains(&self, name: &CStr16) -> bool;
    fn set_string(&mut self, name: &CStr16, value: &CStr16) -> uefi::Result<()>;
}

/// Platform facts the export derives its values from. Lookup failures
/// upstream simply leave the respective field empty.
pub struct LoaderIdentity {
    /// GPT partition UUID of the boot device, if the disk lookup succeeded.
    pub partition_uuid: Option<CString16>,
    /// Textual device path of the image, if one was resolvable.
    pub image_identifier: Option<CString16>,
    pub firmware_vendor: CString16,
    pub firmware_revision: u32,
    pub uefi_major: u16,
    pub uefi_minor: u16,
}

/// Set-if-absent export of the five loader variables. Every individual set
/// is fire-and-forget; nothing here can fail the boot.
pub fn export_loader_variables(store: &mut impl VariableStore, identity: &LoaderIdentity) {
    if !store.contains(VAR_DEVICE_PART_UUID) {
        // Skipped silently when the disk lookup already failed.
        if let Some(uuid) = &identity.partition_uuid {
            let _ = store.set_string(VAR_DEVICE_PART_UUID, uuid); // non-fatal
        }
    }

    if !store.contains(VAR_IMAGE_IDENTIFIER) {
        // Some boot chain loaders hand us no file path at all; in that case
        // there is simply nothing to set.
        match &identity.image_identifier {
            Some(id) => {
                let _ = store.set_string(VAR_IMAGE_IDENTIFIER, id); // non-fatal
            }
            None => log_warn("efivar", "image has no resolvable path, LoaderImageIdentifier not set"),
        }
    }

    if !store.contains(VAR_FIRMWARE_INFO) {
        let info = format!(
            "{} {}.{:02}",
            identity.firmware_vendor,
            identity.firmware_revision >> 16,
            identity.firmware_revision & 0xffff
        );
        set_narrow(store, VAR_FIRMWARE_INFO, &info);
    }

    if !store.contains(VAR_FIRMWARE_TYPE) {
        let ty = format!("UEFI {}.{:02}", identity.uefi_major, identity.uefi_minor);
        set_narrow(store, VAR_FIRMWARE_TYPE, &ty);
    }

    if !store.contains(VAR_STUB_INFO) {
        set_narrow(store, VAR_STUB_INFO, crate::STUB_INFO);
    }
}

fn set_narrow(store: &mut impl VariableStore, name: &CStr16, value: &str) {
    match CString16::try_from(value) {
        Ok(wide) => {
            let _ = store.set_string(name, &wide); // non-fatal
        }
        Err(_) => log_warn("efivar", "variable value not representable in UCS-2"),
    }
}

/// The firmware-backed store.
pub struct EfiVariableStore<'a> {
    rt: &'a RuntimeServices,
}

impl<'a> EfiVariableStore<'a> {
    pub fn new(rt: &'a RuntimeServices) -> Self {
        EfiVariableStore { rt }
    }
}

impl VariableStore for EfiVariableStore<'_> {
    fn contains(&self, name: &CStr16) -> bool {
        self.rt.get_variable_size(name, &LOADER_VENDOR).is_ok()
    }

    fn set_string(&mut self, name: &CStr16, value: &CStr16) -> uefi::Result<()> {
        self.rt.set_variable(
            name,
            &LOADER_VENDOR,
            VariableAttributes::BOOTSERVICE_ACCESS | VariableAttributes::RUNTIME_ACCESS,
            &utf16_bytes_with_nul(value),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::string::String;

    #[derive(Default)]
    struct FakeStore {
        vars: BTreeMap<String, String>,
    }

    impl VariableStore for FakeStore {
        fn contains(&self, name: &CStr16) -> bool {
            self.vars.contains_key(&name.to_string())
        }

        fn set_string(&mut self, name: &CStr16, value: &CStr16) -> uefi::Result<()> {
            self.vars.insert(name.to_string(), value.to_string());
            Ok(())
        }
    }

    fn identity() -> LoaderIdentity {
        LoaderIdentity {
            partition_uuid: Some(CString16::try_from("deadbeef-0000-4000-8000-000000000001").unwrap()),
            image_identifier: Some(CString16::try_from("\\EFI\\Linux\\kernel.efi").unwrap()),
            firmware_vendor: CString16::try_from("ACME").unwrap(),
            firmware_revision: (2 << 16) | 60,
            uefi_major: 2,
            uefi_minor: 70,
        }
    }

    #[test]
    fn exports_all_five_variables() {
        let mut store = FakeStore::default();
        export_loader_variables(&mut store, &identity());

        assert_eq!(store.vars.len(), 5);
        assert_eq!(
            store.vars["LoaderDevicePartUUID"],
            "deadbeef-0000-4000-8000-000000000001"
        );
        assert_eq!(store.vars["LoaderImageIdentifier"], "\\EFI\\Linux\\kernel.efi");
        assert_eq!(store.vars["LoaderFirmwareInfo"], "ACME 2.60");
        assert_eq!(store.vars["LoaderFirmwareType"], "UEFI 2.70");
        assert_eq!(store.vars["StubInfo"], crate::STUB_INFO);
    }

    #[test]
    fn export_is_idempotent() {
        let mut store = FakeStore::default();
        export_loader_variables(&mut store, &identity());
        let first = store.vars.clone();

        export_loader_variables(&mut store, &identity());
        assert_eq!(store.vars, first);
    }

    #[test]
    fn present_values_are_never_overwritten() {
        let mut store = FakeStore::default();
        store.vars.insert("StubInfo".into(), "someone-elses-stub 9.9".into());

        export_loader_variables(&mut store, &identity());
        assert_eq!(store.vars["StubInfo"], "someone-elses-stub 9.9");
    }

    #[test]
    fn failed_lookups_skip_their_variable() {
        let mut store = FakeStore::default();
        let identity = LoaderIdentity {
            partition_uuid: None,
            image_identifier: None,
            ..identity()
        };

        export_loader_variables(&mut store, &identity);
        assert!(!store.vars.contains_key("LoaderDevicePartUUID"));
        assert!(!store.vars.contains_key("LoaderImageIdentifier"));
        assert_eq!(store.vars.len(), 3);
    }
}
