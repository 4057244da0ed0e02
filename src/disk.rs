//! disk.rs — boot-device partition identification.

use alloc::format;

use uefi::proto::device_path::media::PartitionSignature;
use uefi::proto::device_path::{DevicePath, DevicePathNodeEnum};
use uefi::table::boot::{BootServices, OpenProtocolAttributes, OpenProtocolParams};
use uefi::{CString16, Handle};
use uuid::Uuid;

/// GPT partition UUID of `device`, rendered in canonical hyphenated form.
///
/// Walks the device path installed on the handle and takes the partition
/// signature of its hard-drive node. Anything unexpected — no device path,
/// an MBR disk, a non-GPT signature — yields `None`; the caller skips the
/// corresponding identity variable silently.
pub fn partition_uuid(bs: &BootServices, agent: Handle, device: Handle) -> Option<CString16> {
    // GET_PROTOCOL: other drivers legitimately keep this protocol open.
    let path = unsafe {
        bs.open_protocol::<DevicePath>(
            OpenProtocolParams {
                handle: device,
                agent,
                controller: None,
            },
            OpenProtocolAttributes::GetProtocol,
        )
    }
    .ok()?;

    for node in path.node_iter() {
        if let Ok(DevicePathNodeEnum::MediaHardDrive(hd)) = node.as_enum() {
            if let PartitionSignature::Guid(guid) = hd.partition_signature() {
                let uuid = Uuid::from_bytes_le(guid.to_bytes());
                let text = format!("{}", uuid.hyphenated());
                return CString16::try_from(text.as_str()).ok();
            }
        }
    }

    None
}
