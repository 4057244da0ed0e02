//! linux.rs — transfer of control to the embedded kernel.
//!
//! Implements the x86-64 EFI handover protocol: validate the kernel's
//! boot-protocol header, stage a fresh boot-params page and the narrow
//! command line below 4 GiB, point the ramdisk fields at the final initrd,
//! and jump to the handover entry with boot services still running. The
//! kernel does its own `ExitBootServices`; if this function returns at all,
//! the handover failed.

use core::ffi::c_void;

use uefi::prelude::*;
use uefi::table::boot::{AllocateType, MemoryType};
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::initrd::pages_for;
use crate::util::raw_system_table;

/// Offset of the setup header inside the kernel image / boot params.
const SETUP_HEADER_OFFSET: usize = 0x1f1;
const BOOT_PARAMS_SIZE: usize = 0x1000;

const BOOT_FLAG: u16 = 0xaa55;
const HEADER_MAGIC: u32 = 0x5372_6448; // "HdrS"
/// First protocol version carrying `handover_offset`.
const MIN_VERSION: u16 = 0x020b;
const XLF_EFI_HANDOVER_64: u16 = 1 << 3;
/// 64-bit entry lives one 512-byte sector past the 32-bit one.
const HANDOVER_64_DELTA: u64 = 0x200;

/// x86 Linux boot-protocol setup header (protocol >= 2.11 layout).
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy)]
#[repr(C)]
struct SetupHeader {
    setup_sects: u8,
    root_flags: U16<LittleEndian>,
    syssize: U32<LittleEndian>,
    ram_size: U16<LittleEndian>,
    vid_mode: U16<LittleEndian>,
    root_dev: U16<LittleEndian>,
    boot_flag: U16<LittleEndian>,
    jump: U16<LittleEndian>,
    header: U32<LittleEndian>,
    version: U16<LittleEndian>,
    realmode_swtch: U32<LittleEndian>,
    start_sys_seg: U16<LittleEndian>,
    kernel_version: U16<LittleEndian>,
    type_of_loader: u8,
    loadflags: u8,
    setup_move_size: U16<LittleEndian>,
    code32_start: U32<LittleEndian>,
    ramdisk_image: U32<LittleEndian>,
    ramdisk_size: U32<LittleEndian>,
    bootsect_kludge: U32<LittleEndian>,
    heap_end_ptr: U16<LittleEndian>,
    ext_loader_ver: u8,
    ext_loader_type: u8,
    cmd_line_ptr: U32<LittleEndian>,
    initrd_addr_max: U32<LittleEndian>,
    kernel_alignment: U32<LittleEndian>,
    relocatable_kernel: u8,
    min_alignment: u8,
    xloadflags: U16<LittleEndian>,
    cmdline_size: U32<LittleEndian>,
    hardware_subarch: U32<LittleEndian>,
    hardware_subarch_data: U64<LittleEndian>,
    payload_offset: U32<LittleEndian>,
    payload_length: U32<LittleEndian>,
    setup_data: U64<LittleEndian>,
    pref_address: U64<LittleEndian>,
    init_size: U32<LittleEndian>,
    handover_offset: U32<LittleEndian>,
}

type HandoverEntry = unsafe extern "efiapi" fn(
    image: *mut c_void,
    system_table: *mut r_efi::efi::SystemTable,
    boot_params: *mut c_void,
);

/// Hand control to the kernel. Returns only on failure, with the status
/// describing why; the caller reports it and stalls.
pub fn exec(
    st: &SystemTable<Boot>,
    image: Handle,
    cmdline: Option<&[u8]>,
    kernel: &[u8],
    initrd: (u64, usize),
) -> Status {
    match stage_and_jump(st, image, cmdline, kernel, initrd) {
        // The handover entry came back to us: the kernel never ran.
        Ok(()) => Status::LOAD_ERROR,
        Err(err) => err.status(),
    }
}

fn stage_and_jump(
    st: &SystemTable<Boot>,
    image: Handle,
    cmdline: Option<&[u8]>,
    kernel: &[u8],
    initrd: (u64, usize),
) -> uefi::Result<()> {
    let header = validate_kernel(kernel)?;
    let bs = st.boot_services();

    // Fresh zeroed boot params; the kernel's setup header is copied over
    // verbatim before individual fields are patched.
    let params_base = allocate_below_4g(bs, BOOT_PARAMS_SIZE)?;
    let params = unsafe {
        core::slice::from_raw_parts_mut(params_base as usize as *mut u8, BOOT_PARAMS_SIZE)
    };
    params.fill(0);
    let header_bytes = header.as_bytes();
    params[SETUP_HEADER_OFFSET..SETUP_HEADER_OFFSET + header_bytes.len()]
        .copy_from_slice(header_bytes);

    let (mut staged, _) = LayoutVerified::<&mut [u8], SetupHeader>::new_unaligned_from_prefix(
        &mut params[SETUP_HEADER_OFFSET..],
    )
    .ok_or(Status::LOAD_ERROR)?;

    // Narrow command line, NUL-terminated, reachable through a 32-bit
    // pointer.
    let cmdline = cmdline.unwrap_or(&[]);
    if cmdline.len() >= header.cmdline_size.get() as usize && header.cmdline_size.get() != 0 {
        return Err(Status::BAD_BUFFER_SIZE.into());
    }
    let cmdline_base = allocate_below_4g(bs, cmdline.len() + 1)?;
    unsafe {
        let dst = cmdline_base as usize as *mut u8;
        core::ptr::copy_nonoverlapping(cmdline.as_ptr(), dst, cmdline.len());
        dst.add(cmdline.len()).write(0);
    }
    staged.cmd_line_ptr.set(
        u32::try_from(cmdline_base).map_err(|_| Status::OUT_OF_RESOURCES)?,
    );

    let (initrd_base, initrd_size) = initrd;
    staged.ramdisk_image.set(
        u32::try_from(initrd_base).map_err(|_| Status::OUT_OF_RESOURCES)?,
    );
    staged.ramdisk_size.set(
        u32::try_from(initrd_size).map_err(|_| Status::OUT_OF_RESOURCES)?,
    );

    // An unregistered loader type; the kernel only insists it is non-zero.
    staged.type_of_loader = 0xff;

    let entry_address = (kernel.as_ptr() as u64)
        .checked_add(HANDOVER_64_DELTA + u64::from(header.handover_offset.get()))
        .ok_or(Status::LOAD_ERROR)?;

    // SAFETY: the entry address was derived from a validated boot-protocol
    // header of the in-memory kernel image, and both staged regions stay
    // alive across the call. `Handle` is a transparent pointer wrapper, the
    // same layout property the entry ABI relies on. On success this never
    // returns.
    unsafe {
        let entry: HandoverEntry = core::mem::transmute(entry_address as usize);
        let raw_image: *mut c_void = core::mem::transmute_copy(&image);
        entry(
            raw_image,
            raw_system_table(st),
            params_base as usize as *mut c_void,
        );
    }

    Ok(())
}

/// Check that the image speaks a handover-capable boot protocol and return
/// its setup header.
fn validate_kernel(kernel: &[u8]) -> uefi::Result<SetupHeader> {
    let tail = kernel
        .get(SETUP_HEADER_OFFSET..)
        .ok_or(Status::UNSUPPORTED)?;
    let (header, _) = LayoutVerified::<&[u8], SetupHeader>::new_unaligned_from_prefix(tail)
        .ok_or(Status::UNSUPPORTED)?;
    let header = *header;

    if header.boot_flag.get() != BOOT_FLAG
        || header.header.get() != HEADER_MAGIC
        || header.version.get() < MIN_VERSION
    {
        return Err(Status::UNSUPPORTED.into());
    }
    if header.handover_offset.get() == 0 || header.xloadflags.get() & XLF_EFI_HANDOVER_64 == 0 {
        return Err(Status::UNSUPPORTED.into());
    }

    Ok(header)
}

fn allocate_below_4g(bs: &uefi::table::boot::BootServices, bytes: usize) -> uefi::Result<u64> {
    let addr = bs.allocate_pages(
        AllocateType::MaxAddress(u32::MAX as u64),
        MemoryType::LOADER_DATA,
        pages_for(bytes),
    )?;
    Ok(addr as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn handover_kernel() -> Vec<u8> {
        let mut kernel = vec![0u8; 0x1000];
        kernel[0x1fe..0x200].copy_from_slice(&BOOT_FLAG.to_le_bytes());
        kernel[0x202..0x206].copy_from_slice(&HEADER_MAGIC.to_le_bytes());
        kernel[0x206..0x208].copy_from_slice(&MIN_VERSION.to_le_bytes());
        kernel[0x236..0x238].copy_from_slice(&XLF_EFI_HANDOVER_64.to_le_bytes());
        kernel[0x264..0x268].copy_from_slice(&0x190u32.to_le_bytes()); // handover_offset
        kernel
    }

    #[test]
    fn accepts_a_handover_capable_header() {
        let header = validate_kernel(&handover_kernel()).unwrap();
        assert_eq!(header.handover_offset.get(), 0x190);
    }

    #[test]
    fn rejects_images_without_boot_protocol() {
        assert!(validate_kernel(&[0u8; 64]).is_err());
        assert!(validate_kernel(&vec![0u8; 0x1000]).is_err());
    }

    #[test]
    fn rejects_pre_handover_protocols() {
        let mut kernel = handover_kernel();
        kernel[0x206..0x208].copy_from_slice(&0x0209u16.to_le_bytes());
        assert!(validate_kernel(&kernel).is_err());

        let mut kernel = handover_kernel();
        kernel[0x264..0x268].fill(0); // no handover entry
        assert!(validate_kernel(&kernel).is_err());

        let mut kernel = handover_kernel();
        kernel[0x236..0x238].fill(0); // no 64-bit handover support
        assert!(validate_kernel(&kernel).is_err());
    }
}
