//! measure.rs — TPM measurement logger.
//!
//! Appends events to the platform measurement log through the TCG2
//! protocol. The stub only ever appends; it never reads the log back.
//! Every caller treats failure here as non-fatal: measurement is
//! fail-open, the trust decisions it records are not.

use alloc::vec::Vec;
use core::mem::MaybeUninit;

use uefi::proto::tcg::v2::{HashLogExtendEventFlags, PcrEventInputs, Tcg as Tcg2};
use uefi::proto::tcg::{EventType, PcrIndex};
use uefi::table::boot::BootServices;

/// Kernel parameters (command line, credentials).
pub const PCR_KERNEL_PARAMETERS: u32 = 12;
/// Pre-move home of the kernel-parameters class, still extended for older
/// attestation policies.
pub const PCR_KERNEL_PARAMETERS_COMPAT: u32 = 8;
/// System extension images merged into the initrd.
pub const PCR_INITRD: u32 = 13;

/// Hash `data` into `pcr` and append a log entry carrying `event_data`.
///
/// Absence of a TPM (no TCG2 protocol handle) surfaces as an error like any
/// other; the call sites discard it.
pub fn measure(
    bs: &BootServices,
    pcr: u32,
    event_data: &[u8],
    data: &[u8],
) -> uefi::Result<()> {
    let handle = bs.get_handle_for_protocol::<Tcg2>()?;
    let mut tcg = bs.open_protocol_exclusive::<Tcg2>(handle)?;

    let mut event_buf: Vec<MaybeUninit<u8>> = Vec::new();
    event_buf.resize_with(event_data.len() + 64, MaybeUninit::uninit);
    let event = PcrEventInputs::new_in_buffer(
        &mut event_buf,
        PcrIndex(pcr),
        EventType::IPL,
        event_data,
    )
    .map_err(|err| uefi::Error::from(err.status()))?;

    tcg.hash_log_extend_event(HashLogExtendEventFlags::empty(), data, event)
}
