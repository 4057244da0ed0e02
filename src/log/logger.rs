//! logger.rs — tagged logging helpers for the boot stub.
//!
//! The stub logs through the `log` facade so output lands on the firmware
//! console once `uefi_services::init` has run, and is silently dropped in
//! host unit tests. Tags name the subsystem emitting the line.

use uefi::Status;

/// Informational telemetry.
pub fn log_info(tag: &str, msg: &str) {
    ::log::info!(target: "nonos-stub", "[{}] {}", tag, msg);
}

/// Degraded-but-continuing conditions (every non-fatal failure lands here).
pub fn log_warn(tag: &str, msg: &str) {
    ::log::warn!(target: "nonos-stub", "[{}] {}", tag, msg);
}

/// Fatal conditions; the caller is about to enter the stall state.
pub fn log_critical(tag: &str, msg: &str) {
    ::log::error!(target: "nonos-stub", "[{}] {}", tag, msg);
}

/// Log a diagnostic for a failed firmware call and hand the status back, so
/// fatal sites can `return Err(log_error_status(err, "...").into())` in one
/// motion.
pub fn log_error_status(status: Status, context: &str) -> Status {
    ::log::error!(target: "nonos-stub", "{}: {:?}", context, status);
    status
}
