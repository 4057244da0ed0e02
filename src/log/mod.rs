//! NØNOS Stub Logging Subsystem
//!
//! Thin tagged wrappers over the `log` facade; the backend is installed by
//! `uefi_services::init` and writes to the firmware console.

pub mod logger;

pub use logger::{log_critical, log_error_status, log_info, log_warn};
