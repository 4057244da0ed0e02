//! NØNOS Kernel Boot Stub — library half.
//!
//! Everything the stub does lives here so the pure pieces stay testable on
//! the build host; `src/main.rs` is only the UEFI entry shim. The boot flow
//! itself is [`loader::run`], driven through the [`loader::Platform`] seam.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cmdline;
pub mod cpio;
pub mod devicetree;
pub mod disk;
pub mod efivar;
pub mod graphics;
pub mod initrd;
pub mod linux;
pub mod loader;
pub mod log;
pub mod measure;
pub mod pe;
pub mod platform;
pub mod secure_boot;
pub mod ui;
pub mod util;

/// Build-identifying string exported as the `StubInfo` loader variable.
pub const STUB_INFO: &str = concat!("nonos-stub ", env!("CARGO_PKG_VERSION"));
