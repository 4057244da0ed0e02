//! cmdline.rs — kernel command-line selection policy.
//!
//! Exactly one command line is produced per boot attempt: the image's
//! embedded `.cmdline` section, or the boot-option override handed in by the
//! firmware, never both. The override is only trusted when secure boot is
//! off or the image ships no command line of its own; otherwise the embedded
//! one wins unmodified. The decision itself is pure — the caller measures an
//! accepted override before using it.

use alloc::vec::Vec;

use crate::util::{bytes_as_ucs2, ucs2_to_narrow_lossy};

/// The selected command line for this boot attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Cmdline<'a> {
    /// Neither source exists. Not an error; the kernel gets no arguments.
    None,
    /// The `.cmdline` section, used as-is out of the image.
    Embedded(&'a [u8]),
    /// Accepted boot-option override, transcoded narrow-per-unit.
    Override(Vec<u8>),
}

impl<'a> Cmdline<'a> {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Cmdline::None => None,
            Cmdline::Embedded(b) => Some(b),
            Cmdline::Override(b) => Some(b),
        }
    }

    /// True when the override was accepted; the caller must measure the raw
    /// option bytes before handing the command line on.
    pub fn is_override(&self) -> bool {
        matches!(self, Cmdline::Override(_))
    }
}

/// Apply the selection rule.
///
/// `load_options` is the raw UCS-2 byte buffer from the boot option. It is
/// honored only if (secure boot is disabled or no embedded command line
/// exists) and it is non-empty and its first code unit is not a control
/// character (<= 0x1F). The transcode truncates each unit to its low byte.
pub fn select<'a>(
    embedded: Option<&'a [u8]>,
    load_options: Option<&[u8]>,
    secure_boot: bool,
) -> Cmdline<'a> {
    let embedded = embedded.filter(|e| !e.is_empty());

    let override_allowed = !secure_boot || embedded.is_none();
    if override_allowed {
        if let Some(raw) = load_options {
            let mut units = bytes_as_ucs2(raw).peekable();
            if matches!(units.peek(), Some(first) if *first > 0x1f) {
                return Cmdline::Override(ucs2_to_narrow_lossy(units));
            }
        }
    }

    match embedded {
        Some(e) => Cmdline::Embedded(e),
        None => Cmdline::None,
    }
}
