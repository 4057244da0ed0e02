//! initrd.rs — initrd combination engine.
//!
//! Concatenates the statically embedded initrd with up to three dynamically
//! produced archives into one contiguous allocation below the 32-bit
//! address boundary. Order is load-bearing: the embedded initrd must come
//! first, since the kernel looks only at the first archive in the stream for
//! certain embedded firmware updates. All size accounting is overflow-checked
//! before any allocation happens.

use alloc::vec::Vec;

use uefi::prelude::*;

/// The combined initrd must stay reachable through 32-bit addressing.
pub const INITRD_ADDRESS_CEILING: u64 = u32::MAX as u64;

pub const PAGE_SIZE: usize = 4096;

/// Page-allocation collaborator: physical pages covering `bytes`, entirely
/// below `max_address`.
pub trait PageAllocator {
    fn allocate_below(&mut self, max_address: u64, bytes: usize) -> uefi::Result<u64>;
}

/// Pages needed to back `bytes`.
pub fn pages_for(bytes: usize) -> usize {
    bytes / PAGE_SIZE + usize::from(bytes % PAGE_SIZE != 0)
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Total combined size: the primary rounded up to a 4-byte boundary, plus
/// each present fragment, unpadded. `None` means the sum is not
/// representable.
pub fn combined_size(primary_size: usize, fragment_sizes: &[Option<usize>]) -> Option<usize> {
    let mut n = primary_size.checked_add(3)? & !3;
    for frag in fragment_sizes.iter().flatten() {
        n = n.checked_add(*frag)?;
    }
    Some(n)
}

/// Fill `dest` with the combined layout: primary bytes, zero padding up to
/// the 4-byte boundary, then each fragment back-to-back.
///
/// The final cursor must land exactly on `dest.len()`; anything else means
/// the size accounting and the copy disagree, which corrupts the payload the
/// kernel will execute, so it is a hard invariant failure rather than a
/// recoverable error.
pub fn write_combined(dest: &mut [u8], primary: &[u8], fragments: &[&[u8]]) {
    let mut at = 0;

    if !primary.is_empty() {
        dest[..primary.len()].copy_from_slice(primary);
        at = primary.len();

        let pad = align4(primary.len()) - primary.len();
        if pad > 0 {
            dest[at..at + pad].fill(0);
            at += pad;
        }
    }

    for frag in fragments {
        dest[at..at + frag.len()].copy_from_slice(frag);
        at += frag.len();
    }

    assert_eq!(at, dest.len(), "combined initrd write cursor mismatch");
}

/// Combine the primary initrd with the present fragments, in fixed order:
/// primary, credential archive, global-credential archive, system-extension
/// archive. Returns the physical base and total size of the new region.
///
/// Overflow in the size accounting fails with `OUT_OF_RESOURCES` before any
/// allocation is attempted; an allocation failure propagates as-is. Both are
/// fatal to the boot attempt.
pub fn combine(
    allocator: &mut impl PageAllocator,
    primary: Option<&[u8]>,
    fragments: [Option<&[u8]>; 3],
) -> uefi::Result<(u64, usize)> {
    let primary = primary.unwrap_or(&[]);

    let sizes = fragments.map(|f| f.map(<[u8]>::len));
    let total = combined_size(primary.len(), &sizes).ok_or(Status::OUT_OF_RESOURCES)?;

    let base = allocator.allocate_below(INITRD_ADDRESS_CEILING, total)?;

    let present: Vec<&[u8]> = fragments.iter().copied().flatten().collect();
    // SAFETY: the allocator granted `total` writable bytes at `base`, which
    // nothing else references until the kernel takes ownership.
    let dest = unsafe { core::slice::from_raw_parts_mut(base as *mut u8, total) };
    write_combined(dest, primary, &present);

    Ok((base, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    struct FakeAllocator {
        granted: Vec<Vec<u8>>,
        calls: usize,
        fail: bool,
    }

    impl FakeAllocator {
        fn new() -> Self {
            FakeAllocator { granted: Vec::new(), calls: 0, fail: false }
        }
    }

    impl PageAllocator for FakeAllocator {
        fn allocate_below(&mut self, _max_address: u64, bytes: usize) -> uefi::Result<u64> {
            self.calls += 1;
            if self.fail {
                return Err(Status::OUT_OF_RESOURCES.into());
            }
            let mut region = vec![0xaau8; bytes];
            let base = region.as_mut_ptr() as u64;
            self.granted.push(region);
            Ok(base)
        }
    }

    #[test]
    fn size_law_holds() {
        assert_eq!(combined_size(10, &[Some(7), None, None]), Some(19));
        assert_eq!(combined_size(12, &[Some(1), Some(2), Some(3)]), Some(18));
        assert_eq!(combined_size(0, &[Some(5), None, None]), Some(5));
        assert_eq!(combined_size(3, &[]), Some(4));
    }

    #[test]
    fn unrepresentable_sums_are_rejected() {
        assert_eq!(combined_size(usize::MAX - 1, &[Some(8)]), None);
        assert_eq!(combined_size(usize::MAX, &[]), None);
        assert_eq!(combined_size(4, &[Some(usize::MAX - 4), Some(1)]), None);
    }

    #[test]
    fn combined_layout_pads_only_the_primary() {
        // primary 10 bytes + one 7-byte fragment => 12 + 7 = 19 bytes:
        // [0..10) primary, [10..12) zero pad, [12..19) fragment.
        let primary = [0x11u8; 10];
        let frag = [0x22u8; 7];

        let mut alloc = FakeAllocator::new();
        let (base, size) = combine(&mut alloc, Some(&primary), [Some(&frag), None, None]).unwrap();

        assert_eq!(size, 19);
        let region = alloc.granted.last().unwrap();
        assert_eq!(base, region.as_ptr() as u64);
        assert_eq!(&region[..10], &primary);
        assert_eq!(&region[10..12], &[0, 0]);
        assert_eq!(&region[12..19], &frag);
    }

    #[test]
    fn fragments_keep_fixed_order_without_padding() {
        let primary = [0xa0u8; 4];
        let cred = [0xb1u8; 3];
        let global = [0xc2u8; 5];
        let sysext = [0xd3u8; 2];

        let mut alloc = FakeAllocator::new();
        let (_, size) = combine(
            &mut alloc,
            Some(&primary),
            [Some(&cred), Some(&global), Some(&sysext)],
        )
        .unwrap();

        assert_eq!(size, 4 + 3 + 5 + 2);
        let region = alloc.granted.last().unwrap();
        assert_eq!(&region[..4], &primary);
        assert_eq!(&region[4..7], &cred);
        assert_eq!(&region[7..12], &global);
        assert_eq!(&region[12..14], &sysext);
    }

    #[test]
    fn allocation_failure_propagates() {
        let mut alloc = FakeAllocator::new();
        alloc.fail = true;
        let frag = [0u8; 8];
        let err = combine(&mut alloc, None, [Some(&frag), None, None]).unwrap_err();
        assert_eq!(err.status(), Status::OUT_OF_RESOURCES);
        assert_eq!(alloc.calls, 1);
    }

    #[test]
    #[should_panic(expected = "cursor mismatch")]
    fn cursor_postcondition_is_enforced() {
        let mut dest = vec![0u8; 9];
        write_combined(&mut dest, &[1, 2, 3, 4], &[&[5, 6, 7, 8]]);
    }

    #[test]
    fn pages_round_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }
}
