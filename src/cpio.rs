//! cpio.rs — archive packager for auxiliary initrd fragments.
//!
//! Packs drop-in files from the boot volume (credentials, system
//! extensions) into `newc` cpio archives the kernel unpacks on top of the
//! embedded initrd. Enumeration is sorted so the archive bytes — and with
//! them the measurement — are deterministic for a given set of files.
//! Producing nothing because no source files exist is a normal outcome.

use alloc::vec;
use alloc::vec::Vec;

use uefi::proto::device_path::DevicePath;
use uefi::proto::loaded_image::LoadedImage;
use uefi::proto::media::file::{Directory, File, FileAttribute, FileInfo, FileMode, RegularFile};
use uefi::proto::media::fs::SimpleFileSystem;
use uefi::table::boot::BootServices;
use uefi::{CStr16, CString16, Handle, Status};

use crate::loader::ArchiveRequest;
use crate::log::logger::log_warn;
use crate::util::ucs2_to_narrow_lossy;

const CPIO_MAGIC: &[u8; 6] = b"070701";
const TRAILER: &[u8] = b"TRAILER!!!";

const MODE_DIRECTORY: u32 = 0o040000;
const MODE_REGULAR: u32 = 0o100000;

/// In-memory `newc` archive writer.
pub struct CpioBuilder {
    data: Vec<u8>,
    inode: u32,
}

impl CpioBuilder {
    pub fn new() -> Self {
        CpioBuilder { data: Vec::new(), inode: 1 }
    }

    /// Append directory entries for every component of `prefix`
    /// (`".extra/credentials"` becomes `.extra` then `.extra/credentials`).
    pub fn push_prefix_directories(&mut self, prefix: &str, mode: u32) {
        let mut end = 0;
        loop {
            end = match prefix[end..].find('/') {
                Some(i) => end + i,
                None => prefix.len(),
            };
            self.push_entry(prefix[..end].as_bytes(), MODE_DIRECTORY | (mode & 0o7777), &[]);
            if end == prefix.len() {
                break;
            }
            end += 1;
        }
    }

    pub fn push_file(&mut self, name: &[u8], mode: u32, content: &[u8]) {
        self.push_entry(name, MODE_REGULAR | (mode & 0o7777), content);
    }

    fn push_entry(&mut self, name: &[u8], mode: u32, content: &[u8]) {
        self.header(mode, content.len() as u32, name);
        self.data.extend_from_slice(content);
        self.pad_to_4();
    }

    /// Terminate the archive. The result is 4-byte aligned, ready for
    /// concatenation into the initrd stream.
    pub fn finish(mut self) -> Vec<u8> {
        self.header(0, 0, TRAILER);
        self.pad_to_4();
        self.data
    }

    fn header(&mut self, mode: u32, file_size: u32, name: &[u8]) {
        let inode = self.inode;
        self.inode += 1;

        self.data.extend_from_slice(CPIO_MAGIC);
        let fields = [
            inode,                  // c_ino
            mode,                   // c_mode
            0,                      // c_uid
            0,                      // c_gid
            1,                      // c_nlink
            0,                      // c_mtime: zero for reproducibility
            file_size,              // c_filesize
            0,                      // c_devmajor
            0,                      // c_devminor
            0,                      // c_rdevmajor
            0,                      // c_rdevminor
            name.len() as u32 + 1,  // c_namesize, NUL included
            0,                      // c_check: unused with this magic
        ];
        for field in fields {
            self.push_hex8(field);
        }
        self.data.extend_from_slice(name);
        self.data.push(0);
        self.pad_to_4();
    }

    fn push_hex8(&mut self, value: u32) {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        for shift in (0..8).rev() {
            self.data.push(DIGITS[((value >> (shift * 4)) & 0xf) as usize]);
        }
    }

    fn pad_to_4(&mut self) {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
    }
}

/// ASCII case-insensitive suffix match on the narrow form of a file name.
pub fn has_suffix_no_case(name: &[u8], suffix: &[u8]) -> bool {
    name.len() > suffix.len()
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Pack every `*{suffix}` file of the source directory into an archive under
/// `target_prefix`.
///
/// The source directory is `request.base_dir` if set, otherwise `image_dir`
/// (the directory the stub image was loaded from). `Ok(None)` means there
/// was nothing to pack — no source directory at all, or no matching files.
pub fn pack_cpio(
    bs: &BootServices,
    image: Handle,
    image_dir: Option<&CStr16>,
    request: &ArchiveRequest,
) -> uefi::Result<Option<Vec<u8>>> {
    let Some(source_dir) = request.base_dir.or(image_dir) else {
        // No drop-in location is resolvable; nothing to do.
        return Ok(None);
    };

    let loaded_image = bs.open_protocol_exclusive::<LoadedImage>(image)?;
    let device_path = bs.open_protocol_exclusive::<DevicePath>(loaded_image.device())?;
    let device_handle = bs.locate_device_path::<SimpleFileSystem>(&mut &*device_path)?;
    let mut fs = bs.open_protocol_exclusive::<SimpleFileSystem>(device_handle)?;
    let mut root = fs.open_volume()?;

    let mut dir = match open_directory(&mut root, source_dir) {
        Ok(dir) => dir,
        // A missing drop-in directory is the common case, not an error.
        Err(err) if err.status() == Status::NOT_FOUND => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut names = matching_entries(&mut dir, request.suffix)?;
    if names.is_empty() {
        return Ok(None);
    }
    // Deterministic archive bytes, deterministic measurement.
    names.sort_by_key(|n| ucs2_to_narrow_lossy(n.iter().map(|c| u16::from(*c))));

    let mut builder = CpioBuilder::new();
    builder.push_prefix_directories(request.target_prefix, request.dir_mode);

    for name in &names {
        let content = read_file(&mut dir, name)?;

        let mut member = Vec::from(request.target_prefix.as_bytes());
        member.push(b'/');
        member.extend_from_slice(&ucs2_to_narrow_lossy(name.iter().map(|c| u16::from(*c))));
        builder.push_file(&member, request.file_mode, &content);
    }

    Ok(Some(builder.finish()))
}

fn open_directory(root: &mut Directory, path: &CStr16) -> uefi::Result<Directory> {
    let handle = root.open(path, FileMode::Read, FileAttribute::empty())?;
    handle.into_directory().ok_or_else(|| Status::INVALID_PARAMETER.into())
}

/// Names of the regular files in `dir` whose name carries `suffix`.
fn matching_entries(dir: &mut Directory, suffix: &CStr16) -> uefi::Result<Vec<CString16>> {
    let suffix_narrow = ucs2_to_narrow_lossy(suffix.iter().map(|c| u16::from(*c)));
    let mut names = Vec::new();

    // FileInfo wants 8-byte alignment, hence the u64 backing store.
    let mut backing = vec![0u64; 128];
    loop {
        let buf = unsafe {
            core::slice::from_raw_parts_mut(backing.as_mut_ptr() as *mut u8, backing.len() * 8)
        };
        match dir.read_entry(buf) {
            Ok(Some(info)) => {
                if info.is_directory() {
                    continue;
                }
                let name_narrow =
                    ucs2_to_narrow_lossy(info.file_name().iter().map(|c| u16::from(*c)));
                if has_suffix_no_case(&name_narrow, &suffix_narrow) {
                    names.push(info.file_name().into());
                }
            }
            Ok(None) => break,
            Err(err) => {
                if let Some(required) = *err.data() {
                    backing = vec![0u64; required / 8 + 1];
                } else {
                    return Err(Status::DEVICE_ERROR.into());
                }
            }
        }
    }

    Ok(names)
}

fn read_file(dir: &mut Directory, name: &CStr16) -> uefi::Result<Vec<u8>> {
    let handle = dir.open(name, FileMode::Read, FileAttribute::empty())?;
    let mut file: RegularFile = handle
        .into_regular_file()
        .ok_or_else(|| uefi::Error::from(Status::INVALID_PARAMETER))?;

    let info = file
        .get_boxed_info::<FileInfo>()
        .map_err(|err| uefi::Error::from(err.status()))?;
    let size = usize::try_from(info.file_size()).map_err(|_| Status::OUT_OF_RESOURCES)?;

    let mut content = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let read = file
            .read(&mut content[filled..])
            .map_err(|err| uefi::Error::from(err.status()))?;
        if read == 0 {
            log_warn("cpio", "file shrank while reading, packing what we got");
            content.truncate(filled);
            break;
        }
        filled += read;
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    #[test]
    fn archive_layout_is_newc() {
        let mut builder = CpioBuilder::new();
        builder.push_prefix_directories(".extra/credentials", 0o500);
        builder.push_file(b".extra/credentials/db.cred", 0o400, b"secret");
        let archive = builder.finish();

        assert_eq!(&archive[..6], CPIO_MAGIC);
        assert_eq!(archive.len() % 4, 0);
        assert!(find(&archive, b".extra\0").is_some());
        assert!(find(&archive, b".extra/credentials\0").is_some());
        assert!(find(&archive, b".extra/credentials/db.cred\0").is_some());
        assert!(find(&archive, b"secret").is_some());
        assert!(find(&archive, TRAILER).is_some());
    }

    #[test]
    fn file_header_records_size_and_mode() {
        let mut builder = CpioBuilder::new();
        builder.push_file(b"x", 0o400, b"12345");
        let archive = builder.finish();

        let header = &archive[..110];
        // c_mode is the second field, c_filesize the seventh.
        assert_eq!(&header[6 + 8..6 + 16], b"00008100"); // S_IFREG | 0400
        assert_eq!(&header[6 + 6 * 8..6 + 7 * 8], b"00000005");
    }

    #[test]
    fn content_is_padded_to_four_bytes_between_members() {
        let mut builder = CpioBuilder::new();
        builder.push_file(b"a", 0o400, b"xy");
        builder.push_file(b"b", 0o400, b"z");
        let archive = builder.finish();

        // header (110 bytes) + "a\0" lands on a 4-byte boundary, so the
        // 2-byte content needs 2 pad bytes before the next header.
        let at = find(&archive, b"xy").unwrap();
        assert_eq!(at % 4, 0);
        assert_eq!(&archive[at + 2..at + 4], &[0, 0]);
        assert_eq!(&archive[at + 4..at + 10], CPIO_MAGIC);
    }

    #[test]
    fn trailer_terminates_the_archive() {
        let archive = CpioBuilder::new().finish();
        let at = find(&archive, TRAILER).unwrap();
        assert!(at < archive.len());
        assert_eq!(archive.len() % 4, 0);
    }

    #[test]
    fn suffix_match_is_case_insensitive_and_proper() {
        assert!(has_suffix_no_case(b"db.cred", b".cred"));
        assert!(has_suffix_no_case(b"DB.CRED", b".cred"));
        assert!(!has_suffix_no_case(b".cred", b".cred")); // nothing before the suffix
        assert!(!has_suffix_no_case(b"db.raw", b".cred"));
    }
}
