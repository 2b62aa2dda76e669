//! Linux I/O hints for archive streaming
//!
//! - `fadvise(POSIX_FADV_SEQUENTIAL)` on the archive being read
//! - `fallocate()` for extracted files whose final size is known from the header
//! - `fadvise(POSIX_FADV_DONTNEED)` once an extracted or archived file is done
//!
//! All hints are best effort: failures are ignored and other platforms get
//! no-ops.

use std::fs::File;
#[cfg(target_os = "linux")]
use std::num::NonZeroU64;

/// Hint that `file` will be read front to back
#[cfg(target_os = "linux")]
pub fn fadvise_sequential(file: &File, len: u64) {
    use rustix::fs::{Advice, fadvise};

    let _ = fadvise(file, 0, NonZeroU64::new(len), Advice::Sequential);
}

#[cfg(not(target_os = "linux"))]
pub fn fadvise_sequential(_file: &File, _len: u64) {}

/// Reserve `size` bytes for a file about to be written
#[cfg(target_os = "linux")]
pub fn preallocate_file(file: &File, size: u64) {
    use rustix::fs::{FallocateFlags, fallocate};

    if size > 0 {
        let _ = fallocate(file, FallocateFlags::empty(), 0, size);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn preallocate_file(_file: &File, _size: u64) {}

/// Let the kernel drop cached pages of a file we will not touch again
#[cfg(target_os = "linux")]
pub fn fadvise_dontneed(file: &File, len: u64) {
    use rustix::fs::{Advice, fadvise};

    let _ = fadvise(file, 0, NonZeroU64::new(len), Advice::DontNeed);
}

#[cfg(not(target_os = "linux"))]
pub fn fadvise_dontneed(_file: &File, _len: u64) {}
