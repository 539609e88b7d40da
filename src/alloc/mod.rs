//! File space preallocation
//!
//! Before any worker starts, each data file is brought to its target size so
//! the measured I/O never pays allocation costs mid-run. The reservation
//! primitive is a capability selected once at startup: on Linux an
//! `fallocate(FALLOC_FL_ZERO_RANGE)` guarantees physical space up front with
//! all bytes logically zero; elsewhere the fallback extends the logical size
//! only.
//!
//! Allocation failures are fatal for the affected path — callers must not
//! launch workers against a file that could not be sized.

use crate::Result;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Low-level reservation primitive. One implementation per platform
/// capability; swap in a stub to observe allocator behavior in tests.
pub trait SpacePrimitive: Send + Sync {
    /// Reserve `size` bytes for `file`, extending it if necessary.
    fn reserve(&self, file: &File, size: u64) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Linux zero-fill reservation via `fallocate(2)`.
#[cfg(target_os = "linux")]
pub struct ZeroRange;

#[cfg(target_os = "linux")]
impl SpacePrimitive for ZeroRange {
    fn reserve(&self, file: &File, size: u64) -> Result<()> {
        use std::os::unix::io::AsRawFd;

        let rc = unsafe {
            libc::fallocate(
                file.as_raw_fd(),
                libc::FALLOC_FL_ZERO_RANGE,
                0,
                size as libc::off_t,
            )
        };
        if rc == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            // Some filesystems reject ZERO_RANGE; logical extension still
            // lets the run proceed.
            Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS) | Some(libc::EINVAL) => file
                .set_len(size)
                .context("fallocate unsupported and ftruncate fallback failed"),
            _ => Err(err).with_context(|| format!("fallocate(ZERO_RANGE, 0, {}) failed", size)),
        }
    }

    fn name(&self) -> &'static str {
        "zero-range"
    }
}

/// Portable fallback: extend the logical size without reserving physical
/// space.
pub struct TruncateOnly;

impl SpacePrimitive for TruncateOnly {
    fn reserve(&self, file: &File, size: u64) -> Result<()> {
        file.set_len(size)
            .with_context(|| format!("ftruncate to {} failed", size))
    }

    fn name(&self) -> &'static str {
        "truncate"
    }
}

/// The best primitive this platform offers.
pub fn platform_primitive() -> Box<dyn SpacePrimitive> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ZeroRange)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(TruncateOnly)
    }
}

/// What [`SpaceAllocator::allocate`] actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocateOutcome {
    /// Existing file already had the requested size; nothing touched.
    Skipped,
    /// Existing file was larger and was truncated down.
    Truncated,
    /// File was created or extended via the reservation primitive.
    Reserved,
}

/// Ensures a target file exists at the requested size.
pub struct SpaceAllocator {
    primitive: Box<dyn SpacePrimitive>,
}

impl SpaceAllocator {
    pub fn new() -> Self {
        Self {
            primitive: platform_primitive(),
        }
    }

    /// Use a specific primitive (tests, forced fallback).
    pub fn with_primitive(primitive: Box<dyn SpacePrimitive>) -> Self {
        Self { primitive }
    }

    pub fn primitive_name(&self) -> &'static str {
        self.primitive.name()
    }

    /// Bring `path` to exactly `size` bytes.
    ///
    /// An existing file of the right size is left alone when `keep_existing`
    /// is set, so repeated runs against the same file skip the expensive
    /// reservation. Larger files are truncated down; smaller or missing files
    /// go through the reservation primitive.
    pub fn allocate(&self, path: &Path, size: u64, keep_existing: bool) -> Result<AllocateOutcome> {
        match std::fs::metadata(path) {
            Ok(meta) => {
                if meta.len() == size && keep_existing {
                    return Ok(AllocateOutcome::Skipped);
                }
                if meta.len() > size {
                    let file = OpenOptions::new()
                        .write(true)
                        .open(path)
                        .with_context(|| format!("unable to open {} for truncate", path.display()))?;
                    file.set_len(size)
                        .with_context(|| format!("unable to truncate {}", path.display()))?;
                    return Ok(AllocateOutcome::Truncated);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("unable to access existing file {}", path.display()));
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("unable to create {}", path.display()))?;

        self.primitive
            .reserve(&file, size)
            .with_context(|| format!("unable to allocate {} bytes for {}", size, path.display()))?;

        Ok(AllocateOutcome::Reserved)
    }
}

impl Default for SpaceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
