//! Named shared segments for the process transport.
//!
//! A segment is a freshly created file sized to the request and mapped with
//! `MAP_SHARED`. Placed in `/dev/shm` it is exactly what `shm_open` hands out
//! on Linux, but addressing it by path keeps tests free to use a temp dir.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::Region;

/// Directory new segments go into when the caller does not pick one.
///
/// `/dev/shm` when it exists (tmpfs, never touches a disk), the system temp
/// directory otherwise.
pub fn default_segment_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// A file-backed `MAP_SHARED` mapping.
///
/// The creating side owns the name: dropping or [releasing](Self::release) it
/// unlinks the file. Attached mappings only unmap.
pub struct SharedSegment {
    ptr: *mut u8,
    len: usize,
    path: PathBuf,
    owns_file: bool,
}

impl SharedSegment {
    /// Create the segment at `path` and map `size` zeroed bytes.
    ///
    /// Whatever file sits at `path` is unlinked first, so the segment is
    /// always a fresh inode: a process still mapping a stale file keeps its
    /// own copy and never sees this one. The file is created with mode 0600.
    pub fn create(path: &Path, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "segment size must be > 0",
            ));
        }

        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "replaced stale segment file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        file.set_len(size as u64)?;

        let ptr = map_shared(&file, size)?;
        tracing::debug!(path = %path.display(), size, "created shared segment");

        Ok(Self {
            ptr,
            len: size,
            path: path.to_path_buf(),
            owns_file: true,
        })
    }

    /// Map an existing segment. Its current file size is the mapping size.
    ///
    /// Fails with `InvalidData` while the creator has not sized the file yet.
    pub fn attach(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment file is empty",
            ));
        }

        let ptr = map_shared(&file, size)?;
        tracing::debug!(path = %path.display(), size, "attached shared segment");

        Ok(Self {
            ptr,
            len: size,
            path: path.to_path_buf(),
            owns_file: false,
        })
    }

    /// View of the mapped bytes.
    ///
    /// Must not be used after [`release`](Self::release).
    #[inline]
    pub fn region(&self) -> Region {
        assert!(!self.ptr.is_null(), "segment already released");
        // SAFETY: mmap returns page-aligned memory valid until munmap.
        unsafe { Region::from_raw(self.ptr, self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn owns_file(&self) -> bool {
        self.owns_file
    }

    /// Unmap, and unlink if this side created the segment.
    ///
    /// Idempotent. Both steps are attempted; the first failure is returned.
    pub fn release(&mut self) -> io::Result<()> {
        if self.ptr.is_null() {
            return Ok(());
        }

        // SAFETY: ptr/len come from a successful mmap that was not unmapped yet.
        let rc = unsafe { libc::munmap(self.ptr.cast::<libc::c_void>(), self.len) };
        self.ptr = std::ptr::null_mut();
        let unmapped = if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        };

        let unlinked = if self.owns_file {
            self.owns_file = false;
            std::fs::remove_file(&self.path)
        } else {
            Ok(())
        };

        unmapped.and(unlinked)
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            tracing::warn!(path = %self.path.display(), %error, "releasing shared segment failed");
        }
    }
}

// SAFETY: the mapping stays valid until release/drop and carries no
// thread-affine state.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

fn map_shared(file: &File, size: usize) -> io::Result<*mut u8> {
    // SAFETY: plain mmap of an open descriptor; the result is checked below.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr.cast::<u8>())
}
