//! ---
//! lcd_section: "02-deployment-core"
//! lcd_subsection: "module"
//! lcd_type: "source"
//! lcd_scope: "code"
//! lcd_description: "Exclusive run lock on the managed directory."
//! lcd_version: "v0.1.0"
//! lcd_owner: "tbd"
//! ---
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::LockError;

/// Exclusive `flock` held on the managed directory for the lifetime of a run.
///
/// The directory itself is locked so nothing is written into the tree.
/// Dropping the guard closes the descriptor, which releases the lock.
#[derive(Debug)]
pub struct DirectoryLock {
    _file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Take the lock without waiting. Fails with [`LockError::Held`] when another
    /// run (in this or any other process) already holds it.
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        let file = File::open(dir).map_err(|source| LockError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        match try_flock_exclusive(&file) {
            Ok(true) => {
                debug!(path = %dir.display(), "run lock acquired");
                Ok(Self {
                    _file: file,
                    path: dir.to_path_buf(),
                })
            }
            Ok(false) => Err(LockError::Held(dir.to_path_buf())),
            Err(source) => Err(LockError::Io {
                path: dir.to_path_buf(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns `Ok(false)` when the descriptor is already locked elsewhere.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the duration of the call.
        #[allow(unsafe_code)]
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}
