//! Exclusive lock on a payload directory.
//!
//! Two processes flushing into the same directory would overwrite each
//! other's payloads under identical keys, so a [`DirectoryStore`] holds an
//! advisory lock on `<dir>/.lock` for as long as it is open. The holder
//! writes its pid into the lock file so a refused open can name the owner.
//!
//! [`DirectoryStore`]: super::DirectoryStore

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = ".lock";

/// Advisory lock on a payload directory. Released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Takes the lock on `dir` without blocking.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another process holds the lock; the
    ///   message carries the holder's pid when known
    /// - Any I/O error creating or writing the lock file
    pub fn acquire(dir: &Path) -> io::Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !sys::try_lock_exclusive(&file)? {
            let holder = read_holder(&mut file)
                .map_or_else(|| "unknown pid".to_string(), |pid| format!("pid {pid}"));
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("payload directory {} is locked by {holder}", dir.display()),
            ));
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { file, path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid recorded in the lock file by the current holder.
    #[must_use]
    pub fn holder_pid(&self) -> Option<u32> {
        let mut file = self.file.try_clone().ok()?;
        read_holder(&mut file)
    }
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok()
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    /// Returns `Ok(false)` when the lock is held elsewhere.
    pub(super) fn try_lock_exclusive(file: &File) -> io::Result<bool> {
        // SAFETY: the descriptor stays owned by `file` for the whole call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK => Ok(false),
            _ => Err(err),
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};
    use windows_sys::Win32::System::IO::OVERLAPPED;

    /// Returns `Ok(false)` when the lock is held elsewhere.
    pub(super) fn try_lock_exclusive(file: &File) -> io::Result<bool> {
        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: the handle stays owned by `file`; a zeroed OVERLAPPED is a
        // valid argument for a lock at offset 0.
        let ok = unsafe {
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if ok != 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == ERROR_LOCK_VIOLATION as i32 => Ok(false),
            _ => Err(err),
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io;

    pub(super) fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "directory locking is not available on this platform",
        ))
    }
}
