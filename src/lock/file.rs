//! Advisory `flock` lock file holding the owner's pid.
//!
//! `flock` locks belong to the open file description, so two handles in the
//! same process exclude each other just like two processes do, and the kernel
//! drops the lock when its owner exits for any reason.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Attempts the lock once. Returns `Ok(None)` when another description
    /// holds it.
    pub fn try_lock<P: AsRef<Path>>(path: P) -> io::Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if !try_flock(&file)? {
            return Ok(None);
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Some(Self { file, path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Clear the pid before releasing so a reader never sees a stale owner
        // for a free lock.
        let _ = self.file.set_len(0);
        unlock(&self.file);
    }
}

/// Pid recorded in the lock file, if any.
pub fn read_owner(path: &Path) -> io::Result<Option<u32>> {
    let mut contents = String::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_string(&mut contents)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }
    Ok(contents.trim().parse().ok())
}

#[cfg(unix)]
fn try_flock(file: &File) -> io::Result<bool> {
    use libc::{flock, EWOULDBLOCK, LOCK_EX, LOCK_NB};

    // SAFETY: the descriptor is owned by `file` and valid for the call.
    let result = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(EWOULDBLOCK) => Ok(false),
        _ => Err(err),
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    // SAFETY: the descriptor is owned by `file` and valid for the call.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_flock(_file: &File) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "advisory file locks require a unix platform",
    ))
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

/// Whether a process with `pid` exists. A process owned by another user
/// counts as alive.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}
