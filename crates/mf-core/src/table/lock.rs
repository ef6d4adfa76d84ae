//! Advisory readers-writer lock shared by every process that opens a table.
//!
//! The table bytes live in a segment mapped independently by unrelated
//! processes, so there is no in-memory object they could all synchronize on.
//! Instead each table has a side file, `<name>.lock`, and every operation
//! takes a `flock(2)` on it: `LOCK_SH` for reads, `LOCK_EX` for writes.
//!
//! Semantics:
//! - any number of shared holders, or exactly one exclusive holder
//! - whole-table scope; a write to one symbol blocks reads of every other
//! - no reentrancy, no shared-to-exclusive upgrade, no timeout
//!
//! `flock` locks belong to an open file description, not to a process. Each
//! acquisition therefore opens the lock file afresh, which makes two handles
//! inside one process exclude each other exactly like two processes do.

use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::error::MfError;

/// Which side of the readers-writer lock a guard holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn flock_op(self) -> libc::c_int {
        match self {
            Self::Shared => libc::LOCK_SH,
            Self::Exclusive => libc::LOCK_EX,
        }
    }
}

/// Handle to a table's lock artifact.
#[derive(Debug, Clone)]
pub struct TableLock {
    path: PathBuf,
}

impl TableLock {
    /// Make sure the lock file exists and return a handle to it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MfError> {
        let lock = Self { path: path.into() };
        lock.open_file()?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until a shared (read) hold is granted.
    pub fn shared(&self) -> Result<LockGuard, MfError> {
        self.acquire(LockMode::Shared)
    }

    /// Block until an exclusive (write) hold is granted.
    pub fn exclusive(&self) -> Result<LockGuard, MfError> {
        self.acquire(LockMode::Exclusive)
    }

    fn acquire(&self, mode: LockMode) -> Result<LockGuard, MfError> {
        let file = self.open_file()?;
        flock(&file, mode.flock_op()).map_err(|source| self.err(source))?;
        Ok(LockGuard { file, mode, path: self.path.clone() })
    }

    fn open_file(&self) -> Result<File, MfError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| self.err(source))
    }

    fn err(&self, source: io::Error) -> MfError {
        MfError::Lock { path: self.path.clone(), source }
    }
}

/// A held lock. Released when dropped, including during unwinding.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    mode: LockMode,
    path: PathBuf,
}

impl LockGuard {
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = flock(&self.file, libc::LOCK_UN) {
            warn!("[table-lock] unlock of {} failed: {e}", self.path.display());
        }
    }
}

/// `flock(2)` with EINTR retry.
fn flock(file: &File, op: libc::c_int) -> io::Result<()> {
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Non-blocking probe used by tests: can `mode` be acquired right now?
#[cfg(test)]
fn try_acquire(lock: &TableLock, mode: LockMode) -> bool {
    let file = lock.open_file().unwrap();
    let ok = flock(&file, mode.flock_op() | libc::LOCK_NB).is_ok();
    if ok {
        flock(&file, libc::LOCK_UN).unwrap();
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_in(dir: &tempfile::TempDir) -> TableLock {
        TableLock::open(dir.path().join("t.lock")).unwrap()
    }

    #[test]
    fn readers_share() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let _a = lock.shared().unwrap();
        let _b = lock.shared().unwrap();
        assert!(try_acquire(&lock, LockMode::Shared));
        assert!(!try_acquire(&lock, LockMode::Exclusive));
    }

    #[test]
    fn writer_excludes_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let guard = lock.exclusive().unwrap();
        assert_eq!(guard.mode(), LockMode::Exclusive);
        assert!(!try_acquire(&lock, LockMode::Shared));
        assert!(!try_acquire(&lock, LockMode::Exclusive));
        drop(guard);
        assert!(try_acquire(&lock, LockMode::Exclusive));
    }

    #[test]
    fn released_during_unwind() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let inner = lock.clone();
        let result = std::panic::catch_unwind(move || {
            let _g = inner.exclusive().unwrap();
            panic!("operation failed while holding the lock");
        });
        assert!(result.is_err());
        assert!(try_acquire(&lock, LockMode::Exclusive));
    }

    #[test]
    fn writer_waits_for_reader() {
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let reader = lock.shared().unwrap();

        let (tx, rx) = mpsc::channel();
        let writer_lock = lock.clone();
        let handle = std::thread::spawn(move || {
            let _g = writer_lock.exclusive().unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(reader);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
