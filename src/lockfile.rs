use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot open lock file {0}: {1}")]
    CannotOpen(PathBuf, #[source] io::Error),
    #[error("already running")]
    AlreadyRunning,
    #[error("cannot write lock file {0}: {1}")]
    CannotWrite(PathBuf, #[source] io::Error),
}

///
/// An exclusive lock on a file holding our pid.  The lock lasts
/// until the value is dropped.
///
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    _file: File,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<LockFile, LockError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| LockError::CannotOpen(path.to_path_buf(), e))?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::WouldBlock {
                return Err(LockError::AlreadyRunning);
            }
            return Err(LockError::CannotOpen(path.to_path_buf(), e));
        }
        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", process::id()))
            .map_err(|e| LockError::CannotWrite(path.to_path_buf(), e))?;
        Ok(LockFile {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
