use std::io;
use std::path::PathBuf;
use thiserror::Error;

///
/// Failures of the frame stores.  Each carries the path involved
/// and, where there is one, the underlying I/O error.
///
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot create file {path}: {source}")]
    CannotCreateFile { path: PathBuf, source: io::Error },
    #[error("cannot open file {path}: {source}")]
    CannotOpenFile { path: PathBuf, source: io::Error },
    #[error("cannot read file {path}: {source}")]
    CannotReadFile { path: PathBuf, source: io::Error },
    #[error("cannot write file {path}: {source}")]
    CannotWriteFile { path: PathBuf, source: io::Error },
    #[error("cannot stat file {path}: {source}")]
    CannotStatFile { path: PathBuf, source: io::Error },
    #[error("cannot delete file {path}: {source}")]
    CannotDeleteFile { path: PathBuf, source: io::Error },
    #[error("cannot open directory {path}: {source}")]
    CannotOpenDir { path: PathBuf, source: io::Error },
    #[error("bad file format: {path}")]
    BadFileFormat { path: PathBuf },
}

pub type StoreResult<T> = Result<T, StoreError>;
