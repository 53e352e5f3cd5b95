use crate::xmldoc::XmlError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid gap check pattern: {0}")]
    BadPattern(#[from] regex::Error),
    #[error("cannot read state file {path}: {source}")]
    CannotReadState { path: PathBuf, source: io::Error },
    #[error("cannot write state file {path}: {source}")]
    CannotWriteState { path: PathBuf, source: io::Error },
    #[error("error parsing state file {path}: {source}")]
    BadStateXml { path: PathBuf, source: XmlError },
    #[error("bad state file {path}: {reason}")]
    BadState { path: PathBuf, reason: String },
}

pub type MonitorResult<T> = Result<T, MonitorError>;
