use crate::buffers::StoreError;
use crate::monitor::MonitorError;
use thiserror::Error;

///
/// Failures of a station's buffer: either the frame stores or the
/// monitor's snapshot.
///
#[derive(Debug, Error)]
pub enum StationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

pub type StationResult<T> = Result<T, StationError>;
