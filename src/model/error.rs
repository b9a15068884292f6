use std::backtrace::Backtrace;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FolderError {
    /// the caller passed a command that can never succeed, such as one missing its uid
    #[error("bad request: {0}")]
    BadRequest(String),
    /// the folder (or the requested parent) does not exist in the org
    #[error("folder not found")]
    NotFound,
    /// a folder with the same uid already exists in the org
    #[error("a folder with the same uid already exists")]
    AlreadyExists,
    #[error("a folder cannot be the parent of itself")]
    CannotBeParentOfItself,
    /// the folder would end up underneath one of its own descendants
    #[error("circular reference detected")]
    CircularReference,
    #[error("maximum folder depth of {max} reached")]
    MaxDepthExceeded { max: usize },
    /// the database failed while `phase` was running
    #[error("failed to {phase}: {source}")]
    Internal {
        phase: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl FolderError {
    /// builds a mapper that logs the database failure and wraps it with the phase that failed
    pub fn internal(phase: &'static str) -> impl FnOnce(rusqlite::Error) -> FolderError {
        move |source| {
            log::error!(
                "Failed to {phase}: {source:?}\n{}",
                Backtrace::force_capture()
            );
            FolderError::Internal { phase, source }
        }
    }

    /// same as [`FolderError::internal`], except that a missing row becomes [`FolderError::NotFound`]
    pub fn lookup(phase: &'static str) -> impl FnOnce(rusqlite::Error) -> FolderError {
        move |source| {
            if source == rusqlite::Error::QueryReturnedNoRows {
                FolderError::NotFound
            } else {
                FolderError::internal(phase)(source)
            }
        }
    }

    /// same as [`FolderError::internal`], except that a uniqueness violation becomes [`FolderError::AlreadyExists`]
    pub fn write(phase: &'static str) -> impl FnOnce(rusqlite::Error) -> FolderError {
        move |source| match source {
            rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
                FolderError::AlreadyExists
            }
            _ => FolderError::internal(phase)(source),
        }
    }
}
