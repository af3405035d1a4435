use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The parent directory of a file database could not be created.
    #[error("Cannot create job database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// The file was written by a build that knows more migrations than this
    /// one. Opening it could misread job rows, so it is refused.
    #[error("Job database schema v{found} is newer than the supported v{supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    #[error("Job database lock poisoned by a panicking writer")]
    LockPoisoned,
}
