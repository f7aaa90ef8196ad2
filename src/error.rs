/// Error types for counter reading, formatting and the sample cycle.
use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;

/// A single counter line could not be turned into a snapshot.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    /// Missing tag, fewer than eight counters, or a non-numeric counter.
    #[error("malformed counter line: {reason}")]
    MalformedLine { reason: String },
}

/// A whole-table read of the counter source failed.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The counter source could not be opened.
    #[error("cannot open counter source {}: {source}", .path.display())]
    SourceUnavailable { path: PathBuf, source: io::Error },

    /// The source was opened but reading it failed midway.
    #[error("failed reading counter source {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Not a single valid entity line was found.
    #[error("no valid 'cpu' lines found in {}", .path.display())]
    NoData { path: PathBuf },

    /// The table could not grow to hold every entity line.
    #[error("cannot grow counter table: {0}")]
    Allocation(#[from] TryReserveError),
}

/// The telemetry buffer could not be sized for the current entity count.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("cannot grow payload buffer: {0}")]
    Allocation(#[from] TryReserveError),
}

/// Fatal errors that terminate the reporter.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("counter source unreadable after {attempts} attempt(s): {source}")]
    Startup { attempts: u32, source: ReadError },

    #[error("cannot connect UDP socket to {destination}: {source}")]
    Connect { destination: String, source: io::Error },

    #[error("allocation failure: {0}")]
    Allocation(TryReserveError),

    /// Shutdown was requested before startup finished.
    #[error("startup cancelled")]
    Cancelled,

    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl From<PayloadError> for Error {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Allocation(inner) => Error::Allocation(inner),
        }
    }
}
