//! Failure categories of the daemon. Every one of them is fatal: nothing
//! here is retried, the error travels up to `main` and ends the process.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Bad or missing configuration, reported before the loop starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// A device path could not be turned into a (major, minor) pair.
    #[error("cannot resolve device {path}: {detail}")]
    Resolution { path: String, detail: String },

    /// The counters feed could not be opened, rewound or read.
    #[error("cannot read {path}: {source}")]
    FeedIo {
        path:   String,
        source: io::Error,
    },

    /// A record in the counters feed did not match the expected layout.
    #[error("cannot parse diskstats line {line_no} ({line:?}): {detail}")]
    FeedParse {
        line_no: usize,
        line:    String,
        detail:  String,
    },

    /// The spin-down action reported failure.
    #[error("cannot spin down {device}: {detail}")]
    Action { device: String, detail: String },
}

pub type Result<T> = std::result::Result<T, MonitorError>;
