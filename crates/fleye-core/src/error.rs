//! Error types for the fleye-core library.
//!
//! Only failures that abort a run or a single record write are modelled here.
//! Per-frame validation outcomes are reported through
//! [`Verdict`](crate::validator::Verdict) instead, since a bad frame is an
//! expected event in a capture and never stops extraction.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fleye operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all fleye operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to open a capture or output file
    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        /// Path to the file that failed to open
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read or seek the capture
    #[error("failed to read capture at offset {offset}: {source}")]
    FileRead {
        /// Absolute byte offset of the failed read
        offset: u64,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to emit one output record
    #[error("failed to write record for frame {sequence}: {source}")]
    FileWrite {
        /// Sequence id of the frame being written
        sequence: u32,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush the output when closing it
    #[error("failed to flush output: {source}")]
    OutputFlush {
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The chunk reader was used after `close`
    #[error("chunk reader used after close")]
    ReaderClosed,

    /// The reformatter was used after `close`
    #[error("write to closed output for frame {sequence}")]
    WriterClosed {
        /// Sequence id of the frame that could not be written
        sequence: u32,
    },

    /// The resolved configuration is inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Discovery found no session chain starting at offset 0
    #[error("no valid recording session found in capture")]
    NoValidSession,

    /// A repacked frame does not fit in one output record
    #[error("record for frame {sequence} is {len} bytes, exceeds record size {limit}")]
    RecordTooLarge {
        /// Sequence id of the dropped frame
        sequence: u32,
        /// Unpadded record length
        len: usize,
        /// Configured record size
        limit: usize,
    },

    /// A frame payload is too short for the configured layout
    #[error("frame payload is {len} bytes, layout needs {needed}")]
    TruncatedFrame {
        /// Observed payload length
        len: usize,
        /// Minimum length the layout requires
        needed: usize,
    },
}

impl Error {
    /// Creates a new file open error
    pub fn file_open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOpen {
            path: path.into(),
            source,
        }
    }

    /// Creates a new capture read error
    pub fn file_read(offset: u64, source: std::io::Error) -> Self {
        Self::FileRead { offset, source }
    }

    /// Creates a new record write error
    pub fn file_write(sequence: u32, source: std::io::Error) -> Self {
        Self::FileWrite { sequence, source }
    }

    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Returns true if this error only affects a single frame and extraction
    /// should carry on with the next one
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::FileWrite { .. }
                | Self::WriterClosed { .. }
                | Self::RecordTooLarge { .. }
                | Self::TruncatedFrame { .. }
        )
    }
}
