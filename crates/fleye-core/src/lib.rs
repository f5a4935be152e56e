//! # fleye-core
//!
//! A library for turning raw FlEye sensor captures into validated,
//! fixed-width records without holding the capture in memory.
//!
//! This crate provides the core functionality for:
//! - Reading a capture through overlapping fixed-size windows
//! - Finding the chain of recording sessions between start/end marker blocks
//! - Splitting windows into header/footer delimited frames
//! - Validating frame structure, checksums and sequence order
//! - Repacking accepted frames into canonical 4-byte-aligned records
//!
//! ## Architecture
//!
//! - [`reader`]: Overlapping chunk reader, sole owner of the capture cursor
//! - [`splitter`]: Header/footer frame splitting
//! - [`session`]: Session marker discovery and chain validation
//! - [`validator`]: Per-frame structural and sequence checks
//! - [`reformat`]: Canonical record packing and output
//! - [`extract`]: Two-pass driver tying everything together
//! - [`config`]: Capture layout configuration
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use fleye_core::{CaptureConfig, Extractor};
//!
//! let extractor = Extractor::new(CaptureConfig::default())?;
//! let summary = extractor.run("capture.bin", "frames.bin")?;
//! println!("{} records from {} sessions", summary.written, summary.sessions.len());
//! # Ok::<(), fleye_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod extract;
pub mod reader;
pub mod reformat;
pub mod session;
pub mod splitter;
pub mod validator;

// Re-export primary types for convenience
pub use config::{CaptureConfig, ChunkGeometry, FrameLayout, Pattern, Spacer};
pub use error::{Error, Result};
pub use extract::{ExtractionSummary, Extractor};
pub use reader::{Chunk, ChunkId, ChunkReader};
pub use reformat::FrameReformatter;
pub use session::{Session, SessionDetector};
pub use splitter::CandidateFrame;
pub use validator::{Advisory, FrameValidator, Rejection, TagState, Verdict};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
