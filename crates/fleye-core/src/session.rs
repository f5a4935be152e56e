//! Recording session discovery.
//!
//! A capture holds one or more recordings, each opened by a run-start marker
//! block and closed by a run-end marker block. Discovery happens in one full
//! pass over the capture:
//!
//! 1. [`find_markers`] records the offset of every marker occurrence
//! 2. [`match_ranges`] pairs each start with the first end after it
//! 3. [`valid_session`] keeps the back-to-back chain beginning at offset 0
//!
//! Anything after the first gap in the chain is treated as noise and
//! excluded from extraction.

use crate::config::Pattern;
use crate::error::Result;
use crate::reader::ChunkReader;
use crate::splitter::find_all;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{Read, Seek};
use tracing::{debug, info, trace, Span};

/// One recording interval of the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Session {
    /// Offset of the run-start marker
    pub start: u64,
    /// Offset at which the run-end marker begins
    pub end: u64,
}

impl Session {
    /// Creates a new session interval
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Returns true if `offset` lies within the inclusive bounds
    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset <= self.end
    }

    /// Returns true if a frame with its header at `offset` ends at or before
    /// the run-end marker
    pub fn contains_frame(&self, offset: u64, frame_length: usize) -> bool {
        self.start <= offset && offset + frame_length as u64 <= self.end
    }

    /// Length of the interval in bytes
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true for a zero-length interval
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl From<(u64, u64)> for Session {
    fn from((start, end): (u64, u64)) -> Self {
        Self::new(start, end)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Drives `reader` to the end of the capture and collects the sorted,
/// de-duplicated offsets of every run-start and run-end marker.
///
/// Overlapping chunks report markers in the shared region twice; the offsets
/// are absolute, so the duplicates collapse.
pub fn find_markers<R: Read + Seek>(
    reader: &mut ChunkReader<R>,
    run_start: &[u8],
    run_end: &[u8],
) -> Result<(Vec<u64>, Vec<u64>)> {
    let mut starts = BTreeSet::new();
    let mut ends = BTreeSet::new();

    loop {
        let chunk = reader.next_chunk()?;
        for pos in find_all(&chunk.data, run_start) {
            starts.insert(chunk.offset + pos as u64);
        }
        for pos in find_all(&chunk.data, run_end) {
            ends.insert(chunk.offset + pos as u64);
        }
        if chunk.is_end() {
            break;
        }
    }

    trace!(starts = starts.len(), ends = ends.len(), "marker scan complete");
    Ok((starts.into_iter().collect(), ends.into_iter().collect()))
}

/// Pairs every start with the first end strictly after it.
///
/// Both slices must be sorted ascending. Starts without a later end are
/// dropped; an end may close several starts, producing overlapping
/// candidates that [`valid_session`] later discards.
pub fn match_ranges(starts: &[u64], ends: &[u64]) -> Vec<Session> {
    starts
        .iter()
        .filter_map(|&start| {
            let idx = ends.partition_point(|&end| end <= start);
            ends.get(idx).map(|&end| Session::new(start, end))
        })
        .collect()
}

/// Reduces candidate intervals to the chain of back-to-back sessions
/// starting at offset 0.
///
/// Interval `i + 1` is kept only if it starts right after the run-end marker
/// closing interval `i`. The chain stops at the first gap.
pub fn valid_session(intervals: &[Session], run_end_len: u64) -> Vec<Session> {
    let Some(first) = intervals.first() else {
        return Vec::new();
    };
    if first.start != 0 {
        return Vec::new();
    }

    let mut chain = vec![*first];
    for interval in &intervals[1..] {
        let previous = chain[chain.len() - 1];
        if interval.start != previous.end + run_end_len {
            break;
        }
        chain.push(*interval);
    }
    chain
}

/// Index of the session whose inclusive bounds contain `offset`.
///
/// Returns `None` if the offset precedes the first session or falls outside
/// every session.
pub fn get_run_id(sessions: &[Session], offset: u64) -> Option<usize> {
    sessions.iter().position(|session| session.contains(offset))
}

/// Runs the full discovery pass over a capture
#[derive(Debug, Clone)]
pub struct SessionDetector {
    run_start: Pattern,
    run_end: Pattern,
    span: Span,
}

impl SessionDetector {
    /// Creates a detector for the given markers
    pub fn new(run_start: Pattern, run_end: Pattern) -> Self {
        Self {
            run_start,
            run_end,
            span: tracing::debug_span!("session_detector"),
        }
    }

    /// Attaches the logging context events are emitted under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Scans the whole capture and returns the valid session chain.
    ///
    /// The reader is left at end of file; callers rewind it before the next
    /// pass. An empty result means no valid session exists.
    pub fn detect<R: Read + Seek>(&self, reader: &mut ChunkReader<R>) -> Result<Vec<Session>> {
        let (starts, ends) = find_markers(
            reader,
            self.run_start.as_bytes(),
            self.run_end.as_bytes(),
        )?;
        debug!(
            parent: &self.span,
            starts = starts.len(),
            ends = ends.len(),
            "found session markers"
        );

        let candidates = match_ranges(&starts, &ends);
        let sessions = valid_session(&candidates, self.run_end.len() as u64);

        if sessions.len() < candidates.len() {
            debug!(
                parent: &self.span,
                kept = sessions.len(),
                candidates = candidates.len(),
                "session chain truncated"
            );
        }
        for (id, session) in sessions.iter().enumerate() {
            info!(parent: &self.span, id, %session, "detected session");
        }

        Ok(sessions)
    }
}
