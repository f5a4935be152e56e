//! Per-frame validation.
//!
//! Every candidate frame goes through the same stages, in order:
//!
//! | stage     | failure effect                  |
//! |-----------|---------------------------------|
//! | length    | frame rejected                  |
//! | spacers   | frame rejected                  |
//! | tag       | advisory only                   |
//! | checksums | frame rejected (if enabled)     |
//! | sequence  | advisory only                   |
//!
//! Rejections carry the observed and expected values so they can be logged
//! with the frame offset. The sequence stage tracks the last two accepted ids
//! per session and only warns when a frame arrives out of order.

use crate::config::{CaptureConfig, FrameLayout, Spacer, SEQUENCE_LEN};
use crate::reader::ChunkId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, trace, warn, Span};

/// Fill byte of the low tag switch pattern
pub const TAG_LOW: u8 = 0x0F;

/// Fill byte of the high tag switch pattern
pub const TAG_HIGH: u8 = 0xFF;

/// Structural problem that causes a frame to be dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Header + payload + footer does not add up to the frame length
    #[error("bad frame length: found {observed} bytes, expected {expected}")]
    Length {
        /// Observed total length
        observed: usize,
        /// Configured frame length
        expected: usize,
    },

    /// A spacer region holds something other than its fill byte
    #[error("bad spacer at offset {offset} (len {len}): expected fill {fill:#04x}")]
    Spacer {
        /// Spacer offset within the payload
        offset: usize,
        /// Spacer length
        len: usize,
        /// Expected fill byte
        fill: u8,
    },

    /// An auxiliary sub-block does not sum to its checksum field
    #[error("bad checksum in aux block {block}: stored {stored}, computed {computed}")]
    Checksum {
        /// Index of the sub-block
        block: usize,
        /// Value of the checksum field
        stored: u16,
        /// Sum of the sub-block bytes
        computed: u32,
    },
}

/// Anomaly that is logged but does not drop the frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// The tag field is neither all-low nor all-high
    #[error("bad tag switch pattern")]
    Tag,

    /// The sequence id does not follow the previous accepted id
    #[error("out-of-order frame: {current} after {previous}")]
    OutOfOrder {
        /// Last accepted id of the session
        previous: u32,
        /// Id of this frame
        current: u32,
    },
}

/// Classification of the 16-byte tag switch field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    /// Sixteen `0x0F` bytes
    Low,
    /// Sixteen `0xFF` bytes
    High,
    /// Anything else
    Invalid,
}

impl TagState {
    /// Classifies a tag field
    pub fn classify(tag: &[u8]) -> Self {
        match tag.first() {
            Some(&TAG_LOW) if tag.iter().all(|&b| b == TAG_LOW) => Self::Low,
            Some(&TAG_HIGH) if tag.iter().all(|&b| b == TAG_HIGH) => Self::High,
            _ => Self::Invalid,
        }
    }
}

/// Outcome of validating one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Sequence id, once the frame passed the length check
    pub sequence: Option<u32>,
    /// Structural failure, if any
    pub rejection: Option<Rejection>,
    /// Non-fatal findings
    pub advisories: Vec<Advisory>,
}

impl Verdict {
    fn rejected(sequence: Option<u32>, rejection: Rejection, advisories: Vec<Advisory>) -> Self {
        Self {
            sequence,
            rejection: Some(rejection),
            advisories,
        }
    }

    /// Returns true if the frame should be written
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Last two accepted sequence ids of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceState {
    /// Id accepted before `current`, `None` right after the session started
    pub previous: Option<u32>,
    /// Most recently accepted id
    pub current: u32,
}

/// Structural, checksum and sequence validation of candidate frames
#[derive(Debug)]
pub struct FrameValidator {
    header_len: usize,
    footer_len: usize,
    spacers: Vec<Spacer>,
    frame_length: usize,
    layout: FrameLayout,
    validate_checksum: bool,
    sequences: HashMap<usize, SequenceState>,
    span: Span,
}

impl FrameValidator {
    /// Creates a validator from the capture configuration
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            header_len: config.header.len(),
            footer_len: config.footer.len(),
            spacers: config.spacers.clone(),
            frame_length: config.frame_length,
            layout: config.layout,
            validate_checksum: config.validate_checksum,
            sequences: HashMap::new(),
            span: tracing::debug_span!("frame_validator"),
        }
    }

    /// Attaches the logging context events are emitted under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Whether auxiliary checksums are currently verified
    pub fn checksum_validation(&self) -> bool {
        self.validate_checksum
    }

    /// Turns checksum verification on or off for subsequent frames
    pub fn set_checksum_validation(&mut self, enabled: bool) {
        self.validate_checksum = enabled;
    }

    /// Tracked sequence ids of a session, if it has accepted a frame
    pub fn sequence_state(&self, session: usize) -> Option<SequenceState> {
        self.sequences.get(&session).copied()
    }

    /// Validates a frame and reports whether it should be written
    pub fn validate(&mut self, payload: &[u8], chunk: ChunkId, offset: u64, session: usize) -> bool {
        self.inspect(payload, chunk, offset, session).is_accepted()
    }

    /// Validates a frame and returns the full verdict.
    ///
    /// Rejections and advisories are logged with the chunk and byte offset of
    /// the frame. Sequence tracking only advances for accepted frames.
    pub fn inspect(&mut self, payload: &[u8], chunk: ChunkId, offset: u64, session: usize) -> Verdict {
        let observed = payload.len() + self.header_len + self.footer_len;
        if observed != self.frame_length {
            let rejection = Rejection::Length {
                observed,
                expected: self.frame_length,
            };
            warn!(parent: &self.span, %chunk, offset, "{}", rejection);
            return Verdict::rejected(None, rejection, Vec::new());
        }

        let sequence = read_sequence(payload);
        let mut advisories = Vec::new();

        if let Some(rejection) = self.check_spacers(payload) {
            warn!(parent: &self.span, %chunk, offset, "{}", rejection);
            return Verdict::rejected(sequence, rejection, advisories);
        }

        let tag = payload.get(self.layout.tag_range()).unwrap_or_default();
        if TagState::classify(tag) == TagState::Invalid {
            warn!(parent: &self.span, %chunk, offset, "{}", Advisory::Tag);
            advisories.push(Advisory::Tag);
        }

        if self.validate_checksum {
            if let Some(rejection) = self.check_aux_sums(payload) {
                warn!(parent: &self.span, %chunk, offset, "{}", rejection);
                return Verdict::rejected(sequence, rejection, advisories);
            }
        }

        if let Some(id) = sequence {
            if let Some(advisory) = self.track_sequence(session, id, offset) {
                warn!(parent: &self.span, %chunk, offset, session, "{}", advisory);
                advisories.push(advisory);
            }
        }

        trace!(parent: &self.span, %chunk, offset, ?sequence, "frame accepted");
        Verdict {
            sequence,
            rejection: None,
            advisories,
        }
    }

    fn check_spacers(&self, payload: &[u8]) -> Option<Rejection> {
        self.spacers
            .iter()
            .find(|spacer| {
                !payload
                    .get(spacer.range())
                    .is_some_and(|bytes| bytes.iter().all(|&b| b == spacer.fill))
            })
            .map(|spacer| Rejection::Spacer {
                offset: spacer.offset,
                len: spacer.len,
                fill: spacer.fill,
            })
    }

    fn check_aux_sums(&self, payload: &[u8]) -> Option<Rejection> {
        for block in 0..self.layout.aux_blocks {
            let (data, sum) = self.layout.aux_block(block);
            let (Some(data), Some(sum)) = (payload.get(data), payload.get(sum)) else {
                return Some(Rejection::Checksum {
                    block,
                    stored: 0,
                    computed: 0,
                });
            };

            let computed: u32 = data.iter().map(|&b| u32::from(b)).sum();
            let stored = u16::from_be_bytes([sum[0], sum[1]]);
            if computed != u32::from(stored) {
                return Some(Rejection::Checksum {
                    block,
                    stored,
                    computed,
                });
            }
        }
        None
    }

    fn track_sequence(&mut self, session: usize, id: u32, offset: u64) -> Option<Advisory> {
        let span = &self.span;
        match self.sequences.entry(session) {
            Entry::Vacant(entry) => {
                info!(parent: span, session, offset, sequence = id, "recording started");
                entry.insert(SequenceState {
                    previous: None,
                    current: id,
                });
                None
            }
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                let advisory = (state.current.checked_add(1) != Some(id)).then_some(
                    Advisory::OutOfOrder {
                        previous: state.current,
                        current: id,
                    },
                );
                *state = SequenceState {
                    previous: Some(state.current),
                    current: id,
                };
                advisory
            }
        }
    }
}

/// Reads the big-endian sequence id at the start of a payload
pub fn read_sequence(payload: &[u8]) -> Option<u32> {
    payload
        .get(..SEQUENCE_LEN)
        .map(|bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
