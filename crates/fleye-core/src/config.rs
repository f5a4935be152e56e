//! Resolved capture configuration.
//!
//! [`CaptureConfig`] describes the byte layout of a capture: frame and
//! session delimiters, the fixed-position regions inside a frame, and how the
//! file is windowed while streaming. It can be built in code with the
//! builder-style setters or deserialized with serde; every field has a
//! default matching the FlEye camera firmware.
//!
//! All in-frame offsets are relative to the first byte after the frame
//! header, which is where the sequence id lives.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::ops::Range;

/// Width of the big-endian sequence id at the start of every frame
pub const SEQUENCE_LEN: usize = 4;

/// Width of the tag switch field
pub const TAG_LEN: usize = 16;

/// Width of one payload entry: id byte plus a 3-byte big-endian reading
pub const PIXEL_ENTRY_LEN: usize = 4;

/// Width of one auxiliary sub-block, excluding its checksum
pub const AUX_BLOCK_LEN: usize = 18;

/// Width of the big-endian checksum that follows each auxiliary sub-block
pub const AUX_CHECKSUM_LEN: usize = 2;

/// Width of every repacked field in an output record
pub const RECORD_FIELD_LEN: usize = 4;

/// A constant byte sequence used as a delimiter or marker.
///
/// Deserializes either from an explicit byte array (`[191, 191, ...]`) or
/// from a fill description (`{ fill = 0xbf, len = 12 }`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "PatternRepr")]
pub struct Pattern(Vec<u8>);

#[derive(Deserialize)]
#[serde(untagged)]
enum PatternRepr {
    Bytes(Vec<u8>),
    Fill { fill: u8, len: usize },
}

impl From<PatternRepr> for Pattern {
    fn from(repr: PatternRepr) -> Self {
        match repr {
            PatternRepr::Bytes(bytes) => Self(bytes),
            PatternRepr::Fill { fill, len } => Self::filled(fill, len),
        }
    }
}

impl Pattern {
    /// Creates a pattern of `len` repetitions of `fill`
    pub fn filled(fill: u8, len: usize) -> Self {
        Self(vec![fill; len])
    }

    /// Returns the pattern bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the pattern in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the pattern has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Pattern {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Pattern {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Pattern {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A fixed-position filler region inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Spacer {
    /// Offset from the start of the frame payload
    pub offset: usize,
    /// Number of filler bytes
    pub len: usize,
    /// Expected value of every filler byte
    pub fill: u8,
}

impl Spacer {
    /// Creates a new spacer description
    pub fn new(offset: usize, len: usize, fill: u8) -> Self {
        Self { offset, len, fill }
    }

    /// Byte range covered by the spacer
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Positions of the typed regions inside a frame payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameLayout {
    /// Offset of the 16-byte tag switch
    pub tag_offset: usize,
    /// Offset of the first payload entry
    pub pixel_offset: usize,
    /// Number of payload entries
    pub pixel_count: usize,
    /// Offset of the first auxiliary sub-block
    pub aux_offset: usize,
    /// Number of checksummed auxiliary sub-blocks
    pub aux_blocks: usize,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            tag_offset: SEQUENCE_LEN,
            pixel_offset: 36,
            pixel_count: 192,
            aux_offset: 820,
            aux_blocks: 2,
        }
    }
}

impl FrameLayout {
    /// Byte range of the tag switch
    pub fn tag_range(&self) -> Range<usize> {
        self.tag_offset..self.tag_offset + TAG_LEN
    }

    /// Byte range of the payload entries
    pub fn pixel_range(&self) -> Range<usize> {
        self.pixel_offset..self.pixel_offset + self.pixel_count * PIXEL_ENTRY_LEN
    }

    /// Byte range of the whole auxiliary region, checksums included
    pub fn aux_range(&self) -> Range<usize> {
        let stride = AUX_BLOCK_LEN + AUX_CHECKSUM_LEN;
        self.aux_offset..self.aux_offset + self.aux_blocks * stride
    }

    /// Data range and checksum range of auxiliary sub-block `index`
    pub fn aux_block(&self, index: usize) -> (Range<usize>, Range<usize>) {
        let start = self.aux_offset + index * (AUX_BLOCK_LEN + AUX_CHECKSUM_LEN);
        let sum_start = start + AUX_BLOCK_LEN;
        (start..sum_start, sum_start..sum_start + AUX_CHECKSUM_LEN)
    }

    /// Number of 16-bit values in the auxiliary region
    pub fn aux_words(&self) -> usize {
        self.aux_range().len() / 2
    }

    /// Smallest payload that holds every typed region
    pub fn min_payload_len(&self) -> usize {
        [
            SEQUENCE_LEN,
            self.tag_range().end,
            self.pixel_range().end,
            self.aux_range().end,
        ]
        .into_iter()
        .max()
        .unwrap_or(SEQUENCE_LEN)
    }

    /// Length of a repacked record including the session id prefix
    pub fn record_len(&self) -> usize {
        let fields = 1 + 1 + TAG_LEN + self.pixel_count + self.aux_words();
        fields * RECORD_FIELD_LEN
    }
}

/// How the capture is windowed while streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkGeometry {
    /// Number of blocks read per chunk
    pub blocks_per_chunk: usize,
    /// Number of blocks shared by consecutive chunks
    pub overlap_blocks: usize,
}

impl Default for ChunkGeometry {
    fn default() -> Self {
        Self {
            blocks_per_chunk: 10,
            overlap_blocks: 2,
        }
    }
}

impl ChunkGeometry {
    /// Creates a new geometry
    pub fn new(blocks_per_chunk: usize, overlap_blocks: usize) -> Self {
        Self {
            blocks_per_chunk,
            overlap_blocks,
        }
    }

    /// Bytes read per chunk
    pub fn chunk_len(&self, block_size: usize) -> usize {
        self.blocks_per_chunk * block_size
    }

    /// Bytes shared by consecutive chunks
    pub fn overlap_len(&self, block_size: usize) -> usize {
        self.overlap_blocks * block_size
    }

    /// Checks the geometry on its own, independent of frame size
    pub fn validate(&self, block_size: usize) -> Result<()> {
        if block_size == 0 {
            return Err(Error::invalid_config("block size must be non-zero"));
        }
        if self.blocks_per_chunk == 0 {
            return Err(Error::invalid_config("blocks per chunk must be non-zero"));
        }
        if self.overlap_blocks >= self.blocks_per_chunk {
            return Err(Error::invalid_config(format!(
                "overlap of {} blocks must be smaller than a chunk of {} blocks",
                self.overlap_blocks, self.blocks_per_chunk
            )));
        }
        Ok(())
    }
}

/// Complete configuration consumed by the extraction pipeline
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Marker preceding every frame
    pub header: Pattern,
    /// Marker terminating every frame
    pub footer: Pattern,
    /// Constant filler regions checked on every frame
    pub spacers: Vec<Spacer>,
    /// Block marking the start of a recording session
    pub run_start: Pattern,
    /// Block marking the end of a recording session
    pub run_end: Pattern,
    /// Total frame length including header and footer
    pub frame_length: usize,
    /// Whether auxiliary checksums are verified
    pub validate_checksum: bool,
    /// Size of the atomic input block
    pub block_size: usize,
    /// Size every output record is padded to.
    ///
    /// Used in place of `block_size` for output padding: a repacked frame of
    /// the default layout is 920 bytes and does not fit one 512-byte block.
    pub record_size: usize,
    /// Typed regions inside a frame
    pub layout: FrameLayout,
    /// Streaming window
    pub chunk: ChunkGeometry,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            header: Pattern::filled(0xBF, 12),
            footer: Pattern::filled(0xEF, 16),
            spacers: vec![Spacer::new(20, 16, 0x00), Spacer::new(804, 16, 0x00)],
            run_start: Pattern::filled(0xBB, 512),
            run_end: Pattern::filled(0xEB, 512),
            frame_length: 1024,
            validate_checksum: true,
            block_size: 512,
            record_size: 1024,
            layout: FrameLayout::default(),
            chunk: ChunkGeometry::default(),
        }
    }
}

impl CaptureConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the spacer list
    pub fn spacers(mut self, spacers: Vec<Spacer>) -> Self {
        self.spacers = spacers;
        self
    }

    /// Enables or disables checksum verification
    pub fn validate_checksum(mut self, enabled: bool) -> Self {
        self.validate_checksum = enabled;
        self
    }

    /// Sets the number of blocks per chunk
    pub fn blocks_per_chunk(mut self, blocks: usize) -> Self {
        self.chunk.blocks_per_chunk = blocks;
        self
    }

    /// Sets the number of overlapping blocks
    pub fn overlap_blocks(mut self, blocks: usize) -> Self {
        self.chunk.overlap_blocks = blocks;
        self
    }

    /// Sets the output record size
    pub fn record_size(mut self, size: usize) -> Self {
        self.record_size = size;
        self
    }

    /// Bytes between the end of the header and the start of the footer
    pub fn payload_len(&self) -> usize {
        self.frame_length
            .saturating_sub(self.header.len() + self.footer.len())
    }

    /// Checks that the configuration describes a processable capture
    pub fn validate(&self) -> Result<()> {
        for (name, pattern) in [
            ("header", &self.header),
            ("footer", &self.footer),
            ("run_start", &self.run_start),
            ("run_end", &self.run_end),
        ] {
            if pattern.is_empty() {
                return Err(Error::invalid_config(format!("{} must not be empty", name)));
            }
        }

        if self.header.len() + self.footer.len() >= self.frame_length {
            return Err(Error::invalid_config(format!(
                "frame length {} leaves no room for a payload",
                self.frame_length
            )));
        }

        self.chunk.validate(self.block_size)?;

        // A frame or marker straddling a chunk boundary is only recovered if
        // the next chunk holds it whole.
        let overlap = self.chunk.overlap_len(self.block_size);
        if overlap < self.frame_length {
            return Err(Error::invalid_config(format!(
                "chunk overlap of {} bytes is shorter than a {}-byte frame",
                overlap, self.frame_length
            )));
        }
        for (name, marker) in [("run_start", &self.run_start), ("run_end", &self.run_end)] {
            if overlap < marker.len() {
                return Err(Error::invalid_config(format!(
                    "chunk overlap of {} bytes is shorter than the {}-byte {} marker",
                    overlap,
                    marker.len(),
                    name
                )));
            }
        }

        let payload_len = self.payload_len();
        let needed = self.layout.min_payload_len();
        if needed > payload_len {
            return Err(Error::invalid_config(format!(
                "frame layout needs {} payload bytes, frame holds {}",
                needed, payload_len
            )));
        }

        if let Some(spacer) = self.spacers.iter().find(|s| s.range().end > payload_len) {
            return Err(Error::invalid_config(format!(
                "spacer at offset {} (len {}) extends past the {}-byte payload",
                spacer.offset, spacer.len, payload_len
            )));
        }

        if self.record_size < RECORD_FIELD_LEN {
            return Err(Error::invalid_config(format!(
                "record size {} cannot hold a session id",
                self.record_size
            )));
        }

        Ok(())
    }
}
