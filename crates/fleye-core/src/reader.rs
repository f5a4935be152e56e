//! Overlapping fixed-window reader over a capture file.
//!
//! The capture is read in chunks of `blocks_per_chunk` blocks. After every
//! full-size read the cursor steps back by `overlap_blocks` blocks, so
//! consecutive chunks share a tail/head region:
//!
//! ```text
//! [BLOCK BLOCK BLOCK BLOCK]                          <- chunk 0
//!                   [BLOCK BLOCK BLOCK BLOCK]        <- chunk 1
//!                                     [BLOCK BLOCK BLOCK BLOCK]  <- chunk 2
//! ```
//!
//! As long as the overlap is at least one frame long, any frame cut by the
//! end of one chunk appears whole in the next.

use crate::config::ChunkGeometry;
use crate::error::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace, Span};

/// Identifies a chunk within one pass over the capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkId {
    /// A full-size chunk; more data may follow
    Index(u64),
    /// The final, short chunk. Every read at end of file repeats it.
    End,
}

impl ChunkId {
    /// Returns true for the terminal chunk
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{}", index),
            Self::End => f.write_str("END"),
        }
    }
}

/// One window of raw capture bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk in the pass
    pub id: ChunkId,
    /// Raw bytes read
    pub data: Vec<u8>,
    /// Absolute file offset of the first byte of `data`
    pub offset: u64,
}

impl Chunk {
    /// Returns true if this is the terminal chunk
    pub fn is_end(&self) -> bool {
        self.id.is_end()
    }
}

/// Sequential, overlapping reader and sole owner of the capture cursor
#[derive(Debug)]
pub struct ChunkReader<R = File> {
    inner: Option<R>,
    block_size: usize,
    geometry: ChunkGeometry,
    cursor: u64,
    next_index: u64,
    span: Span,
}

impl ChunkReader<File> {
    /// Opens a capture file for chunked reading
    pub fn open(
        path: impl AsRef<Path>,
        block_size: usize,
        geometry: ChunkGeometry,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::file_open(path, e))?;
        Self::from_reader(file, block_size, geometry)
    }
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Wraps an already-open seekable source positioned at its start
    pub fn from_reader(inner: R, block_size: usize, geometry: ChunkGeometry) -> Result<Self> {
        geometry.validate(block_size)?;
        Ok(Self {
            inner: Some(inner),
            block_size,
            geometry,
            cursor: 0,
            next_index: 0,
            span: tracing::debug_span!("chunk_reader"),
        })
    }

    /// Attaches the logging context events are emitted under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Bytes requested per read
    pub fn chunk_len(&self) -> usize {
        self.geometry.chunk_len(self.block_size)
    }

    /// Absolute offset the next read starts at
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Reads the next chunk.
    ///
    /// A full-size read advances the chunk index and steps the cursor back by
    /// the overlap. A short read yields [`ChunkId::End`]; further calls keep
    /// returning an empty [`ChunkId::End`] chunk.
    pub fn next_chunk(&mut self) -> Result<Chunk> {
        let chunk_len = self.chunk_len();
        let overlap = self.geometry.overlap_len(self.block_size) as u64;
        let offset = self.cursor;
        let inner = self.inner.as_mut().ok_or(Error::ReaderClosed)?;

        let mut data = Vec::with_capacity(chunk_len);
        inner
            .by_ref()
            .take(chunk_len as u64)
            .read_to_end(&mut data)
            .map_err(|e| Error::file_read(offset, e))?;

        if data.len() < chunk_len {
            self.cursor = offset + data.len() as u64;
            trace!(parent: &self.span, offset, len = data.len(), "read final chunk");
            return Ok(Chunk {
                id: ChunkId::End,
                data,
                offset,
            });
        }

        self.cursor = inner
            .seek(SeekFrom::Current(-(overlap as i64)))
            .map_err(|e| Error::file_read(offset, e))?;

        let id = ChunkId::Index(self.next_index);
        self.next_index += 1;
        trace!(parent: &self.span, %id, offset, "read chunk");

        Ok(Chunk { id, data, offset })
    }

    /// Resets the cursor to the start of the capture for another pass
    pub fn rewind(&mut self) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(Error::ReaderClosed)?;
        inner.rewind().map_err(|e| Error::file_read(0, e))?;
        self.cursor = 0;
        self.next_index = 0;
        debug!(parent: &self.span, "rewound capture");
        Ok(())
    }

    /// Releases the underlying handle. Later reads fail with
    /// [`Error::ReaderClosed`].
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!(parent: &self.span, "closed capture");
        }
    }

    /// Returns true once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn reader(len: usize, blocks: usize, overlap: usize) -> ChunkReader<Cursor<Vec<u8>>> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        ChunkReader::from_reader(Cursor::new(data), 4, ChunkGeometry::new(blocks, overlap))
            .unwrap()
    }

    #[test]
    fn test_overlapping_windows() {
        let mut reader = reader(40, 4, 1);

        let first = reader.next_chunk().unwrap();
        assert_eq!(first.id, ChunkId::Index(0));
        assert_eq!(first.offset, 0);
        assert_eq!(first.data.len(), 16);

        let second = reader.next_chunk().unwrap();
        assert_eq!(second.id, ChunkId::Index(1));
        assert_eq!(second.offset, 12);
        assert_eq!(&first.data[12..], &second.data[..4]);

        let third = reader.next_chunk().unwrap();
        assert_eq!(third.id, ChunkId::Index(2));
        assert_eq!(third.offset, 24);

        let last = reader.next_chunk().unwrap();
        assert_eq!(last.id, ChunkId::End);
        assert_eq!(last.offset, 36);
        assert_eq!(last.data.len(), 4);
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut reader = reader(10, 4, 1);

        let last = reader.next_chunk().unwrap();
        assert!(last.is_end());
        assert_eq!(last.data.len(), 10);

        for _ in 0..3 {
            let again = reader.next_chunk().unwrap();
            assert_eq!(again.id, ChunkId::End);
            assert!(again.data.is_empty());
            assert_eq!(again.offset, 10);
        }
    }

    #[test]
    fn test_rewind_restarts_pass() {
        let mut reader = reader(40, 4, 1);
        let first = reader.next_chunk().unwrap();
        while !reader.next_chunk().unwrap().is_end() {}

        reader.rewind().unwrap();
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.next_chunk().unwrap(), first);
    }

    #[test]
    fn test_next_after_close_fails() {
        let mut reader = reader(40, 4, 1);
        reader.close();
        assert!(reader.is_closed());
        assert!(matches!(reader.next_chunk(), Err(Error::ReaderClosed)));
        assert!(matches!(reader.rewind(), Err(Error::ReaderClosed)));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let result =
            ChunkReader::from_reader(Cursor::new(Vec::<u8>::new()), 512, ChunkGeometry::new(2, 2));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let result = ChunkReader::open(
            "/nonexistent/capture.bin",
            512,
            ChunkGeometry::default(),
        );
        assert!(matches!(result, Err(Error::FileOpen { .. })));
    }

    #[test]
    fn test_chunk_id_display() {
        assert_eq!(ChunkId::Index(7).to_string(), "7");
        assert_eq!(ChunkId::End.to_string(), "END");
    }
}
