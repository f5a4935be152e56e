//! Repacking of validated frames into canonical output records.
//!
//! Each record is laid out as consecutive 4-byte big-endian fields:
//!
//! ```text
//! +---------+----------+-------------+----------------------+--------------+---------+
//! | session | sequence | tag (16x)   | readings by id (Nx)  | aux (u16 x M)| zeroes  |
//! +---------+----------+-------------+----------------------+--------------+---------+
//! ```
//!
//! and zero-padded to the configured record size.

use crate::config::{CaptureConfig, FrameLayout, PIXEL_ENTRY_LEN, RECORD_FIELD_LEN, TAG_LEN};
use crate::error::{Error, Result};
use crate::validator::read_sequence;
use bytes::{Buf, BufMut};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, trace, Span};

/// One identifier-tagged payload entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelReading {
    /// Identifier byte
    pub id: u8,
    /// 24-bit reading
    pub value: u32,
}

/// Typed view of a frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFields {
    /// Sequence id
    pub sequence: u32,
    /// Raw tag switch bytes
    pub tag: [u8; TAG_LEN],
    /// Payload entries in arrival order
    pub pixels: Vec<PixelReading>,
    /// Auxiliary region as big-endian 16-bit words, checksums included
    pub aux: Vec<u16>,
}

impl FrameFields {
    /// Reading values ordered by ascending id; ties keep arrival order
    pub fn ordered_values(&self) -> Vec<u32> {
        let mut pixels = self.pixels.clone();
        pixels.sort_by_key(|pixel| pixel.id);
        pixels.into_iter().map(|pixel| pixel.value).collect()
    }
}

/// Decodes a payload according to `layout`
pub fn unpack(payload: &[u8], layout: &FrameLayout) -> Result<FrameFields> {
    let needed = layout.min_payload_len();
    if payload.len() < needed {
        return Err(Error::TruncatedFrame {
            len: payload.len(),
            needed,
        });
    }

    let sequence = (&payload[..4]).get_u32();

    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&payload[layout.tag_range()]);

    let mut entries = &payload[layout.pixel_range()];
    let pixels = (0..layout.pixel_count)
        .map(|_| PixelReading {
            id: entries.get_u8(),
            value: entries.get_uint(3) as u32,
        })
        .collect();

    let mut words = &payload[layout.aux_range()];
    let aux = (0..layout.aux_words()).map(|_| words.get_u16()).collect();

    Ok(FrameFields {
        sequence,
        tag,
        pixels,
        aux,
    })
}

/// Orders raw payload entries (id byte + 3-byte value) by id and returns
/// the values. A trailing partial entry is ignored.
pub fn order_pixels(entries: &[u8]) -> Vec<u32> {
    let fields = FrameFields {
        sequence: 0,
        tag: [0; TAG_LEN],
        pixels: entries
            .chunks_exact(PIXEL_ENTRY_LEN)
            .map(|mut entry| PixelReading {
                id: entry.get_u8(),
                value: entry.get_uint(3) as u32,
            })
            .collect(),
        aux: Vec::new(),
    };
    fields.ordered_values()
}

/// Packs decoded fields behind a session id, every field widened to 4 bytes.
/// The result is not padded.
pub fn pack_record(session: u32, fields: &FrameFields) -> Vec<u8> {
    let values = fields.ordered_values();
    let count = 2 + fields.tag.len() + values.len() + fields.aux.len();
    let mut record = Vec::with_capacity(count * RECORD_FIELD_LEN);

    record.put_u32(session);
    record.put_u32(fields.sequence);
    for &byte in &fields.tag {
        record.put_u32(u32::from(byte));
    }
    for value in values {
        record.put_u32(value);
    }
    for &word in &fields.aux {
        record.put_u32(u32::from(word));
    }
    record
}

/// Writes validated frames as fixed-size canonical records.
///
/// The reformatter is the sole owner of the output handle. Every record is
/// handed to the sink with a single `write_all` followed by `flush`, so an
/// I/O failure is reported against the frame that caused it.
#[derive(Debug)]
pub struct FrameReformatter<W: Write = File> {
    out: Option<W>,
    layout: FrameLayout,
    record_size: usize,
    written: u64,
    span: Span,
}

impl FrameReformatter<File> {
    /// Creates (or truncates) the output file
    pub fn create(path: impl AsRef<Path>, config: &CaptureConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::file_open(path, e))?;
        Ok(Self::new(file, config))
    }
}

impl<W: Write> FrameReformatter<W> {
    /// Wraps an output sink
    pub fn new(out: W, config: &CaptureConfig) -> Self {
        Self {
            out: Some(out),
            layout: config.layout,
            record_size: config.record_size,
            written: 0,
            span: tracing::debug_span!("frame_reformatter"),
        }
    }

    /// Attaches the logging context events are emitted under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Number of records written so far
    pub fn records_written(&self) -> u64 {
        self.written
    }

    /// Builds the padded record for a validated payload
    pub fn reformat(&self, payload: &[u8], session: usize) -> Result<Vec<u8>> {
        let fields = unpack(payload, &self.layout)?;
        let mut record = pack_record(session as u32, &fields);

        if record.len() > self.record_size {
            return Err(Error::RecordTooLarge {
                sequence: fields.sequence,
                len: record.len(),
                limit: self.record_size,
            });
        }
        record.resize(self.record_size, 0);
        Ok(record)
    }

    /// Reformats and emits one frame.
    ///
    /// Failures are logged with the frame's sequence id and returned; they
    /// are all recoverable, the next frame can still be written.
    pub fn write(&mut self, payload: &[u8], session: usize) -> Result<()> {
        let result = self.try_write(payload, session);
        if let Err(ref err) = result {
            let sequence = read_sequence(payload).unwrap_or_default();
            error!(parent: &self.span, sequence, session, "dropping frame: {}", err);
        }
        result
    }

    fn try_write(&mut self, payload: &[u8], session: usize) -> Result<()> {
        let sequence = read_sequence(payload).unwrap_or_default();
        if self.out.is_none() {
            return Err(Error::WriterClosed { sequence });
        }

        let record = self.reformat(payload, session)?;
        let out = self.out.as_mut().ok_or(Error::WriterClosed { sequence })?;
        out.write_all(&record)
            .and_then(|()| out.flush())
            .map_err(|e| Error::file_write(sequence, e))?;

        self.written += 1;
        trace!(parent: &self.span, sequence, session, "wrote record");
        Ok(())
    }

    /// Flushes and releases the output. Later writes fail with
    /// [`Error::WriterClosed`].
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush().map_err(|source| Error::OutputFlush { source })?;
            debug!(parent: &self.span, records = self.written, "output closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(sequence: u32) -> Vec<u8> {
        let config = CaptureConfig::default();
        let mut payload = vec![0u8; config.payload_len()];
        payload[..4].copy_from_slice(&sequence.to_be_bytes());
        payload[4..20].fill(0x0F);
        // ids in reverse order so sorting is observable
        for (i, entry) in payload[36..804].chunks_mut(4).enumerate() {
            let id = 191 - i as u8;
            entry.copy_from_slice(&[id, 0x00, 0x01, id]);
        }
        for (i, b) in payload[820..860].iter_mut().enumerate() {
            *b = i as u8;
        }
        payload
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_order_pixels() {
        let raw = [
            0x01, 0x84, 0x15, 0x8a, //
            0x00, 0xf2, 0xa5, 0xcf, //
            0x02, 0xd8, 0xaa, 0x10,
        ];
        assert_eq!(order_pixels(&raw), vec![0xf2a5cf, 0x84158a, 0xd8aa10]);
    }

    #[test]
    fn test_order_pixels_is_stable() {
        let raw = [0x01, 0, 0, 1, 0x00, 0, 0, 2, 0x01, 0, 0, 3];
        assert_eq!(order_pixels(&raw), vec![2, 1, 3]);
    }

    #[test]
    fn test_unpack_fields() {
        let fields = unpack(&payload(9), &FrameLayout::default()).unwrap();
        assert_eq!(fields.sequence, 9);
        assert_eq!(fields.tag, [0x0F; 16]);
        assert_eq!(fields.pixels.len(), 192);
        assert_eq!(
            fields.pixels[0],
            PixelReading {
                id: 191,
                value: 0x0001BF
            }
        );
        assert_eq!(fields.aux.len(), 20);
        assert_eq!(fields.aux[0], 0x0001);
        assert_eq!(fields.aux[19], 0x2627);
    }

    #[test]
    fn test_unpack_truncated() {
        let err = unpack(&[0u8; 100], &FrameLayout::default()).unwrap_err();
        assert!(matches!(err, Error::TruncatedFrame { len: 100, needed: 860 }));
    }

    #[test]
    fn test_reformat_layout() {
        let config = CaptureConfig::default();
        let reformatter = FrameReformatter::new(Vec::<u8>::new(), &config);
        let record = reformatter.reformat(&payload(9), 3).unwrap();

        assert_eq!(record.len(), 1024);
        assert_eq!(&record[0..4], &[0, 0, 0, 3]);
        assert_eq!(&record[4..8], &[0, 0, 0, 9]);
        assert_eq!(&record[8..12], &[0, 0, 0, 0x0F]);
        // reading with id 5 lands in slot 5
        assert_eq!(&record[72 + 5 * 4..72 + 6 * 4], &[0, 0, 0x01, 5]);
        assert_eq!(&record[840..844], &[0, 0, 0x00, 0x01]);
        assert!(record[920..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_record_dropped() {
        let config = CaptureConfig::default().record_size(512);
        let mut reformatter = FrameReformatter::new(Vec::<u8>::new(), &config);

        let err = reformatter.write(&payload(4), 0).unwrap_err();
        assert!(matches!(
            err,
            Error::RecordTooLarge {
                sequence: 4,
                len: 920,
                limit: 512
            }
        ));
        assert!(err.is_recoverable());
        assert_eq!(reformatter.records_written(), 0);
    }

    #[test]
    fn test_write_and_close() {
        let config = CaptureConfig::default();
        let mut reformatter = FrameReformatter::new(Vec::<u8>::new(), &config);
        reformatter.write(&payload(1), 0).unwrap();
        reformatter.write(&payload(2), 0).unwrap();
        assert_eq!(reformatter.records_written(), 2);

        reformatter.close().unwrap();
        let err = reformatter.write(&payload(3), 0).unwrap_err();
        assert!(matches!(err, Error::WriterClosed { sequence: 3 }));
        assert!(reformatter.close().is_ok());
    }

    #[test]
    fn test_write_failure_is_recoverable() {
        let config = CaptureConfig::default();
        let mut reformatter = FrameReformatter::new(FailingWriter, &config);
        let err = reformatter.write(&payload(6), 1).unwrap_err();
        assert!(matches!(err, Error::FileWrite { sequence: 6, .. }));
        assert!(err.is_recoverable());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_full_device_fails_per_record() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let config = CaptureConfig::default();
        let mut reformatter = FrameReformatter::create(full, &config).unwrap();

        let err = reformatter.write(&payload(7), 0).unwrap_err();
        assert!(matches!(err, Error::FileWrite { sequence: 7, .. }));
        assert!(err.is_recoverable());
        assert_eq!(reformatter.records_written(), 0);

        let err = reformatter.write(&payload(8), 0).unwrap_err();
        assert!(matches!(err, Error::FileWrite { sequence: 8, .. }));
        assert!(reformatter.close().is_ok());
    }

    #[test]
    fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let config = CaptureConfig::default();

        let mut reformatter = FrameReformatter::create(&path, &config).unwrap();
        reformatter.write(&payload(1), 2).unwrap();
        reformatter.close().unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, reformatter.reformat(&payload(1), 2).unwrap());
    }
}
