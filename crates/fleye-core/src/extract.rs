//! Two-pass extraction driver.
//!
//! Pass 1 walks the whole capture to find the session chain. The reader is
//! then rewound and pass 2 splits every chunk into candidate frames,
//! validates them and writes accepted frames tagged with their session id.
//! The output is only created once pass 1 found at least one session.

use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use crate::reader::ChunkReader;
use crate::reformat::FrameReformatter;
use crate::session::{get_run_id, Session, SessionDetector};
use crate::splitter::split;
use crate::validator::FrameValidator;
use std::io::{Read, Seek, Write};
use std::path::Path;
use tracing::{debug, error, info, trace, Span};

/// Counters collected over one extraction run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Session chain found by discovery
    pub sessions: Vec<Session>,
    /// Chunks read during extraction
    pub chunks: u64,
    /// Header/footer delimited frames found, duplicates included
    pub candidates: u64,
    /// Frames seen a second time through chunk overlap
    pub duplicates: u64,
    /// Frames not fully inside any session
    pub outside_session: u64,
    /// Frames dropped by structural validation
    pub rejected: u64,
    /// Advisory findings on accepted frames
    pub advisories: u64,
    /// Records written
    pub written: u64,
    /// Accepted frames that could not be written, plus a failed final flush
    pub write_failures: u64,
}

/// Drives discovery and extraction over one capture
#[derive(Debug, Clone)]
pub struct Extractor {
    config: CaptureConfig,
    span: Span,
}

impl Extractor {
    /// Creates an extractor, rejecting inconsistent configurations
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            span: tracing::info_span!("extract"),
        })
    }

    /// Attaches the logging context events are emitted under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The configuration in use
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Runs discovery only and returns the session chain
    pub fn detect(&self, input: impl AsRef<Path>) -> Result<Vec<Session>> {
        let mut reader = self.open_reader(input.as_ref())?;
        let sessions = self.detector().detect(&mut reader)?;
        reader.close();
        Ok(sessions)
    }

    /// Extracts `input` into `output`.
    ///
    /// Fails before touching `output` if the input cannot be opened or holds
    /// no valid session. Output write failures are counted in the summary
    /// and never abort the run.
    pub fn run(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<ExtractionSummary> {
        let input = input.as_ref();
        let output = output.as_ref();
        info!(parent: &self.span, input = %input.display(), output = %output.display(), "starting extraction");

        let mut reader = self.open_reader(input)?;
        self.process(&mut reader, || FrameReformatter::create(output, &self.config))
    }

    /// Extracts from an in-memory or otherwise already open source
    pub fn run_streams<R, W>(&self, input: R, output: W) -> Result<ExtractionSummary>
    where
        R: Read + Seek,
        W: Write,
    {
        let mut reader = ChunkReader::from_reader(input, self.config.block_size, self.config.chunk)?
            .with_span(self.child_span("chunk_reader"));
        self.process(&mut reader, || Ok(FrameReformatter::new(output, &self.config)))
    }

    fn open_reader(&self, input: &Path) -> Result<ChunkReader> {
        Ok(
            ChunkReader::open(input, self.config.block_size, self.config.chunk)?
                .with_span(self.child_span("chunk_reader")),
        )
    }

    fn detector(&self) -> SessionDetector {
        SessionDetector::new(self.config.run_start.clone(), self.config.run_end.clone())
            .with_span(self.child_span("session_detector"))
    }

    fn child_span(&self, name: &'static str) -> Span {
        tracing::debug_span!(parent: &self.span, "component", kind = name)
    }

    fn process<R, W, F>(&self, reader: &mut ChunkReader<R>, open_output: F) -> Result<ExtractionSummary>
    where
        R: Read + Seek,
        W: Write,
        F: FnOnce() -> Result<FrameReformatter<W>>,
    {
        let sessions = self.detector().detect(reader)?;
        if sessions.is_empty() {
            return Err(Error::NoValidSession);
        }
        debug!(parent: &self.span, sessions = sessions.len(), "discovery pass complete");

        reader.rewind()?;
        let mut reformatter = open_output()?.with_span(self.child_span("frame_reformatter"));
        let mut validator =
            FrameValidator::new(&self.config).with_span(self.child_span("frame_validator"));

        let header = self.config.header.as_bytes();
        let footer = self.config.footer.as_bytes();
        let frame_length = self.config.frame_length;

        let mut summary = ExtractionSummary::default();
        let mut last_offset: Option<u64> = None;

        loop {
            let chunk = reader.next_chunk()?;
            summary.chunks += 1;

            for frame in split(&chunk.data, chunk.offset, header, footer) {
                summary.candidates += 1;

                // Offsets grow monotonically; anything at or before the last
                // handled frame came back through the overlap.
                if last_offset.is_some_and(|last| frame.offset <= last) {
                    summary.duplicates += 1;
                    continue;
                }
                last_offset = Some(frame.offset);

                let session = get_run_id(&sessions, frame.offset)
                    .filter(|&id| sessions[id].contains_frame(frame.offset, frame_length));
                let Some(session) = session else {
                    trace!(parent: &self.span, offset = frame.offset, "frame outside sessions");
                    summary.outside_session += 1;
                    continue;
                };

                let verdict = validator.inspect(&frame.payload, chunk.id, frame.offset, session);
                summary.advisories += verdict.advisories.len() as u64;
                if !verdict.is_accepted() {
                    summary.rejected += 1;
                    continue;
                }

                match reformatter.write(&frame.payload, session) {
                    Ok(()) => summary.written += 1,
                    Err(err) if err.is_recoverable() => summary.write_failures += 1,
                    Err(err) => return Err(err),
                }
            }

            if chunk.is_end() {
                break;
            }
        }

        if let Err(err) = reformatter.close() {
            error!(parent: &self.span, "closing output: {}", err);
            summary.write_failures += 1;
        }
        reader.close();

        summary.sessions = sessions;
        info!(
            parent: &self.span,
            sessions = summary.sessions.len(),
            candidates = summary.candidates,
            duplicates = summary.duplicates,
            outside = summary.outside_session,
            rejected = summary.rejected,
            advisories = summary.advisories,
            written = summary.written,
            failed = summary.write_failures,
            "extraction complete"
        );
        Ok(summary)
    }
}
