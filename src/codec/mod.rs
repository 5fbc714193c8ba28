//! Chunked, resumable inflate/deflate engine
//!
//! This module provides [`StreamCodec`], a session over a single file handle that turns
//! arbitrary-length text into bounded-size compression and decompression steps.
//!
//! A session works on two fixed-size buffers. When inflating, compressed bytes are pulled
//! from the underlying reader into the input buffer and each inflate step produces at most
//! one output buffer of decoded text. Lines are cut out of the output buffer by an offset
//! cursor; only the suffix of a line that spans a buffer boundary is ever moved.
//!
//! When deflating, the caller's text is fed to the engine directly and the output buffer is
//! flushed to the writer every time it fills.
//!
//! The file handle itself is never owned by the session. It is passed to every call so that
//! the owner of the handle decides when it is closed, which must happen after [`StreamCodec::teardown`].
//!
//! # Example
//!
//! ```rust
//! use readmux::codec::{Direction, Framing, LineStatus, StreamCodec};
//!
//! let mut compressed = Vec::new();
//! let mut encoder = StreamCodec::new(Framing::Gzip, Direction::Deflate);
//! encoder.deflate_chunk(b"first\n", &mut compressed, false).unwrap();
//! encoder.deflate_chunk(b"second\n", &mut compressed, true).unwrap();
//! encoder.teardown();
//!
//! let mut decoder = StreamCodec::new(Framing::Gzip, Direction::Inflate);
//! let mut reader = compressed.as_slice();
//! let mut line = Vec::new();
//! assert_eq!(decoder.getline(&mut reader, &mut line).unwrap(), LineStatus::Line);
//! assert_eq!(line, b"first");
//! ```

use std::io::{ErrorKind, Read, Write};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{CodecError, Result};

/// Large buffer size class (32 KiB)
pub const SIZE_32: usize = 32 * 1024;

/// Small buffer size class (16 KiB)
pub const SIZE_16: usize = 16 * 1024;

/// zlib window size used for both gzip and raw streams
const WINDOW_BITS: u8 = 15;

/// Number of payload bytes reported alongside a deflate failure
const PAYLOAD_CONTEXT: usize = 64;

/// Framing of the compressed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// gzip header, deflate stream and trailer
    Gzip,
    /// Raw deflate stream without header or trailer
    Raw,
}

/// Direction of a codec session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Decompress an input stream
    Inflate,
    /// Compress an output stream
    Deflate,
}
impl Direction {
    fn name(self) -> &'static str {
        match self {
            Self::Inflate => "inflate",
            Self::Deflate => "deflate",
        }
    }
}

/// Outcome of [`StreamCodec::getline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A line was produced
    Line,
    /// The stream is exhausted and no bytes remain
    End,
}

/// Outcome of [`StreamCodec::deflate_chunk`]
///
/// These mirror the engine's own outcomes. Every other engine result is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeflateStatus {
    /// All input was consumed
    Ok,
    /// The engine holds data that will be emitted by a later call
    Pending,
    /// The logical stream was finished
    StreamEnd,
}

enum Engine {
    Inflate(Decompress),
    Deflate(Compress),
}
impl Engine {
    fn new(framing: Framing, direction: Direction) -> Self {
        match direction {
            Direction::Inflate => Self::Inflate(new_decompress(framing)),
            Direction::Deflate => Self::Deflate(match framing {
                Framing::Gzip => Compress::new_gzip(Compression::default(), WINDOW_BITS),
                Framing::Raw => Compress::new(Compression::default(), false),
            }),
        }
    }
}

fn new_decompress(framing: Framing) -> Decompress {
    match framing {
        Framing::Gzip => Decompress::new_gzip(WINDOW_BITS),
        Framing::Raw => Decompress::new(false),
    }
}

/// A chunked, resumable inflate/deflate session
///
/// The session owns its engine state and its two buffers. The engine state is acquired by
/// [`init`](Self::init) (called by the constructors) and released by [`teardown`](Self::teardown).
pub struct StreamCodec {
    /// Stream framing
    framing: Framing,

    /// Direction of the current session
    direction: Direction,

    /// Engine state, `None` once torn down
    engine: Option<Engine>,

    /// Compressed input buffer (inflate only)
    in_buf: Vec<u8>,
    /// Start of the unconsumed compressed bytes
    in_pos: usize,
    /// End of the valid compressed bytes
    in_len: usize,
    /// The reader returned end-of-file
    in_eof: bool,

    /// Decoded (inflate) or encoded (deflate) output buffer
    out_buf: Vec<u8>,
    /// Start of the most recent line not yet handed out
    line_start: usize,
    /// End of the valid decoded bytes
    out_len: usize,

    /// A stream member has started but not reached its end
    member_open: bool,
    /// The last member ended; the engine must be reset before more input is fed
    needs_reset: bool,
    /// Total compressed bytes consumed by this session
    consumed: u64,
}
impl StreamCodec {
    /// Creates a session with the default buffer sizes and initializes its engine
    ///
    /// Inflate sessions use a 16 KiB input buffer and a 32 KiB output buffer.
    /// Deflate sessions only need an output buffer, which is 16 KiB.
    #[must_use]
    pub fn new(framing: Framing, direction: Direction) -> Self {
        match direction {
            Direction::Inflate => Self::with_buffer_sizes(framing, direction, SIZE_16, SIZE_32),
            Direction::Deflate => Self::with_buffer_sizes(framing, direction, 0, SIZE_16),
        }
    }

    /// Creates a session with explicit buffer sizes and initializes its engine
    ///
    /// # Panics
    ///
    /// Panics if `out_size` is zero, or if `in_size` is zero for an inflate session.
    #[must_use]
    pub fn with_buffer_sizes(
        framing: Framing,
        direction: Direction,
        in_size: usize,
        out_size: usize,
    ) -> Self {
        assert!(out_size > 0, "output buffer must not be empty");
        assert!(
            direction == Direction::Deflate || in_size > 0,
            "input buffer must not be empty"
        );
        let mut codec = Self {
            framing,
            direction,
            engine: None,
            in_buf: vec![0; in_size],
            in_pos: 0,
            in_len: 0,
            in_eof: false,
            out_buf: vec![0; out_size],
            line_start: 0,
            out_len: 0,
            member_open: false,
            needs_reset: false,
            consumed: 0,
        };
        codec.init(direction);
        codec
    }

    /// (Re)initializes the engine state and clears all cursors
    pub fn init(&mut self, direction: Direction) {
        self.direction = direction;
        self.engine = Some(Engine::new(self.framing, direction));
        self.in_pos = 0;
        self.in_len = 0;
        self.in_eof = false;
        self.line_start = 0;
        self.out_len = 0;
        self.member_open = false;
        self.needs_reset = false;
        self.consumed = 0;
    }

    /// Releases the engine state
    ///
    /// Must be called before the file handle the session works on is closed.
    /// Calling it on a session that is already torn down does nothing.
    pub fn teardown(&mut self) {
        self.engine = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Reads the next newline-terminated line from a compressed stream
    ///
    /// The terminator is not included in `line`, which is cleared first. A final line
    /// without terminator is still returned as [`LineStatus::Line`]. Lines of any length
    /// are supported; the parts that do not fit the output buffer are collected in `line`.
    ///
    /// Concatenated gzip members are read as a single stream.
    pub fn getline<R: Read>(&mut self, reader: &mut R, line: &mut Vec<u8>) -> Result<LineStatus> {
        line.clear();
        loop {
            if let Some(pos) = memchr::memchr(b'\n', &self.out_buf[self.line_start..self.out_len])
            {
                let end = self.line_start + pos;
                line.extend_from_slice(&self.out_buf[self.line_start..end]);
                self.line_start = end + 1;
                return Ok(LineStatus::Line);
            }
            self.slide(line);
            if !self.fill(reader)? {
                line.extend_from_slice(&self.out_buf[..self.out_len]);
                self.out_len = 0;
                return Ok(if line.is_empty() {
                    LineStatus::End
                } else {
                    LineStatus::Line
                });
            }
        }
    }

    /// Appends the next block of decoded bytes to `buf`
    ///
    /// Returns the number of bytes appended, zero at the end of the stream.
    pub fn inflate_into<R: Read>(&mut self, reader: &mut R, buf: &mut Vec<u8>) -> Result<usize> {
        if self.line_start == self.out_len {
            self.line_start = 0;
            self.out_len = 0;
            if !self.fill(reader)? {
                return Ok(0);
            }
        }
        let n = self.out_len - self.line_start;
        buf.extend_from_slice(&self.out_buf[self.line_start..self.out_len]);
        self.line_start = self.out_len;
        Ok(n)
    }

    /// Moves the partial line at the cursor to the start of the output buffer
    ///
    /// A partial line that occupies the whole buffer is moved into `line` instead.
    fn slide(&mut self, line: &mut Vec<u8>) {
        let remaining = self.out_len - self.line_start;
        if remaining == self.out_buf.len() {
            line.extend_from_slice(&self.out_buf);
            self.out_len = 0;
        } else if self.line_start > 0 {
            self.out_buf.copy_within(self.line_start..self.out_len, 0);
            self.out_len = remaining;
        }
        self.line_start = 0;
    }

    /// Runs inflate steps until at least one decoded byte is appended to the output buffer
    ///
    /// Returns `false` once the compressed input is exhausted and the last member ended.
    fn fill<R: Read>(&mut self, reader: &mut R) -> Result<bool> {
        let engine = match &mut self.engine {
            Some(Engine::Inflate(engine)) => engine,
            Some(Engine::Deflate(_)) => {
                return Err(CodecError::WrongDirection(self.direction.name()).into())
            }
            None => return Err(CodecError::NotInitialized.into()),
        };
        debug_assert!(self.out_len < self.out_buf.len());

        loop {
            if self.in_pos == self.in_len && !self.in_eof {
                self.in_len = read_some(reader, &mut self.in_buf)?;
                self.in_pos = 0;
                self.in_eof = self.in_len == 0;
            }
            if self.in_pos == self.in_len {
                if self.member_open {
                    return Err(CodecError::Truncated(self.consumed).into());
                }
                return Ok(false);
            }
            if self.needs_reset {
                *engine = new_decompress(self.framing);
                self.needs_reset = false;
            }
            self.member_open = true;

            let (before_in, before_out) = (engine.total_in(), engine.total_out());
            let status = engine
                .decompress(
                    &self.in_buf[self.in_pos..self.in_len],
                    &mut self.out_buf[self.out_len..],
                    FlushDecompress::None,
                )
                .map_err(CodecError::from)?;
            let consumed = (engine.total_in() - before_in) as usize;
            let produced = (engine.total_out() - before_out) as usize;
            self.in_pos += consumed;
            self.out_len += produced;
            self.consumed += consumed as u64;

            if status == Status::StreamEnd {
                self.member_open = false;
                self.needs_reset = true;
            }
            if produced > 0 {
                return Ok(true);
            }
            if consumed == 0 && status == Status::BufError && self.in_pos < self.in_len {
                // the engine refuses input it has room for
                return Err(CodecError::Truncated(self.consumed).into());
            }
        }
    }

    /// Feeds `text` to the deflate engine, writing every filled output buffer to `writer`
    ///
    /// When `is_last` is set the stream is finished: all pending data and the stream trailer
    /// are written before returning [`DeflateStatus::StreamEnd`].
    pub fn deflate_chunk<W: Write>(
        &mut self,
        text: &[u8],
        writer: &mut W,
        is_last: bool,
    ) -> Result<DeflateStatus> {
        let engine = match &mut self.engine {
            Some(Engine::Deflate(engine)) => engine,
            Some(Engine::Inflate(_)) => {
                return Err(CodecError::WrongDirection(self.direction.name()).into())
            }
            None => return Err(CodecError::NotInitialized.into()),
        };
        let flush = if is_last {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };

        let mut input = text;
        loop {
            let (before_in, before_out) = (engine.total_in(), engine.total_out());
            let status = engine
                .compress(input, &mut self.out_buf, flush)
                .map_err(|source| CodecError::Deflate {
                    source,
                    payload: payload_context(text),
                })?;
            let consumed = (engine.total_in() - before_in) as usize;
            let produced = (engine.total_out() - before_out) as usize;
            input = &input[consumed..];
            if produced > 0 {
                writer.write_all(&self.out_buf[..produced])?;
            }

            match status {
                Status::StreamEnd => return Ok(DeflateStatus::StreamEnd),
                Status::BufError if consumed == 0 && produced == 0 => {
                    return Ok(DeflateStatus::Pending)
                }
                Status::Ok | Status::BufError if input.is_empty() && !is_last => {
                    return Ok(if status == Status::Ok {
                        DeflateStatus::Ok
                    } else {
                        DeflateStatus::Pending
                    })
                }
                Status::Ok | Status::BufError => {}
            }
        }
    }

    /// Finishes the deflate stream, writing the remaining bytes and trailer to `writer`
    pub fn finish<W: Write>(&mut self, writer: &mut W) -> Result<DeflateStatus> {
        self.deflate_chunk(&[], writer, true)
    }
}

/// Reads into `buf`, retrying on interruption
fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn payload_context(text: &[u8]) -> String {
    String::from_utf8_lossy(&text[..text.len().min(PAYLOAD_CONTEXT)]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use std::io::Read;

    fn deflate_all(framing: Framing, data: &[u8], chunk: usize) -> Result<Vec<u8>> {
        let mut codec = StreamCodec::new(framing, Direction::Deflate);
        let mut out = Vec::new();
        for piece in data.chunks(chunk) {
            codec.deflate_chunk(piece, &mut out, false)?;
        }
        assert_eq!(codec.finish(&mut out)?, DeflateStatus::StreamEnd);
        codec.teardown();
        Ok(out)
    }

    fn inflate_all(framing: Framing, data: &[u8]) -> Result<Vec<u8>> {
        let mut codec = StreamCodec::new(framing, Direction::Inflate);
        let mut reader = data;
        let mut out = Vec::new();
        while codec.inflate_into(&mut reader, &mut out)? > 0 {}
        Ok(out)
    }

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut buf = vec![0u8; len];
        rng.fill(&mut buf[..]);
        buf
    }

    #[test]
    fn test_round_trip_sizes() -> Result<()> {
        for framing in [Framing::Gzip, Framing::Raw] {
            for (len, chunk) in [(0, 1), (1, 1), (1000, 7), (70_000, 4096), (200_000, 65_536)] {
                let data = random_bytes(len, len as u64);
                let compressed = deflate_all(framing, &data, chunk)?;
                assert_eq!(inflate_all(framing, &compressed)?, data, "len={len}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_gzip_output_is_standard() -> Result<()> {
        let data = b"@read1\nACGT\n+\nIIII\n".repeat(5000);
        let compressed = deflate_all(Framing::Gzip, &data, 333)?;
        let mut decoded = Vec::new();
        flate2::read::MultiGzDecoder::new(compressed.as_slice()).read_to_end(&mut decoded)?;
        assert_eq!(decoded, data);
        Ok(())
    }

    #[test]
    fn test_reads_standard_gzip() -> Result<()> {
        let data = b"line one\nline two\n".repeat(100);
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(&data)?;
        let compressed = encoder.finish()?;
        assert_eq!(inflate_all(Framing::Gzip, &compressed)?, data);
        Ok(())
    }

    fn collect_lines(codec: &mut StreamCodec, compressed: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut reader = compressed;
        let mut line = Vec::new();
        let mut lines = Vec::new();
        while codec.getline(&mut reader, &mut line)? == LineStatus::Line {
            lines.push(line.clone());
        }
        // stays at end
        assert_eq!(codec.getline(&mut reader, &mut line)?, LineStatus::End);
        Ok(lines)
    }

    #[test]
    fn test_getline_reconstructs_text() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut text = Vec::new();
        let n = 500;
        for i in 0..n {
            let len = if i % 50 == 0 { 300 } else { rng.random_range(0..40) };
            text.extend((0..len).map(|_| b"ACGT"[rng.random_range(0..4)]));
            text.push(b'\n');
        }
        let compressed = deflate_all(Framing::Gzip, &text, 1024)?;

        // tiny output buffer so that some lines are longer than the buffer
        for out_size in [8, 64, SIZE_32] {
            let mut codec =
                StreamCodec::with_buffer_sizes(Framing::Gzip, Direction::Inflate, 16, out_size);
            let lines = collect_lines(&mut codec, &compressed)?;
            assert_eq!(lines.len(), n);
            let mut rebuilt = Vec::new();
            for l in &lines {
                rebuilt.extend_from_slice(l);
                rebuilt.push(b'\n');
            }
            assert_eq!(rebuilt, text, "out_size={out_size}");
        }
        Ok(())
    }

    #[test]
    fn test_getline_unterminated_last_line() -> Result<()> {
        let compressed = deflate_all(Framing::Gzip, b"a\n\nbc", 2)?;
        let mut codec = StreamCodec::new(Framing::Gzip, Direction::Inflate);
        let lines = collect_lines(&mut codec, &compressed)?;
        assert_eq!(lines, vec![b"a".to_vec(), Vec::new(), b"bc".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_getline_concatenated_members() -> Result<()> {
        let mut compressed = deflate_all(Framing::Gzip, b"one\ntwo\n", 3)?;
        compressed.extend(deflate_all(Framing::Gzip, b"", 1)?);
        compressed.extend(deflate_all(Framing::Gzip, b"three\n", 3)?);
        let mut codec = StreamCodec::new(Framing::Gzip, Direction::Inflate);
        let lines = collect_lines(&mut codec, &compressed)?;
        assert_eq!(
            lines,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        let garbage = b"this is not a gzip stream at all\n".repeat(4);
        let mut codec = StreamCodec::new(Framing::Gzip, Direction::Inflate);
        let mut line = Vec::new();
        let result = codec.getline(&mut garbage.as_slice(), &mut line);
        assert!(matches!(
            result,
            Err(Error::CodecError(CodecError::Inflate(_)))
        ));
    }

    #[test]
    fn test_truncated_input_is_an_error() -> Result<()> {
        let data = random_bytes(50_000, 3);
        let compressed = deflate_all(Framing::Gzip, &data, 1000)?;
        let cut = &compressed[..compressed.len() / 2];
        let result = inflate_all(Framing::Gzip, cut);
        assert!(matches!(
            result,
            Err(Error::CodecError(CodecError::Truncated(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut codec = StreamCodec::new(Framing::Gzip, Direction::Deflate);
        assert!(codec.is_initialized());
        codec.teardown();
        codec.teardown();
        assert!(!codec.is_initialized());
        let mut sink = Vec::new();
        assert!(matches!(
            codec.deflate_chunk(b"x", &mut sink, false),
            Err(Error::CodecError(CodecError::NotInitialized))
        ));

        // init brings the session back
        codec.init(Direction::Deflate);
        assert!(codec.deflate_chunk(b"x", &mut sink, true).is_ok());
    }

    #[test]
    fn test_wrong_direction() {
        let mut codec = StreamCodec::new(Framing::Raw, Direction::Inflate);
        let mut sink = Vec::new();
        assert!(matches!(
            codec.deflate_chunk(b"x", &mut sink, false),
            Err(Error::CodecError(CodecError::WrongDirection("inflate")))
        ));
    }

    #[test]
    fn test_deflate_status_outcomes() -> Result<()> {
        let mut codec = StreamCodec::new(Framing::Gzip, Direction::Deflate);
        let mut sink = Vec::new();
        let status = codec.deflate_chunk(b"ACGT\n", &mut sink, false)?;
        assert!(matches!(status, DeflateStatus::Ok | DeflateStatus::Pending));
        assert_eq!(codec.finish(&mut sink)?, DeflateStatus::StreamEnd);
        Ok(())
    }
}
