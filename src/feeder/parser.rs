use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::{
    codec::{Direction, Framing, LineStatus, StreamCodec},
    error::FeedError,
    record::Record,
    Result,
};

/// gzip magic bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A source of text lines, decoding gzip input on the fly
///
/// The encoding is sniffed from the first bytes of the stream, so a gzip file is recognised
/// regardless of its name.
pub enum LineSource<R: BufRead> {
    Plain(R),
    Gzip { reader: R, codec: StreamCodec },
}
impl LineSource<BufReader<File>> {
    /// Opens `path` for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| FeedError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(BufReader::new(file))
    }
}
impl<R: BufRead> LineSource<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
        Ok(if is_gzip {
            Self::Gzip {
                reader,
                codec: StreamCodec::new(Framing::Gzip, Direction::Inflate),
            }
        } else {
            Self::Plain(reader)
        })
    }

    pub fn is_gzip(&self) -> bool {
        matches!(self, Self::Gzip { .. })
    }

    /// Reads the next line into `line` without its terminator
    ///
    /// Returns `false` at the end of the stream.
    pub fn next_line(&mut self, line: &mut Vec<u8>) -> Result<bool> {
        let more = match self {
            Self::Plain(reader) => {
                line.clear();
                if reader.read_until(b'\n', line)? == 0 {
                    false
                } else {
                    if line.last() == Some(&b'\n') {
                        line.pop();
                    }
                    true
                }
            }
            Self::Gzip { reader, codec } => codec.getline(reader, line)? == LineStatus::Line,
        };
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(more)
    }
}
impl<R: BufRead> Drop for LineSource<R> {
    fn drop(&mut self) {
        if let Self::Gzip { codec, .. } = self {
            codec.teardown();
        }
    }
}

/// Decodes FASTA and FASTQ records from a [`LineSource`]
///
/// FASTA sequences may be wrapped over several lines. FASTQ records must use the four line
/// layout. Both formats may be mixed within a stream and blank lines between records are
/// ignored. Records are numbered from zero in file order.
pub struct RecordParser<R: BufRead> {
    source: LineSource<R>,
    /// Input path, used for diagnostics
    path: PathBuf,
    /// Index of the input file within the run
    readfile_idx: usize,
    /// Number of records decoded so far
    read_num: u64,
    /// Current 1-based line number
    line_no: usize,
    line: Vec<u8>,
    /// FASTA header read ahead while collecting the previous sequence
    pending: Option<Vec<u8>>,
}
impl RecordParser<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, readfile_idx: usize) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::new(LineSource::open(path)?, path, readfile_idx))
    }
}
impl<R: BufRead> RecordParser<R> {
    pub fn new<P: AsRef<Path>>(source: LineSource<R>, path: P, readfile_idx: usize) -> Self {
        Self {
            source,
            path: path.as_ref().to_path_buf(),
            readfile_idx,
            read_num: 0,
            line_no: 0,
            line: Vec::with_capacity(256),
            pending: None,
        }
    }

    /// Number of records decoded so far
    pub fn read_count(&self) -> u64 {
        self.read_num
    }

    pub fn is_gzip(&self) -> bool {
        self.source.is_gzip()
    }

    fn advance(&mut self) -> Result<bool> {
        let more = self.source.next_line(&mut self.line)?;
        if more {
            self.line_no += 1;
        }
        Ok(more)
    }

    fn malformed(&self, reason: &'static str) -> crate::Error {
        FeedError::Malformed {
            path: self.path.clone(),
            line: self.line_no,
            reason,
        }
        .into()
    }

    /// Reads the next line of a FASTQ record, failing at the end of the stream
    fn require_line(&mut self, reason: &'static str) -> Result<()> {
        if self.advance()? {
            Ok(())
        } else {
            Err(self.malformed(reason))
        }
    }

    /// Decodes the next record, or returns `None` at the end of the stream
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => loop {
                if !self.advance()? {
                    return Ok(None);
                }
                if !self.line.is_empty() {
                    break std::mem::take(&mut self.line);
                }
            },
        };

        let record = match header.first() {
            Some(b'>') => self.read_fasta(&header[1..])?,
            Some(b'@') => self.read_fastq(&header[1..])?,
            _ => return Err(self.malformed("expected '>' or '@' at start of header")),
        };
        self.read_num += 1;
        Ok(Some(record))
    }

    fn read_fasta(&mut self, header: &[u8]) -> Result<Record> {
        let mut sequence = Vec::new();
        while self.advance()? {
            if self.line.first() == Some(&b'>') {
                self.pending = Some(std::mem::take(&mut self.line));
                break;
            }
            sequence.extend_from_slice(self.line.trim_ascii());
        }
        Ok(Record::new(
            String::from_utf8_lossy(header).into_owned(),
            sequence,
            Vec::new(),
            self.read_num,
            self.readfile_idx,
        ))
    }

    fn read_fastq(&mut self, header: &[u8]) -> Result<Record> {
        self.require_line("missing sequence line")?;
        let sequence = std::mem::take(&mut self.line);
        self.require_line("missing separator line")?;
        if self.line.first() != Some(&b'+') {
            return Err(self.malformed("expected '+' separator"));
        }
        self.require_line("missing quality line")?;
        let quality = std::mem::take(&mut self.line);
        if quality.len() != sequence.len() {
            return Err(self.malformed("quality length differs from sequence length"));
        }
        Ok(Record::new(
            String::from_utf8_lossy(header).into_owned(),
            sequence,
            quality,
            self.read_num,
            self.readfile_idx,
        ))
    }
}
impl<R: BufRead> Iterator for RecordParser<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn parser(data: &[u8]) -> Result<RecordParser<&[u8]>> {
        Ok(RecordParser::new(LineSource::new(data)?, "mem", 1))
    }

    #[test]
    fn test_fastq_records() -> Result<()> {
        let data = b"@r0 desc\nACGT\n+\nIIII\n\n@r1\nGG\n+r1\n!!\n";
        let records = parser(data)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header(), "r0 desc");
        assert_eq!(records[0].quality(), b"IIII");
        assert_eq!(records[1].read_num(), 1);
        assert_eq!(records[1].readfile_idx(), 1);
        Ok(())
    }

    #[test]
    fn test_wrapped_fasta_with_crlf() -> Result<()> {
        let data = b">a\r\nAC\r\nGT\r\n>b\r\n>c\nTT";
        let records = parser(data)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].sequence(), b"ACGT");
        assert!(records[1].is_empty());
        assert_eq!(records[2].sequence(), b"TT");
        assert_eq!(records[2].read_num(), 2);
        Ok(())
    }

    #[test]
    fn test_malformed_records() -> Result<()> {
        let err = parser(b"@r0\nACGT\n-\nIIII\n")?.next_record().unwrap_err();
        assert!(matches!(
            err,
            Error::FeedError(FeedError::Malformed { line: 3, .. })
        ));

        let err = parser(b"@r0\nACGT\n+\nII\n")?.next_record().unwrap_err();
        assert!(matches!(err, Error::FeedError(FeedError::Malformed { .. })));

        let err = parser(b"@r0\nACGT\n")?.next_record().unwrap_err();
        assert!(matches!(
            err,
            Error::FeedError(FeedError::Malformed {
                reason: "missing separator line",
                ..
            })
        ));

        let err = parser(b"ACGT\n")?.next_record().unwrap_err();
        assert!(matches!(err, Error::FeedError(FeedError::Malformed { line: 1, .. })));
        Ok(())
    }

    #[test]
    fn test_gzip_input_is_sniffed() -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for i in 0..1000 {
            writeln!(encoder, "@read{i}\nACGTACGTAC\n+\nIIIIIIIIII")?;
        }
        let compressed = encoder.finish()?;

        let mut parser = parser(&compressed)?;
        assert!(parser.is_gzip());
        let mut count = 0;
        while let Some(record) = parser.next_record()? {
            assert_eq!(record.id(), format!("read{count}"));
            count += 1;
        }
        assert_eq!(count, 1000);
        assert_eq!(parser.read_count(), 1000);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let err = RecordParser::open("/nonexistent/reads.fq", 0).err().unwrap();
        assert!(matches!(err, Error::FeedError(FeedError::Open { .. })));
    }
}
