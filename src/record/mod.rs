//! Sequencing reads and their alignments
//!
//! A [`Record`] is an immutable read payload (header, sequence, optional quality) together
//! with its pairing metadata, classification flags and the list of [`AlignmentHit`]s found
//! against the reference databases.

mod alignment;

pub use alignment::{pack_cigar, unpack_cigar, AlignmentHit, CachedResult, CigarOp};

/// A single sequencing read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Header line without the leading `>` or `@`
    header: String,

    /// Nucleotide sequence
    sequence: Vec<u8>,

    /// Quality string (empty for FASTA input)
    quality: Vec<u8>,

    /// Position of the record within its input file
    ///
    /// Mates of a pair share the same number.
    read_num: u64,

    /// Index of the input file the record was read from
    readfile_idx: usize,

    /// The stored sequence is the reverse complement of the read as sequenced
    reversed: bool,

    /// The read was accepted by the classifier
    pub is_hit: bool,

    /// The read passed the de-novo clustering criteria
    pub is_denovo: bool,

    /// Alignments against the reference databases
    pub hits: Vec<AlignmentHit>,
}
impl Record {
    #[must_use]
    pub fn new(
        header: String,
        sequence: Vec<u8>,
        quality: Vec<u8>,
        read_num: u64,
        readfile_idx: usize,
    ) -> Self {
        Self {
            header,
            sequence,
            quality,
            read_num,
            readfile_idx,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// The read name: the header up to the first whitespace
    pub fn id(&self) -> &str {
        self.header
            .split_ascii_whitespace()
            .next()
            .unwrap_or_default()
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    pub fn read_num(&self) -> u64 {
        self.read_num
    }

    pub fn readfile_idx(&self) -> usize {
        self.readfile_idx
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// A record is valid if it has a sequence and, when present, a quality of equal length
    pub fn is_valid(&self) -> bool {
        !self.is_empty() && (self.quality.is_empty() || self.quality.len() == self.sequence.len())
    }

    /// Key of the per-record classification result in the key-value store
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.readfile_idx, self.read_num)
    }

    /// Adopts a cached classification result
    pub fn attach(&mut self, cached: CachedResult) {
        self.is_hit = cached.is_hit;
        self.is_denovo = cached.is_denovo;
        self.hits = cached.hits;
    }

    /// Alignments computed against the given reference part
    pub fn hits_on(&self, index_num: u16, part: u16) -> impl Iterator<Item = &AlignmentHit> {
        self.hits.iter().filter(move |h| h.is_on(index_num, part))
    }

    /// Appends the sequence as seen on the given strand
    ///
    /// The sequence is reverse complemented when the strand and the record's own
    /// orientation disagree.
    pub fn write_oriented(&self, forward: bool, buf: &mut Vec<u8>) {
        if forward ^ self.reversed {
            buf.extend_from_slice(&self.sequence);
        } else {
            reverse_complement(&self.sequence, buf);
        }
    }

    /// Appends the record in FASTQ form if it carries a quality, FASTA otherwise
    pub fn write_fastx(&self, buf: &mut Vec<u8>) {
        if self.quality.is_empty() {
            buf.push(b'>');
            buf.extend_from_slice(self.header.as_bytes());
            buf.push(b'\n');
            buf.extend_from_slice(&self.sequence);
            buf.push(b'\n');
        } else {
            buf.push(b'@');
            buf.extend_from_slice(self.header.as_bytes());
            buf.push(b'\n');
            buf.extend_from_slice(&self.sequence);
            buf.extend_from_slice(b"\n+\n");
            buf.extend_from_slice(&self.quality);
            buf.push(b'\n');
        }
    }
}

/// Appends the reverse complement of `sequence` to `buf`
///
/// IUPAC symbols other than A, C, G, T and U are copied unchanged; case is preserved.
pub fn reverse_complement(sequence: &[u8], buf: &mut Vec<u8>) {
    buf.extend(sequence.iter().rev().map(|&b| match b {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' | b'U' => b'A',
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' | b'u' => b'a',
        other => other,
    }));
}
