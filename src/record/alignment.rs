use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Number of low bits holding the operation code of a packed CIGAR entry
const CIGAR_OP_BITS: u32 = 4;

/// Mask selecting the operation code of a packed CIGAR entry
const CIGAR_OP_MASK: u32 = 0xf;

/// A single CIGAR operation as stored by the aligner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    Match,
    Insertion,
    Deletion,
}
impl CigarOp {
    /// Decodes an operation code; every code other than 0 and 1 is a deletion
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Match,
            1 => Self::Insertion,
            _ => Self::Deletion,
        }
    }

    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::Match => 0,
            Self::Insertion => 1,
            Self::Deletion => 2,
        }
    }

    #[must_use]
    pub fn letter(self) -> u8 {
        match self {
            Self::Match => b'M',
            Self::Insertion => b'I',
            Self::Deletion => b'D',
        }
    }
}

/// Packs an operation and its length into a single entry (length in the high bits)
#[must_use]
pub fn pack_cigar(len: u32, op: CigarOp) -> u32 {
    (len << CIGAR_OP_BITS) | op.code()
}

/// Splits a packed entry into its length and operation
#[must_use]
pub fn unpack_cigar(packed: u32) -> (u32, CigarOp) {
    (
        (packed & !CIGAR_OP_MASK) >> CIGAR_OP_BITS,
        CigarOp::from_code(packed & CIGAR_OP_MASK),
    )
}

/// One alignment of a read against a target of a reference part
///
/// Coordinates are 0-based and inclusive, as produced by the aligner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentHit {
    /// Reference file the hit was computed against
    pub index_num: u16,
    /// Part of that reference file
    pub part: u16,
    /// Target sequence within the reference part
    pub ref_num: u32,
    /// `true` for the forward strand
    pub strand: bool,
    pub read_begin: u32,
    pub read_end: u32,
    pub ref_begin: u32,
    pub ref_end: u32,
    /// Packed CIGAR, see [`pack_cigar`]
    pub cigar: Vec<u32>,
    pub score: u32,
}
impl AlignmentHit {
    /// Whether the hit belongs to the reference part currently resident in memory
    #[must_use]
    pub fn is_on(&self, index_num: u16, part: u16) -> bool {
        self.index_num == index_num && self.part == part
    }

    /// Iterates the decoded CIGAR operations
    pub fn cigar_ops(&self) -> impl Iterator<Item = (u32, CigarOp)> + '_ {
        self.cigar.iter().map(|&c| unpack_cigar(c))
    }

    /// Number of aligned columns (matches, insertions and deletions)
    #[must_use]
    pub fn alignment_len(&self) -> u32 {
        self.cigar_ops().map(|(len, _)| len).sum()
    }

    /// Number of gap openings (insertion or deletion runs)
    #[must_use]
    pub fn gap_opens(&self) -> u32 {
        self.cigar_ops()
            .filter(|(_, op)| *op != CigarOp::Match)
            .count() as u32
    }

    /// Writes the CIGAR string, soft-clipping the unaligned prefix and suffix of the read
    pub fn write_cigar(&self, read_len: usize, buf: &mut Vec<u8>) {
        let mut fmt = itoa::Buffer::new();
        if self.read_begin != 0 {
            buf.extend_from_slice(fmt.format(self.read_begin).as_bytes());
            buf.push(b'S');
        }
        for (len, op) in self.cigar_ops() {
            buf.extend_from_slice(fmt.format(len).as_bytes());
            buf.push(op.letter());
        }
        let end_mask = read_len.saturating_sub(self.read_end as usize + 1);
        if end_mask > 0 {
            buf.extend_from_slice(fmt.format(end_mask).as_bytes());
            buf.push(b'S');
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.index_num)?;
        writer.write_u16::<LittleEndian>(self.part)?;
        writer.write_u32::<LittleEndian>(self.ref_num)?;
        writer.write_u8(u8::from(self.strand))?;
        writer.write_u32::<LittleEndian>(self.read_begin)?;
        writer.write_u32::<LittleEndian>(self.read_end)?;
        writer.write_u32::<LittleEndian>(self.ref_begin)?;
        writer.write_u32::<LittleEndian>(self.ref_end)?;
        writer.write_u32::<LittleEndian>(self.score)?;
        writer.write_u32::<LittleEndian>(self.cigar.len() as u32)?;
        self.cigar
            .iter()
            .try_for_each(|&c| writer.write_u32::<LittleEndian>(c))
    }

    fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let index_num = reader.read_u16::<LittleEndian>()?;
        let part = reader.read_u16::<LittleEndian>()?;
        let ref_num = reader.read_u32::<LittleEndian>()?;
        let strand = reader.read_u8()? != 0;
        let read_begin = reader.read_u32::<LittleEndian>()?;
        let read_end = reader.read_u32::<LittleEndian>()?;
        let ref_begin = reader.read_u32::<LittleEndian>()?;
        let ref_end = reader.read_u32::<LittleEndian>()?;
        let score = reader.read_u32::<LittleEndian>()?;
        let n_cigar = reader.read_u32::<LittleEndian>()?;
        let cigar = (0..n_cigar)
            .map(|_| reader.read_u32::<LittleEndian>())
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            index_num,
            part,
            ref_num,
            strand,
            read_begin,
            read_end,
            ref_begin,
            ref_end,
            cigar,
            score,
        })
    }
}

/// Classification result of a record as kept in the key-value store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedResult {
    pub is_hit: bool,
    pub is_denovo: bool,
    pub hits: Vec<AlignmentHit>,
}
impl CachedResult {
    /// Little-endian layout: `is_hit` (1B), `is_denovo` (1B), hit count (4B), then each hit
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(u8::from(self.is_hit));
        buf.push(u8::from(self.is_denovo));
        buf.extend_from_slice(&(self.hits.len() as u32).to_le_bytes());
        for hit in &self.hits {
            // writing into a Vec cannot fail
            let _ = hit.write_to(&mut buf);
        }
        buf
    }

    pub fn from_bytes(mut bytes: &[u8]) -> io::Result<Self> {
        let is_hit = bytes.read_u8()? != 0;
        let is_denovo = bytes.read_u8()? != 0;
        let n_hits = bytes.read_u32::<LittleEndian>()?;
        let hits = (0..n_hits)
            .map(|_| AlignmentHit::read_from(&mut bytes))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            is_hit,
            is_denovo,
            hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> AlignmentHit {
        AlignmentHit {
            index_num: 1,
            part: 2,
            ref_num: 17,
            strand: false,
            read_begin: 3,
            read_end: 15,
            ref_begin: 100,
            ref_end: 111,
            cigar: vec![
                pack_cigar(5, CigarOp::Match),
                pack_cigar(1, CigarOp::Insertion),
                pack_cigar(6, CigarOp::Match),
                pack_cigar(2, CigarOp::Deletion),
            ],
            score: 42,
        }
    }

    #[test]
    fn test_cigar_packing() {
        assert_eq!(pack_cigar(12, CigarOp::Match), 12 << 4);
        assert_eq!(unpack_cigar((7 << 4) | 1), (7, CigarOp::Insertion));
        // any unknown code decodes as a deletion
        assert_eq!(unpack_cigar((3 << 4) | 9), (3, CigarOp::Deletion));
    }

    #[test]
    fn test_cigar_string_with_soft_clips() {
        let mut buf = Vec::new();
        hit().write_cigar(20, &mut buf);
        assert_eq!(buf, b"3S5M1I6M2D4S");

        let mut buf = Vec::new();
        let full = AlignmentHit {
            read_begin: 0,
            read_end: 9,
            cigar: vec![pack_cigar(10, CigarOp::Match)],
            ..hit()
        };
        full.write_cigar(10, &mut buf);
        assert_eq!(buf, b"10M");
    }

    #[test]
    fn test_alignment_summaries() {
        let h = hit();
        assert_eq!(h.alignment_len(), 14);
        assert_eq!(h.gap_opens(), 2);
        assert!(h.is_on(1, 2));
        assert!(!h.is_on(1, 0));
    }

    #[test]
    fn test_cached_result_bytes() -> io::Result<()> {
        let cached = CachedResult {
            is_hit: true,
            is_denovo: false,
            hits: vec![hit(), AlignmentHit::default()],
        };
        assert_eq!(CachedResult::from_bytes(&cached.to_bytes())?, cached);

        let bytes = cached.to_bytes();
        assert!(CachedResult::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        Ok(())
    }
}
