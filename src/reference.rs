//! Reference database collaborators
//!
//! Reference files are split into parts that are loaded into memory one at a time. The
//! report writers only need a few things from the loaded part: target names and the edit
//! statistics of an alignment. A [`ReferenceLoader`] hands out parts by reference file and
//! part number; dropping the part unloads it.

use std::sync::Arc;

use auto_impl::auto_impl;

use crate::{
    record::{AlignmentHit, CigarOp, Record},
    Result,
};

/// Edit statistics of a single alignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditStats {
    pub matches: u32,
    pub mismatches: u32,
    /// Number of inserted and deleted bases
    pub gaps: u32,
}
impl EditStats {
    /// Number of aligned columns
    pub fn columns(&self) -> u32 {
        self.matches + self.mismatches + self.gaps
    }

    /// Edit distance: mismatches plus gaps
    pub fn distance(&self) -> u32 {
        self.mismatches + self.gaps
    }

    /// Fraction of aligned columns that are matches
    pub fn identity(&self) -> f64 {
        match self.columns() {
            0 => 0.0,
            n => f64::from(self.matches) / f64::from(n),
        }
    }
}

/// A reference part resident in memory
#[auto_impl(&, Box, Arc)]
pub trait ReferencePart: Send + Sync {
    /// Reference file the part belongs to
    fn index_num(&self) -> u16;

    /// Part number within the reference file
    fn part(&self) -> u16;

    /// Name of a target sequence
    fn target_id(&self, ref_num: u32) -> &str;

    /// Edit statistics of `hit`, computed against the target sequence
    fn edit_stats(&self, record: &Record, hit: &AlignmentHit) -> EditStats;
}

/// Loads reference parts one at a time
pub trait ReferenceLoader {
    type Part: ReferencePart;

    /// Number of reference files
    fn num_refs(&self) -> usize;

    /// Number of parts of a reference file
    fn num_parts(&self, index_num: usize) -> usize;

    fn load(&mut self, index_num: usize, part: usize) -> Result<Self::Part>;
}

/// A target sequence of a reference part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub sequence: Vec<u8>,
}

/// A reference part kept entirely in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryPart {
    index_num: u16,
    part: u16,
    targets: Vec<Target>,
}
impl InMemoryPart {
    #[must_use]
    pub fn new(index_num: u16, part: u16, targets: Vec<Target>) -> Self {
        Self {
            index_num,
            part,
            targets,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }
}
impl ReferencePart for InMemoryPart {
    fn index_num(&self) -> u16 {
        self.index_num
    }

    fn part(&self) -> u16 {
        self.part
    }

    fn target_id(&self, ref_num: u32) -> &str {
        self.targets
            .get(ref_num as usize)
            .map_or("*", |target| target.id.as_str())
    }

    fn edit_stats(&self, record: &Record, hit: &AlignmentHit) -> EditStats {
        let mut stats = EditStats::default();
        let target = self
            .targets
            .get(hit.ref_num as usize)
            .map_or(&[][..], |target| &target.sequence[..]);
        let mut read = Vec::with_capacity(record.sequence().len());
        record.write_oriented(hit.strand, &mut read);

        let mut r = hit.read_begin as usize;
        let mut g = hit.ref_begin as usize;
        for (len, op) in hit.cigar_ops() {
            let len = len as usize;
            match op {
                CigarOp::Match => {
                    for k in 0..len {
                        match (read.get(r + k), target.get(g + k)) {
                            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => stats.matches += 1,
                            _ => stats.mismatches += 1,
                        }
                    }
                    r += len;
                    g += len;
                }
                CigarOp::Insertion => {
                    stats.gaps += len as u32;
                    r += len;
                }
                CigarOp::Deletion => {
                    stats.gaps += len as u32;
                    g += len;
                }
            }
        }
        stats
    }
}

/// A [`ReferenceLoader`] over parts already in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    /// Parts per reference file
    refs: Vec<Vec<Arc<InMemoryPart>>>,
}
impl InMemoryLoader {
    /// Creates a loader from the target lists of every part of every reference file
    #[must_use]
    pub fn new(refs: Vec<Vec<Vec<Target>>>) -> Self {
        let refs = refs
            .into_iter()
            .enumerate()
            .map(|(index_num, parts)| {
                parts
                    .into_iter()
                    .enumerate()
                    .map(|(part, targets)| {
                        Arc::new(InMemoryPart::new(index_num as u16, part as u16, targets))
                    })
                    .collect()
            })
            .collect();
        Self { refs }
    }
}
impl ReferenceLoader for InMemoryLoader {
    type Part = Arc<InMemoryPart>;

    fn num_refs(&self) -> usize {
        self.refs.len()
    }

    fn num_parts(&self, index_num: usize) -> usize {
        self.refs.get(index_num).map_or(0, Vec::len)
    }

    fn load(&mut self, index_num: usize, part: usize) -> Result<Self::Part> {
        self.refs
            .get(index_num)
            .and_then(|parts| parts.get(part))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no reference part {part} in index {index_num}").into())
    }
}
