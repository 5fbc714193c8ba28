use std::io::Write;

use crate::{config::ReportConfig, record::Record, reference::ReferencePart, Result};

use super::{OutputNaming, ReportWriter, SplitOutput, SplitSet};

/// Tabular alignments, one line per hit on the loaded reference part
///
/// Columns: query id, target id, percent identity, alignment length, mismatches, gap
/// openings, query start and end, target start and end (all 1-based), e-value and score.
/// The e-value is not computed and always reported as `0`.
pub struct BlastReport {
    output: SplitOutput,
}
impl BlastReport {
    pub fn open(config: &ReportConfig) -> Result<Self> {
        let naming = OutputNaming::new(&config.aligned_prefix, "blast", config.compress())
            .pid(config.pid_suffix());
        Ok(Self {
            output: SplitOutput::open(naming, config.num_splits())?,
        })
    }

    pub fn append<P: ReferencePart>(split: &mut SplitSet, part: &P, record: &Record) -> Result<()> {
        for hit in record.hits_on(part.index_num(), part.part()) {
            let edits = part.edit_stats(record, hit);
            split.emit(0, |buf| {
                // writing into a Vec cannot fail
                let _ = writeln!(
                    buf,
                    "{}\t{}\t{:.1}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t0\t{}",
                    record.id(),
                    part.target_id(hit.ref_num),
                    edits.identity() * 100.0,
                    edits.columns(),
                    edits.mismatches,
                    hit.gap_opens(),
                    hit.read_begin + 1,
                    hit.read_end + 1,
                    hit.ref_begin + 1,
                    hit.ref_end + 1,
                    hit.score,
                );
            })?;
        }
        Ok(())
    }
}
impl ReportWriter for BlastReport {
    type Split = SplitSet;

    fn name(&self) -> &'static str {
        "blast"
    }

    fn splits_mut(&mut self) -> &mut [SplitSet] {
        self.output.sets_mut()
    }

    fn finalize(&mut self) -> Result<()> {
        self.output.finalize()
    }

    fn merge(&mut self, num_splits: usize) -> Result<()> {
        self.output.merge(num_splits).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::{pack_cigar, AlignmentHit, CigarOp},
        reference::{InMemoryPart, Target},
    };

    #[test]
    fn test_tabular_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ReportConfig::builder()
            .files(["r.fq"])
            .aligned_prefix(dir.path().join("aligned"))
            .threads(1)
            .build()?;
        let part = InMemoryPart::new(
            0,
            1,
            vec![Target {
                id: "16S".into(),
                sequence: b"TTACGTAC".to_vec(),
            }],
        );
        let mut record = Record::new("q1 x".into(), b"ACGAAC".to_vec(), Vec::new(), 0, 0);
        let hit = AlignmentHit {
            index_num: 0,
            part: 1,
            strand: true,
            read_begin: 0,
            read_end: 5,
            ref_begin: 2,
            ref_end: 7,
            cigar: vec![pack_cigar(6, CigarOp::Match)],
            score: 9,
            ..AlignmentHit::default()
        };
        record.hits = vec![hit.clone(), AlignmentHit { part: 0, ..hit }];

        let mut report = BlastReport::open(&config)?;
        BlastReport::append(&mut report.splits_mut()[0], &part, &record)?;
        report.merge(1)?;
        let text = std::fs::read_to_string(dir.path().join("aligned.blast"))?;
        assert_eq!(text, "q1\t16S\t83.3\t6\t1\t0\t1\t6\t3\t8\t0\t9\n");
        Ok(())
    }
}
