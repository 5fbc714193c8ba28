use crate::{
    config::{PairPolicy, ReportConfig},
    record::Record,
    Result,
};

use super::{
    fastx_categories, route::route_unaligned, write_fastx_fragment, OutputNaming, ReportWriter,
    SplitOutput, SplitSet,
};

/// Reads that were not aligned, in the format of the input
///
/// The categories mirror those of [`FastxReport`](super::FastxReport), with the
/// complementary selection of records.
pub struct OtherReport {
    output: SplitOutput,
}
impl OtherReport {
    /// Opens the split files under the unaligned prefix
    pub fn open(config: &ReportConfig) -> Result<Self> {
        let naming = OutputNaming::new(
            &config.other_prefix,
            &config.fastx_ext(),
            config.compress(),
        )
        .categories(fastx_categories(config))
        .pid(config.pid_suffix());
        Ok(Self {
            output: SplitOutput::open(naming, config.num_splits())?,
        })
    }

    pub fn append(split: &mut SplitSet, pairing: &PairPolicy, records: &[Record]) -> Result<()> {
        let num_out = split.num_out();
        write_fastx_fragment(
            split,
            records,
            |record| record.is_hit,
            false,
            |hits| route_unaligned(hits, num_out, pairing),
        )
    }
}
impl ReportWriter for OtherReport {
    type Split = SplitSet;

    fn name(&self) -> &'static str {
        "other"
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

    #[test]
    fn test_unaligned_mates_by_strand() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ReportConfig::builder()
            .files(["r1.fa", "r2.fa"])
            .aligned_prefix(dir.path().join("aligned"))
            .out2(true)
            .threads(2)
            .build()?;
        let mut report = OtherReport::open(&config)?;
        {
            let split = &mut report.splits_mut()[1];
            let mut hit = Record::new("a".into(), b"AC".to_vec(), Vec::new(), 5, 0);
            hit.is_hit = true;
            let miss = Record::new("b".into(), b"GT".to_vec(), Vec::new(), 5, 1);
            OtherReport::append(split, &config.pairing, &[hit, miss])?;
            assert_eq!(split.written(), &[0, 1]);
        }
        report.merge(2)?;
        let fwd = std::fs::read_to_string(dir.path().join("other_fwd.fa"))?;
        let rev = std::fs::read_to_string(dir.path().join("other_rev.fa"))?;
        assert!(fwd.is_empty());
        assert_eq!(rev, ">b\nGT\n");
        Ok(())
    }
}
