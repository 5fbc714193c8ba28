use log::debug;

use crate::{
    config::{PairPolicy, ReportConfig},
    record::Record,
    Result,
};

use super::{
    fastx_categories, route::route_aligned, write_fastx_fragment, OutputNaming, ReportWriter,
    SplitOutput, SplitSet,
};

/// Aligned reads in the format of the input (FASTA or FASTQ)
pub struct FastxReport {
    output: SplitOutput,
}
impl FastxReport {
    /// Opens the split files under the aligned prefix
    pub fn open(config: &ReportConfig) -> Result<Self> {
        let naming = OutputNaming::new(
            &config.aligned_prefix,
            &config.fastx_ext(),
            config.compress(),
        )
        .categories(fastx_categories(config))
        .pid(config.pid_suffix());
        Ok(Self {
            output: SplitOutput::open(naming, config.num_splits())?,
        })
    }

    /// Writes the hits of a fragment to the categories chosen by the pairing policy
    pub fn append(split: &mut SplitSet, pairing: &PairPolicy, records: &[Record]) -> Result<()> {
        let num_out = split.num_out();
        write_fastx_fragment(
            split,
            records,
            |record| record.is_hit,
            true,
            |hits| route_aligned(hits, num_out, pairing),
        )
    }
}
impl ReportWriter for FastxReport {
    type Split = SplitSet;

    fn name(&self) -> &'static str {
        "fastx"
    }

    fn splits_mut(&mut self) -> &mut [SplitSet] {
        self.output.sets_mut()
    }

    fn finalize(&mut self) -> Result<()> {
        self.output.finalize()
    }

    fn merge(&mut self, num_splits: usize) -> Result<()> {
        let merged = self.output.merge(num_splits)?;
        debug!("{}: merged into {merged:?}", self.name());
        Ok(())
    }
}
