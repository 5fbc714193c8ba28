use crate::{config::ReportConfig, record::Record, Result};

use super::{OutputNaming, ReportWriter, SplitOutput, SplitSet};

/// Reads passing the de-novo clustering criteria, in the format of the input
///
/// A single output per thread, named after the aligned prefix with a `_denovo` marker.
pub struct DenovoReport {
    output: SplitOutput,
}
impl DenovoReport {
    pub fn open(config: &ReportConfig) -> Result<Self> {
        let mut prefix = config.aligned_prefix.clone().into_os_string();
        prefix.push("_denovo");
        let naming = OutputNaming::new(prefix, &config.fastx_ext(), config.compress())
            .pid(config.pid_suffix());
        Ok(Self {
            output: SplitOutput::open(naming, config.num_splits())?,
        })
    }

    /// Writes the de-novo reads of a fragment
    ///
    /// Each read is judged on its own flag; the pairing policies do not apply.
    pub fn append(split: &mut SplitSet, records: &[Record]) -> Result<()> {
        records
            .iter()
            .filter(|record| record.is_denovo)
            .try_for_each(|record| split.emit(0, |buf| record.write_fastx(buf)))
    }
}
impl ReportWriter for DenovoReport {
    type Split = SplitSet;

    fn name(&self) -> &'static str {
        "denovo"
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
