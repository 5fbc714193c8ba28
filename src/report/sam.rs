use crate::{config::ReportConfig, record::Record, reference::ReferencePart, Result};

use super::{OutputNaming, ReportWriter, SplitOutput, SplitSet};

/// Fixed mapping quality of every reported alignment
const MAPQ: &[u8] = b"255";

/// Columns 2 to 11 of an unmapped read
const UNMAPPED: &[u8] = b"\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n";

/// SAM alignments, one line per hit on the loaded reference part
pub struct SamReport {
    output: SplitOutput,
}
impl SamReport {
    pub fn open(config: &ReportConfig) -> Result<Self> {
        let naming = OutputNaming::new(&config.aligned_prefix, "sam", config.compress())
            .pid(config.pid_suffix());
        Ok(Self {
            output: SplitOutput::open(naming, config.num_splits())?,
        })
    }

    /// Writes the `@HD` and `@PG` header lines at the start of the first split
    pub fn write_header(&mut self, cmdline: &str) -> Result<()> {
        self.output.split_mut(0)?.emit(0, |buf| {
            buf.extend_from_slice(b"@HD\tVN:1.0\tSO:unsorted\n@PG\tID:");
            buf.extend_from_slice(env!("CARGO_PKG_NAME").as_bytes());
            buf.extend_from_slice(b"\tVN:");
            buf.extend_from_slice(env!("CARGO_PKG_VERSION").as_bytes());
            buf.extend_from_slice(b"\tCL:");
            buf.extend_from_slice(cmdline.as_bytes());
            buf.push(b'\n');
        })
    }

    /// Writes every alignment of `record` on the loaded part
    ///
    /// With `print_all_reads`, a record without any alignment is written once as unmapped,
    /// while the first part of the first reference is loaded.
    pub fn append<P: ReferencePart>(
        split: &mut SplitSet,
        part: &P,
        record: &Record,
        print_all_reads: bool,
    ) -> Result<()> {
        if record.hits.is_empty() {
            if print_all_reads && part.index_num() == 0 && part.part() == 0 {
                split.emit(0, |buf| {
                    buf.extend_from_slice(record.id().as_bytes());
                    buf.extend_from_slice(UNMAPPED);
                })?;
            }
            return Ok(());
        }

        let mut fmt = itoa::Buffer::new();
        for hit in record.hits_on(part.index_num(), part.part()) {
            let distance = part.edit_stats(record, hit).distance();
            split.emit(0, |buf| {
                buf.extend_from_slice(record.id().as_bytes());
                buf.extend_from_slice(if hit.strand { &b"\t0\t"[..] } else { &b"\t16\t"[..] });
                buf.extend_from_slice(part.target_id(hit.ref_num).as_bytes());
                buf.push(b'\t');
                buf.extend_from_slice(fmt.format(hit.ref_begin + 1).as_bytes());
                buf.push(b'\t');
                buf.extend_from_slice(MAPQ);
                buf.push(b'\t');
                hit.write_cigar(record.sequence().len(), buf);
                buf.extend_from_slice(b"\t*\t0\t0\t");
                record.write_oriented(hit.strand, buf);
                buf.push(b'\t');
                match record.quality() {
                    [] => buf.push(b'*'),
                    qual if hit.strand => buf.extend_from_slice(qual),
                    qual => buf.extend(qual.iter().rev()),
                }
                buf.extend_from_slice(b"\tAS:i:");
                buf.extend_from_slice(fmt.format(hit.score).as_bytes());
                buf.extend_from_slice(b"\tNM:i:");
                buf.extend_from_slice(fmt.format(distance).as_bytes());
                buf.push(b'\n');
            })?;
        }
        Ok(())
    }
}
impl ReportWriter for SamReport {
    type Split = SplitSet;

    fn name(&self) -> &'static str {
        "sam"
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
