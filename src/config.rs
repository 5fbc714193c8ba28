//! Report configuration
//!
//! A [`ReportConfig`] is created with a [`ReportConfigBuilder`], which checks option
//! combinations and fills in defaults. All derived values used by the writers (fan-out,
//! number of splits, compression, file extension) are computed here.

use std::path::{Path, PathBuf};

use crate::{error::ConfigError, queue::DEFAULT_CAPACITY, Result};

/// Default minimal read length, shorter reads are counted as short
pub const DEFAULT_MIN_READ_LEN: u32 = 18;

/// Default identity threshold of the quality buckets
pub const DEFAULT_MIN_IDENTITY: f64 = 0.97;

/// Default query coverage threshold of the quality buckets
pub const DEFAULT_MIN_COVERAGE: f64 = 0.97;

/// Report toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reports {
    /// Aligned reads in FASTA/FASTQ
    pub fastx: bool,
    /// Unaligned reads in FASTA/FASTQ
    pub other: bool,
    /// Tabular alignments
    pub blast: bool,
    /// SAM alignments
    pub sam: bool,
    /// Reads passing the de-novo criteria
    pub denovo: bool,
    /// BIOM observation table
    pub biom: bool,
}

/// Pairing policies
///
/// Only meaningful with paired input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairPolicy {
    /// Write both mates of a pair if either one is a hit
    pub paired_in: bool,
    /// Write a pair to the aligned output only if both mates are hits
    pub paired_out: bool,
    /// Write forward and reverse mates to separate files
    pub out2: bool,
    /// Separate pairs where both mates are hits from pairs with a single hit
    pub sout: bool,
}

/// Validated configuration of a report run
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Forward input, and reverse input if paired
    pub files: Vec<PathBuf>,
    /// Number of reference files
    pub num_refs: usize,
    /// Prefix of the aligned outputs
    pub aligned_prefix: PathBuf,
    /// Prefix of the unaligned outputs
    pub other_prefix: PathBuf,
    /// Number of report workers, which is also the number of splits per output
    pub num_threads: usize,
    pub reports: Reports,
    pub pairing: PairPolicy,
    /// Append the process id to output file names
    pub pid: bool,
    /// Emit unmapped SAM lines for reads without alignments
    pub print_all_reads: bool,
    /// Records buffered per queue lane
    pub queue_capacity: usize,
    /// Command line recorded in the SAM header
    pub cmdline: String,
    pub min_read_len: u32,
    pub min_identity: f64,
    pub min_coverage: f64,
}
impl ReportConfig {
    #[must_use]
    pub fn builder() -> ReportConfigBuilder {
        ReportConfigBuilder::default()
    }

    pub fn paired(&self) -> bool {
        self.files.len() == 2
    }

    /// Number of output categories per thread (1, 2 or 4)
    pub fn num_out(&self) -> usize {
        if !self.paired() {
            return 1;
        }
        match (self.pairing.out2, self.pairing.sout) {
            (true, true) => 4,
            (true, false) | (false, true) => 2,
            (false, false) => 1,
        }
    }

    pub fn num_splits(&self) -> usize {
        self.num_threads
    }

    /// Outputs are gzip compressed iff the forward input is
    pub fn compress(&self) -> bool {
        extension(&self.files[0]).is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
    }

    /// Extension of the FASTA/FASTQ outputs: the forward input's, without a trailing `.gz`
    pub fn fastx_ext(&self) -> String {
        let path = &self.files[0];
        let ext = if self.compress() {
            path.file_stem().map(Path::new).and_then(extension)
        } else {
            extension(path)
        };
        ext.unwrap_or("fastx").to_string()
    }

    /// Process id appended to output names, if requested
    pub fn pid_suffix(&self) -> Option<u32> {
        self.pid.then(std::process::id)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Builder for [`ReportConfig`]
///
/// # Examples
///
/// ```
/// # use readmux::{ReportConfig, Result};
/// # fn main() -> Result<()> {
/// let config = ReportConfig::builder()
///     .files(["reads_1.fq.gz", "reads_2.fq.gz"])
///     .aligned_prefix("out/aligned")
///     .fastx(true)
///     .out2(true)
///     .threads(4)
///     .build()?;
/// assert_eq!(config.num_out(), 2);
/// assert_eq!(config.fastx_ext(), "fq");
/// assert!(config.compress());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ReportConfigBuilder {
    files: Vec<PathBuf>,
    num_refs: Option<usize>,
    aligned_prefix: Option<PathBuf>,
    other_prefix: Option<PathBuf>,
    threads: Option<usize>,
    reports: Reports,
    pairing: PairPolicy,
    pid: bool,
    print_all_reads: bool,
    queue_capacity: Option<usize>,
    cmdline: Option<String>,
    min_read_len: Option<u32>,
    min_identity: Option<f64>,
    min_coverage: Option<f64>,
}
impl ReportConfigBuilder {
    #[must_use]
    pub fn files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn num_refs(mut self, num_refs: usize) -> Self {
        self.num_refs = Some(num_refs);
        self
    }

    #[must_use]
    pub fn aligned_prefix<P: Into<PathBuf>>(mut self, prefix: P) -> Self {
        self.aligned_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn other_prefix<P: Into<PathBuf>>(mut self, prefix: P) -> Self {
        self.other_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    #[must_use]
    pub fn reports(mut self, reports: Reports) -> Self {
        self.reports = reports;
        self
    }

    #[must_use]
    pub fn fastx(mut self, on: bool) -> Self {
        self.reports.fastx = on;
        self
    }

    #[must_use]
    pub fn other(mut self, on: bool) -> Self {
        self.reports.other = on;
        self
    }

    #[must_use]
    pub fn blast(mut self, on: bool) -> Self {
        self.reports.blast = on;
        self
    }

    #[must_use]
    pub fn sam(mut self, on: bool) -> Self {
        self.reports.sam = on;
        self
    }

    #[must_use]
    pub fn denovo(mut self, on: bool) -> Self {
        self.reports.denovo = on;
        self
    }

    #[must_use]
    pub fn biom(mut self, on: bool) -> Self {
        self.reports.biom = on;
        self
    }

    #[must_use]
    pub fn paired_in(mut self, on: bool) -> Self {
        self.pairing.paired_in = on;
        self
    }

    #[must_use]
    pub fn paired_out(mut self, on: bool) -> Self {
        self.pairing.paired_out = on;
        self
    }

    #[must_use]
    pub fn out2(mut self, on: bool) -> Self {
        self.pairing.out2 = on;
        self
    }

    #[must_use]
    pub fn sout(mut self, on: bool) -> Self {
        self.pairing.sout = on;
        self
    }

    #[must_use]
    pub fn pid(mut self, on: bool) -> Self {
        self.pid = on;
        self
    }

    #[must_use]
    pub fn print_all_reads(mut self, on: bool) -> Self {
        self.print_all_reads = on;
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn cmdline<S: Into<String>>(mut self, cmdline: S) -> Self {
        self.cmdline = Some(cmdline.into());
        self
    }

    #[must_use]
    pub fn min_read_len(mut self, len: u32) -> Self {
        self.min_read_len = Some(len);
        self
    }

    #[must_use]
    pub fn min_identity(mut self, identity: f64) -> Self {
        self.min_identity = Some(identity);
        self
    }

    #[must_use]
    pub fn min_coverage(mut self, coverage: f64) -> Self {
        self.min_coverage = Some(coverage);
        self
    }

    pub fn build(self) -> Result<ReportConfig> {
        match self.files.len() {
            0 => return Err(ConfigError::MissingInput.into()),
            1 | 2 => {}
            n => return Err(ConfigError::TooManyInputs(n).into()),
        }
        let Some(aligned_prefix) = self.aligned_prefix else {
            return Err(ConfigError::MissingAlignedPrefix.into());
        };

        let pairing = self.pairing;
        if pairing.paired_in && pairing.paired_out {
            return Err(ConfigError::PairedInAndOut.into());
        }
        if self.files.len() == 1 {
            let single_ended = [
                ("paired_in", pairing.paired_in),
                ("paired_out", pairing.paired_out),
                ("out2", pairing.out2),
                ("sout", pairing.sout),
            ];
            if let Some((name, _)) = single_ended.into_iter().find(|(_, on)| *on) {
                return Err(ConfigError::RequiresPaired(name).into());
            }
        }

        let num_threads = self.threads.unwrap_or_else(num_cpus::get);
        if num_threads == 0 {
            return Err(ConfigError::ZeroThreads.into());
        }
        let queue_capacity = self.queue_capacity.unwrap_or(DEFAULT_CAPACITY);
        if queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity.into());
        }

        let other_prefix = self
            .other_prefix
            .unwrap_or_else(|| aligned_prefix.with_file_name("other"));

        Ok(ReportConfig {
            files: self.files,
            num_refs: self.num_refs.unwrap_or(1),
            aligned_prefix,
            other_prefix,
            num_threads,
            reports: self.reports,
            pairing,
            pid: self.pid,
            print_all_reads: self.print_all_reads,
            queue_capacity,
            cmdline: self.cmdline.unwrap_or_default(),
            min_read_len: self.min_read_len.unwrap_or(DEFAULT_MIN_READ_LEN),
            min_identity: self.min_identity.unwrap_or(DEFAULT_MIN_IDENTITY),
            min_coverage: self.min_coverage.unwrap_or(DEFAULT_MIN_COVERAGE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn paired() -> ReportConfigBuilder {
        ReportConfig::builder()
            .files(["r1.fastq", "r2.fastq"])
            .aligned_prefix("/tmp/out/aligned")
            .threads(2)
    }

    #[test]
    fn test_num_out() -> Result<()> {
        assert_eq!(paired().build()?.num_out(), 1);
        assert_eq!(paired().out2(true).build()?.num_out(), 2);
        assert_eq!(paired().sout(true).build()?.num_out(), 2);
        assert_eq!(paired().out2(true).sout(true).build()?.num_out(), 4);

        let single = ReportConfig::builder()
            .files(["r.fa"])
            .aligned_prefix("a")
            .build()?;
        assert!(!single.paired());
        assert_eq!(single.num_out(), 1);
        assert!(single.num_threads > 0);
        Ok(())
    }

    #[test]
    fn test_suffix_and_compression() -> Result<()> {
        let cfg = paired().build()?;
        assert!(!cfg.compress());
        assert_eq!(cfg.fastx_ext(), "fastq");
        assert_eq!(cfg.other_prefix, PathBuf::from("/tmp/out/other"));

        let cfg = paired().files(["r1.fq.GZ", "r2.fq.gz"]).build()?;
        assert!(cfg.compress());
        assert_eq!(cfg.fastx_ext(), "fq");

        let cfg = paired().files(["reads", "mates"]).build()?;
        assert_eq!(cfg.fastx_ext(), "fastx");
        Ok(())
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            ReportConfig::builder().aligned_prefix("a").build(),
            Err(Error::ConfigError(ConfigError::MissingInput))
        ));
        assert!(matches!(
            ReportConfig::builder().files(["a", "b", "c"]).build(),
            Err(Error::ConfigError(ConfigError::TooManyInputs(3)))
        ));
        assert!(matches!(
            ReportConfig::builder().files(["a"]).build(),
            Err(Error::ConfigError(ConfigError::MissingAlignedPrefix))
        ));
        assert!(matches!(
            paired().paired_in(true).paired_out(true).build(),
            Err(Error::ConfigError(ConfigError::PairedInAndOut))
        ));
        assert!(matches!(
            ReportConfig::builder()
                .files(["a"])
                .aligned_prefix("p")
                .sout(true)
                .build(),
            Err(Error::ConfigError(ConfigError::RequiresPaired("sout")))
        ));
        assert!(matches!(
            paired().threads(0).build(),
            Err(Error::ConfigError(ConfigError::ZeroThreads))
        ));
        assert!(matches!(
            paired().queue_capacity(0).build(),
            Err(Error::ConfigError(ConfigError::ZeroCapacity))
        ));
    }
}
