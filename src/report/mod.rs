//! Multiplexed report outputs
//!
//! Every report format writes into `num_out` categories per worker thread. Each thread owns
//! a [`SplitSet`] with one [`Destination`] per category, so a destination is only ever
//! written by a single thread. Seen as one flat vector, the destination of category `cat`
//! for thread `t` sits at the linear index `t * num_out + cat` (see [`linear_index`]).
//!
//! Once all workers have joined, [`SplitOutput::finalize`] finishes every compressed stream
//! and closes the files, and [`SplitOutput::merge`] concatenates the splits of each category
//! in ascending split order:
//!
//! ```text
//! aligned_fwd_0.fq.gz  <- aligned_fwd_1.fq.gz <- aligned_fwd_2.fq.gz
//!        |
//!        v
//! aligned_fwd.fq.gz
//! ```
//!
//! Compressed destinations write one gzip member per split, so a merged file is a valid
//! multi-member gzip stream.

mod biom;
mod blast;
mod denovo;
mod fastx;
mod other;
pub mod route;
mod sam;

pub use biom::{BiomReport, BiomSplit};
pub use blast::BlastReport;
pub use denovo::DenovoReport;
pub use fastx::FastxReport;
pub use other::OtherReport;
pub use sam::SamReport;

use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};

use crate::{
    codec::{Direction, Framing, StreamCodec},
    config::ReportConfig,
    error::ReportError,
    record::Record,
    Result,
};

use route::{validate_pair, Routes};

/// Linear index of a destination in the flat `thread x category` layout
#[must_use]
pub fn linear_index(thread: usize, cat: usize, num_out: usize) -> usize {
    thread * num_out + cat
}

/// Category suffixes of the FASTA/FASTQ reports for the configured fan-out
pub fn fastx_categories(config: &ReportConfig) -> &'static [&'static str] {
    match config.num_out() {
        4 => &["_paired_fwd", "_paired_rev", "_singleton_fwd", "_singleton_rev"],
        2 if config.pairing.out2 => &["_fwd", "_rev"],
        2 => &["_paired", "_singleton"],
        _ => &[""],
    }
}

/// Writes the records of a fragment in FASTA/FASTQ form
///
/// A single record is written to category 0 iff its flag equals `write_flagged`. A pair is
/// validated and routed by `route`, which receives the flags of both mates.
pub(crate) fn write_fastx_fragment<F, R>(
    split: &mut SplitSet,
    records: &[Record],
    flag: F,
    write_flagged: bool,
    route: R,
) -> Result<()>
where
    F: Fn(&Record) -> bool,
    R: FnOnce([bool; 2]) -> Result<Routes>,
{
    if let [record] = records {
        if flag(record) == write_flagged {
            split.emit(0, |buf| record.write_fastx(buf))?;
        }
        return Ok(());
    }
    validate_pair(records)?;
    let routes = route([flag(&records[0]), flag(&records[1])])?;
    for (record, route) in records.iter().zip(routes) {
        if let Some(cat) = route {
            split.emit(cat, |buf| record.write_fastx(buf))?;
        }
    }
    Ok(())
}

/// Shared contract of all report writers
pub trait ReportWriter {
    /// Per-thread state handed exclusively to one worker
    type Split: Send;

    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Per-thread states, indexed by thread id
    fn splits_mut(&mut self) -> &mut [Self::Split];

    /// Completes all per-thread outputs; must run after the workers have joined
    fn finalize(&mut self) -> Result<()>;

    /// Combines the per-thread outputs into the final outputs
    fn merge(&mut self, num_splits: usize) -> Result<()>;
}

/// Naming scheme of the files of a report
///
/// Split files are named `{prefix}{category}_{split}[_{pid}].{ext}[.gz]`, final files
/// `{prefix}{category}[_{pid}].{ext}[.gz]`.
#[derive(Debug, Clone)]
pub struct OutputNaming {
    prefix: PathBuf,
    /// Suffix of every category, e.g. `_fwd`
    categories: Vec<&'static str>,
    ext: String,
    compress: bool,
    pid: Option<u32>,
}
impl OutputNaming {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(prefix: P, ext: &str, compress: bool) -> Self {
        Self {
            prefix: prefix.into(),
            categories: vec![""],
            ext: ext.to_string(),
            compress,
            pid: None,
        }
    }

    #[must_use]
    pub fn categories(mut self, categories: &[&'static str]) -> Self {
        self.categories = categories.to_vec();
        self
    }

    #[must_use]
    pub fn pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn num_out(&self) -> usize {
        self.categories.len()
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    fn path(&self, split: Option<usize>, cat: usize) -> PathBuf {
        let mut name = OsString::from(self.prefix.as_os_str());
        name.push(self.categories.get(cat).copied().unwrap_or_default());
        if let Some(split) = split {
            name.push(format!("_{split}"));
        }
        if let Some(pid) = self.pid {
            name.push(format!("_{pid}"));
        }
        name.push(".");
        name.push(&self.ext);
        if self.compress {
            name.push(".gz");
        }
        PathBuf::from(name)
    }

    /// Path of the split file of `cat` written by thread `split`
    pub fn split_path(&self, split: usize, cat: usize) -> PathBuf {
        self.path(Some(split), cat)
    }

    /// Path of the merged file of `cat`
    pub fn final_path(&self, cat: usize) -> PathBuf {
        self.path(None, cat)
    }
}

/// A single output file, optionally gzip compressed
pub struct Destination {
    path: PathBuf,
    /// `None` once finalized
    file: Option<BufWriter<File>>,
    codec: Option<StreamCodec>,
}
impl Destination {
    /// Creates (or truncates) the file at `path`
    pub fn create<P: AsRef<Path>>(path: P, compress: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| ReportError::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            file: Some(BufWriter::new(file)),
            codec: compress.then(|| StreamCodec::new(Framing::Gzip, Direction::Deflate)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn write(&mut self, text: &[u8]) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(ReportError::Closed(self.path.clone()).into());
        };
        match self.codec.as_mut() {
            Some(codec) => {
                codec.deflate_chunk(text, file, false)?;
            }
            None => file.write_all(text)?,
        }
        Ok(())
    }

    /// Finishes the compressed stream, releases the codec and closes the file
    ///
    /// Calling it again is a no-op.
    pub fn finalize(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        if let Some(codec) = self.codec.as_mut() {
            codec.finish(&mut file)?;
            codec.teardown();
        }
        file.flush()?;
        Ok(())
    }
}

/// The destinations of one worker thread, one per category
pub struct SplitSet {
    thread: usize,
    dests: Vec<Destination>,
    /// Records written per category
    written: Vec<u64>,
    scratch: Vec<u8>,
}
impl SplitSet {
    fn open(naming: &OutputNaming, thread: usize) -> Result<Self> {
        let dests = (0..naming.num_out())
            .map(|cat| Destination::create(naming.split_path(thread, cat), naming.compress()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            thread,
            written: vec![0; dests.len()],
            dests,
            scratch: Vec::with_capacity(1024),
        })
    }

    pub fn thread(&self) -> usize {
        self.thread
    }

    pub fn num_out(&self) -> usize {
        self.dests.len()
    }

    /// Records written per category
    pub fn written(&self) -> &[u64] {
        &self.written
    }

    pub fn destination(&self, cat: usize) -> Option<&Destination> {
        self.dests.get(cat)
    }

    /// Formats an entry with `fill` and writes it to the destination of `cat`
    pub fn emit<F: FnOnce(&mut Vec<u8>)>(&mut self, cat: usize, fill: F) -> Result<()> {
        let num_out = self.dests.len();
        let Some(dest) = self.dests.get_mut(cat) else {
            return Err(ReportError::UnsupportedNumOut(num_out).into());
        };
        self.scratch.clear();
        fill(&mut self.scratch);
        dest.write(&self.scratch)?;
        self.written[cat] += 1;
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.dests.iter_mut().try_for_each(Destination::finalize)
    }
}

/// All split files of one report
pub struct SplitOutput {
    naming: OutputNaming,
    sets: Vec<SplitSet>,
}
impl SplitOutput {
    /// Opens `naming.num_out()` destinations for each of `num_threads` threads
    pub fn open(naming: OutputNaming, num_threads: usize) -> Result<Self> {
        if !matches!(naming.num_out(), 1 | 2 | 4) {
            return Err(ReportError::UnsupportedNumOut(naming.num_out()).into());
        }
        let sets = (0..num_threads)
            .map(|thread| SplitSet::open(&naming, thread))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "opened {} split files with prefix {}",
            sets.len() * naming.num_out(),
            naming.prefix.display()
        );
        Ok(Self { naming, sets })
    }

    pub fn naming(&self) -> &OutputNaming {
        &self.naming
    }

    pub fn num_out(&self) -> usize {
        self.naming.num_out()
    }

    pub fn sets(&self) -> &[SplitSet] {
        &self.sets
    }

    pub fn sets_mut(&mut self) -> &mut [SplitSet] {
        &mut self.sets
    }

    /// The split set of a single thread
    pub fn split_mut(&mut self, thread: usize) -> Result<&mut SplitSet> {
        let num_splits = self.sets.len();
        self.sets
            .get_mut(thread)
            .ok_or_else(|| ReportError::ThreadOutOfRange(thread, num_splits).into())
    }

    /// Finishes and closes every split file
    pub fn finalize(&mut self) -> Result<()> {
        self.sets.iter_mut().try_for_each(SplitSet::finalize)
    }

    /// Appends splits `1..num_splits` of every category onto split 0 and renames it
    ///
    /// Split files are deleted once appended. Returns the final paths, one per category.
    pub fn merge(&mut self, num_splits: usize) -> Result<Vec<PathBuf>> {
        if num_splits == 0 || num_splits > self.sets.len() {
            return Err(ReportError::ThreadOutOfRange(num_splits, self.sets.len()).into());
        }
        self.finalize()?;

        let mut merged = Vec::with_capacity(self.num_out());
        for cat in 0..self.num_out() {
            let target = self.naming.split_path(0, cat);
            let mut out = OpenOptions::new()
                .append(true)
                .open(&target)
                .map_err(|source| ReportError::Open {
                    path: target.clone(),
                    source,
                })?;
            for split in 1..num_splits {
                let src = self.naming.split_path(split, cat);
                let mut input = File::open(&src).map_err(|source| ReportError::Open {
                    path: src.clone(),
                    source,
                })?;
                io::copy(&mut input, &mut out)?;
                info!("merged {} -> {}", src.display(), target.display());
                drop(input);
                fs::remove_file(&src)?;
                info!("deleted {}", src.display());
            }
            out.flush()?;
            drop(out);

            let dest = self.naming.final_path(cat);
            fs::rename(&target, &dest)?;
            merged.push(dest);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn naming(dir: &Path, compress: bool) -> OutputNaming {
        OutputNaming::new(dir.join("aligned"), "fq", compress).categories(&["_fwd", "_rev"])
    }

    #[test]
    fn test_naming() {
        let n = OutputNaming::new("out/aligned", "fastq", true)
            .categories(&["_paired", "_singleton"])
            .pid(Some(42));
        assert_eq!(
            n.split_path(3, 1),
            PathBuf::from("out/aligned_singleton_3_42.fastq.gz")
        );
        assert_eq!(
            n.final_path(0),
            PathBuf::from("out/aligned_paired_42.fastq.gz")
        );

        let plain = OutputNaming::new("out/aligned_denovo", "fa", false);
        assert_eq!(plain.split_path(0, 0), PathBuf::from("out/aligned_denovo_0.fa"));
        assert_eq!(plain.final_path(0), PathBuf::from("out/aligned_denovo.fa"));
    }

    #[test]
    fn test_single_writer_per_destination() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for num_out in [1, 2, 4] {
            let cats = ["_a", "_b", "_c", "_d"];
            let n = OutputNaming::new(dir.path().join(format!("n{num_out}")), "txt", false)
                .categories(&cats[..num_out]);
            let num_threads = 5;
            let mut output = SplitOutput::open(n, num_threads)?;
            std::thread::scope(|s| {
                let handles = output
                    .sets_mut()
                    .iter_mut()
                    .map(|set| {
                        s.spawn(move || -> Result<()> {
                            let thread = set.thread();
                            for cat in 0..set.num_out() {
                                let idx = linear_index(thread, cat, set.num_out());
                                set.emit(cat, |buf| {
                                    buf.extend_from_slice(format!("{idx}\n").as_bytes());
                                })?;
                            }
                            Ok(())
                        })
                    })
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .try_for_each(|handle| handle.join().unwrap())
            })?;
            output.finalize()?;
            assert_eq!(output.num_out(), num_out);
            for set in output.sets() {
                for cat in 0..num_out {
                    let dest = set.destination(cat).expect("destination per category");
                    assert_eq!(dest.path(), output.naming().split_path(set.thread(), cat));
                    assert!(!dest.is_open());
                }
                assert!(set.destination(num_out).is_none());
            }

            let mut seen = Vec::new();
            for thread in 0..num_threads {
                for cat in 0..num_out {
                    let text = fs::read_to_string(output.naming().split_path(thread, cat))?;
                    let idx: usize = text.trim().parse().unwrap();
                    assert_eq!(idx, linear_index(thread, cat, num_out));
                    seen.push(idx);
                }
            }
            seen.sort_unstable();
            assert_eq!(seen, (0..num_threads * num_out).collect::<Vec<_>>());
        }
        Ok(())
    }

    #[test]
    fn test_merge_in_split_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut output = SplitOutput::open(naming(dir.path(), false), 3)?;
        for set in output.sets_mut() {
            let thread = set.thread();
            for cat in 0..2 {
                for k in 0..2 {
                    set.emit(cat, |buf| {
                        buf.extend_from_slice(format!("t{thread}c{cat}k{k}\n").as_bytes());
                    })?;
                }
            }
        }
        output.finalize()?;
        let merged = output.merge(3)?;
        assert_eq!(merged, vec![dir.path().join("aligned_fwd.fq"), dir.path().join("aligned_rev.fq")]);

        for (cat, path) in merged.iter().enumerate() {
            let expected: String = (0..3)
                .flat_map(|t| (0..2).map(move |k| format!("t{t}c{cat}k{k}\n")))
                .collect();
            assert_eq!(fs::read_to_string(path)?, expected);
        }
        for split in 0..3 {
            for cat in 0..2 {
                assert!(!output.naming().split_path(split, cat).exists());
            }
        }
        Ok(())
    }

    #[test]
    fn test_merge_compressed_members() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut output = SplitOutput::open(naming(dir.path(), true).categories(&[""]), 2)?;
        output.split_mut(0)?.emit(0, |buf| buf.extend_from_slice(b"first\n"))?;
        output.split_mut(1)?.emit(0, |buf| buf.extend_from_slice(b"second\n"))?;
        assert!(matches!(
            output.split_mut(2),
            Err(Error::ReportError(ReportError::ThreadOutOfRange(2, 2)))
        ));
        let merged = output.merge(2)?;

        let mut text = String::new();
        MultiGzDecoder::new(File::open(&merged[0])?).read_to_string(&mut text)?;
        assert_eq!(text, "first\nsecond\n");
        Ok(())
    }

    #[test]
    fn test_write_after_finalize() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut dest = Destination::create(dir.path().join("x.txt"), true)?;
        dest.write(b"abc")?;
        dest.finalize()?;
        dest.finalize()?;
        assert!(!dest.is_open());
        assert!(matches!(
            dest.write(b"x"),
            Err(Error::ReportError(ReportError::Closed(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_unsupported_num_out() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let n = OutputNaming::new(dir.path().join("x"), "txt", false).categories(&["a", "b", "c"]);
        assert!(matches!(
            SplitOutput::open(n, 1),
            Err(Error::ReportError(ReportError::UnsupportedNumOut(3)))
        ));
        Ok(())
    }
}
