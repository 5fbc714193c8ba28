//! Report generation over all reference parts
//!
//! [`write_reports`] loads every part of every reference file in turn. For each part it
//! starts the [`Feeder`] and one report worker per configured thread; the workers pull
//! fragments from the [`RecordQueue`] and append them to every active report. The input is
//! read again for every part.
//!
//! The FASTA/FASTQ reports do not depend on the reference and are only written during the
//! first part. Unless a report or the statistics need every part (tabular, SAM, BIOM or
//! uncomputed statistics), iteration stops after the first part.
//!
//! Once all parts are done, every report is finalized and merged, in the order fastx,
//! other, blast, sam, denovo, biom.

use std::time::Instant;

use log::{debug, info};

use crate::{
    config::ReportConfig,
    error::{ConfigError, ReportError},
    feeder::Feeder,
    kvdb::KvStore,
    queue::RecordQueue,
    record::Record,
    reference::{ReferenceLoader, ReferencePart},
    report::{
        BiomReport, BiomSplit, BlastReport, DenovoReport, FastxReport, OtherReport,
        ReportWriter, SamReport, SplitSet,
    },
    stats::{QualityBucket, RunStats},
    Result,
};

/// All reports requested by a configuration
#[derive(Default)]
pub struct Output {
    pub fastx: Option<FastxReport>,
    pub other: Option<OtherReport>,
    pub blast: Option<BlastReport>,
    pub sam: Option<SamReport>,
    pub denovo: Option<DenovoReport>,
    pub biom: Option<BiomReport>,
}
impl Output {
    /// Opens the split files of every requested report and writes the SAM header
    pub fn open(config: &ReportConfig) -> Result<Self> {
        let reports = &config.reports;
        let mut output = Self {
            fastx: reports.fastx.then(|| FastxReport::open(config)).transpose()?,
            other: reports.other.then(|| OtherReport::open(config)).transpose()?,
            blast: reports.blast.then(|| BlastReport::open(config)).transpose()?,
            sam: reports.sam.then(|| SamReport::open(config)).transpose()?,
            denovo: reports.denovo.then(|| DenovoReport::open(config)).transpose()?,
            biom: reports.biom.then(|| BiomReport::open(config)).transpose()?,
        };
        if let Some(sam) = output.sam.as_mut() {
            sam.write_header(&config.cmdline)?;
        }
        Ok(output)
    }

    /// Whether a report depends on every reference part
    pub fn needs_all_parts(&self) -> bool {
        self.blast.is_some() || self.sam.is_some() || self.biom.is_some()
    }

    /// Splits every report into exclusive per-thread views
    fn worker_splits(&mut self, num_threads: usize) -> Vec<WorkerSplits<'_>> {
        let mut workers: Vec<WorkerSplits<'_>> =
            (0..num_threads).map(|_| WorkerSplits::default()).collect();
        fn assign<'a, T>(
            workers: &mut [WorkerSplits<'a>],
            splits: Option<&'a mut [T]>,
            slot: impl for<'w> Fn(&'w mut WorkerSplits<'a>) -> &'w mut Option<&'a mut T>,
        ) {
            if let Some(splits) = splits {
                for (worker, split) in workers.iter_mut().zip(splits) {
                    *slot(worker) = Some(split);
                }
            }
        }
        assign(&mut workers, self.fastx.as_mut().map(|r| r.splits_mut()), |w| &mut w.fastx);
        assign(&mut workers, self.other.as_mut().map(|r| r.splits_mut()), |w| &mut w.other);
        assign(&mut workers, self.blast.as_mut().map(|r| r.splits_mut()), |w| &mut w.blast);
        assign(&mut workers, self.sam.as_mut().map(|r| r.splits_mut()), |w| &mut w.sam);
        assign(&mut workers, self.denovo.as_mut().map(|r| r.splits_mut()), |w| &mut w.denovo);
        assign(&mut workers, self.biom.as_mut().map(|r| r.splits_mut()), |w| &mut w.biom);
        workers
    }

    /// Finalizes and merges every report, in a fixed order
    pub fn finish(&mut self, num_splits: usize) -> Result<()> {
        fn finish_one<W: ReportWriter>(report: Option<&mut W>, num_splits: usize) -> Result<()> {
            if let Some(report) = report {
                report.finalize()?;
                report.merge(num_splits)?;
                info!("{} report merged from {num_splits} splits", report.name());
            }
            Ok(())
        }
        finish_one(self.fastx.as_mut(), num_splits)?;
        finish_one(self.other.as_mut(), num_splits)?;
        finish_one(self.blast.as_mut(), num_splits)?;
        finish_one(self.sam.as_mut(), num_splits)?;
        finish_one(self.denovo.as_mut(), num_splits)?;
        finish_one(self.biom.as_mut(), num_splits)
    }
}

/// The exclusive per-thread state of every active report
#[derive(Default)]
struct WorkerSplits<'a> {
    fastx: Option<&'a mut SplitSet>,
    other: Option<&'a mut SplitSet>,
    blast: Option<&'a mut SplitSet>,
    sam: Option<&'a mut SplitSet>,
    denovo: Option<&'a mut SplitSet>,
    biom: Option<&'a mut BiomSplit>,
}

/// Counters of a single report worker for one reference part
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Fragments popped from the queue
    pub fragments: u64,
    /// Fragments skipped because a record was empty or invalid
    pub invalid: u64,
}
impl std::ops::AddAssign for WorkerSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.fragments += rhs.fragments;
        self.invalid += rhs.invalid;
    }
}

/// Outcome of [`write_reports`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Reference parts processed
    pub parts: usize,
    /// Records read per input side, summed over all parts
    pub records: Vec<u64>,
    /// Worker counters summed over all threads and parts
    pub workers: WorkerSummary,
    /// Whether the run statistics were computed (rather than restored)
    pub stats_computed: bool,
}

/// Processes the fragments of one thread against the loaded reference part
struct ReportWorker<'a, 'p, P: ReferencePart> {
    tid: usize,
    splits: WorkerSplits<'a>,
    config: &'p ReportConfig,
    part: &'p P,
    /// Statistics to compute, if they were not restored
    stats: Option<&'p RunStats>,
    summary: WorkerSummary,
}
impl<P: ReferencePart> ReportWorker<'_, '_, P> {
    fn is_first_part(&self) -> bool {
        self.part.index_num() == 0 && self.part.part() == 0
    }

    fn run(mut self, queue: &RecordQueue) -> Result<WorkerSummary> {
        debug!(
            "report worker {} started on reference {} part {}",
            self.tid,
            self.part.index_num(),
            self.part.part()
        );
        while let Some(fragment) = queue.pop_fragment()? {
            self.process_fragment(&fragment)?;
        }
        debug!(
            "report worker {} done, fragments: {} invalid: {}",
            self.tid, self.summary.fragments, self.summary.invalid
        );
        Ok(self.summary)
    }

    fn process_fragment(&mut self, fragment: &[Record]) -> Result<()> {
        self.summary.fragments += 1;
        if fragment.iter().any(|record| !record.is_valid()) {
            self.summary.invalid += 1;
            return Ok(());
        }
        if let Some(stats) = self.stats {
            self.collect_stats(stats, fragment);
        }

        let (config, part) = (self.config, self.part);
        if self.is_first_part() {
            if let Some(split) = self.splits.fastx.as_deref_mut() {
                FastxReport::append(split, &config.pairing, fragment)?;
            }
            if let Some(split) = self.splits.other.as_deref_mut() {
                OtherReport::append(split, &config.pairing, fragment)?;
            }
            if let Some(split) = self.splits.denovo.as_deref_mut() {
                DenovoReport::append(split, fragment)?;
            }
        }
        for record in fragment {
            if let Some(split) = self.splits.blast.as_deref_mut() {
                BlastReport::append(split, part, record)?;
            }
            if let Some(split) = self.splits.sam.as_deref_mut() {
                SamReport::append(split, part, record, config.print_all_reads)?;
            }
            if let Some(split) = self.splits.biom.as_deref_mut() {
                BiomReport::append(split, part, record);
            }
        }
        Ok(())
    }

    /// Read counters are taken during the first part, the alignment buckets while the part
    /// holding a read's primary alignment is loaded
    fn collect_stats(&self, stats: &RunStats, fragment: &[Record]) {
        let first_part = self.is_first_part();
        for record in fragment {
            let len = record.sequence().len() as u32;
            if first_part {
                stats.add_read(len);
                if len < self.config.min_read_len {
                    stats.add_short();
                }
                if record.is_denovo {
                    stats.add_denovo();
                }
            }
            let Some(primary) = record.hits.first() else {
                continue;
            };
            if !record.is_hit || !primary.is_on(self.part.index_num(), self.part.part()) {
                continue;
            }
            let identity = self.part.edit_stats(record, primary).identity();
            let covered = (primary.read_end + 1).saturating_sub(primary.read_begin);
            let coverage = f64::from(covered) / f64::from(len.max(1));
            stats.add_aligned(
                usize::from(primary.index_num),
                QualityBucket::classify(
                    identity >= self.config.min_identity,
                    coverage >= self.config.min_coverage,
                ),
            );
        }
    }
}

/// Runs the feeder and the report workers over one loaded reference part
fn report_part<P: ReferencePart, S: KvStore>(
    config: &ReportConfig,
    output: &mut Output,
    part: &P,
    store: &S,
    stats: Option<&RunStats>,
) -> Result<(Vec<u64>, WorkerSummary)> {
    let feeder = Feeder::new(&config.files, store)?;
    let queue = RecordQueue::new(feeder.num_sides(), config.queue_capacity);
    let workers = output.worker_splits(config.num_threads);

    std::thread::scope(|s| {
        let feed = s.spawn(|| feeder.run(&queue));
        let handles = workers
            .into_iter()
            .enumerate()
            .map(|(tid, splits)| {
                let worker = ReportWorker {
                    tid,
                    splits,
                    config,
                    part,
                    stats,
                    summary: WorkerSummary::default(),
                };
                let queue = &queue;
                s.spawn(move || {
                    let result = worker.run(queue);
                    if result.is_err() {
                        queue.abort();
                    }
                    result
                })
            })
            .collect::<Vec<_>>();

        let mut summary = WorkerSummary::default();
        let mut worker_error = None;
        for (tid, handle) in handles.into_iter().enumerate() {
            let result = handle.join().unwrap_or_else(|_| {
                queue.abort();
                Err(ReportError::WorkerPanic(tid).into())
            });
            match result {
                Ok(worker) => summary += worker,
                Err(e) => {
                    worker_error.get_or_insert(e);
                }
            }
        }

        // a feeder failure aborts the queue and is the root cause of any worker error
        let records = feed
            .join()
            .unwrap_or_else(|_| Err(ReportError::WorkerPanic(config.num_threads).into()))?;
        match worker_error {
            Some(e) => Err(e),
            None => Ok((records, summary)),
        }
    })
}

/// Writes all requested reports
///
/// The configuration and the statistics must cover as many reference files as the loader.
/// The statistics are computed along the way unless they were restored from the store, in
/// which case they are left untouched. Computed statistics are stored once all reports are
/// merged.
pub fn write_reports<L, S>(
    config: &ReportConfig,
    loader: &mut L,
    store: &S,
    stats: &RunStats,
) -> Result<ReportSummary>
where
    L: ReferenceLoader,
    S: KvStore,
{
    let num_refs = loader.num_refs();
    let counts = [
        ("configuration", config.num_refs),
        ("statistics", stats.num_refs()),
    ];
    for (source_name, found) in counts {
        if found != num_refs {
            return Err(ConfigError::RefCountMismatch {
                source_name,
                expected: num_refs,
                found,
            }
            .into());
        }
    }

    info!("=== Report generation starts ===");
    let mut output = Output::open(config)?;
    let compute_stats = !stats.is_complete();
    let all_parts = output.needs_all_parts() || compute_stats;

    let mut summary = ReportSummary {
        records: vec![0; config.files.len()],
        stats_computed: compute_stats,
        ..ReportSummary::default()
    };
    'refs: for index_num in 0..loader.num_refs() {
        let num_parts = loader.num_parts(index_num);
        for part_num in 0..num_parts {
            info!(
                "Loading reference {index_num} part {}/{num_parts} ...",
                part_num + 1
            );
            let start = Instant::now();
            let part = loader.load(index_num, part_num)?;
            info!("done. Elapsed sec [{:.2}]", start.elapsed().as_secs_f64());

            let start = Instant::now();
            let (records, workers) = report_part(
                config,
                &mut output,
                &part,
                store,
                compute_stats.then_some(stats),
            )?;
            drop(part);
            info!(
                "Done reference {index_num} part {} Elapsed sec: {:.2}",
                part_num + 1,
                start.elapsed().as_secs_f64()
            );
            debug!("references unloaded");

            summary.parts += 1;
            summary.workers += workers;
            for (total, n) in summary.records.iter_mut().zip(records) {
                *total += n;
            }
            if !all_parts {
                break 'refs;
            }
        }
    }

    output.finish(config.num_splits())?;
    if compute_stats {
        stats.set_stats_calc();
        stats.set_aligned_id_cov();
        stats.store(store)?;
    }
    info!("=== Done Reports ===");
    Ok(summary)
}
