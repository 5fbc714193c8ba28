//! Reading input files into the record queue
//!
//! The [`Feeder`] runs one producer per input side. Each producer decodes its file with a
//! [`RecordParser`], attaches any classification result cached in the key-value store and
//! pushes the record into its lane of the [`RecordQueue`].

mod parser;

pub use parser::{LineSource, RecordParser};

use std::{path::PathBuf, time::Instant};

use log::{debug, warn};

use crate::{
    error::{FeedError, ReportError},
    kvdb::KvStore,
    queue::RecordQueue,
    record::{CachedResult, Record},
    Result,
};

/// Produces records from one or two input files
pub struct Feeder<'a, S: KvStore> {
    /// Forward input, and reverse input if paired
    files: &'a [PathBuf],
    store: &'a S,
}
impl<'a, S: KvStore> Feeder<'a, S> {
    pub fn new(files: &'a [PathBuf], store: &'a S) -> Result<Self> {
        if files.is_empty() || files.len() > 2 {
            return Err(FeedError::InputCount(files.len()).into());
        }
        Ok(Self { files, store })
    }

    /// Number of input sides, which is also the number of queue lanes required
    pub fn num_sides(&self) -> usize {
        self.files.len()
    }

    /// Reads every input side into `queue`, one thread per side
    ///
    /// Each side signals the queue once when it is done, whether it succeeded or not. A
    /// failing side aborts the queue so that consumers stop waiting for its records.
    ///
    /// Returns the number of records pushed per side.
    pub fn run(&self, queue: &RecordQueue) -> Result<Vec<u64>> {
        std::thread::scope(|s| {
            let handles = self
                .files
                .iter()
                .enumerate()
                .map(|(side, path)| {
                    s.spawn(move || {
                        let result = self.feed_side(side, path, queue);
                        if result.is_err() {
                            queue.abort();
                        }
                        queue.decrement_producers(side);
                        queue.notify_waiters();
                        result
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .enumerate()
                .map(|(side, handle)| {
                    handle
                        .join()
                        .map_err(|_| ReportError::WorkerPanic(side))?
                })
                .collect()
        })
    }

    fn feed_side(&self, side: usize, path: &PathBuf, queue: &RecordQueue) -> Result<u64> {
        let start = Instant::now();
        let mut parser = RecordParser::open(path, side)?;
        let mut pushed = 0;
        while let Some(mut record) = parser.next_record()? {
            self.attach_cached(&mut record)?;
            if !queue.push(record) {
                debug!("feeder {side}: queue aborted after {pushed} records");
                return Ok(pushed);
            }
            pushed += 1;
        }
        debug!(
            "feeder {side}: done in {:.2} sec, records pushed: {pushed}, queue size: {}",
            start.elapsed().as_secs_f64(),
            queue.size()
        );
        Ok(pushed)
    }

    /// Attaches the cached classification result of `record`, if any
    ///
    /// A value that cannot be decoded is treated like a miss.
    fn attach_cached(&self, record: &mut Record) -> Result<()> {
        let key = record.cache_key();
        let bytes = self.store.get(&key)?;
        if bytes.is_empty() {
            return Ok(());
        }
        match CachedResult::from_bytes(&bytes) {
            Ok(cached) => record.attach(cached),
            Err(e) => warn!("ignoring undecodable cached result for key {key}: {e}"),
        }
        Ok(())
    }
}
