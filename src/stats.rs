//! Run-level read statistics and their cached binary form
//!
//! [`RunStats`] holds the aggregate counters of a run. Workers update them concurrently with
//! relaxed atomic increments; the values are only meaningful once every worker has joined,
//! which is when a [`RunStatsSnapshot`] should be taken.
//!
//! Snapshots are persisted in a key-value store under a key derived from the input file
//! names, so that rerunning the pipeline over the same inputs can skip recomputation.
//!
//! # Binary layout
//!
//! All integers are little-endian.
//!
//! | Field | Width |
//! |---|---|
//! | record count | 8 |
//! | total length | 8 |
//! | min length | 4 |
//! | max length | 4 |
//! | aligned count | 8 |
//! | id only, cov only, id+cov, neither (quality buckets, in [`QualityBucket`] order) | 4 x 8 |
//! | de-novo count | 8 |
//! | short count | 8 |
//! | matched-per-reference length `n` | 8 |
//! | matched-per-reference entries | n x 8 |
//! | stats computed | 1 |
//! | aligned id/cov computed | 1 |

use std::fmt;
use std::hash::Hasher;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};
use twox_hash::XxHash64;

use crate::{error::StatsError, kvdb::KvStore, Result};

/// Size of the fixed part of the encoding (everything but the per-reference vector)
pub const SIZE_FIXED: usize = 8 + 8 + 4 + 4 + 8 + 4 * 8 + 8 + 8 + 8 + 1 + 1;

/// Seed of the cache key hash
const KEY_SEED: u64 = 0;

/// Identity/coverage outcome of an accepted alignment
///
/// The discriminant is the position of the bucket's counter in the encoded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityBucket {
    /// Passed the identity threshold only
    IdOnly = 0,
    /// Passed the coverage threshold only
    CovOnly = 1,
    /// Passed both the identity and the coverage threshold
    IdCov = 2,
    /// Passed neither threshold
    Neither = 3,
}
impl QualityBucket {
    #[must_use]
    pub fn classify(identity_ok: bool, coverage_ok: bool) -> Self {
        match (identity_ok, coverage_ok) {
            (true, true) => Self::IdCov,
            (true, false) => Self::IdOnly,
            (false, true) => Self::CovOnly,
            (false, false) => Self::Neither,
        }
    }
}

/// Plain copy of the counters of a [`RunStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatsSnapshot {
    pub all_reads_count: u64,
    pub all_reads_len: u64,
    pub min_read_len: u32,
    pub max_read_len: u32,
    pub num_aligned: u64,
    /// Counts per [`QualityBucket`], in declaration order
    pub buckets: [u64; 4],
    pub num_denovo: u64,
    pub num_short: u64,
    pub reads_matched_per_db: Vec<u64>,
    pub is_stats_calc: bool,
    pub is_set_aligned_id_cov: bool,
}
impl RunStatsSnapshot {
    /// Encodes the snapshot using the fixed field order of the module documentation
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SIZE_FIXED + 8 * self.reads_matched_per_db.len()];
        let mut pos = 0;
        put_u64(&mut buf, &mut pos, self.all_reads_count);
        put_u64(&mut buf, &mut pos, self.all_reads_len);
        LittleEndian::write_u32(&mut buf[pos..pos + 4], self.min_read_len);
        LittleEndian::write_u32(&mut buf[pos + 4..pos + 8], self.max_read_len);
        pos += 8;
        put_u64(&mut buf, &mut pos, self.num_aligned);
        for &bucket in &self.buckets {
            put_u64(&mut buf, &mut pos, bucket);
        }
        put_u64(&mut buf, &mut pos, self.num_denovo);
        put_u64(&mut buf, &mut pos, self.num_short);
        put_u64(&mut buf, &mut pos, self.reads_matched_per_db.len() as u64);
        for &matched in &self.reads_matched_per_db {
            put_u64(&mut buf, &mut pos, matched);
        }
        buf[pos] = u8::from(self.is_stats_calc);
        buf[pos + 1] = u8::from(self.is_set_aligned_id_cov);
        buf
    }

    /// Decodes a snapshot for a run configured with `num_refs` reference files
    ///
    /// Returns `Ok(None)` when the stored per-reference vector has a different length, in
    /// which case none of the stored values are usable.
    pub fn decode(bytes: &[u8], num_refs: usize) -> Result<Option<Self>> {
        let mut fields = FieldReader::new(bytes);
        let all_reads_count = fields.u64()?;
        let all_reads_len = fields.u64()?;
        let min_read_len = fields.u32()?;
        let max_read_len = fields.u32()?;
        let num_aligned = fields.u64()?;
        let buckets = [fields.u64()?, fields.u64()?, fields.u64()?, fields.u64()?];
        let num_denovo = fields.u64()?;
        let num_short = fields.u64()?;
        let stored_refs = fields.u64()?;
        if stored_refs != num_refs as u64 {
            warn!(
                "reads_matched_per_db.size stored in DB: {stored_refs} doesn't match the number of reference files: {num_refs}"
            );
            return Ok(None);
        }
        let reads_matched_per_db = (0..num_refs)
            .map(|_| fields.u64())
            .collect::<Result<Vec<_>>>()?;
        let is_stats_calc = fields.u8()? != 0;
        let is_set_aligned_id_cov = fields.u8()? != 0;
        Ok(Some(Self {
            all_reads_count,
            all_reads_len,
            min_read_len,
            max_read_len,
            num_aligned,
            buckets,
            num_denovo,
            num_short,
            reads_matched_per_db,
            is_stats_calc,
            is_set_aligned_id_cov,
        }))
    }
}

fn put_u64(buf: &mut [u8], pos: &mut usize, val: u64) {
    LittleEndian::write_u64(&mut buf[*pos..*pos + 8], val);
    *pos += 8;
}

/// Bounds-checked sequential reader over an encoded snapshot
struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}
impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.bytes.len() - self.pos;
        if available < n {
            return Err(StatsError::Truncated {
                needed: n,
                available,
            }
            .into());
        }
        let field = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(field)
    }

    fn u64(&mut self) -> Result<u64> {
        self.take(8).map(LittleEndian::read_u64)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take(4).map(LittleEndian::read_u32)
    }

    fn u8(&mut self) -> Result<u8> {
        self.take(1).map(|b| b[0])
    }
}

/// Derives the cache key of a run from the base names of its input files
///
/// The base names are joined with `_` and hashed, so moving the inputs to another
/// directory keeps the key.
pub fn cache_key<P: AsRef<Path>>(files: &[P]) -> String {
    let joined = files
        .iter()
        .map(|f| {
            f.as_ref()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join("_");
    let mut hasher = XxHash64::with_seed(KEY_SEED);
    hasher.write(joined.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Aggregate counters of a run
#[derive(Debug)]
pub struct RunStats {
    all_reads_count: AtomicU64,
    all_reads_len: AtomicU64,
    min_read_len: AtomicU32,
    max_read_len: AtomicU32,
    num_aligned: AtomicU64,
    buckets: [AtomicU64; 4],
    num_denovo: AtomicU64,
    num_short: AtomicU64,
    reads_matched_per_db: Vec<AtomicU64>,
    is_stats_calc: AtomicBool,
    is_set_aligned_id_cov: AtomicBool,

    /// Cache key of the run
    dbkey: String,
}
impl RunStats {
    /// Creates zeroed statistics for a run over `files` with `num_refs` reference files
    pub fn new<P: AsRef<Path>>(num_refs: usize, files: &[P]) -> Self {
        Self {
            all_reads_count: AtomicU64::new(0),
            all_reads_len: AtomicU64::new(0),
            min_read_len: AtomicU32::new(u32::MAX),
            max_read_len: AtomicU32::new(0),
            num_aligned: AtomicU64::new(0),
            buckets: Default::default(),
            num_denovo: AtomicU64::new(0),
            num_short: AtomicU64::new(0),
            reads_matched_per_db: (0..num_refs).map(|_| AtomicU64::new(0)).collect(),
            is_stats_calc: AtomicBool::new(false),
            is_set_aligned_id_cov: AtomicBool::new(false),
            dbkey: cache_key(files),
        }
    }

    /// Creates the statistics of a run and restores them from `store` if possible
    ///
    /// Returns the statistics and whether a usable snapshot was restored.
    pub fn open<P: AsRef<Path>, S: KvStore>(
        num_refs: usize,
        files: &[P],
        store: &S,
    ) -> Result<(Self, bool)> {
        let stats = Self::new(num_refs, files);
        let restored = stats.restore(store)?;
        if restored && stats.is_complete() {
            info!(
                "Found reads statistics in the KVDB: all_reads_count= {} all_reads_len= {}",
                stats.all_reads_count.load(Ordering::Relaxed),
                stats.all_reads_len.load(Ordering::Relaxed)
            );
        }
        Ok((stats, restored))
    }

    pub fn dbkey(&self) -> &str {
        &self.dbkey
    }

    pub fn num_refs(&self) -> usize {
        self.reads_matched_per_db.len()
    }

    /// Restores the counters from `store`
    ///
    /// Absent, truncated or mismatched entries are cache misses: a warning is logged, the
    /// counters are left untouched and `false` is returned.
    pub fn restore<S: KvStore>(&self, store: &S) -> Result<bool> {
        let bytes = store.get(&self.dbkey)?;
        if bytes.is_empty() {
            warn!("No reads statistics found in the KVDB under key {}", self.dbkey);
            return Ok(false);
        }
        match RunStatsSnapshot::decode(&bytes, self.num_refs()) {
            Ok(Some(snapshot)) => {
                self.adopt(&snapshot);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(crate::Error::StatsError(e)) => {
                warn!("Ignoring cached reads statistics under key {}: {e}", self.dbkey);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stores the current counters under the run's key
    ///
    /// Must only be called after all workers updating the counters have joined.
    pub fn store<S: KvStore>(&self, store: &S) -> Result<()> {
        store.put(&self.dbkey, &self.snapshot().encode())?;
        info!("Stored Reads statistics to DB:\n    {self}");
        Ok(())
    }

    /// Whether the read count and total length are known
    pub fn is_complete(&self) -> bool {
        self.all_reads_count.load(Ordering::Relaxed) > 0
            && self.all_reads_len.load(Ordering::Relaxed) > 0
    }

    /// Copies the counters into a plain snapshot
    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            all_reads_count: self.all_reads_count.load(Ordering::Relaxed),
            all_reads_len: self.all_reads_len.load(Ordering::Relaxed),
            min_read_len: self.min_read_len.load(Ordering::Relaxed),
            max_read_len: self.max_read_len.load(Ordering::Relaxed),
            num_aligned: self.num_aligned.load(Ordering::Relaxed),
            buckets: std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed)),
            num_denovo: self.num_denovo.load(Ordering::Relaxed),
            num_short: self.num_short.load(Ordering::Relaxed),
            reads_matched_per_db: self
                .reads_matched_per_db
                .iter()
                .map(|m| m.load(Ordering::Relaxed))
                .collect(),
            is_stats_calc: self.is_stats_calc.load(Ordering::Relaxed),
            is_set_aligned_id_cov: self.is_set_aligned_id_cov.load(Ordering::Relaxed),
        }
    }

    fn adopt(&self, snapshot: &RunStatsSnapshot) {
        self.all_reads_count
            .store(snapshot.all_reads_count, Ordering::Relaxed);
        self.all_reads_len
            .store(snapshot.all_reads_len, Ordering::Relaxed);
        self.min_read_len
            .store(snapshot.min_read_len, Ordering::Relaxed);
        self.max_read_len
            .store(snapshot.max_read_len, Ordering::Relaxed);
        self.num_aligned
            .store(snapshot.num_aligned, Ordering::Relaxed);
        for (bucket, &val) in self.buckets.iter().zip(&snapshot.buckets) {
            bucket.store(val, Ordering::Relaxed);
        }
        self.num_denovo.store(snapshot.num_denovo, Ordering::Relaxed);
        self.num_short.store(snapshot.num_short, Ordering::Relaxed);
        for (matched, &val) in self
            .reads_matched_per_db
            .iter()
            .zip(&snapshot.reads_matched_per_db)
        {
            matched.store(val, Ordering::Relaxed);
        }
        self.is_stats_calc
            .store(snapshot.is_stats_calc, Ordering::Relaxed);
        self.is_set_aligned_id_cov
            .store(snapshot.is_set_aligned_id_cov, Ordering::Relaxed);
    }

    /// Counts one input read of the given length
    pub fn add_read(&self, len: u32) {
        self.all_reads_count.fetch_add(1, Ordering::Relaxed);
        self.all_reads_len
            .fetch_add(u64::from(len), Ordering::Relaxed);
        self.min_read_len.fetch_min(len, Ordering::Relaxed);
        self.max_read_len.fetch_max(len, Ordering::Relaxed);
    }

    /// Counts one accepted read matched against reference file `index_num`
    pub fn add_aligned(&self, index_num: usize, bucket: QualityBucket) {
        self.num_aligned.fetch_add(1, Ordering::Relaxed);
        self.buckets[bucket as usize].fetch_add(1, Ordering::Relaxed);
        if let Some(matched) = self.reads_matched_per_db.get(index_num) {
            matched.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_denovo(&self) {
        self.num_denovo.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_short(&self) {
        self.num_short.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks the read statistics as fully computed
    pub fn set_stats_calc(&self) {
        self.is_stats_calc.store(true, Ordering::Relaxed);
    }

    /// Marks the aligned id/cov counters as computed once any id+cov read was counted
    pub fn set_aligned_id_cov(&self) {
        if self.buckets[QualityBucket::IdCov as usize].load(Ordering::Relaxed) > 0 {
            self.is_set_aligned_id_cov.store(true, Ordering::Relaxed);
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.snapshot();
        write!(
            f,
            "all_reads_count= {} all_reads_len= {} min_read_len= {} max_read_len= {} \
             total_aligned= {} total_aligned_id= {} total_aligned_cov= {} total_aligned_id_cov= {} \
             total_aligned_neither= {} total_denovo= {} num_short= {} reads_matched_per_db= {:?} \
             is_stats_calc= {} is_total_reads_mapped_cov= {}",
            s.all_reads_count,
            s.all_reads_len,
            if s.all_reads_count == 0 { 0 } else { s.min_read_len },
            s.max_read_len,
            s.num_aligned,
            s.buckets[0],
            s.buckets[1],
            s.buckets[2],
            s.buckets[3],
            s.num_denovo,
            s.num_short,
            s.reads_matched_per_db,
            s.is_stats_calc,
            s.is_set_aligned_id_cov,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvdb::MemoryStore;
    use crate::Error;

    fn sample(num_refs: usize) -> RunStatsSnapshot {
        RunStatsSnapshot {
            all_reads_count: 1_000_003,
            all_reads_len: u64::MAX - 7,
            min_read_len: 35,
            max_read_len: u32::MAX,
            num_aligned: 999,
            buckets: [1, 2, 3, 4],
            num_denovo: 5,
            num_short: 6,
            reads_matched_per_db: (0..num_refs as u64).map(|i| i * 11 + 1).collect(),
            is_stats_calc: true,
            is_set_aligned_id_cov: false,
        }
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(sample(0).encode().len(), 90);
        assert_eq!(sample(3).encode().len(), 90 + 24);
    }

    #[test]
    fn test_round_trip_matching_refs() -> Result<()> {
        for k in [0, 1, 2, 7] {
            let snapshot = sample(k);
            let decoded = RunStatsSnapshot::decode(&snapshot.encode(), k)?;
            assert_eq!(decoded, Some(snapshot));
        }
        Ok(())
    }

    #[test]
    fn test_mismatched_refs_is_a_miss() -> Result<()> {
        let bytes = sample(2).encode();
        assert_eq!(RunStatsSnapshot::decode(&bytes, 3)?, None);
        assert_eq!(RunStatsSnapshot::decode(&bytes, 1)?, None);
        Ok(())
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = sample(2).encode();
        let result = RunStatsSnapshot::decode(&bytes[..bytes.len() - 1], 2);
        assert!(matches!(
            result,
            Err(Error::StatsError(StatsError::Truncated {
                needed: 1,
                available: 0
            }))
        ));
    }

    #[test]
    fn test_cache_key_uses_base_names() {
        let a = cache_key(&["/data/run1/fwd.fq.gz", "/data/run1/rev.fq.gz"]);
        let b = cache_key(&["/elsewhere/fwd.fq.gz", "rev.fq.gz"]);
        let c = cache_key(&["rev.fq.gz", "fwd.fq.gz"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_bucket_positions() {
        let stats = RunStats::new(1, &["reads.fq"]);
        stats.add_aligned(0, QualityBucket::classify(true, false));
        stats.add_aligned(0, QualityBucket::classify(false, true));
        stats.add_aligned(0, QualityBucket::classify(false, true));
        stats.add_aligned(0, QualityBucket::classify(true, true));
        stats.add_aligned(0, QualityBucket::classify(true, true));
        stats.add_aligned(0, QualityBucket::classify(true, true));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.buckets, [1, 2, 3, 0]);

        // id only, cov only and id+cov follow the aligned count
        let bytes = snapshot.encode();
        let at = |i: usize| LittleEndian::read_u64(&bytes[32 + 8 * i..40 + 8 * i]);
        assert_eq!([at(0), at(1), at(2), at(3)], [1, 2, 3, 0]);
        let text = stats.to_string();
        assert!(text.contains("total_aligned_id= 1 total_aligned_cov= 2 total_aligned_id_cov= 3"));
    }

    #[test]
    fn test_store_and_restore() -> Result<()> {
        let store = MemoryStore::new();
        let files = ["reads.fq"];

        let (stats, restored) = RunStats::open(2, &files, &store)?;
        assert!(!restored);
        stats.add_read(100);
        stats.add_read(50);
        stats.add_aligned(1, QualityBucket::IdCov);
        stats.add_denovo();
        stats.set_aligned_id_cov();
        stats.set_stats_calc();
        stats.store(&store)?;

        let (again, restored) = RunStats::open(2, &files, &store)?;
        assert!(restored);
        assert_eq!(again.snapshot(), stats.snapshot());
        assert_eq!(again.snapshot().min_read_len, 50);
        assert_eq!(again.snapshot().reads_matched_per_db, vec![0, 1]);
        assert!(again.snapshot().is_set_aligned_id_cov);

        // a different reference configuration does not adopt anything
        let (other, restored) = RunStats::open(3, &files, &store)?;
        assert!(!restored);
        assert_eq!(other.snapshot().all_reads_count, 0);
        Ok(())
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = RunStats::new(1, &["a.fa"]);
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let stats = &stats;
                s.spawn(move || {
                    for i in 0..1000u32 {
                        stats.add_read(t * 1000 + i + 1);
                        stats.add_aligned(0, QualityBucket::Neither);
                    }
                });
            }
        });
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.all_reads_count, 4000);
        assert_eq!(snapshot.all_reads_len, (1..=4000u64).sum::<u64>());
        assert_eq!(snapshot.min_read_len, 1);
        assert_eq!(snapshot.max_read_len, 4000);
        assert_eq!(snapshot.reads_matched_per_db, vec![4000]);
        assert_eq!(snapshot.buckets, [0, 0, 0, 4000]);
    }
}
