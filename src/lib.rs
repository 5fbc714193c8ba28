pub mod codec;
mod config;
mod error;
pub mod feeder;
pub mod kvdb;
mod output;
pub mod queue;
pub mod record;
pub mod reference;
pub mod report;
mod stats;

pub use codec::{Direction, Framing, StreamCodec};
pub use config::{
    PairPolicy, ReportConfig, ReportConfigBuilder, Reports, DEFAULT_MIN_COVERAGE,
    DEFAULT_MIN_IDENTITY, DEFAULT_MIN_READ_LEN,
};
pub use error::{CodecError, ConfigError, Error, FeedError, ReportError, Result, StatsError};
pub use kvdb::{KvStore, MemoryStore};
pub use output::{write_reports, Output, ReportSummary, WorkerSummary};
pub use queue::RecordQueue;
pub use record::{AlignmentHit, CachedResult, Record};
pub use reference::{ReferenceLoader, ReferencePart};
pub use stats::{QualityBucket, RunStats, RunStatsSnapshot};
