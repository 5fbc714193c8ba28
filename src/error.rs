use std::path::PathBuf;

/// Custom Result type for readmux operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the readmux library, encompassing all possible error cases
/// that can occur while feeding reads, writing reports, or persisting statistics.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub enum Error {
    /// Errors raised by the chunked inflate/deflate engine
    CodecError(#[from] CodecError),
    /// Errors raised while reading and decoding input records
    FeedError(#[from] FeedError),
    /// Errors raised while routing, writing or merging report outputs
    ReportError(#[from] ReportError),
    /// Errors raised while decoding cached run statistics
    StatsError(#[from] StatsError),
    /// Invalid report configuration
    ConfigError(#[from] ConfigError),
    /// Standard I/O errors from the Rust standard library
    IoError(#[from] std::io::Error),
    /// BIOM table serialization errors
    JsonError(#[from] serde_json::Error),
    /// Generic errors raised by collaborators (reference loaders, key-value stores)
    AnyhowError(#[from] anyhow::Error),
}

/// Errors raised by the chunked inflate/deflate engine
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    /// The compressed input stream is malformed
    #[error("Failed inflating input stream: {0}")]
    Inflate(#[from] flate2::DecompressError),

    /// The deflate engine rejected the payload
    ///
    /// # Fields
    /// * `source` - The underlying engine error
    /// * `payload` - A prefix of the text that was being deflated
    #[error("Failed deflating payload [{payload}]: {source}")]
    Deflate {
        source: flate2::CompressError,
        payload: String,
    },

    /// The compressed input ended before the end of the last stream member
    ///
    /// # Arguments
    /// * `u64` - Number of compressed bytes consumed before the input ran out
    #[error("Compressed stream is truncated after {0} bytes")]
    Truncated(u64),

    /// The session was used before `init` or after `teardown`
    #[error("Codec session is not initialized")]
    NotInitialized,

    /// An inflate call was made on a deflate session or vice versa
    #[error("Codec session was initialized for {0}")]
    WrongDirection(&'static str),
}

/// Errors raised while reading and decoding input records
#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    /// An input file could not be opened
    #[error("Failed to open input file [{path}]: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record in the input could not be decoded
    ///
    /// # Fields
    /// * `path` - The input file
    /// * `line` - 1-based line number at which decoding failed
    /// * `reason` - Human readable description
    #[error("Malformed record in [{path}] at line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: &'static str,
    },

    /// One side of a paired input ran out of records before the other
    ///
    /// # Arguments
    /// * `usize` - Index of the input side with leftover records
    /// * `usize` - Number of leftover records on that side
    #[error("Paired inputs are unbalanced: side {0} has {1} unmatched records")]
    Unbalanced(usize, usize),

    /// The feeder was configured with an unsupported number of inputs
    #[error("Expected 1 or 2 input files, got {0}")]
    InputCount(usize),
}

/// Errors raised while routing, writing or merging report outputs
#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    /// The two records handed to a paired append do not belong together
    #[error(
        "Paired validation failed: reads[0].id= {id0} read_num= {num0} file= {file0} \
         reads[1].id= {id1} read_num= {num1} file= {file1}"
    )]
    PairingViolation {
        id0: String,
        num0: u64,
        file0: usize,
        id1: String,
        num1: u64,
        file1: usize,
    },

    /// The fan-out is not one of 1, 2 or 4
    #[error("Number of output files must be 1, 2 or 4. The current value is {0}")]
    UnsupportedNumOut(usize),

    /// A thread id outside of the configured split range was used
    ///
    /// # Arguments
    /// * `usize` - The offending thread id
    /// * `usize` - Number of configured splits
    #[error("Thread id {0} is out of the split range ({1})")]
    ThreadOutOfRange(usize, usize),

    /// A report destination could not be opened
    #[error("Failed to open output file [{path}]: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A destination was written after it was finalized
    #[error("Output file [{0}] is already closed")]
    Closed(PathBuf),

    /// A report worker thread panicked
    ///
    /// # Arguments
    /// * `usize` - The thread id of the worker
    #[error("Worker thread {0} panicked")]
    WorkerPanic(usize),
}

/// Errors raised while decoding cached run statistics
#[derive(thiserror::Error, Debug)]
pub enum StatsError {
    /// The cached payload is shorter than its own layout requires
    ///
    /// # Fields
    /// * `needed` - Bytes required to decode the next field
    /// * `available` - Bytes remaining in the payload
    #[error("Cached statistics are truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
}

/// Invalid report configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// No input files were provided
    #[error("At least one input file is required")]
    MissingInput,

    /// More than two input files were provided
    #[error("At most two input files are supported, got {0}")]
    TooManyInputs(usize),

    /// The aligned output prefix was not provided
    #[error("Missing aligned output prefix")]
    MissingAlignedPrefix,

    /// Paired-in and paired-out were both requested
    #[error("paired_in and paired_out are mutually exclusive")]
    PairedInAndOut,

    /// A pairing option was used with a single-ended input
    ///
    /// # Arguments
    /// * `&'static str` - Name of the option
    #[error("Option {0} requires paired input")]
    RequiresPaired(&'static str),

    /// The thread count was zero
    #[error("Number of threads must be positive")]
    ZeroThreads,

    /// The queue capacity was zero
    #[error("Queue capacity must be positive")]
    ZeroCapacity,

    /// The configuration or the statistics disagree with the loader on the reference count
    #[error("{source_name} expects {found} reference files, the loader has {expected}")]
    RefCountMismatch {
        source_name: &'static str,
        expected: usize,
        found: usize,
    },
}
