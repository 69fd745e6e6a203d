//! Driving the external placement engine.
//!
//! A request goes to the long-lived server over its Unix socket when one is
//! configured, with a retry and a server start in between, and falls back to a
//! standalone subprocess. Results are read back from the engine's output
//! directory.

use std::path::PathBuf;

use thiserror::Error;

mod client;
mod daemon;
mod outdir;
mod protocol;
mod results;

pub use client::{
    Attempt, PlacementBackend, PlacementClient, PlacementRun, RetryReason, SocketOutcome,
    SystemBackend, Via,
};
pub use daemon::{parse_proc_stat, DaemonError, DaemonPaths, DaemonSupervisor, ProcessState};
pub use outdir::{scan_output_dir, OutputFiles, SubtreeFiles, MAX_SUBTREES};
pub use protocol::{
    classify_reply, EngineCommand, ServerReply, ANCHOR_SAMPLES, DEFAULT_THREADS,
    END_OF_TRANSMISSION, NO_IGNORE_PREFIX, THREADS_FLAG,
};
pub use results::{
    load_placements, parse_clades, parse_engine_stderr, parse_imputed, parse_mutation_paths,
    parse_pipey_path, parse_placement_stats, reconcile_sample_ids, BestNode, ImputedBase,
    PathNode, PlacementInfo, PlacementResults, Placements, PollReport, StabilityPoll,
    PLACEMENT_STATS_FILE,
};

/// Errors from running the placement engine or reading its output.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// A file or directory could not be read or written.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Server management failed.
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// The standalone engine exited unsuccessfully.
    #[error("placement engine failed ({status}); see {stderr}")]
    EngineFailed {
        /// Exit status description.
        status: String,
        /// Captured diagnostics.
        stderr: PathBuf,
    },

    /// Engine output did not have the expected shape.
    #[error("problem parsing placement engine output {path} line {line}: {message}")]
    Protocol {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Problem description.
        message: String,
    },

    /// A numbered subtree is missing one of its files.
    #[error("missing file {name} in placement engine results {dir}")]
    MissingFile {
        /// Expected file name.
        name: String,
        /// Output directory.
        dir: PathBuf,
    },

    /// More subtrees than supported.
    #[error("too many subtrees in placement engine output (max {max})")]
    TooManySubtrees {
        /// Limit.
        max: usize,
    },
}
