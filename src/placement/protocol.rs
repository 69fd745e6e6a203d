//! Placement-engine command line and the daemon's line-oriented socket protocol.

use std::fmt;
use std::path::{Path, PathBuf};

/// Line sent by the daemon once a request is complete.
pub const END_OF_TRANSMISSION: &str = "\u{4}";

/// Thread-count flag; the daemon rejects it and everything after it.
pub const THREADS_FLAG: &str = "-T";

/// Directive telling the daemon not to strip the upload prefix from names.
pub const NO_IGNORE_PREFIX: &str = "--no-ignore-prefix";

/// Directive naming a file of anchor samples the daemon should keep in subtrees.
pub const ANCHOR_SAMPLES: &str = "--anchor-samples";

const STALE_TREE_PREFIX: &str = "Tree";
const STALE_TREE_SUFFIX: &str = "not found";

/// Default number of engine threads for standalone runs.
pub const DEFAULT_THREADS: usize = 16;

/// Full argument list of one placement-engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    program: PathBuf,
    args: Vec<String>,
    out_dir: PathBuf,
}

impl EngineCommand {
    /// Place the samples of `vcf` into `tree`, writing results under `out_dir`
    /// with subtrees of `subtree_size` leaves.
    pub fn placement(
        program: impl Into<PathBuf>,
        vcf: &Path,
        tree: &Path,
        out_dir: &Path,
        subtree_size: usize,
        threads: usize,
    ) -> Self {
        Self::build(program.into(), vcf, tree, out_dir, subtree_size, None, threads)
    }

    /// Like [`EngineCommand::placement`] but also asks for one subtree of
    /// `single_size` leaves that holds every uploaded sample.
    pub fn placement_with_single_subtree(
        program: impl Into<PathBuf>,
        vcf: &Path,
        tree: &Path,
        out_dir: &Path,
        subtree_size: usize,
        single_size: usize,
        threads: usize,
    ) -> Self {
        Self::build(
            program.into(),
            vcf,
            tree,
            out_dir,
            subtree_size,
            Some(single_size),
            threads,
        )
    }

    fn build(
        program: PathBuf,
        vcf: &Path,
        tree: &Path,
        out_dir: &Path,
        subtree_size: usize,
        single_size: Option<usize>,
        threads: usize,
    ) -> Self {
        let mut args = vec![
            "-v".to_string(),
            vcf.display().to_string(),
            "-i".to_string(),
            tree.display().to_string(),
            "-d".to_string(),
            out_dir.display().to_string(),
            "-k".to_string(),
            subtree_size.to_string(),
        ];
        if let Some(size) = single_size {
            args.push("-K".to_string());
            args.push(size.to_string());
        }
        args.extend([
            THREADS_FLAG.to_string(),
            threads.to_string(),
            "-u".to_string(),
            "-l".to_string(),
        ]);
        Self {
            program,
            args,
            out_dir: out_dir.to_path_buf(),
        }
    }

    /// Engine executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments in invocation order.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Directory the engine writes its result files into.
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Request text for the daemon: one argument per line up to the thread
    /// flag, the upload-prefix directive, the optional anchor-sample file and a
    /// terminating blank line.
    pub fn to_socket_message(&self, sample_prefix: &str, anchor_samples: Option<&Path>) -> String {
        let mut message = String::new();
        for arg in self.args.iter().take_while(|arg| *arg != THREADS_FLAG) {
            message.push_str(arg);
            message.push('\n');
        }
        message.push_str(NO_IGNORE_PREFIX);
        message.push('\n');
        message.push_str(sample_prefix);
        message.push('\n');
        if let Some(path) = anchor_samples {
            message.push_str(ANCHOR_SAMPLES);
            message.push('\n');
            message.push_str(&path.display().to_string());
            message.push('\n');
        }
        message.push('\n');
        message
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Meaning of one line streamed back by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    /// Request finished; result files are complete.
    Done,
    /// The daemon does not have the requested tree loaded.
    StaleTree(String),
    /// Progress or diagnostic text.
    Diagnostic(String),
}

/// Classify a response line (without its trailing newline).
pub fn classify_reply(line: &str) -> ServerReply {
    let line = line.trim_end_matches(['\r', '\n']);
    if line == END_OF_TRANSMISSION {
        ServerReply::Done
    } else if line.starts_with(STALE_TREE_PREFIX) && line.ends_with(STALE_TREE_SUFFIX) {
        ServerReply::StaleTree(line.to_string())
    } else {
        ServerReply::Diagnostic(line.to_string())
    }
}
