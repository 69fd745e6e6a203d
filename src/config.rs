//! Pipeline configuration loaded from TOML.
//!
//! Every field has a default so a file naming only the organism, reference,
//! tree and engine is enough. Relative paths in a loaded file are taken
//! relative to the file's directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::genomics::{ValidatorConfig, DEFAULT_MAX_N_FRACTION, DEFAULT_MAX_UPLOAD_SAMPLES};
use crate::placement::{DaemonPaths, DaemonSupervisor, DEFAULT_THREADS};

/// Errors from reading or checking a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML did not match the expected shape.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Problem description.
        message: String,
    },
}

/// Placement server settings (`[daemon]` table).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Unix socket the server listens on.
    pub socket: PathBuf,
    /// Log file whose first line is the server pid.
    pub log: PathBuf,
    /// Control FIFO.
    pub control: PathBuf,
    /// Server executable.
    pub server_binary: PathBuf,
    /// Extra server arguments.
    pub server_args: Vec<String>,
    /// Where the server's own output goes; discarded when unset.
    pub output: Option<PathBuf>,
    /// Delay before retrying the socket, in milliseconds.
    pub retry_delay_ms: u64,
    /// Give up on a silent server after this many seconds.
    pub read_timeout_secs: Option<u64>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("usher-server.socket"),
            log: PathBuf::from("usher-server.log"),
            control: PathBuf::from("usher-server.fifo"),
            server_binary: PathBuf::from("usher-sampled-server"),
            server_args: Vec::new(),
            output: None,
            retry_delay_ms: 1000,
            read_timeout_secs: None,
        }
    }
}

impl DaemonConfig {
    /// Paths handed to the supervisor.
    pub fn paths(&self) -> DaemonPaths {
        DaemonPaths {
            socket: self.socket.clone(),
            log: self.log.clone(),
            control: self.control.clone(),
            server_binary: self.server_binary.clone(),
            server_args: self.server_args.clone(),
            output: self.output.clone(),
        }
    }

    /// Socket retry delay.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Socket read timeout, if any.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings for one placement pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaceConfig {
    /// Organism / database name, e.g. `wuhCor1`.
    pub organism: String,
    /// Reference genome FASTA.
    pub reference: PathBuf,
    /// Problematic-site mask (BED-like).
    pub mask: Option<PathBuf>,
    /// Placement engine executable.
    pub engine: PathBuf,
    /// Mutation-annotated tree file passed to the engine.
    pub tree: PathBuf,
    /// Leaf names of the tree, one per line, for name-collision checks.
    pub tree_names: Option<PathBuf>,
    /// Minimum sequence length; per-organism default when unset.
    pub min_len: Option<usize>,
    /// Maximum sequence length; per-organism default when unset.
    pub max_len: Option<usize>,
    /// Maximum interior-N fraction.
    pub max_n_fraction: f64,
    /// Maximum genotype columns in an uploaded VCF.
    pub max_upload_samples: usize,
    /// Leaves per subtree.
    pub subtree_size: usize,
    /// Also request one subtree holding all uploads, of this size.
    pub single_subtree_size: Option<usize>,
    /// Engine threads for standalone runs.
    pub threads: usize,
    /// Anchor-sample file forwarded to the server.
    pub anchor_samples: Option<PathBuf>,
    /// Gene annotations in genePred format.
    pub gene_pred: Option<PathBuf>,
    /// Sample metadata TSV.
    pub metadata: Option<PathBuf>,
    /// Condensed-node membership table.
    pub condensed_nodes: Option<PathBuf>,
    /// Label for samples already in the tree.
    pub source: String,
    /// Lineage link prefix in tree JSON.
    pub lineage_url_base: Option<String>,
    /// Dataset description in tree JSON.
    pub description: Option<String>,
    /// Directory for all artifacts of a request.
    pub work_dir: PathBuf,
    /// Placement server, when one is run for this organism.
    pub daemon: Option<DaemonConfig>,
}

impl Default for PlaceConfig {
    fn default() -> Self {
        Self {
            organism: "wuhCor1".to_string(),
            reference: PathBuf::from("reference.fa"),
            mask: None,
            engine: PathBuf::from("usher-sampled"),
            tree: PathBuf::from("tree.pb"),
            tree_names: None,
            min_len: None,
            max_len: None,
            max_n_fraction: DEFAULT_MAX_N_FRACTION,
            max_upload_samples: DEFAULT_MAX_UPLOAD_SAMPLES,
            subtree_size: 50,
            single_subtree_size: None,
            threads: DEFAULT_THREADS,
            anchor_samples: None,
            gene_pred: None,
            metadata: None,
            condensed_nodes: None,
            source: "public sequence".to_string(),
            lineage_url_base: None,
            description: None,
            work_dir: PathBuf::from("phyloplace-work"),
            daemon: None,
        }
    }
}

impl PlaceConfig {
    /// Parse and check TOML text. Paths are kept as written.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Read a TOML file and resolve its relative paths against the file's
    /// directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Size and N limits for the validator.
    pub fn validator_config(&self) -> ValidatorConfig {
        let defaults = ValidatorConfig::for_database(&self.organism);
        ValidatorConfig {
            min_len: self.min_len.unwrap_or(defaults.min_len),
            max_len: self.max_len.unwrap_or(defaults.max_len),
            max_n_fraction: self.max_n_fraction,
        }
    }

    /// Supervisor knowing this organism's server, if one is configured.
    pub fn supervisor(&self) -> DaemonSupervisor {
        let supervisor = DaemonSupervisor::new();
        match &self.daemon {
            Some(daemon) => supervisor.with_daemon(self.organism.clone(), daemon.paths()),
            None => supervisor,
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, message: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                message: message.to_string(),
            })
        };
        if self.organism.is_empty() {
            return invalid("organism", "must not be empty");
        }
        if self.subtree_size == 0 {
            return invalid("subtree_size", "must be positive");
        }
        if self.threads == 0 {
            return invalid("threads", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.max_n_fraction) {
            return invalid("max_n_fraction", "must be between 0 and 1");
        }
        let limits = self.validator_config();
        if limits.min_len > limits.max_len {
            return Err(ConfigError::Invalid {
                field: "min_len",
                message: format!("{} exceeds max_len {}", limits.min_len, limits.max_len),
            });
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.reference);
        resolve(&mut self.tree);
        resolve(&mut self.work_dir);
        for path in [
            &mut self.mask,
            &mut self.tree_names,
            &mut self.anchor_samples,
            &mut self.gene_pred,
            &mut self.metadata,
            &mut self.condensed_nodes,
        ]
        .into_iter()
        .flatten()
        {
            resolve(path);
        }
        if let Some(daemon) = &mut self.daemon {
            resolve(&mut daemon.socket);
            resolve(&mut daemon.log);
            resolve(&mut daemon.control);
            if let Some(output) = &mut daemon.output {
                resolve(output);
            }
        }
    }
}
