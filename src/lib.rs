//! # Phylogenetic placement of uploaded genomes
//!
//! This library places user-supplied viral sequences into a large
//! mutation-annotated phylogeny and prepares the results for viewing.
//!
//! ## Pipeline
//!
//! 1. **Validation**: size and N-content checks, Newick-safe renaming,
//!    collision prefixing against names already in the tree
//! 2. **Alignment**: one alignment per sample against the reference, SNV and
//!    no-call extraction, masking, VCF synthesis
//! 3. **Placement**: a long-lived placement server reached over a Unix socket,
//!    with a fallback to a one-shot engine subprocess
//! 4. **Subtrees**: Newick subtrees around the uploads, annotated with
//!    per-branch mutations
//! 5. **Export**: Auspice v2 JSON with amino-acid labels and majority-voted
//!    node attributes
//!
//! ## Usage Example
//!
//! ```ignore
//! use phyloplace::{PlaceConfig, Pipeline};
//!
//! let config = PlaceConfig::load("place.toml")?;
//! let pipeline = Pipeline::new(config)?;
//! let report = pipeline.run(&std::fs::read_to_string("upload.fa")?)?;
//! for failure in &report.failures {
//!     eprintln!("{}", failure.reason);
//! }
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod config;    // TOML configuration
pub mod export;    // Auspice JSON and amino-acid labels
pub mod genomics;  // Upload QC, alignment, VCF
pub mod pipeline;  // End-to-end request
pub mod placement; // Placement server and engine
pub mod tree;      // Arena trees and subtree files

// Re-exports for convenience
pub use config::{ConfigError, DaemonConfig, PlaceConfig};
pub use export::{ExportError, TreeJsonExporter};
pub use genomics::{AlignmentEngine, ReferenceGenome, SequenceValidator, Snv};
pub use pipeline::{Pipeline, PipelineError, PipelineReport};
pub use placement::{DaemonSupervisor, PlacementClient, PlacementError};
pub use tree::{PhyloTree, SubtreeExtractor, TreeError};
