//! Subtree export for the Auspice/Nextstrain tree viewer.
//!
//! Besides the JSON writer this module holds what the writer needs to label
//! branches and leaves: gene annotations with codon translation, the sample
//! metadata table, and the majority vote that colors internal nodes.

use std::path::PathBuf;

use thiserror::Error;

mod aa_change;
mod auspice;
mod codon;
mod genes;
mod majority;
mod metadata;

pub use aa_change::{amino_acid_changes, GeneAaChanges};
pub use auspice::{AttributeScheme, TreeJsonExporter, UPLOADED_SAMPLE};
pub use codon::translate_codon;
pub use genes::{load_gene_pred, parse_gene_pred, GeneAnnotation};
pub use majority::{strict_majority, NodeAttributes};
pub use metadata::{MetadataTable, SampleMetadata};

/// Errors from building tree JSON and its inputs.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A file could not be read or written.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// A genePred line is malformed.
    #[error("genePred line {line}: {message}")]
    GenePred {
        /// 1-based line number.
        line: usize,
        /// Problem description.
        message: String,
    },

    /// A metadata line is malformed.
    #[error("{path} line {line}: {message}")]
    Metadata {
        /// Metadata file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Problem description.
        message: String,
    },

    /// An ancestral change does not start from the base its codon holds.
    #[error(
        "{gene}: change at {position} expects '{found}' at offset {offset} of codon {codon}, \
         but the codon has '{expected}'"
    )]
    AncestorMismatch {
        /// Gene name.
        gene: String,
        /// 1-based genome position of the change.
        position: u32,
        /// 0-based codon index.
        codon: u32,
        /// Offset within the codon.
        offset: usize,
        /// Base held by the codon, in transcript orientation.
        expected: char,
        /// Base the change starts from, in transcript orientation.
        found: char,
    },

    /// JSON serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A name pattern failed to compile.
    #[error("invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),
}
