//! Mutation-annotated subtrees returned by the placement engine.
//!
//! Each subtree is parsed into its own arena ([`PhyloTree`]): nodes live in a
//! `Vec` and refer to each other by [`NodeId`]. Mutation lists are attached
//! once from the engine's per-node mutation file, after which the tree is only
//! read (traversals, renaming of leaves for display, export).

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

mod condensed;
mod mutations;
mod newick;
mod node;
mod subtree;
mod traversal;

pub use condensed::{summarize_countries, CondensedNodes, COUNTRY_PATTERN};
pub use mutations::{parse_subtree_mutations, read_subtree_mutations, NodeMutations};
pub use node::{NodeId, PhyloNode};
pub use subtree::{SubtreeExtractor, SubtreeInfo};
pub use traversal::Preorder;

/// Errors from reading subtrees and their annotations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A file could not be read or written.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Newick text is malformed.
    #[error("newick parse error at byte {offset}: {message}")]
    Newick {
        /// Byte offset of the problem.
        offset: usize,
        /// Problem description.
        message: String,
    },

    /// A line of a subtree mutation file is malformed.
    #[error("{path} line {line}: {message}")]
    MutationLine {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Problem description.
        message: String,
    },

    /// The mutation file names the same node twice.
    #[error("duplicate mutation entry for node '{node}'")]
    DuplicateEntry {
        /// Node name.
        node: String,
    },

    /// A tree node has no entry in the mutation file.
    #[error("no mutation entry for tree node '{node}'")]
    MissingMutations {
        /// Node name.
        node: String,
    },

    /// A node already carries a mutation list.
    #[error("mutations already assigned to tree node '{node}'")]
    AlreadyAssigned {
        /// Node name.
        node: String,
    },

    /// Mutation entries did not match any tree node.
    #[error("{count} mutation entries did not match tree nodes (e.g. '{example}')")]
    LeftoverMutations {
        /// Number of unmatched entries.
        count: usize,
        /// One of the unmatched names.
        example: String,
    },

    /// Mutations can only be attached to named nodes.
    #[error("tree node #{index} has no name")]
    UnnamedNode {
        /// Arena index of the node.
        index: usize,
    },

    /// A name pattern failed to compile.
    #[error("invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// None of the uploaded samples appears in the subtree.
    #[error("No user sample IDs found in subtree file {}", path.display())]
    NoUserSamples {
        /// Subtree Newick file.
        path: PathBuf,
    },
}

/// Rooted tree stored as an arena of nodes.
#[derive(Debug, Clone)]
pub struct PhyloTree {
    nodes: Vec<PhyloNode>,
    root: NodeId,
}

impl PhyloTree {
    /// Parse Newick text.
    pub fn from_newick(text: &str) -> Result<Self, TreeError> {
        newick::parse(text)
    }

    /// Read and parse a Newick file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TreeError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TreeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_newick(&text)
    }

    /// Serialize back to Newick, with trailing `;`.
    pub fn to_newick(&self) -> String {
        newick::write(self)
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> &PhyloNode {
        &self.nodes[id.0]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when the tree has no nodes (never the case after parsing).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first preorder from the root.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder::new(self, self.root)
    }

    /// Children-before-parent order from the root.
    pub fn postorder(&self) -> Vec<NodeId> {
        traversal::postorder(self, self.root)
    }

    /// Leaves in depth-first order.
    pub fn leaves(&self) -> Vec<NodeId> {
        traversal::leaves(self, self.root)
    }

    /// Leaf names in depth-first order; unnamed leaves give empty strings.
    pub fn leaf_names(&self) -> Vec<String> {
        self.leaves()
            .into_iter()
            .map(|id| self.node(id).name().unwrap_or_default().to_string())
            .collect()
    }

    /// Number of nodes on the path from the root to `id`, excluding the root.
    pub fn depth(&self, id: NodeId) -> usize {
        std::iter::successors(self.node(id).parent(), |&p| self.node(p).parent()).count()
    }

    /// Replace the label of a node.
    pub fn rename(&mut self, id: NodeId, name: impl Into<String>) {
        self.nodes[id.0].name = Some(name.into());
    }

    /// Returns `true` when every node carries a mutation list.
    pub fn is_annotated(&self) -> bool {
        self.nodes.iter().all(PhyloNode::has_mutations)
    }
}
