//! Loading the subtrees around the uploaded samples.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{read_subtree_mutations, CondensedNodes, PhyloTree, TreeError};
use crate::placement::SubtreeFiles;

/// One annotated subtree ready for export.
#[derive(Debug, Clone)]
pub struct SubtreeInfo {
    /// Subtree number (0 for the single combined subtree).
    pub number: usize,
    /// Tree with mutations attached and condensed leaves renamed for display.
    pub tree: PhyloTree,
    /// Newick file to show: the renamed copy when any leaf was renamed,
    /// otherwise the engine's file.
    pub newick_path: PathBuf,
    /// Uploaded samples found in this subtree, in upload order.
    pub user_sample_ids: Vec<String>,
    /// Depth-first leaf position by the engine's leaf name.
    pub leaf_index: HashMap<String, usize>,
    /// Leaf names after condensed-node expansion, depth-first.
    pub display_names: Vec<String>,
}

impl SubtreeInfo {
    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.display_names.len()
    }

    /// Returns `true` when `name` is one of the uploaded samples in this subtree.
    pub fn contains_user_sample(&self, name: &str) -> bool {
        self.user_sample_ids.iter().any(|id| id == name)
    }
}

/// Builds [`SubtreeInfo`]s from the engine's subtree files.
#[derive(Debug)]
pub struct SubtreeExtractor<'a> {
    user_sample_ids: &'a [String],
    condensed: Option<&'a CondensedNodes>,
    work_dir: PathBuf,
}

impl<'a> SubtreeExtractor<'a> {
    /// Extractor for the given uploaded sample ids; renamed Newick files go
    /// to `work_dir`.
    pub fn new(user_sample_ids: &'a [String], work_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_sample_ids,
            condensed: None,
            work_dir: work_dir.into(),
        }
    }

    /// Expand condensed leaves using `table`.
    pub fn with_condensed_nodes(mut self, table: &'a CondensedNodes) -> Self {
        self.condensed = Some(table);
        self
    }

    /// Parse, annotate and index one subtree.
    pub fn extract(&self, files: &SubtreeFiles) -> Result<SubtreeInfo, TreeError> {
        let mut tree = PhyloTree::load(&files.newick)?;
        tree.attach_mutations(read_subtree_mutations(&files.mutations)?)?;

        let leaves = tree.leaves();
        let leaf_names = tree.leaf_names();
        let leaf_index: HashMap<String, usize> = leaf_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let user_sample_ids: Vec<String> = self
            .user_sample_ids
            .iter()
            .filter(|id| leaf_index.contains_key(id.as_str()))
            .cloned()
            .collect();
        if user_sample_ids.is_empty() {
            return Err(TreeError::NoUserSamples {
                path: files.newick.clone(),
            });
        }

        let mut display_names = leaf_names;
        let mut renamed = 0usize;
        if let Some(table) = self.condensed {
            for (&id, display) in leaves.iter().zip(display_names.iter_mut()) {
                if let Some(expanded) = table.display_name(display) {
                    tree.rename(id, expanded.clone());
                    *display = expanded;
                    renamed += 1;
                }
            }
        }

        let newick_path = if renamed > 0 {
            let path = self.work_dir.join(display_file_name(files));
            write_newick(&tree, &path)?;
            debug!(renamed, path = %path.display(), "wrote subtree with expanded names");
            path
        } else {
            files.newick.clone()
        };

        info!(
            subtree = files.number,
            leaves = display_names.len(),
            uploaded = user_sample_ids.len(),
            "loaded subtree"
        );
        Ok(SubtreeInfo {
            number: files.number,
            tree,
            newick_path,
            user_sample_ids,
            leaf_index,
            display_names,
        })
    }

    /// Extract every subtree, in order.
    pub fn extract_all(&self, files: &[SubtreeFiles]) -> Result<Vec<SubtreeInfo>, TreeError> {
        files.iter().map(|f| self.extract(f)).collect()
    }
}

fn display_file_name(files: &SubtreeFiles) -> String {
    if files.number == 0 {
        "single-subtree.display.nh".to_string()
    } else {
        format!("subtree-{}.display.nh", files.number)
    }
}

fn write_newick(tree: &PhyloTree, path: &Path) -> Result<(), TreeError> {
    let mut text = tree.to_newick();
    text.push('\n');
    fs::write(path, text).map_err(|source| TreeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(dir: &Path, newick: &str, mutations: &str) -> SubtreeFiles {
        let files = SubtreeFiles {
            number: 1,
            newick: dir.join("subtree-1.nh"),
            mutations: dir.join("subtree-1-mutations.txt"),
        };
        fs::write(&files.newick, newick).unwrap();
        fs::write(&files.mutations, mutations).unwrap();
        files
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn intersects_uploads_in_upload_order() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(
            dir.path(),
            "((s2,old1)node_2,s1)node_1;",
            "node_1: C241T\nnode_2: \ns2: A5G\nold1: \ns1: T9C\n",
        );
        let uploads = ids(&["s1", "missing", "s2"]);
        let info = SubtreeExtractor::new(&uploads, dir.path())
            .extract(&files)
            .unwrap();
        assert_eq!(info.user_sample_ids, ["s1", "s2"]);
        assert_eq!(info.leaf_index["old1"], 1);
        assert_eq!(info.display_names, ["s2", "old1", "s1"]);
        assert_eq!(info.newick_path, files.newick);
        assert!(info.tree.is_annotated());
        assert!(info.contains_user_sample("s2"));
    }

    #[test]
    fn no_uploaded_samples_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(dir.path(), "(a,b)r;", "r: \na: \nb: \n");
        let uploads = ids(&["s1"]);
        let err = SubtreeExtractor::new(&uploads, dir.path())
            .extract(&files)
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("No user sample IDs found in subtree file"));
    }

    #[test]
    fn condensed_leaves_get_display_names() {
        let dir = tempfile::tempdir().unwrap();
        let files = fixture(
            dir.path(),
            "(s1,node_9_condensed_2_leaves)r;",
            "r: \ns1: \nnode_9_condensed_2_leaves: G3A\n",
        );
        let mut table = CondensedNodes::new().unwrap();
        table.insert(
            "node_9_condensed_2_leaves",
            ids(&["Peru/A/2021", "Peru/B/2021"]),
        );
        let uploads = ids(&["s1"]);
        let info = SubtreeExtractor::new(&uploads, dir.path())
            .with_condensed_nodes(&table)
            .extract(&files)
            .unwrap();
        assert_eq!(info.display_names[1], "2_from_Peru_eg_Peru/A/2021");
        assert_eq!(info.leaf_index["node_9_condensed_2_leaves"], 1);
        let written = fs::read_to_string(&info.newick_path).unwrap();
        assert_eq!(written, "(s1,2_from_Peru_eg_Peru/A/2021)r;\n");
    }
}
