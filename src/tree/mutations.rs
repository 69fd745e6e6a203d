//! Per-node mutation files (`subtree-N-mutations.txt`).
//!
//! One line per node, `name: C241T,A23403G`, in no particular order relative
//! to the tree. When the first line names a `ROOT->...` pseudo-node, its
//! changes belong to the branch above the subtree root and are prepended to
//! the following entry.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use super::{PhyloTree, TreeError};
use crate::genomics::Snv;

/// Mutations listed for one named node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMutations {
    /// Node name as it appears in the subtree Newick.
    pub name: String,
    /// Changes on the branch above the node, in file order.
    pub snvs: Vec<Snv>,
}

/// Parse the text of a subtree mutation file.
pub fn parse_subtree_mutations(text: &str, path: &Path) -> Result<Vec<NodeMutations>, TreeError> {
    let mut entries: Vec<NodeMutations> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_error = |message: String| TreeError::MutationLine {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (name, list) = line
            .rsplit_once(':')
            .ok_or_else(|| line_error(format!("missing ':' in '{}'", line)))?;
        let mut snvs = list
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| token.parse::<Snv>().map_err(|e| line_error(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        if let [only] = entries.as_slice() {
            if only.name.starts_with("ROOT->") {
                let root = entries.remove(0);
                debug!(root = %root.name, count = root.snvs.len(), "folding root branch mutations");
                let mut combined = root.snvs;
                combined.append(&mut snvs);
                snvs = combined;
            }
        }
        entries.push(NodeMutations {
            name: name.trim().to_string(),
            snvs,
        });
    }
    Ok(entries)
}

/// Read and parse a subtree mutation file.
pub fn read_subtree_mutations(path: &Path) -> Result<Vec<NodeMutations>, TreeError> {
    let text = fs::read_to_string(path).map_err(|source| TreeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_subtree_mutations(&text, path)
}

impl PhyloTree {
    /// Attach parsed mutation lists to the nodes with matching names.
    ///
    /// Every node must be named and have exactly one entry, and every entry
    /// must be consumed by the walk.
    pub fn attach_mutations(&mut self, entries: Vec<NodeMutations>) -> Result<(), TreeError> {
        let mut index: HashMap<String, Vec<Snv>> = HashMap::with_capacity(entries.len());
        for entry in entries {
            if index.contains_key(&entry.name) {
                return Err(TreeError::DuplicateEntry { node: entry.name });
            }
            index.insert(entry.name, entry.snvs);
        }

        let order: Vec<_> = self.preorder().collect();
        for id in order {
            let node = &mut self.nodes[id.0];
            let Some(name) = node.name.clone() else {
                return Err(TreeError::UnnamedNode { index: id.0 });
            };
            let Some(snvs) = index.remove(&name) else {
                return Err(TreeError::MissingMutations { node: name });
            };
            if node.assign_mutations(snvs).is_err() {
                return Err(TreeError::AlreadyAssigned { node: name });
            }
        }

        if let Some(example) = index.keys().min() {
            return Err(TreeError::LeftoverMutations {
                count: index.len(),
                example: example.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("subtree-1-mutations.txt")
    }

    #[test]
    fn root_entry_is_prepended_to_the_next_one() {
        let text = "ROOT->node_5: C241T\nnode_5: C3037T,A23403G\nsample1: \n";
        let entries = parse_subtree_mutations(text, path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "node_5");
        let labels: Vec<String> = entries[0].snvs.iter().map(Snv::to_string).collect();
        assert_eq!(labels, ["C241T", "C3037T", "A23403G"]);
        assert!(entries[1].snvs.is_empty());
    }

    #[test]
    fn name_is_split_on_the_last_colon() {
        let entries = parse_subtree_mutations("hCoV-19/X:1|2020: G1A", path()).unwrap();
        assert_eq!(entries[0].name, "hCoV-19/X:1|2020");
        assert_eq!(entries[0].snvs[0].position, 0);
    }

    #[test]
    fn malformed_lines_are_errors() {
        let err = parse_subtree_mutations("node_1 C241T", path()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
        let err = parse_subtree_mutations("ok: A1G\nnode_1: C241", path()).unwrap_err();
        assert!(matches!(err, TreeError::MutationLine { line: 2, .. }));
    }

    #[test]
    fn attach_drains_the_index() {
        let mut tree = PhyloTree::from_newick("((s1,s2)node_2,s3)node_1;").unwrap();
        let text = "node_1: \nnode_2: T5C\ns1: A7G\ns2: \ns3: G9T,C10A\n";
        tree.attach_mutations(parse_subtree_mutations(text, path()).unwrap())
            .unwrap();
        assert!(tree.is_annotated());
        let counts: Vec<usize> = tree
            .preorder()
            .map(|id| tree.node(id).mutations().len())
            .collect();
        assert_eq!(counts, [0, 1, 1, 0, 2]);
    }

    #[test]
    fn attach_reports_mismatches() {
        let entries = |text: &str| parse_subtree_mutations(text, path()).unwrap();

        let mut tree = PhyloTree::from_newick("(a,b)r;").unwrap();
        let err = tree.attach_mutations(entries("r: \na: \n")).unwrap_err();
        assert!(matches!(err, TreeError::MissingMutations { ref node } if node == "b"));

        let mut tree = PhyloTree::from_newick("(a,b)r;").unwrap();
        let err = tree
            .attach_mutations(entries("r: \na: \nb: \nz: A1C\n"))
            .unwrap_err();
        assert!(matches!(err, TreeError::LeftoverMutations { count: 1, .. }));

        let mut tree = PhyloTree::from_newick("(a,b);").unwrap();
        let err = tree.attach_mutations(entries("a: \nb: \n")).unwrap_err();
        assert!(matches!(err, TreeError::UnnamedNode { index: 0 }));

        let mut tree = PhyloTree::from_newick("(a,b)r;").unwrap();
        let err = tree.attach_mutations(entries("r: \na: \na: \n")).unwrap_err();
        assert!(matches!(err, TreeError::DuplicateEntry { .. }));
    }

    #[test]
    fn second_attach_is_rejected() {
        let mut tree = PhyloTree::from_newick("(a)r;").unwrap();
        let entries = parse_subtree_mutations("r: \na: \n", path()).unwrap();
        tree.attach_mutations(entries.clone()).unwrap();
        let err = tree.attach_mutations(entries).unwrap_err();
        assert!(matches!(err, TreeError::AlreadyAssigned { ref node } if node == "r"));
    }
}
