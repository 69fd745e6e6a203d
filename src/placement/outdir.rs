//! Inventory of the files the placement engine leaves in its output directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::results::PLACEMENT_STATS_FILE;
use super::PlacementError;

/// Upper bound on numbered subtrees accepted from one run.
pub const MAX_SUBTREES: usize = 1000;

/// Newick and node-mutation files of one subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeFiles {
    /// 1-based subtree number; 0 for the single combined subtree.
    pub number: usize,
    /// Subtree in Newick format.
    pub newick: PathBuf,
    /// Per-node mutation lists.
    pub mutations: PathBuf,
}

/// Recognized files of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFiles {
    /// Full tree with the uploaded samples added.
    pub uncondensed_tree: Option<PathBuf>,
    /// Root-to-sample mutation paths.
    pub mutation_paths: Option<PathBuf>,
    /// Clade and lineage assignments.
    pub clades: Option<PathBuf>,
    /// Structured per-sample statistics.
    pub placement_stats: Option<PathBuf>,
    /// Numbered subtrees, in order, without gaps.
    pub subtrees: Vec<SubtreeFiles>,
    /// Single subtree containing all uploaded samples, when requested.
    pub single_subtree: Option<SubtreeFiles>,
    /// File names that were not recognized.
    pub unexpected: Vec<String>,
}

#[derive(Default)]
struct Slot {
    newick: Option<PathBuf>,
    mutations: Option<PathBuf>,
}

enum Entry {
    Newick(usize),
    Mutations(usize),
    Ignored,
    Unknown,
}

/// Classify `subtree-N.nh`, `subtree-N-mutations.txt` and `subtree-N-expanded.txt`.
fn classify_subtree(name: &str) -> Entry {
    let Some(rest) = name.strip_prefix("subtree-") else {
        return Entry::Unknown;
    };
    let parts: Vec<&str> = rest.split('-').collect();
    let number = |text: &str| text.parse::<usize>().ok().filter(|&n| n >= 1);
    match parts.as_slice() {
        [file] => match file.strip_suffix(".nh").and_then(number) {
            Some(n) => Entry::Newick(n),
            None => Entry::Unknown,
        },
        [n, "mutations.txt"] => number(n).map_or(Entry::Unknown, Entry::Mutations),
        [n, "expanded.txt"] if number(n).is_some() => Entry::Ignored,
        _ => Entry::Unknown,
    }
}

/// Scan `dir` and pair up subtree files.
///
/// Numbered subtrees must form a complete range `1..=N`, each with both its
/// Newick and mutation file; anything else is fatal. Unrecognized files are
/// reported and skipped.
pub fn scan_output_dir(dir: &Path) -> Result<OutputFiles, PlacementError> {
    let io_error = |source| PlacementError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names: Vec<String> = fs::read_dir(dir)
        .map_err(io_error)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()
        .map_err(io_error)?;
    names.sort();

    let mut files = OutputFiles::default();
    let mut slots: BTreeMap<usize, Slot> = BTreeMap::new();
    let mut single = Slot::default();
    for name in names {
        let path = dir.join(&name);
        match name.as_str() {
            "uncondensed-final-tree.nh" => files.uncondensed_tree = Some(path),
            "mutation-paths.txt" => files.mutation_paths = Some(path),
            "clades.txt" => files.clades = Some(path),
            PLACEMENT_STATS_FILE => files.placement_stats = Some(path),
            "final-tree.nh" | "single-subtree-expanded.txt" => {}
            "single-subtree.nh" => single.newick = Some(path),
            "single-subtree-mutations.txt" => single.mutations = Some(path),
            _ => match classify_subtree(&name) {
                Entry::Newick(n) | Entry::Mutations(n) if n > MAX_SUBTREES => {
                    return Err(PlacementError::TooManySubtrees { max: MAX_SUBTREES });
                }
                Entry::Newick(n) => slots.entry(n).or_default().newick = Some(path),
                Entry::Mutations(n) => slots.entry(n).or_default().mutations = Some(path),
                Entry::Ignored => {}
                Entry::Unknown => {
                    warn!(file = %name, "unexpected file name from placement engine, ignoring");
                    files.unexpected.push(name);
                }
            },
        }
    }

    let count = slots.keys().next_back().copied().unwrap_or(0);
    for number in 1..=count {
        let slot = slots.remove(&number).unwrap_or_default();
        let newick = slot.newick.ok_or(PlacementError::MissingFile {
            name: format!("subtree-{}.nh", number),
            dir: dir.to_path_buf(),
        })?;
        let mutations = slot.mutations.ok_or(PlacementError::MissingFile {
            name: format!("subtree-{}-mutations.txt", number),
            dir: dir.to_path_buf(),
        })?;
        files.subtrees.push(SubtreeFiles {
            number,
            newick,
            mutations,
        });
    }
    files.single_subtree = match (single.newick, single.mutations) {
        (Some(newick), Some(mutations)) => Some(SubtreeFiles {
            number: 0,
            newick,
            mutations,
        }),
        (None, None) => None,
        (Some(_), None) => {
            return Err(PlacementError::MissingFile {
                name: "single-subtree-mutations.txt".into(),
                dir: dir.to_path_buf(),
            })
        }
        (None, Some(_)) => {
            return Err(PlacementError::MissingFile {
                name: "single-subtree.nh".into(),
                dir: dir.to_path_buf(),
            })
        }
    };
    debug!(
        subtrees = files.subtrees.len(),
        single = files.single_subtree.is_some(),
        "scanned placement output"
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), "").unwrap();
        }
    }

    #[test]
    fn pairs_subtree_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &[
                "subtree-2.nh",
                "subtree-1.nh",
                "subtree-10.nh",
                "subtree-1-mutations.txt",
                "subtree-2-mutations.txt",
                "subtree-10-mutations.txt",
                "subtree-1-expanded.txt",
                "final-tree.nh",
                "uncondensed-final-tree.nh",
                "mutation-paths.txt",
                "stray.log",
            ],
        );
        for n in 3..10 {
            touch(
                dir.path(),
                &[&format!("subtree-{}.nh", n), &format!("subtree-{}-mutations.txt", n)],
            );
        }
        let files = scan_output_dir(dir.path()).unwrap();
        let numbers: Vec<usize> = files.subtrees.iter().map(|s| s.number).collect();
        assert_eq!(numbers, (1..=10).collect::<Vec<_>>());
        assert!(files.subtrees[9].newick.ends_with("subtree-10.nh"));
        assert!(files.uncondensed_tree.is_some());
        assert!(files.mutation_paths.is_some());
        assert_eq!(files.unexpected, ["stray.log"]);
    }

    #[test]
    fn gap_in_numbering_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &["subtree-2.nh", "subtree-2-mutations.txt", "subtree-1-mutations.txt"],
        );
        let err = scan_output_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("subtree-1.nh"));
    }

    #[test]
    fn too_many_subtrees_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["subtree-1001.nh"]);
        assert!(matches!(
            scan_output_dir(dir.path()),
            Err(PlacementError::TooManySubtrees { max: MAX_SUBTREES })
        ));
    }

    #[test]
    fn single_subtree_needs_both_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["single-subtree.nh", "single-subtree-mutations.txt"]);
        let files = scan_output_dir(dir.path()).unwrap();
        assert_eq!(files.single_subtree.map(|s| s.number), Some(0));
    }
}
