//! Parsing of the placement engine's per-sample results.
//!
//! The tab-separated `placement_stats.tsv` is preferred. Older engines only
//! report through their diagnostic stream, which is parsed with a strict
//! line-shape state machine: anything unexpected means the engine and this
//! crate disagree about the format, and is fatal.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::PlacementError;
use crate::genomics::nucleotide::is_nucleotide;
use crate::genomics::Snv;

const SAMPLE_ID_PREFIX: &str = "Sample name:";
const SCORE_PREFIX: &str = "Parsimony score:";
const PLACEMENTS_PREFIX: &str = "Number of parsimony-optimal placements:";
const BEST_NODE_PREFIX: &str = "Best node (";
const MUTATIONS_PREFIX: &str = "Mutations: ";
const SAMPLE_MUTATIONS_PREFIX: &str = "Sample mutations:";
const IMPUTED_PREFIX: &str = "Imputed mutations:";

/// Placement results keyed by sample id.
pub type Placements = BTreeMap<String, PlacementInfo>;

/// Resolution of an ambiguous input base chosen by the placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImputedBase {
    /// 0-based reference position.
    pub position: u32,
    /// Imputed base(s).
    pub base: String,
}

/// One step of a root-to-leaf path: a node and the changes on its branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathNode {
    /// Node name; absent in best-node paths.
    pub node: Option<String>,
    /// Changes on the branch above the node.
    pub snvs: Vec<Snv>,
}

/// Candidate attachment point reported for a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestNode {
    /// Node name.
    pub name: String,
    /// Placement as sibling rather than child.
    pub is_sibling: bool,
    /// Changes from the root to the node.
    pub path: Vec<PathNode>,
}

/// Everything the engine reported about one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementInfo {
    /// Sample id as known to the engine.
    pub sample_id: String,
    /// Parsimony score of the chosen placement.
    pub parsimony_score: u32,
    /// Number of equally parsimonious placements.
    pub best_placement_count: u32,
    /// Imputed values for ambiguous bases.
    pub imputed: Vec<ImputedBase>,
    /// Root-to-leaf path of nodes and their changes.
    pub path: Vec<PathNode>,
    /// Sample changes relative to the reference, as reported.
    pub sample_mutations: Vec<String>,
    /// Candidate placements, the chosen one first.
    pub best_nodes: Vec<BestNode>,
    /// Clade assigned by the engine.
    pub clade: Option<String>,
    /// Lineage assigned by the engine.
    pub lineage: Option<String>,
}

impl PlacementInfo {
    fn new(sample_id: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            ..Self::default()
        }
    }
}

fn protocol(path: &Path, line: usize, message: impl Into<String>) -> PlacementError {
    PlacementError::Protocol {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

/// Parse `placement_stats.tsv`: sample id, parsimony score, placement count and
/// an optional `;`-separated list of imputed `<pos>:<base>` values.
pub fn parse_placement_stats(text: &str, path: &Path) -> Result<Placements, PlacementError> {
    let mut placements = Placements::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split('\t').collect();
        if words.len() < 3 {
            return Err(protocol(
                path,
                line_no,
                format!("expected at least 3 tab-separated columns, got {}", words.len()),
            ));
        }
        let mut info = PlacementInfo::new(words[0].trim());
        info.parsimony_score = parse_count(words[1], path, line_no)?;
        info.best_placement_count = parse_count(words[2], path, line_no)?;
        if let Some(imputed) = words.get(3) {
            info.imputed = parse_imputed(imputed).map_err(|m| protocol(path, line_no, m))?;
        }
        placements.insert(info.sample_id.clone(), info);
    }
    Ok(placements)
}

fn parse_count(word: &str, path: &Path, line: usize) -> Result<u32, PlacementError> {
    word.trim()
        .parse()
        .map_err(|_| protocol(path, line, format!("expected a number but got '{}'", word)))
}

/// Parse `6709:A;23403:G` into imputed bases. Empty input yields none.
pub fn parse_imputed(list: &str) -> Result<Vec<ImputedBase>, String> {
    let mut imputed = Vec::new();
    for item in list.trim().split(';').filter(|s| !s.is_empty()) {
        let problem = || {
            format!(
                "expected imputed mutation to be number:base, but got '{}'",
                item
            )
        };
        let (pos, base) = item.split_once(':').ok_or_else(problem)?;
        let pos: u32 = pos.trim().parse().map_err(|_| problem())?;
        if pos < 1 || base.is_empty() || !base.bytes().all(is_nucleotide) {
            return Err(problem());
        }
        imputed.push(ImputedBase {
            position: pos - 1,
            base: base.to_string(),
        });
    }
    Ok(imputed)
}

/// Parse a best-node path like `|C8782T|T28144C| > |C29095T|`.
pub fn parse_pipey_path(text: &str) -> Result<Vec<PathNode>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(" > ")
        .map(|node| {
            let snvs = node
                .split('|')
                .filter(|token| !token.trim().is_empty())
                .map(|token| token.trim().parse::<Snv>().map_err(|e| e.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(PathNode { node: None, snvs })
        })
        .collect()
}

/// Parse the engine's diagnostic stream.
///
/// A 4-column line starts a new sample; 2-column lines (best node, sample
/// changes, imputed bases) belong to the most recent sample. Lines with any
/// other column count are free-form progress text.
pub fn parse_engine_stderr(text: &str, path: &Path) -> Result<Placements, PlacementError> {
    let mut placements = Placements::new();
    let mut current: Option<String> = None;
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let words: Vec<&str> = line.split('\t').collect();
        match words.len() {
            4 => {
                let info = parse_sample_line(&words).map_err(|m| protocol(path, line_no, m))?;
                current = Some(info.sample_id.clone());
                placements.insert(info.sample_id.clone(), info);
            }
            2 => {
                let Some(sample) = current.as_deref() else {
                    return Err(protocol(
                        path,
                        line_no,
                        format!(
                            "got line starting with '{}' that was not preceded by a line that defines sample ID",
                            words[0]
                        ),
                    ));
                };
                let info = placements.get_mut(sample).ok_or_else(|| {
                    protocol(path, line_no, format!("can't find placement info for sample '{}'", sample))
                })?;
                parse_sample_detail(&words, info).map_err(|m| protocol(path, line_no, m))?;
            }
            _ => {}
        }
    }
    debug!(samples = placements.len(), path = %path.display(), "parsed engine diagnostics");
    Ok(placements)
}

fn value_after<'a>(word: &'a str, prefix: &str) -> Option<&'a str> {
    word.find(prefix).map(|ix| word[ix + prefix.len()..].trim())
}

fn parse_sample_line(words: &[&str]) -> Result<PlacementInfo, String> {
    let sample = value_after(words[1], SAMPLE_ID_PREFIX)
        .ok_or_else(|| format!("unexpected format of sample ID line: {}", words.join("\t")))?;
    let mut info = PlacementInfo::new(sample);
    let score = value_after(words[2], SCORE_PREFIX).ok_or_else(|| {
        format!("expected '{}...' to be followed by '{}...'", SAMPLE_ID_PREFIX, SCORE_PREFIX)
    })?;
    info.parsimony_score = leading_number(score);
    let count = value_after(words[3], PLACEMENTS_PREFIX).ok_or_else(|| {
        format!("expected '{}...' to be followed by '{}...'", SCORE_PREFIX, PLACEMENTS_PREFIX)
    })?;
    info.best_placement_count = leading_number(count);
    Ok(info)
}

fn leading_number(text: &str) -> u32 {
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

fn parse_sample_detail(words: &[&str], info: &mut PlacementInfo) -> Result<(), String> {
    if let Some(ix) = words[0].find(BEST_NODE_PREFIX) {
        let rest = &words[0][ix + BEST_NODE_PREFIX.len()..];
        let is_sibling = rest.starts_with("sibling");
        let is_chosen = words[0].contains(")*:");
        let name = value_after(words[0], ": ").ok_or_else(|| {
            format!("expected first column to have ': ' followed by name, but got '{}'", words[0])
        })?;
        let path_text = words[1].strip_prefix(MUTATIONS_PREFIX).ok_or_else(|| {
            format!(
                "expected second column to have '{}' followed by path, but got '{}'",
                MUTATIONS_PREFIX, words[1]
            )
        })?;
        let node = BestNode {
            name: name.to_string(),
            is_sibling,
            path: parse_pipey_path(path_text)?,
        };
        if is_chosen {
            info.best_nodes.insert(0, node);
        } else {
            info.best_nodes.push(node);
        }
    } else if words[0].contains(SAMPLE_MUTATIONS_PREFIX) {
        info.sample_mutations = words[1]
            .split(|c: char| c == '|' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    } else if words[0].contains(IMPUTED_PREFIX) {
        info.imputed = parse_imputed(words[1])?;
    } else {
        return Err(format!(
            "unrecognized line for sample '{}': '{}'",
            info.sample_id,
            words.join("\t")
        ));
    }
    Ok(())
}

/// Attach root-to-leaf paths from `mutation-paths.txt`
/// (`<sample>\t<node>:<mut>,<mut> <node>:<mut> ...`).
pub fn parse_mutation_paths(
    text: &str,
    path: &Path,
    placements: &mut Placements,
) -> Result<(), PlacementError> {
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split('\t').collect();
        if words.len() != 2 {
            return Err(protocol(
                path,
                line_no,
                format!("expected 2 tab-separated columns, got {}", words.len()),
            ));
        }
        let sample = words[0];
        let mut nodes = Vec::new();
        for item in words[1].split(' ').filter(|s| !s.is_empty()) {
            let (node, muts) = match item.rfind(':') {
                Some(ix) => (Some(item[..ix].to_string()), &item[ix + 1..]),
                None => (None, item),
            };
            let snvs = muts
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|token| {
                    token.parse::<Snv>().map_err(|_| {
                        protocol(
                            path,
                            line_no,
                            format!(
                                "expected variant path for {} to specify single-nucleotide changes but got '{}'",
                                sample, token
                            ),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            nodes.push(PathNode { node, snvs });
        }
        let info = placements.get_mut(sample).ok_or_else(|| {
            protocol(path, line_no, format!("can't find placement info for sample '{}'", sample))
        })?;
        info.path = nodes;
    }
    Ok(())
}

/// Attach clade and lineage assignments from `clades.txt`
/// (`<sample>\t<clade>[\t<lineage>]`). Unknown samples are ignored.
pub fn parse_clades(text: &str, placements: &mut Placements) {
    let assigned = |word: Option<&&str>| {
        word.map(|w| w.trim())
            .filter(|w| !w.is_empty() && *w != "." && *w != "None")
            .map(str::to_string)
    };
    for line in text.lines() {
        let words: Vec<&str> = line.split('\t').collect();
        if let Some(info) = placements.get_mut(words[0]) {
            info.clade = assigned(words.get(1));
            info.lineage = assigned(words.get(2));
        }
    }
}

/// Bounded wait for a results file whose size looks like an unfinished block write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPoll {
    /// Sizes that are an exact multiple of this are suspicious.
    pub block_size: u64,
    /// Maximum number of re-checks.
    pub max_retries: u32,
    /// Delay before each re-check.
    pub interval: Duration,
}

impl Default for StabilityPoll {
    fn default() -> Self {
        Self {
            block_size: 4096,
            max_retries: 30,
            interval: Duration::from_secs(1),
        }
    }
}

/// What the stability poll observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Size at the last check.
    pub final_size: u64,
    /// Number of re-checks performed.
    pub retries: u32,
    /// Diagnostics emitted while the size stayed suspicious.
    pub warnings: Vec<String>,
}

impl PollReport {
    /// Returns `true` when the file still looked unfinished after the last re-check.
    pub fn gave_up(&self, poll: &StabilityPoll) -> bool {
        self.final_size % poll.block_size == 0
    }

    /// Returns `true` when the file was still empty when polling stopped.
    pub fn is_empty(&self) -> bool {
        self.final_size == 0
    }
}

impl StabilityPoll {
    /// Re-check the size of `path` while it is a multiple of the block size.
    /// Gives up after `max_retries` re-checks; the caller reads the file anyway.
    /// A file still empty after the first re-check stops the poll early.
    pub fn wait(&self, path: &Path) -> Result<PollReport, PlacementError> {
        let size_of = |path: &Path| {
            fs::metadata(path)
                .map(|m| m.len())
                .map_err(|source| PlacementError::Io {
                    path: path.to_path_buf(),
                    source,
                })
        };
        let mut report = PollReport {
            final_size: size_of(path)?,
            ..PollReport::default()
        };
        while report.final_size % self.block_size == 0 && report.retries < self.max_retries {
            thread::sleep(self.interval);
            report.retries += 1;
            report.final_size = size_of(path)?;
            if report.final_size == 0 {
                let message = format!("{} is still empty after {} retries", path.display(), report.retries);
                warn!("{}", message);
                report.warnings.push(message);
                break;
            }
            if report.final_size % self.block_size == 0 {
                let message = format!(
                    "{} size {} is a multiple of {} after {} retries",
                    path.display(),
                    report.final_size,
                    self.block_size,
                    report.retries
                );
                warn!("{}", message);
                report.warnings.push(message);
            }
        }
        Ok(report)
    }
}

/// Parsed results plus what the stability poll saw, if it ran.
#[derive(Debug, Clone, Default)]
pub struct PlacementResults {
    /// Per-sample results.
    pub placements: Placements,
    /// Stability poll report for `placement_stats.tsv`.
    pub poll: Option<PollReport>,
    /// File the placements were read from.
    pub source: PathBuf,
}

/// Name of the structured results file in the engine's output directory.
pub const PLACEMENT_STATS_FILE: &str = "placement_stats.tsv";

/// Read placements from `out_dir/placement_stats.tsv` when present and
/// non-empty (after the stability poll), else from the captured diagnostic stream.
pub fn load_placements(
    out_dir: &Path,
    stderr_path: &Path,
    poll: &StabilityPoll,
) -> Result<PlacementResults, PlacementError> {
    let stats = out_dir.join(PLACEMENT_STATS_FILE);
    if stats.is_file() {
        let report = poll.wait(&stats)?;
        if !report.is_empty() {
            let text = read(&stats)?;
            return Ok(PlacementResults {
                placements: parse_placement_stats(&text, &stats)?,
                poll: Some(report),
                source: stats,
            });
        }
        warn!(path = %stats.display(), "placement stats file is empty, reading engine diagnostics instead");
        let text = read(stderr_path)?;
        return Ok(PlacementResults {
            placements: parse_engine_stderr(&text, stderr_path)?,
            poll: Some(report),
            source: stderr_path.to_path_buf(),
        });
    }
    let text = read(stderr_path)?;
    Ok(PlacementResults {
        placements: parse_engine_stderr(&text, stderr_path)?,
        poll: None,
        source: stderr_path.to_path_buf(),
    })
}

pub(crate) fn read(path: &Path) -> Result<String, PlacementError> {
    fs::read_to_string(path).map_err(|source| PlacementError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Match submitted sample ids against the results. An id missing from the
/// results is replaced by `<prefix><id>` when that is present; otherwise it is
/// dropped with a warning. Returns the dropped ids.
pub fn reconcile_sample_ids(
    sample_ids: &mut Vec<String>,
    placements: &Placements,
    prefix: &str,
) -> Vec<String> {
    let mut dropped = Vec::new();
    sample_ids.retain_mut(|id| {
        if placements.contains_key(id.as_str()) {
            return true;
        }
        let prefixed = format!("{}{}", prefix, id);
        if placements.contains_key(&prefixed) {
            debug!(sample = %id, renamed = %prefixed, "sample placed under prefixed name");
            *id = prefixed;
            true
        } else {
            warn!(sample = %id, "no placement found for sample; dropping it");
            dropped.push(id.clone());
            false
        }
    });
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn p() -> &'static Path {
        Path::new("results.txt")
    }

    #[test]
    fn parses_placement_stats() {
        let text = "s1\t2\t1\t6709:A;23403:G\ns2\t0\t3\t\n";
        let placements = parse_placement_stats(text, p()).unwrap();
        let s1 = &placements["s1"];
        assert_eq!(s1.parsimony_score, 2);
        assert_eq!(s1.best_placement_count, 1);
        assert_eq!(
            s1.imputed,
            vec![
                ImputedBase { position: 6708, base: "A".into() },
                ImputedBase { position: 23402, base: "G".into() },
            ]
        );
        assert!(placements["s2"].imputed.is_empty());
    }

    #[test_case("0:A" ; "zero position")]
    #[test_case("12:J" ; "not a base")]
    #[test_case("12A" ; "no colon")]
    fn rejects_bad_imputed_values(item: &str) {
        assert!(parse_imputed(item).is_err());
    }

    #[test]
    fn parses_engine_stderr_state_machine() {
        let text = "Loading tree\n\
Current tree size (#nodes): 70775\tSample name: MySeq\tParsimony score: 3\tNumber of parsimony-optimal placements: 2\n\
Best node (sibling): leafA\tMutations: |C8782T|T28144C| > |C29095T|\n\
Best node (child)*: 1239\tMutations: |C8782T|\n\
Sample mutations:\t|C241T| |A23403G|\n\
Imputed mutations:\t6709:A\n\
Writing output\n";
        let placements = parse_engine_stderr(text, p()).unwrap();
        let info = &placements["MySeq"];
        assert_eq!(info.parsimony_score, 3);
        assert_eq!(info.best_placement_count, 2);
        assert_eq!(info.best_nodes[0].name, "1239");
        assert!(!info.best_nodes[0].is_sibling);
        assert!(info.best_nodes[1].is_sibling);
        assert_eq!(info.best_nodes[1].path.len(), 2);
        assert_eq!(info.best_nodes[1].path[0].snvs.len(), 2);
        assert_eq!(info.sample_mutations, ["C241T", "A23403G"]);
        assert_eq!(info.imputed[0].position, 6708);
    }

    #[test]
    fn orphan_detail_line_is_fatal() {
        let err = parse_engine_stderr("Imputed mutations:\t6709:A\n", p()).unwrap_err();
        assert!(err.to_string().contains("not preceded by a line that defines sample ID"));
    }

    #[test]
    fn malformed_sample_line_is_fatal() {
        assert!(parse_engine_stderr("a\tb\tc\td\n", p()).is_err());
        let unknown = "x\tSample name: s\tParsimony score: 1\tNumber of parsimony-optimal placements: 1\nWhat:\tthis\n";
        assert!(parse_engine_stderr(unknown, p()).is_err());
    }

    #[test]
    fn attaches_mutation_paths_and_clades() {
        let mut placements = parse_placement_stats("MySeq\t1\t1\n", p()).unwrap();
        parse_mutation_paths(
            "MySeq\t1:C8782T,T28144C 2309:C29095T MySeq:C29867T \n",
            p(),
            &mut placements,
        )
        .unwrap();
        parse_clades("MySeq\t20A\tB.1\nother\tx\ty\n", &mut placements);
        let info = &placements["MySeq"];
        assert_eq!(info.path.len(), 3);
        assert_eq!(info.path[0].node.as_deref(), Some("1"));
        assert_eq!(info.path[0].snvs.len(), 2);
        assert_eq!(info.path[2].snvs[0].to_string(), "C29867T");
        assert_eq!(info.clade.as_deref(), Some("20A"));
        assert_eq!(info.lineage.as_deref(), Some("B.1"));
    }

    #[test]
    fn mutation_path_for_unknown_sample_is_fatal() {
        let mut placements = Placements::new();
        assert!(parse_mutation_paths("ghost\t1:C1T\n", p(), &mut placements).is_err());
    }

    #[test]
    fn block_multiple_size_triggers_bounded_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PLACEMENT_STATS_FILE);
        fs::write(&path, vec![b'x'; 4096]).unwrap();
        let poll = StabilityPoll {
            block_size: 4096,
            max_retries: 3,
            interval: Duration::from_millis(1),
        };
        let report = poll.wait(&path).unwrap();
        assert_eq!(report.retries, 3);
        assert!(!report.warnings.is_empty());
        assert!(report.gave_up(&poll));

        fs::write(&path, b"s1\t0\t1\n").unwrap();
        let report = poll.wait(&path).unwrap();
        assert_eq!(report.retries, 0);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn empty_stats_file_stops_polling_and_falls_back_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let stats = dir.path().join(PLACEMENT_STATS_FILE);
        let stderr = dir.path().join("usher.stderr");
        fs::write(&stats, b"").unwrap();
        fs::write(
            &stderr,
            "Current tree size (#nodes): 10\tSample name: s1\tParsimony score: 0\tNumber of parsimony-optimal placements: 1\n",
        )
        .unwrap();
        let poll = StabilityPoll {
            block_size: 4096,
            max_retries: 30,
            interval: Duration::from_millis(1),
        };
        let report = poll.wait(&stats).unwrap();
        assert_eq!(report.retries, 1);
        assert!(report.is_empty());
        assert!(report.warnings[0].contains("still empty"));

        let results = load_placements(dir.path(), &stderr, &poll).unwrap();
        assert_eq!(results.source, stderr);
        assert_eq!(results.placements["s1"].best_placement_count, 1);
        assert_eq!(results.poll.as_ref().map(|p| p.retries), Some(1));
    }

    #[test]
    fn reconciles_prefixed_and_missing_ids() {
        let placements =
            parse_placement_stats("uploaded_known\t0\t1\nnovel\t1\t1\n", p()).unwrap();
        let mut ids = vec!["known".to_string(), "novel".to_string(), "lost".to_string()];
        let dropped = reconcile_sample_ids(&mut ids, &placements, "uploaded_");
        assert_eq!(ids, ["uploaded_known", "novel"]);
        assert_eq!(dropped, ["lost"]);
    }
}
