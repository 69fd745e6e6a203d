//! Condensed nodes: tree leaves standing for groups of identical samples.
//!
//! The placement engine collapses samples with identical genotypes into a
//! single leaf such as `node_1234_condensed_17_leaves`. For display, such a
//! leaf is renamed after its members, summarizing by country when most member
//! names carry one (`3 from England+Wales[2] eg England/ABC/2020`).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use regex::Regex;

use super::TreeError;

/// Member names look like `Country/lab-id/2020`.
pub const COUNTRY_PATTERN: &str = "([A-Za-z_]+)/[^/]+/20";

const MAX_SUMMARY_LEN: usize = 100;

/// Summarize a list of sample names by country, or `None` when fewer than
/// half of them carry a recognizable country.
///
/// Countries are listed by decreasing count (ties alphabetically), with a
/// `[count]` suffix when a country appears more than once; the list is cut
/// short with `+...` once it grows past 100 characters.
pub fn summarize_countries(ids: &[String], pattern: &Regex) -> Option<String> {
    let first = ids.first()?;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut with_country = 0usize;
    for id in ids {
        if let Some(country) = pattern.captures(id).and_then(|c| c.get(1)) {
            *counts.entry(country.as_str()).or_default() += 1;
            with_country += 1;
        }
    }
    if with_country == 0 || (with_country as f64) / (ids.len() as f64) < 0.5 {
        return None;
    }

    let mut summary = format!("{} from ", ids.len());
    if counts.len() == 1 {
        summary.extend(counts.keys().copied());
    } else {
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        for (i, (country, count)) in ranked.iter().enumerate() {
            if summary.len() > MAX_SUMMARY_LEN {
                summary.push_str("+...");
                break;
            }
            if i > 0 {
                summary.push('+');
            }
            summary.push_str(country);
            if *count > 1 {
                summary.push_str(&format!("[{}]", count));
            }
        }
    }
    summary.push_str(" eg ");
    summary.push_str(first);
    Some(summary.replace(' ', "_"))
}

/// Member lists of condensed leaves, keyed by leaf name.
#[derive(Debug, Clone)]
pub struct CondensedNodes {
    members: HashMap<String, Vec<String>>,
    pattern: Regex,
}

impl CondensedNodes {
    /// Empty table using [`COUNTRY_PATTERN`].
    pub fn new() -> Result<Self, TreeError> {
        Self::with_pattern(COUNTRY_PATTERN)
    }

    /// Empty table with a custom country pattern; capture group 1 is the
    /// country.
    pub fn with_pattern(pattern: &str) -> Result<Self, TreeError> {
        Ok(Self {
            members: HashMap::new(),
            pattern: Regex::new(pattern)?,
        })
    }

    /// Parse `leaf<TAB>member1,member2,...` lines. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn from_tsv(text: &str, path: &Path) -> Result<Self, TreeError> {
        let mut table = Self::new()?;
        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, list) = line.split_once('\t').ok_or_else(|| TreeError::MutationLine {
                path: path.to_path_buf(),
                line: index + 1,
                message: "expected condensed node name and member list separated by a tab"
                    .into(),
            })?;
            let members = list
                .split([',', '\t'])
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
            table.insert(name.trim(), members);
        }
        Ok(table)
    }

    /// Read a condensed-node table file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TreeError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TreeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_tsv(&text, path)
    }

    /// Add or replace the members of a condensed leaf.
    pub fn insert(&mut self, name: impl Into<String>, members: Vec<String>) {
        self.members.insert(name.into(), members);
    }

    /// Members of a condensed leaf.
    pub fn members(&self, name: &str) -> Option<&[String]> {
        self.members.get(name).map(Vec::as_slice)
    }

    /// Number of condensed leaves.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` when no condensed leaves are known.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Display name for a condensed leaf, or `None` when `name` is not one.
    pub fn display_name(&self, name: &str) -> Option<String> {
        let members = self.members(name).filter(|m| !m.is_empty())?;
        summarize_countries(members, &self.pattern)
            .or_else(|| Some(format!("{}_and_{}_others", members[0], members.len() - 1)))
    }
}
