//! Categorical node attributes and their strict-majority reduction.

use std::collections::BTreeMap;

/// Strict majority over `values`, where "no value" is a candidate too.
///
/// Returns the value held by more than half of the inputs; `None` when there
/// is no such value or when absence itself is the majority.
pub fn strict_majority<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut counts: BTreeMap<Option<&str>, usize> = BTreeMap::new();
    let mut total = 0usize;
    for value in values {
        *counts.entry(value).or_default() += 1;
        total += 1;
    }
    counts
        .into_iter()
        .find(|&(_, count)| count > total / 2)
        .and_then(|(value, _)| value.map(str::to_string))
}

/// Categorical attributes shown as node colors; leaves get them from
/// metadata and placements, internal nodes from their children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAttributes {
    /// `uploaded sample` or the source of the big tree.
    pub user_or_old: Option<String>,
    /// Nextstrain clade from metadata.
    pub nextstrain_clade: Option<String>,
    /// GISAID clade from metadata.
    pub gisaid_clade: Option<String>,
    /// Pango lineage from metadata.
    pub lineage: Option<String>,
    /// Nextstrain lineage from metadata.
    pub nextstrain_lineage: Option<String>,
    /// Clade assigned by the placement engine.
    pub nextstrain_clade_usher: Option<String>,
    /// Lineage assigned by the placement engine.
    pub lineage_usher: Option<String>,
}

impl NodeAttributes {
    /// Attributes of an internal node: per attribute, the strict majority of
    /// its children.
    pub fn majority(children: &[NodeAttributes]) -> NodeAttributes {
        NodeAttributes {
            user_or_old: vote(children, |a| a.user_or_old.as_deref()),
            nextstrain_clade: vote(children, |a| a.nextstrain_clade.as_deref()),
            gisaid_clade: vote(children, |a| a.gisaid_clade.as_deref()),
            lineage: vote(children, |a| a.lineage.as_deref()),
            nextstrain_lineage: vote(children, |a| a.nextstrain_lineage.as_deref()),
            nextstrain_clade_usher: vote(children, |a| a.nextstrain_clade_usher.as_deref()),
            lineage_usher: vote(children, |a| a.lineage_usher.as_deref()),
        }
    }
}

fn vote(
    children: &[NodeAttributes],
    field: impl Fn(&NodeAttributes) -> Option<&str>,
) -> Option<String> {
    strict_majority(children.iter().map(field))
}
