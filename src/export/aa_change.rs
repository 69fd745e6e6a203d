//! Amino-acid consequences of the nucleotide changes on a branch.

use super::codon::translate_codon;
use super::genes::GeneAnnotation;
use super::ExportError;
use crate::genomics::{nucleotide, Snv, Strand};

/// Amino-acid changes of one gene, in branch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneAaChanges {
    /// Gene name.
    pub gene: String,
    /// Labels like `D614G`.
    pub changes: Vec<String>,
}

fn oriented(base: u8, strand: Strand) -> u8 {
    let base = base.to_ascii_uppercase();
    match strand {
        Strand::Forward => base,
        Strand::Reverse => nucleotide::complement(base),
    }
}

/// Translate one codon before and after a group of same-codon changes.
///
/// The old codon starts from the reference and takes every ancestral change
/// that falls inside it; each ancestral change must start from the base the
/// codon holds at that point.
fn codon_change(
    gene: &GeneAnnotation,
    index: u32,
    group: &[(usize, Snv)],
    ancestors: &[Snv],
) -> Result<Option<String>, ExportError> {
    let Some(mut old) = gene.codon(index) else {
        return Ok(None);
    };
    let positions = gene.codon_positions(index);
    for ancestor in ancestors {
        let Some(offset) = positions.iter().position(|&p| p == Some(ancestor.position)) else {
            continue;
        };
        let expected = old[offset];
        let found = oriented(ancestor.original_base(), gene.strand());
        if found != expected {
            return Err(ExportError::AncestorMismatch {
                gene: gene.name().to_string(),
                position: ancestor.one_based(),
                codon: index,
                offset,
                expected: expected as char,
                found: found as char,
            });
        }
        old[offset] = oriented(ancestor.alternate, gene.strand());
    }

    let mut new = old;
    for &(offset, snv) in group {
        new[offset] = oriented(snv.alternate, gene.strand());
    }
    let (old_aa, new_aa) = (translate_codon(old), translate_codon(new));
    Ok((old_aa != new_aa).then(|| format!("{}{}{}", old_aa as char, index + 1, new_aa as char)))
}

/// Amino-acid changes caused by `snvs` given the changes already made on
/// the path from the root (`ancestors`, root first).
///
/// Consecutive changes in the same codon are combined. Genes without any
/// non-synonymous change are left out.
pub fn amino_acid_changes(
    snvs: &[Snv],
    ancestors: &[Snv],
    genes: &[GeneAnnotation],
) -> Result<Vec<GeneAaChanges>, ExportError> {
    let mut result = Vec::new();
    for gene in genes {
        let mut changes = Vec::new();
        let mut group: Vec<(usize, Snv)> = Vec::new();
        let mut current: Option<u32> = None;
        for snv in snvs {
            let Some((index, offset)) = gene.codon_of(snv.position) else {
                continue;
            };
            if let Some(previous) = current.filter(|&c| c != index) {
                changes.extend(codon_change(gene, previous, &group, ancestors)?);
                group.clear();
            }
            current = Some(index);
            group.push((offset, *snv));
        }
        if let Some(index) = current {
            changes.extend(codon_change(gene, index, &group, ancestors)?);
        }
        if !changes.is_empty() {
            result.push(GeneAaChanges {
                gene: gene.name().to_string(),
                changes,
            });
        }
    }
    Ok(result)
}
