use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Uploaded nucleotide sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Identifier taken from the FASTA header line.
    pub name: String,
    /// Bases exactly as uploaded (mixed case allowed).
    pub bases: Vec<u8>,
}

impl Sequence {
    /// Construct a new named sequence.
    pub fn new(name: impl Into<String>, bases: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bases: bases.into(),
        }
    }

    /// Number of bases.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Returns `true` when the sequence holds no bases.
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

/// Single-nucleotide change relative to the reference genome or to a parent node.
///
/// Changes derived from an alignment know their reference base; changes parsed
/// from placement-engine output only know the parent (ancestral) base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Snv {
    /// 0-based reference coordinate.
    pub position: u32,
    /// Reference base at `position`, when known.
    pub reference: Option<u8>,
    /// Base carried by the parent node, when known.
    pub parent: Option<u8>,
    /// Substituted base.
    pub alternate: u8,
}

impl Snv {
    /// Change observed against the reference genome.
    pub fn from_reference(position: u32, reference: u8, alternate: u8) -> Self {
        Self {
            position,
            reference: Some(reference),
            parent: None,
            alternate,
        }
    }

    /// Change observed along a tree branch.
    pub fn from_parent(position: u32, parent: u8, alternate: u8) -> Self {
        Self {
            position,
            reference: None,
            parent: Some(parent),
            alternate,
        }
    }

    /// Base the change starts from: the parent base when known, else the reference.
    pub fn original_base(&self) -> u8 {
        self.parent.or(self.reference).unwrap_or(b'N')
    }

    /// Returns `true` when the substituted base restores the reference base.
    pub fn is_back_mutation(&self, reference_base: u8) -> bool {
        self.alternate.eq_ignore_ascii_case(&reference_base)
    }

    /// 1-based coordinate as printed in VCF rows and mutation labels.
    pub fn one_based(&self) -> u32 {
        self.position + 1
    }
}

impl fmt::Display for Snv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.original_base() as char,
            self.one_based(),
            self.alternate as char
        )
    }
}

/// Alternate call at a masked position, kept apart from the reportable changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedSnv {
    /// The change itself.
    pub snv: Snv,
    /// Why the position is masked.
    pub reasons: Vec<String>,
}

/// Failure to parse an `<old><pos><new>` token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected single-nucleotide change but got '{0}'")]
pub struct SnvParseError(pub String);

impl FromStr for Snv {
    type Err = SnvParseError;

    /// Parses tokens like `C241T` into a parent-relative change at 0-based 240.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let bytes = token.as_bytes();
        let malformed = || SnvParseError(token.to_string());
        if bytes.len() < 3 {
            return Err(malformed());
        }
        let old = bytes[0];
        let new = bytes[bytes.len() - 1];
        if !is_acgt(old) || !is_acgt(new) {
            return Err(malformed());
        }
        let digits = &token[1..token.len() - 1];
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let one_based: u32 = digits.parse().map_err(|_| malformed())?;
        if one_based == 0 {
            return Err(malformed());
        }
        Ok(Snv::from_parent(one_based - 1, old, new))
    }
}

fn is_acgt(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T')
}

/// Alignment strand of the query relative to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    /// Same orientation as the reference.
    Forward,
    /// Reverse-complemented.
    Reverse,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Forward => f.write_str("+"),
            Strand::Reverse => f.write_str("-"),
        }
    }
}

/// Gap-free run of aligned bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentBlock {
    /// 0-based start on the reference.
    pub target_start: u32,
    /// 0-based start on the query.
    pub query_start: u32,
    /// Number of aligned bases.
    pub len: u32,
}

impl AlignmentBlock {
    /// Construct a block.
    pub fn new(target_start: u32, query_start: u32, len: u32) -> Self {
        Self {
            target_start,
            query_start,
            len,
        }
    }

    /// Exclusive reference end.
    pub fn target_end(&self) -> u32 {
        self.target_start + self.len
    }

    /// Exclusive query end.
    pub fn query_end(&self) -> u32 {
        self.query_start + self.len
    }
}

/// One alignment of a query sequence against the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    /// Query (uploaded sequence) name.
    pub query_name: String,
    /// Reference name.
    pub target_name: String,
    /// Query orientation.
    pub strand: Strand,
    /// Full query length.
    pub query_size: u32,
    /// Full reference length.
    pub target_size: u32,
    /// Blocks ordered by increasing target and query coordinate.
    pub blocks: Vec<AlignmentBlock>,
}

impl AlignmentRecord {
    /// Start of the first block on the reference.
    pub fn target_start(&self) -> u32 {
        self.blocks.first().map_or(0, |b| b.target_start)
    }

    /// End of the last block on the reference.
    pub fn target_end(&self) -> u32 {
        self.blocks.last().map_or(0, |b| b.target_end())
    }

    /// Start of the first block on the query.
    pub fn query_start(&self) -> u32 {
        self.blocks.first().map_or(0, |b| b.query_start)
    }

    /// End of the last block on the query.
    pub fn query_end(&self) -> u32 {
        self.blocks.last().map_or(0, |b| b.query_end())
    }

    /// Count identical bases across all blocks (case-insensitive).
    pub fn matches(&self, target: &[u8], query: &[u8]) -> u32 {
        let mut count = 0;
        for block in &self.blocks {
            for offset in 0..block.len {
                let t = target.get((block.target_start + offset) as usize);
                let q = query.get((block.query_start + offset) as usize);
                if let (Some(t), Some(q)) = (t, q) {
                    if t.eq_ignore_ascii_case(q) {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snv_display_prefers_parent_base() {
        let mut snv = Snv::from_reference(240, b'C', b'T');
        assert_eq!(snv.to_string(), "C241T");
        snv.parent = Some(b'G');
        assert_eq!(snv.to_string(), "G241T");
    }

    #[test]
    fn snv_parses_mutation_tokens() {
        let snv: Snv = "A23403G".parse().unwrap();
        assert_eq!(snv.position, 23402);
        assert_eq!(snv.parent, Some(b'A'));
        assert_eq!(snv.alternate, b'G');
        assert!("N123A".parse::<Snv>().is_err());
        assert!("A0G".parse::<Snv>().is_err());
        assert!("A12".parse::<Snv>().is_err());
        assert!("a12g".parse::<Snv>().is_err());
    }

    #[test]
    fn back_mutation_compares_case_insensitively() {
        let snv = Snv::from_parent(10, b'T', b'C');
        assert!(snv.is_back_mutation(b'c'));
        assert!(!snv.is_back_mutation(b'T'));
    }

    #[test]
    fn record_counts_matching_bases() {
        let record = AlignmentRecord {
            query_name: "q".into(),
            target_name: "ref".into(),
            strand: Strand::Forward,
            query_size: 8,
            target_size: 10,
            blocks: vec![AlignmentBlock::new(0, 0, 4), AlignmentBlock::new(6, 4, 4)],
        };
        let target = b"acgtacgtac";
        let query = b"ACGAGTAC";
        assert_eq!(record.matches(target, query), 7);
        assert_eq!(record.target_end(), 10);
        assert_eq!(record.query_end(), 8);
    }
}
