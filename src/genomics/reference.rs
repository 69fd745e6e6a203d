//! Reference genome and problematic-site mask.

use std::collections::HashMap;
use std::path::Path;

use bitvec::prelude::*;

use super::io::{parse_fasta, read_text, InputError};

/// Single-chromosome reference sequence, stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceGenome {
    name: String,
    bases: Vec<u8>,
}

impl ReferenceGenome {
    /// Build from a name and raw bases.
    pub fn new(name: impl Into<String>, bases: &[u8]) -> Self {
        Self {
            name: name.into(),
            bases: bases.to_ascii_lowercase(),
        }
    }

    /// Parse FASTA text; only the first record is used.
    pub fn from_fasta(text: &str) -> Result<Self, InputError> {
        let first = parse_fasta(text)?
            .into_iter()
            .next()
            .ok_or(InputError::Empty)?;
        let name = first
            .name
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(Self::new(name, &first.bases))
    }

    /// Load a reference FASTA file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, InputError> {
        Self::from_fasta(&read_text(path)?)
    }

    /// Chromosome name used in VCF `#CHROM` columns.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Genome length.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Returns `true` for an empty reference.
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Lower-case bases.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bases
    }

    /// Lower-case base at a 0-based position.
    pub fn base(&self, position: u32) -> Option<u8> {
        self.bases.get(position as usize).copied()
    }
}

/// Positions that should never be reported as variants, each with the
/// reasons it was masked.
#[derive(Debug, Clone, Default)]
pub struct MaskSites {
    masked: BitVec,
    reasons: HashMap<u32, Vec<String>>,
}

impl MaskSites {
    /// Mask with no masked positions.
    pub fn empty(genome_len: usize) -> Self {
        Self {
            masked: bitvec![0; genome_len],
            reasons: HashMap::new(),
        }
    }

    /// Parse BED lines (`chrom start end [reason ...]`) into a mask.
    ///
    /// Intervals are half-open and clipped to the genome; track/browser/comment
    /// lines are skipped. A missing reason is recorded as `masked`.
    pub fn from_bed(text: &str, genome_len: usize) -> Result<Self, InputError> {
        let mut mask = Self::empty(genome_len);
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with("track")
                || line.starts_with("browser")
            {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 {
                return Err(InputError::Mask {
                    line: idx + 1,
                    reason: format!("expected at least 3 columns, got {}", fields.len()),
                });
            }
            let parse = |s: &str| {
                s.trim().parse::<u32>().map_err(|_| InputError::Mask {
                    line: idx + 1,
                    reason: format!("invalid coordinate '{}'", s),
                })
            };
            let start = parse(fields[1])?;
            let end = parse(fields[2])?;
            if end < start {
                return Err(InputError::Mask {
                    line: idx + 1,
                    reason: format!("end {} precedes start {}", end, start),
                });
            }
            let reason = fields
                .get(3)
                .map(|r| r.trim())
                .filter(|r| !r.is_empty())
                .unwrap_or("masked");
            for pos in start..end.min(genome_len as u32) {
                mask.insert(pos, reason);
            }
        }
        Ok(mask)
    }

    /// Load a BED mask file.
    pub fn load<P: AsRef<Path>>(path: P, genome_len: usize) -> Result<Self, InputError> {
        Self::from_bed(&read_text(path)?, genome_len)
    }

    /// Mask one position with a reason.
    pub fn insert(&mut self, position: u32, reason: &str) {
        let idx = position as usize;
        if idx >= self.masked.len() {
            self.masked.resize(idx + 1, false);
        }
        self.masked.set(idx, true);
        self.reasons
            .entry(position)
            .or_default()
            .push(reason.to_string());
    }

    /// Returns `true` when the position is masked.
    pub fn is_masked(&self, position: u32) -> bool {
        self.masked
            .get(position as usize)
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// Reasons recorded for a position (empty when unmasked).
    pub fn reasons(&self, position: u32) -> &[String] {
        self.reasons
            .get(&position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of masked positions.
    pub fn count(&self) -> usize {
        self.masked.count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_lowercased() {
        let reference = ReferenceGenome::from_fasta(">NC_045512.2 Wuhan-Hu-1\nACGT\nNN\n").unwrap();
        assert_eq!(reference.name(), "NC_045512.2");
        assert_eq!(reference.as_bytes(), b"acgtnn");
        assert_eq!(reference.base(3), Some(b't'));
        assert_eq!(reference.base(6), None);
    }

    #[test]
    fn bed_mask_collects_reasons() {
        let bed = "track name=mask\nchr\t2\t4\tseq_end\nchr\t3\t5\thighly_homoplasic\nchr\t9\t20\n";
        let mask = MaskSites::from_bed(bed, 10).unwrap();
        assert!(!mask.is_masked(1));
        assert!(mask.is_masked(2));
        assert_eq!(mask.reasons(3), ["seq_end", "highly_homoplasic"]);
        assert_eq!(mask.reasons(9), ["masked"]);
        assert_eq!(mask.count(), 4);
        assert!(!mask.is_masked(15));
    }

    #[test]
    fn bed_mask_rejects_bad_lines() {
        assert!(MaskSites::from_bed("chr\t5\n", 10).is_err());
        assert!(MaskSites::from_bed("chr\tx\t5\n", 10).is_err());
        assert!(MaskSites::from_bed("chr\t6\t5\n", 10).is_err());
    }
}
