//! Descriptive insertion/deletion bookkeeping per aligned sample.
//!
//! Indels are reported to the user alongside the placement; they never become
//! VCF rows.

use super::AlignmentRecord;

/// Longest indel whose bases are spelled out; longer ones report a base count.
const MAX_SPELLED_INDEL: u32 = 12;

/// Insertions and deletions implied by the gaps between alignment blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndelSummary {
    /// Total inserted query bases.
    pub inserted_bases: u32,
    /// Total deleted reference bases.
    pub deleted_bases: u32,
    /// Insertion descriptions like `11288-11289:TCT` (reference coordinates flanking the insertion).
    pub insertions: Vec<String>,
    /// Deletion descriptions like `11288-11296:TCTGGTTTT` (1-based inclusive reference range).
    pub deletions: Vec<String>,
}

impl IndelSummary {
    /// Tally indels between consecutive blocks of an alignment.
    pub fn from_alignment(record: &AlignmentRecord, query: &[u8], reference: &[u8]) -> Self {
        let mut summary = Self::default();
        for pair in record.blocks.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let q_gap = next.query_start.saturating_sub(prev.query_end());
            let t_gap = next.target_start.saturating_sub(prev.target_end());
            let t_gap_end = next.target_start;
            if q_gap > t_gap {
                let len = q_gap - t_gap;
                summary.inserted_bases += len;
                let description = if len <= MAX_SPELLED_INDEL {
                    let end = next.query_start as usize;
                    format!(
                        "{}-{}:{}",
                        t_gap_end,
                        t_gap_end + 1,
                        spell(query, end - len as usize, end)
                    )
                } else {
                    format!("{}-{}:{} bases", t_gap_end, t_gap_end + 1, len)
                };
                summary.insertions.push(description);
            } else if t_gap > q_gap {
                let len = t_gap - q_gap;
                summary.deleted_bases += len;
                let first = t_gap_end - len + 1;
                let description = if len <= MAX_SPELLED_INDEL {
                    let end = t_gap_end as usize;
                    format!(
                        "{}-{}:{}",
                        first,
                        t_gap_end,
                        spell(reference, end - len as usize, end)
                    )
                } else {
                    format!("{}-{}:{} bases", first, t_gap_end, len)
                };
                summary.deletions.push(description);
            }
        }
        summary
    }

    /// Comma-separated insertion descriptions.
    pub fn insertion_ranges(&self) -> String {
        self.insertions.join(", ")
    }

    /// Comma-separated deletion descriptions.
    pub fn deletion_ranges(&self) -> String {
        self.deletions.join(", ")
    }

    /// Returns `true` when the alignment had no indels.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty()
    }
}

fn spell(bases: &[u8], start: usize, end: usize) -> String {
    bases
        .get(start..end)
        .map(|slice| String::from_utf8_lossy(slice).to_ascii_uppercase())
        .unwrap_or_default()
}
