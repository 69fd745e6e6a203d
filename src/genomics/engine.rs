//! Reference alignment of validated uploads and per-sample SNV extraction.
//!
//! Each sample keeps exactly one alignment. Every reference position the
//! alignment does not cover becomes a no-call for that sample unless it is
//! masked; aligned positions are called against the reference base.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::nucleotide::reverse_complement;
use super::validator::{Failure, SequenceQc, ValidatedSequence};
use super::vcf::{render_vcf, VcfError};
use super::{
    Aligner, AlignerError, AlignmentRecord, IndelSummary, MaskSites, MaskedSnv, ReferenceGenome,
    Snv, Strand, VariantTable,
};

/// Errors that abort a whole alignment batch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The aligner itself failed.
    #[error("aligner failed: {0}")]
    Aligner(#[from] AlignerError),

    /// An alignment block points outside the reference or the query.
    #[error("alignment of {sample} extends past the end of the {side} ({end} > {len})")]
    OutOfBounds {
        /// Sample id.
        sample: String,
        /// `reference` or `query`.
        side: &'static str,
        /// Offending exclusive end coordinate.
        end: u32,
        /// Length of the sequence on that side.
        len: usize,
    },

    /// Rendering the VCF failed.
    #[error(transparent)]
    Vcf(#[from] VcfError),
}

/// A sample that aligned, with everything derived from its alignment.
#[derive(Debug, Clone)]
pub struct AlignedSample {
    /// Final sample id (VCF column name).
    pub id: String,
    /// Name as uploaded.
    pub original_name: String,
    /// QC counts from validation.
    pub qc: SequenceQc,
    /// The alignment kept for this sample.
    pub alignment: AlignmentRecord,
    /// Unmasked changes relative to the reference, in position order.
    pub snvs: Vec<Snv>,
    /// Changes at masked positions.
    pub masked: Vec<MaskedSnv>,
    /// Insertions and deletions implied by the alignment.
    pub indels: IndelSummary,
}

/// Result of aligning one batch.
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    /// Aligned samples in input order.
    pub samples: Vec<AlignedSample>,
    /// Samples that could not be aligned, plus demoted duplicate alignments.
    pub failures: Vec<Failure>,
    /// Calls for every sample, one genotype column per entry of `samples`.
    pub table: VariantTable,
    /// Rendered VCF 4.2 text.
    pub vcf: String,
}

impl AlignmentOutcome {
    /// Sample ids in VCF column order.
    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }
}

/// Drives an [`Aligner`] over validated sequences and builds the variant table.
#[derive(Debug)]
pub struct AlignmentEngine<'a, A: Aligner> {
    reference: &'a ReferenceGenome,
    mask: &'a MaskSites,
    aligner: A,
}

impl<'a, A: Aligner> AlignmentEngine<'a, A> {
    /// Engine over a reference and its problematic-site mask.
    pub fn new(reference: &'a ReferenceGenome, mask: &'a MaskSites, aligner: A) -> Self {
        Self {
            reference,
            mask,
            aligner,
        }
    }

    /// Align every sequence, keep one alignment each, and extract calls.
    pub fn run(&self, sequences: Vec<ValidatedSequence>) -> Result<AlignmentOutcome, EngineError> {
        let mut failures = Vec::new();
        let mut kept: Vec<(ValidatedSequence, AlignmentRecord)> = Vec::new();

        for validated in sequences {
            let records = self.aligner.align(&validated.sequence)?;
            match self.choose(&validated, records, &mut failures) {
                Some(record) => kept.push((validated, record)),
                None => {
                    let failure = Failure::new(
                        validated.id(),
                        format!(
                            "Sequence {} could not be aligned to the reference; skipping",
                            validated.original_name
                        ),
                    );
                    warn!(sample = %failure.name, "no alignment to reference");
                    failures.push(failure);
                }
            }
        }

        let mut table = VariantTable::new(self.reference.len(), kept.len());
        let mut samples = Vec::with_capacity(kept.len());
        for (column, (validated, record)) in kept.into_iter().enumerate() {
            samples.push(self.extract(column, validated, record, &mut table)?);
        }

        let ids: Vec<String> = samples.iter().map(|s: &AlignedSample| s.id.clone()).collect();
        let vcf = render_vcf(self.reference.name(), &ids, &table, self.mask)?;
        info!(
            aligned = samples.len(),
            failed = failures.len(),
            "alignment complete"
        );
        Ok(AlignmentOutcome {
            samples,
            failures,
            table,
            vcf,
        })
    }

    /// Pick the alignment with the most matching bases; the earlier one wins
    /// ties. Every other alignment is reported as a failure.
    fn choose(
        &self,
        validated: &ValidatedSequence,
        records: Vec<AlignmentRecord>,
        failures: &mut Vec<Failure>,
    ) -> Option<AlignmentRecord> {
        let target = self.reference.as_bytes();
        let query = &validated.sequence.bases;
        let mut best: Option<(u32, AlignmentRecord)> = None;
        for record in records {
            let score = record.matches(target, query);
            let Some((best_score, current)) = best.take() else {
                best = Some((score, record));
                continue;
            };
            let (winner, loser) = if score > best_score {
                ((score, record), current)
            } else {
                ((best_score, current), record)
            };
            let reason = format!(
                "Warning: multiple alignments to reference found for sequence {} ({}-{} and {}-{}).  Skipping alignment of {}-{}",
                validated.original_name,
                winner.1.query_start(),
                winner.1.query_end(),
                loser.query_start(),
                loser.query_end(),
                loser.query_start(),
                loser.query_end()
            );
            warn!(sample = %validated.id(), "multiple alignments; keeping best");
            failures.push(Failure::new(validated.id(), reason));
            best = Some(winner);
        }
        best.map(|(_, record)| record)
    }

    fn extract(
        &self,
        column: usize,
        validated: ValidatedSequence,
        record: AlignmentRecord,
        table: &mut VariantTable,
    ) -> Result<AlignedSample, EngineError> {
        let id = validated.id().to_string();
        let mut query = validated.sequence.bases;
        if record.strand == Strand::Reverse {
            reverse_complement(&mut query);
        }
        let target = self.reference.as_bytes();
        for block in &record.blocks {
            if block.target_end() as usize > target.len() {
                return Err(EngineError::OutOfBounds {
                    sample: id,
                    side: "reference",
                    end: block.target_end(),
                    len: target.len(),
                });
            }
            if block.query_end() as usize > query.len() {
                return Err(EngineError::OutOfBounds {
                    sample: id,
                    side: "query",
                    end: block.query_end(),
                    len: query.len(),
                });
            }
        }

        let mut snvs = Vec::new();
        let mut masked = Vec::new();
        let mut next_uncovered = 0u32;
        for block in &record.blocks {
            self.no_calls(table, column, next_uncovered, block.target_start);
            for offset in 0..block.len {
                let t = block.target_start + offset;
                let reference_base = target[t as usize];
                let observed = query[(block.query_start + offset) as usize];
                if table.add_call(t, reference_base, observed, column) <= 0 {
                    continue;
                }
                let snv = Snv::from_reference(
                    t,
                    reference_base.to_ascii_uppercase(),
                    observed.to_ascii_uppercase(),
                );
                if self.mask.is_masked(t) {
                    masked.push(MaskedSnv {
                        snv,
                        reasons: self.mask.reasons(t).to_vec(),
                    });
                } else {
                    snvs.push(snv);
                }
            }
            next_uncovered = next_uncovered.max(block.target_end());
        }
        self.no_calls(table, column, next_uncovered, target.len() as u32);

        let indels = IndelSummary::from_alignment(&record, &query, target);
        debug!(
            sample = %id,
            snvs = snvs.len(),
            masked = masked.len(),
            inserted = indels.inserted_bases,
            deleted = indels.deleted_bases,
            "extracted calls"
        );
        Ok(AlignedSample {
            id,
            original_name: validated.original_name,
            qc: validated.qc,
            alignment: record,
            snvs,
            masked,
            indels,
        })
    }

    fn no_calls(&self, table: &mut VariantTable, column: usize, start: u32, end: u32) {
        let target = self.reference.as_bytes();
        for t in start..end {
            if !self.mask.is_masked(t) {
                table.add_call(t, target[t as usize], b'-', column);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{AlignmentBlock, Sequence};

    /// Aligner returning canned records regardless of the query.
    struct Canned(Vec<Vec<AlignmentBlock>>);

    impl Aligner for Canned {
        fn align(&self, query: &Sequence) -> Result<Vec<AlignmentRecord>, AlignerError> {
            Ok(self
                .0
                .iter()
                .map(|blocks| AlignmentRecord {
                    query_name: query.name.clone(),
                    target_name: "ref".into(),
                    strand: Strand::Forward,
                    query_size: query.len() as u32,
                    target_size: 12,
                    blocks: blocks.clone(),
                })
                .collect())
        }
    }

    fn validated(name: &str, bases: &[u8]) -> ValidatedSequence {
        ValidatedSequence {
            sequence: Sequence::new(name, bases.to_vec()),
            original_name: name.to_string(),
            qc: SequenceQc::measure(bases),
        }
    }

    #[test]
    fn unaligned_edges_become_no_calls_unless_masked() {
        let reference = ReferenceGenome::new("ref", b"acgtacgtacgt");
        let mut mask = MaskSites::empty(12);
        mask.insert(0, "edge");
        mask.insert(5, "homoplasy");
        let aligner = Canned(vec![vec![AlignmentBlock::new(2, 0, 8)]]);
        let engine = AlignmentEngine::new(&reference, &mask, aligner);
        let outcome = engine.run(vec![validated("s", b"gtaggtac")]).unwrap();

        let sample = &outcome.samples[0];
        assert!(sample.snvs.is_empty());
        assert_eq!(sample.masked.len(), 1);
        assert_eq!(sample.masked[0].snv.to_string(), "C6G");
        assert_eq!(sample.masked[0].reasons, ["homoplasy"]);

        let rows: Vec<u32> = outcome.table.rows(&mask).map(|(pos, _)| pos).collect();
        assert_eq!(rows, vec![1, 10, 11]);
    }

    #[test]
    fn best_duplicate_alignment_wins_and_loser_is_reported() {
        let reference = ReferenceGenome::new("ref", b"acgtacgtacgt");
        let mask = MaskSites::empty(12);
        let aligner = Canned(vec![
            vec![AlignmentBlock::new(0, 0, 4)],
            vec![AlignmentBlock::new(0, 0, 12)],
            vec![AlignmentBlock::new(0, 0, 12)],
        ]);
        let engine = AlignmentEngine::new(&reference, &mask, aligner);
        let outcome = engine.run(vec![validated("dup", b"acgtacgtacgt")]).unwrap();
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(outcome.samples[0].alignment.query_end(), 12);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures[0]
            .reason
            .ends_with("Skipping alignment of 0-4"));
        assert!(outcome.failures[1]
            .reason
            .contains("(0-12 and 0-12)"));
    }

    #[test]
    fn unaligned_sequence_is_a_failure() {
        let reference = ReferenceGenome::new("ref", b"acgtacgtacgt");
        let mask = MaskSites::empty(12);
        let engine = AlignmentEngine::new(&reference, &mask, Canned(Vec::new()));
        let outcome = engine.run(vec![validated("lost", b"tttttttt")]).unwrap();
        assert!(outcome.samples.is_empty());
        assert_eq!(
            outcome.failures[0].reason,
            "Sequence lost could not be aligned to the reference; skipping"
        );
        assert_eq!(outcome.vcf.lines().count(), 3);
    }

    #[test]
    fn out_of_range_block_is_an_error() {
        let reference = ReferenceGenome::new("ref", b"acgtacgtacgt");
        let mask = MaskSites::empty(12);
        let engine = AlignmentEngine::new(
            &reference,
            &mask,
            Canned(vec![vec![AlignmentBlock::new(8, 0, 8)]]),
        );
        let err = engine.run(vec![validated("s", b"acgtacgt")]).unwrap_err();
        assert!(matches!(err, EngineError::OutOfBounds { side: "reference", .. }));
    }
}
