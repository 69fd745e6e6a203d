//! Upload quality control: size bounds, N content and sample-name hygiene.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::nucleotide::is_iupac_ambiguous;
use super::Sequence;

/// Prefix added to uploaded names that collide with names already in the tree.
pub const SAMPLE_PREFIX: &str = "uploaded_";

/// Default ceiling on interior N bases as a fraction of effective length.
pub const DEFAULT_MAX_N_FRACTION: f64 = 0.5;

/// Characters with special meaning in Newick notation.
const NEWICK_SPECIAL: &[char] = &['(', ')', ':', ';', ','];

/// Size and N-content limits applied to uploaded sequences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorConfig {
    /// Minimum raw and effective length.
    pub min_len: usize,
    /// Maximum raw length.
    pub max_len: usize,
    /// Maximum interior-N fraction of the effective length.
    pub max_n_fraction: f64,
}

impl ValidatorConfig {
    /// Defaults per reference database: SARS-CoV-2 (`wuhCor1`) sized genomes vs
    /// larger viral genomes.
    pub fn for_database(db: &str) -> Self {
        let (min_len, max_len) = if db == "wuhCor1" {
            (10_000, 35_000)
        } else {
            (100_000, 220_000)
        };
        Self {
            min_len,
            max_len,
            max_n_fraction: DEFAULT_MAX_N_FRACTION,
        }
    }
}

/// Per-sequence N and ambiguity counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceQc {
    /// Run of N bases at the start.
    pub n_start: usize,
    /// N bases between the first and last non-N base.
    pub n_middle: usize,
    /// Run of N bases at the end.
    pub n_end: usize,
    /// IUPAC-ambiguous bases other than N.
    pub ambiguous: usize,
}

impl SequenceQc {
    /// Count Ns and ambiguous bases of a lower-cased sequence.
    pub fn measure(bases: &[u8]) -> Self {
        let total_n = bases.iter().filter(|&&b| b == b'n').count();
        let n_start = bases.iter().take_while(|&&b| b == b'n').count();
        let n_end = if n_start < bases.len() {
            bases.iter().rev().take_while(|&&b| b == b'n').count()
        } else {
            0
        };
        let ambiguous = bases
            .iter()
            .filter(|&&b| b != b'n' && is_iupac_ambiguous(b))
            .count();
        Self {
            n_start,
            n_middle: total_n - n_start - n_end,
            n_end,
            ambiguous,
        }
    }

    /// Total N count.
    pub fn n_total(&self) -> usize {
        self.n_start + self.n_middle + self.n_end
    }

    /// Length excluding leading and trailing N runs.
    pub fn effective_len(&self, len: usize) -> usize {
        len - self.n_start - self.n_end
    }
}

/// Sample excluded from downstream processing, with a reason meant for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Sample name as it was known when the failure happened.
    pub name: String,
    /// Human-readable reason.
    pub reason: String,
}

impl Failure {
    /// Construct a failure record.
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Sequence that passed QC, lower-cased and carrying its final sample id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSequence {
    /// Sequence whose name is the final sample id.
    pub sequence: Sequence,
    /// Name as uploaded.
    pub original_name: String,
    /// N and ambiguity counts.
    pub qc: SequenceQc,
}

impl ValidatedSequence {
    /// Final sample id.
    pub fn id(&self) -> &str {
        &self.sequence.name
    }

    /// Returns `true` when the id differs from the uploaded name.
    pub fn renamed(&self) -> bool {
        self.sequence.name != self.original_name
    }
}

/// Accepted sequences (input order) plus failures (input order).
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Sequences passing all checks.
    pub accepted: Vec<ValidatedSequence>,
    /// Rejected sequences.
    pub failures: Vec<Failure>,
}

/// Filters and normalizes uploaded sequences.
#[derive(Debug, Clone)]
pub struct SequenceValidator {
    config: ValidatorConfig,
    tree_names: Option<HashSet<String>>,
}

impl SequenceValidator {
    /// Validator without knowledge of the tree's sample names.
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            tree_names: None,
        }
    }

    /// Supply names already present in the placement tree so colliding uploads are prefixed.
    pub fn with_tree_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tree_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Active limits.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Returns `true` when `name` is already taken in the tree (including numeric
    /// internal node ids). Always `false` when no tree names were supplied.
    pub fn collides_with_tree(&self, name: &str) -> bool {
        match &self.tree_names {
            Some(names) => is_internal_node_name(name) || names.contains(name),
            None => false,
        }
    }

    /// Run QC over sequences, preserving input order.
    pub fn validate(&self, sequences: Vec<Sequence>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        let mut used: HashSet<String> = HashSet::new();
        for sequence in sequences {
            match self.check(sequence, &used) {
                Ok(accepted) => {
                    used.insert(accepted.sequence.name.clone());
                    outcome.accepted.push(accepted);
                }
                Err(failure) => {
                    warn!(sample = %failure.name, reason = %failure.reason, "sequence rejected");
                    outcome.failures.push(failure);
                }
            }
        }
        debug!(
            accepted = outcome.accepted.len(),
            failed = outcome.failures.len(),
            "sequence validation complete"
        );
        outcome
    }

    fn check(&self, sequence: Sequence, used: &HashSet<String>) -> Result<ValidatedSequence, Failure> {
        let Sequence { name, bases } = sequence;
        let size = bases.len();
        let cfg = &self.config;
        if size < cfg.min_len {
            return Err(Failure::new(
                &name,
                format!(
                    "Sequence {} has too few bases ({}, must have at least {}); skipping.",
                    name, size, cfg.min_len
                ),
            ));
        }
        if size > cfg.max_len {
            return Err(Failure::new(
                &name,
                format!(
                    "Sequence {} has too many bases ({}, must have at most {}); skipping.",
                    name, size, cfg.max_len
                ),
            ));
        }

        let bases = bases.to_ascii_lowercase();
        let qc = SequenceQc::measure(&bases);
        let effective = qc.effective_len(size);
        if effective < cfg.min_len {
            return Err(Failure::new(
                &name,
                format!(
                    "Sequence {} has too few bases ({} excluding {} Ns at beginning and {} Ns at end), must have at least {}); skipping.",
                    name, effective, qc.n_start, qc.n_end, cfg.min_len
                ),
            ));
        }
        if qc.n_middle as f64 > cfg.max_n_fraction * effective as f64 {
            return Err(Failure::new(
                &name,
                format!(
                    "Sequence {} has too many N bases ({} out of {} > {:.2}); skipping.",
                    name, qc.n_middle, effective, cfg.max_n_fraction
                ),
            ));
        }

        let sanitized = replace_newick_chars(&name);
        if sanitized.is_empty() {
            return Err(Failure::new(
                &name,
                format!("Sequence name '{}' has no usable characters; skipping.", name),
            ));
        }
        let id = if self.collides_with_tree(&sanitized) {
            format!("{}{}", SAMPLE_PREFIX, sanitized)
        } else {
            sanitized.clone()
        };
        // `used` holds final ids, so a prefixed repeat must be caught by its id too.
        if used.contains(&sanitized) || used.contains(&id) {
            return Err(Failure::new(
                &sanitized,
                format!(
                    "Sequence name '{}' has already been used; ignoring subsequent usage ({} bases, {} N's, {} ambiguous).",
                    sanitized,
                    size,
                    qc.n_total(),
                    qc.ambiguous
                ),
            ));
        }

        Ok(ValidatedSequence {
            sequence: Sequence::new(id, bases),
            original_name: name,
            qc,
        })
    }
}

/// Replace Newick-special characters with `_`, then trim boundary underscores and
/// collapse runs of underscores. Names without special characters are returned as-is.
pub fn replace_newick_chars(name: &str) -> String {
    if !name.contains(NEWICK_SPECIAL) {
        return name.to_string();
    }
    let replaced: String = name
        .chars()
        .map(|c| if NEWICK_SPECIAL.contains(&c) { '_' } else { c })
        .collect();
    let mut collapsed = String::with_capacity(replaced.len());
    for c in replaced.trim_matches('_').chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

/// Numeric names are reserved for internal tree nodes.
pub fn is_internal_node_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn config() -> ValidatorConfig {
        ValidatorConfig {
            min_len: 10,
            max_len: 40,
            max_n_fraction: 0.5,
        }
    }

    fn seq(name: &str, bases: &str) -> Sequence {
        Sequence::new(name, bases.as_bytes().to_vec())
    }

    #[test_case("plain_name", "plain_name" ; "untouched")]
    #[test_case("a(b)c", "a_b_c" ; "parentheses")]
    #[test_case("(x:y)", "x_y" ; "boundary underscores trimmed")]
    #[test_case("a,;b", "a_b" ; "runs collapsed")]
    #[test_case("hCoV-19/USA/CA-1/2020|EPI_ISL_1", "hCoV-19/USA/CA-1/2020|EPI_ISL_1" ; "pipes allowed")]
    fn newick_names(input: &str, expected: &str) {
        assert_eq!(replace_newick_chars(input), expected);
    }

    #[test]
    fn counts_boundary_and_interior_ns() {
        let qc = SequenceQc::measure(b"nnacgtnnnacrynn");
        assert_eq!(qc.n_start, 2);
        assert_eq!(qc.n_middle, 3);
        assert_eq!(qc.n_end, 2);
        assert_eq!(qc.ambiguous, 2);
        assert_eq!(qc.effective_len(15), 11);
    }

    #[test]
    fn all_n_sequence_has_zero_effective_length() {
        let qc = SequenceQc::measure(b"nnnn");
        assert_eq!(qc.n_start, 4);
        assert_eq!(qc.n_end, 0);
        assert_eq!(qc.effective_len(4), 0);
    }

    #[test]
    fn rejects_out_of_bounds_sequences() {
        let validator = SequenceValidator::new(config());
        let outcome = validator.validate(vec![
            seq("short", "ACGT"),
            seq("long", &"A".repeat(41)),
            seq("padded", &format!("NNNNNN{}NNNNNN", "ACGTA")),
            seq("gappy", &format!("ACGT{}ACGT", "N".repeat(12))),
            seq("good", "ACGTACGTACGTNNAC"),
        ]);
        let names: Vec<_> = outcome.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["short", "long", "padded", "gappy"]);
        assert!(outcome.failures[0].reason.contains("too few bases (4, must have at least 10)"));
        assert!(outcome.failures[3].reason.contains("too many N bases (12 out of 20 > 0.50)"));
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].sequence.bases, b"acgtacgtacgtnnac");
    }

    #[test]
    fn duplicate_upload_names_fail() {
        let validator = SequenceValidator::new(config());
        let outcome = validator.validate(vec![
            seq("s(1)", "ACGTACGTACGT"),
            seq("s_1", "ACGTACGTACGA"),
        ]);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].id(), "s_1");
        assert!(outcome.failures[0].reason.contains("has already been used"));
    }

    #[test]
    fn tree_collisions_are_prefixed() {
        let validator =
            SequenceValidator::new(config()).with_tree_names(["USA/CA-1/2020".to_string()]);
        let outcome = validator.validate(vec![
            seq("USA/CA-1/2020", "ACGTACGTACGT"),
            seq("1234", "ACGTACGTACGT"),
            seq("novel", "ACGTACGTACGT"),
        ]);
        let ids: Vec<_> = outcome.accepted.iter().map(|v| v.id()).collect();
        assert_eq!(ids, ["uploaded_USA/CA-1/2020", "uploaded_1234", "novel"]);
        assert!(outcome.accepted[0].renamed());
        assert!(!outcome.accepted[2].renamed());
    }

    #[test]
    fn repeated_tree_collisions_keep_one_prefixed_id() {
        let validator = SequenceValidator::new(config()).with_tree_names(["X".to_string()]);
        let outcome = validator.validate(vec![
            seq("X", "ACGTACGTACGT"),
            seq("X", "ACGTACGTACGA"),
            seq("uploaded_X", "ACGTACGTACGC"),
        ]);
        let ids: Vec<_> = outcome.accepted.iter().map(|v| v.id()).collect();
        assert_eq!(ids, ["uploaded_X"]);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome
            .failures
            .iter()
            .all(|f| f.reason.contains("has already been used")));
    }

    proptest! {
        #[test]
        fn valid_sequences_keep_their_names(
            names in proptest::collection::hash_set("[A-Za-z][A-Za-z0-9_/|.-]{0,15}", 1..6),
            body in "[ACGT]{10,40}",
        ) {
            let validator = SequenceValidator::new(config()).with_tree_names(["other".to_string()]);
            let names: Vec<String> = names.into_iter().filter(|n| n != "other").collect();
            let sequences: Vec<Sequence> = names.iter().map(|n| seq(n, &body)).collect();
            let outcome = validator.validate(sequences);
            prop_assert!(outcome.failures.is_empty());
            let ids: Vec<&str> = outcome.accepted.iter().map(|v| v.id()).collect();
            let expected: Vec<&str> = names.iter().map(String::as_str).collect();
            prop_assert_eq!(ids, expected);
        }
    }
}
