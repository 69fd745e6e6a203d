//! Intake of user-uploaded VCF: validation against the reference and mask, and
//! extraction of per-sample changes.

use std::collections::HashSet;
use std::fmt::Write as _;

use tracing::debug;

use super::nucleotide::is_iupac_ambiguous;
use super::validator::{replace_newick_chars, SequenceValidator, SAMPLE_PREFIX};
use super::vcf::{VcfError, VCF_FIXED_COLUMNS};
use super::{MaskSites, MaskedSnv, ReferenceGenome, Snv};

/// Default limit on genotype columns in an uploaded VCF.
pub const DEFAULT_MAX_UPLOAD_SAMPLES: usize = 100;

/// One genotype column of an uploaded VCF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedSample {
    /// Final sample id (after renaming).
    pub id: String,
    /// Column name as uploaded.
    pub original_name: String,
    /// Unmasked single-base changes in file order.
    pub snvs: Vec<Snv>,
    /// Changes at masked positions.
    pub masked: Vec<MaskedSnv>,
    /// Rows where this sample had no call.
    pub no_calls: usize,
    /// Unmasked changes to IUPAC-ambiguous bases.
    pub ambiguous: usize,
}

/// Result of checking an uploaded VCF.
#[derive(Debug, Clone, Default)]
pub struct UploadedVcf {
    /// Samples in column order.
    pub samples: Vec<UploadedSample>,
    /// VCF text to forward to the placement engine (masked rows removed,
    /// `#CHROM` renamed, REF filled in).
    pub vcf: String,
    /// Rows skipped because REF was not a single base.
    pub skipped_rows: usize,
}

impl UploadedVcf {
    /// Final sample ids in column order.
    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }
}

/// Validate an uploaded VCF and collect each sample's changes.
pub fn check_uploaded_vcf(
    text: &str,
    reference: &ReferenceGenome,
    mask: &MaskSites,
    validator: &SequenceValidator,
    max_samples: usize,
) -> Result<UploadedVcf, VcfError> {
    let mut out = UploadedVcf::default();
    let mut header_seen = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        let malformed = |message: String| VcfError::Malformed {
            line: line_no,
            message,
        };
        if line.is_empty() {
            continue;
        }
        if line.starts_with("#CHROM") {
            let words: Vec<&str> = line.split('\t').collect();
            if words.len() == 1 {
                return Err(malformed(
                    "VCF requires tab-separated columns, but no tabs found".into(),
                ));
            }
            let sample_count = words.len().saturating_sub(VCF_FIXED_COLUMNS);
            if sample_count < 1 {
                return Err(malformed(format!(
                    "VCF header #CHROM line has {} columns; expecting at least {} columns including sample IDs for genotype columns",
                    words.len(),
                    VCF_FIXED_COLUMNS + 1
                )));
            }
            if sample_count > max_samples {
                return Err(malformed(format!(
                    "VCF header #CHROM line defines {} samples but only up to {} are supported",
                    sample_count, max_samples
                )));
            }
            let mut seen = HashSet::new();
            for name in &words[VCF_FIXED_COLUMNS..] {
                if !seen.insert(*name) {
                    return Err(malformed(format!(
                        "VCF sample names in #CHROM line must be unique, but '{}' appears more than once",
                        name
                    )));
                }
            }
            let mut ids = HashSet::new();
            for name in &words[VCF_FIXED_COLUMNS..] {
                let sanitized = replace_newick_chars(name);
                let id = if validator.collides_with_tree(&sanitized) {
                    format!("{}{}", SAMPLE_PREFIX, sanitized)
                } else {
                    sanitized
                };
                if !ids.insert(id.clone()) {
                    return Err(malformed(format!(
                        "VCF sample name '{}' is not unique once tree-incompatible characters are replaced",
                        name
                    )));
                }
                out.samples.push(UploadedSample {
                    id,
                    original_name: name.to_string(),
                    ..UploadedSample::default()
                });
            }
            out.vcf.push_str(&words[..VCF_FIXED_COLUMNS].join("\t"));
            for sample in &out.samples {
                out.vcf.push('\t');
                out.vcf.push_str(&sample.id);
            }
            out.vcf.push('\n');
            header_seen = true;
            continue;
        }
        if line.starts_with('#') {
            out.vcf.push_str(line);
            out.vcf.push('\n');
            continue;
        }
        if !header_seen {
            return Err(malformed(
                "VCF header did not include #CHROM line defining sample IDs for genotype columns"
                    .into(),
            ));
        }

        let mut words: Vec<&str> = line.split('\t').collect();
        let genotype_count = words.len().saturating_sub(VCF_FIXED_COLUMNS);
        if words.len() < VCF_FIXED_COLUMNS || genotype_count != out.samples.len() {
            return Err(malformed(format!(
                "VCF header defines {} samples but there are {} genotype columns",
                out.samples.len(),
                genotype_count
            )));
        }
        let pos: usize = words[1]
            .trim()
            .parse()
            .map_err(|_| malformed(format!("invalid POS value '{}'", words[1])))?;
        if pos > reference.len() {
            return Err(malformed(format!(
                "VCF POS value {} exceeds size of reference sequence ({})",
                pos,
                reference.len()
            )));
        }
        if pos == 0 {
            return Err(malformed("VCF POS value must be at least 1".into()));
        }
        let position = (pos - 1) as u32;
        if words[3].len() != 1 {
            out.skipped_rows += 1;
            continue;
        }
        let ref_base = reference
            .base(position)
            .map(|b| b.to_ascii_uppercase())
            .unwrap_or(b'N');
        let ref_string = (ref_base as char).to_string();
        match words[3].as_bytes()[0] {
            b'*' | b'.' => words[3] = &ref_string,
            given if given == ref_base => {}
            _ => {
                return Err(malformed(format!(
                    "VCF REF value at position {} is '{}', expecting '{}' (or '*' or '.')",
                    pos, words[3], ref_base as char
                )))
            }
        }
        let alts: Vec<&str> = words[4].split(',').collect();
        let masked = mask.is_masked(position);

        for (sample, gt) in out.samples.iter_mut().zip(&words[VCF_FIXED_COLUMNS..]) {
            let first = gt.as_bytes().first().copied().unwrap_or(b' ');
            if first == b'.' {
                sample.no_calls += 1;
                continue;
            }
            if !first.is_ascii_digit() {
                return Err(malformed(format!(
                    "VCF genotype columns must contain numeric allele codes; can't parse '{}'",
                    gt
                )));
            }
            let digits: String = gt.chars().take_while(char::is_ascii_digit).collect();
            let allele: usize = digits
                .parse()
                .map_err(|_| malformed(format!("invalid allele code '{}'", gt)))?;
            if allele == 0 {
                continue;
            }
            let alt = alts.get(allele - 1).ok_or_else(|| {
                malformed(format!(
                    "genotype '{}' refers to allele {} but only {} ALT values are listed",
                    gt,
                    allele,
                    alts.len()
                ))
            })?;
            if alt.len() != 1 {
                continue;
            }
            let alt_base = alt.as_bytes()[0].to_ascii_uppercase();
            let snv = Snv::from_reference(position, ref_base, alt_base);
            if masked {
                sample.masked.push(MaskedSnv {
                    snv,
                    reasons: mask.reasons(position).to_vec(),
                });
            } else {
                if is_iupac_ambiguous(alt_base) {
                    sample.ambiguous += 1;
                }
                sample.snvs.push(snv);
            }
        }

        if !masked {
            let _ = write!(out.vcf, "{}", reference.name());
            for word in &words[1..] {
                out.vcf.push('\t');
                out.vcf.push_str(word);
            }
            out.vcf.push('\n');
        }
    }

    if !header_seen {
        return Err(VcfError::Malformed {
            line: text.lines().count(),
            message: "VCF header did not include #CHROM line defining sample IDs for genotype columns"
                .into(),
        });
    }
    debug!(
        samples = out.samples.len(),
        skipped = out.skipped_rows,
        "checked uploaded VCF"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::ValidatorConfig;

    fn fixture() -> (ReferenceGenome, MaskSites, SequenceValidator) {
        let reference = ReferenceGenome::new("chrV", b"ACGTACGTAC");
        let mut mask = MaskSites::empty(10);
        mask.insert(7, "homoplasic");
        let validator = SequenceValidator::new(ValidatorConfig::for_database("wuhCor1"))
            .with_tree_names(["known".to_string()]);
        (reference, mask, validator)
    }

    const HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tknown\tnew(1)\n";

    #[test]
    fn extracts_changes_and_drops_masked_rows() {
        let (reference, mask, validator) = fixture();
        let text = format!(
            "{}1\t2\t.\tC\tT,R\t.\t.\t.\tGT\t1\t2\n1\t5\t.\t*\tG\t.\t.\t.\tGT\t.\t0\n1\t8\t.\tT\tA\t.\t.\t.\tGT\t1\t0\n1\t9\t.\tAC\tA\t.\t.\t.\tGT\t1\t0\n",
            HEADER
        );
        let out = check_uploaded_vcf(&text, &reference, &mask, &validator, 10).unwrap();
        assert_eq!(out.sample_ids(), ["uploaded_known", "new_1"]);
        assert_eq!(out.samples[0].snvs, vec![Snv::from_reference(1, b'C', b'T')]);
        assert_eq!(out.samples[1].ambiguous, 1);
        assert_eq!(out.samples[0].no_calls, 1);
        assert_eq!(out.samples[0].masked.len(), 1);
        assert_eq!(out.samples[0].masked[0].reasons, ["homoplasic"]);
        assert_eq!(out.skipped_rows, 1);
        let lines: Vec<&str> = out.vcf.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].ends_with("FORMAT\tuploaded_known\tnew_1"));
        assert_eq!(lines[3], "chrV\t5\t.\tA\tG\t.\t.\t.\tGT\t.\t0");
    }

    #[test]
    fn rejects_reference_mismatch() {
        let (reference, mask, validator) = fixture();
        let text = format!("{}1\t1\t.\tG\tT\t.\t.\t.\tGT\t1\t0\n", HEADER);
        let err = check_uploaded_vcf(&text, &reference, &mask, &validator, 10).unwrap_err();
        assert!(err.to_string().contains("expecting 'A'"));
    }

    #[test]
    fn rejects_structural_problems() {
        let (reference, mask, validator) = fixture();
        let no_header = "##fileformat=VCFv4.2\n1\t1\t.\tA\tT\t.\t.\t.\tGT\t1\n";
        assert!(check_uploaded_vcf(no_header, &reference, &mask, &validator, 10).is_err());
        let too_far = format!("{}1\t11\t.\tA\tT\t.\t.\t.\tGT\t1\t0\n", HEADER);
        assert!(check_uploaded_vcf(&too_far, &reference, &mask, &validator, 10).is_err());
        let bad_gt = format!("{}1\t1\t.\tA\tT\t.\t.\t.\tGT\tx\t0\n", HEADER);
        assert!(check_uploaded_vcf(&bad_gt, &reference, &mask, &validator, 10).is_err());
        let dup = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ta\ta\n";
        assert!(check_uploaded_vcf(dup, &reference, &mask, &validator, 10).is_err());
        assert!(check_uploaded_vcf(HEADER, &reference, &mask, &validator, 1).is_err());
    }
}
