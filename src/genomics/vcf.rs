use std::io::Write;

use thiserror::Error;

use super::{MaskSites, VariantTable};

/// Columns preceding the genotype columns in a VCF data row.
pub const VCF_FIXED_COLUMNS: usize = 9;

const COLUMN_HEADER: &str = "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT";

/// Errors from VCF rendering or intake.
#[derive(Debug, Error)]
pub enum VcfError {
    /// Writing the output failed.
    #[error("failed to write VCF: {0}")]
    Io(#[from] std::io::Error),

    /// Rendered bytes were not UTF-8.
    #[error("rendered VCF is not valid UTF-8")]
    Utf8,

    /// Genotype columns do not match the table.
    #[error("{ids} sample ids supplied for a table with {columns} genotype columns")]
    SampleMismatch {
        /// Number of sample ids.
        ids: usize,
        /// Number of genotype columns.
        columns: usize,
    },

    /// Uploaded VCF was malformed.
    #[error("line {line}: {message}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Problem description.
        message: String,
    },
}

/// Write a VCF 4.2 document with one genotype column per sample id.
///
/// Rows are emitted in reference order for every unmasked position where at
/// least one sample has an alternate base or a no-call. When only no-calls were
/// seen the ALT column is `*`.
pub fn write_vcf<W: Write>(
    writer: &mut W,
    reference_name: &str,
    sample_ids: &[String],
    table: &VariantTable,
    mask: &MaskSites,
) -> Result<(), VcfError> {
    if sample_ids.len() != table.sample_count() {
        return Err(VcfError::SampleMismatch {
            ids: sample_ids.len(),
            columns: table.sample_count(),
        });
    }
    writeln!(writer, "##fileformat=VCFv4.2")?;
    writeln!(writer, "##reference={}", reference_name)?;
    write!(writer, "{}", COLUMN_HEADER)?;
    for id in sample_ids {
        write!(writer, "\t{}", id)?;
    }
    writeln!(writer)?;

    for (position, site) in table.rows(mask) {
        let pos = position + 1;
        let ref_base = site.reference.to_ascii_uppercase() as char;
        let alt_bases: Vec<char> = if site.alts.is_empty() {
            vec!['*']
        } else {
            site.alts
                .iter()
                .map(|&(base, _)| base.to_ascii_uppercase() as char)
                .collect()
        };
        let ids: Vec<String> = alt_bases
            .iter()
            .map(|alt| format!("{}{}{}", ref_base, pos, alt))
            .collect();
        let alts: Vec<String> = alt_bases.iter().map(char::to_string).collect();
        let counts: Vec<String> = if site.alts.is_empty() {
            vec!["0".to_string()]
        } else {
            site.alts.iter().map(|(_, count)| count.to_string()).collect()
        };
        write!(
            writer,
            "{chrom}\t{pos}\t{id}\t{ref_base}\t{alt}\t.\t.\tAC={ac};AN={an}\tGT",
            chrom = reference_name,
            pos = pos,
            id = ids.join(","),
            ref_base = ref_base,
            alt = alts.join(","),
            ac = counts.join(","),
            an = site.called(),
        )?;
        for &gt in &site.genotypes {
            if gt < 0 {
                write!(writer, "\t.")?;
            } else {
                write!(writer, "\t{}", gt)?;
            }
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}

/// Render a VCF into a string (useful for tests and snapshots).
pub fn render_vcf(
    reference_name: &str,
    sample_ids: &[String],
    table: &VariantTable,
    mask: &MaskSites,
) -> Result<String, VcfError> {
    let mut buffer = Vec::new();
    write_vcf(&mut buffer, reference_name, sample_ids, table, mask)?;
    String::from_utf8(buffer).map_err(|_| VcfError::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_alt_and_no_call_rows() {
        let mut table = VariantTable::new(6, 2);
        for pos in 0..6u32 {
            table.add_call(pos, b'a', b'a', 0);
            table.add_call(pos, b'a', b'a', 1);
        }
        let mut table2 = VariantTable::new(6, 2);
        table2.add_call(1, b'c', b't', 0);
        table2.add_call(1, b'c', b'g', 1);
        table2.add_call(4, b'g', b'-', 0);
        table2.add_call(4, b'g', b'g', 1);
        let ids = vec!["s1".to_string(), "s2".to_string()];
        let vcf = render_vcf("chrT", &ids, &table2, &MaskSites::empty(6)).unwrap();
        let lines: Vec<&str> = vcf.lines().collect();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert_eq!(lines[1], "##reference=chrT");
        assert_eq!(
            lines[2],
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts1\ts2"
        );
        assert_eq!(
            lines[3],
            "chrT\t2\tC2T,C2G\tC\tT,G\t.\t.\tAC=1,1;AN=2\tGT\t1\t2"
        );
        assert_eq!(lines[4], "chrT\t5\tG5*\tG\t*\t.\t.\tAC=0;AN=1\tGT\t.\t0");
        assert_eq!(lines.len(), 5);

        let empty = render_vcf("chrT", &ids, &table, &MaskSites::empty(6)).unwrap();
        assert_eq!(empty.lines().count(), 3);
    }

    #[test]
    fn rejects_mismatched_sample_ids() {
        let table = VariantTable::new(4, 2);
        let err = render_vcf("chr", &["only".to_string()], &table, &MaskSites::empty(4));
        assert!(matches!(err, Err(VcfError::SampleMismatch { ids: 1, columns: 2 })));
    }
}
