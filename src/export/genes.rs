//! Protein-coding gene annotations (genePred text) projected onto the
//! reference genome.

use std::fs;
use std::path::Path;

use tracing::debug;

use super::ExportError;
use crate::genomics::{nucleotide, ReferenceGenome, Strand};

/// One coding transcript with its spliced sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneAnnotation {
    name: String,
    strand: Strand,
    tx_start: u32,
    tx_end: u32,
    exons: Vec<(u32, u32)>,
    tx_seq: Vec<u8>,
    cds_start: u32,
    cds_end: u32,
    cds_bounds: (u32, u32),
}

impl GeneAnnotation {
    /// Gene name (`name2` when present, else the transcript name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Strand of the transcript.
    pub fn strand(&self) -> Strand {
        self.strand
    }

    /// 0-based genomic start of the transcript.
    pub fn tx_start(&self) -> u32 {
        self.tx_start
    }

    /// Genomic end (exclusive) of the transcript.
    pub fn tx_end(&self) -> u32 {
        self.tx_end
    }

    /// Exons as half-open genomic ranges, ascending.
    pub fn exons(&self) -> &[(u32, u32)] {
        &self.exons
    }

    /// Transcript sequence in transcript orientation, upper-case.
    pub fn tx_seq(&self) -> &[u8] {
        &self.tx_seq
    }

    /// Coding exon pieces as half-open genomic ranges, ascending. UTR bases
    /// are clipped off and exons outside the coding region dropped.
    pub fn cds_segments(&self) -> Vec<(u32, u32)> {
        let (cds_start, cds_end) = self.cds_bounds;
        self.exons
            .iter()
            .map(|&(start, end)| (start.max(cds_start), end.min(cds_end)))
            .filter(|(start, end)| start < end)
            .collect()
    }

    /// Coding length in bases.
    pub fn cds_len(&self) -> u32 {
        self.cds_end - self.cds_start
    }

    fn tx_len(&self) -> u32 {
        self.tx_seq.len() as u32
    }

    /// Transcript offset of a genomic position, if it falls in an exon.
    pub fn tx_offset(&self, position: u32) -> Option<u32> {
        let mut forward = 0u32;
        for &(start, end) in &self.exons {
            if (start..end).contains(&position) {
                let offset = forward + (position - start);
                return Some(match self.strand {
                    Strand::Forward => offset,
                    Strand::Reverse => self.tx_len() - 1 - offset,
                });
            }
            forward += end - start;
        }
        None
    }

    /// Genomic position of a transcript offset.
    pub fn genomic_position(&self, tx_offset: u32) -> Option<u32> {
        if tx_offset >= self.tx_len() {
            return None;
        }
        let mut forward = match self.strand {
            Strand::Forward => tx_offset,
            Strand::Reverse => self.tx_len() - 1 - tx_offset,
        };
        for &(start, end) in &self.exons {
            let len = end - start;
            if forward < len {
                return Some(start + forward);
            }
            forward -= len;
        }
        None
    }

    /// 0-based codon index and offset within the codon of a genomic position
    /// inside the coding region.
    pub fn codon_of(&self, position: u32) -> Option<(u32, usize)> {
        if position < self.tx_start || position >= self.tx_end {
            return None;
        }
        let offset = self.tx_offset(position)?;
        if offset < self.cds_start || offset >= self.cds_end {
            return None;
        }
        let cds_offset = offset - self.cds_start;
        Some((cds_offset / 3, (cds_offset % 3) as usize))
    }

    /// Reference codon at a codon index.
    pub fn codon(&self, index: u32) -> Option<[u8; 3]> {
        let start = (self.cds_start + index * 3) as usize;
        let bases = self.tx_seq.get(start..start + 3)?;
        Some([bases[0], bases[1], bases[2]])
    }

    /// Genomic positions of the three bases of a codon.
    pub fn codon_positions(&self, index: u32) -> [Option<u32>; 3] {
        let start = self.cds_start + index * 3;
        [0, 1, 2].map(|i| self.genomic_position(start + i))
    }
}

fn parse_coords(field: &str) -> Result<Vec<u32>, String> {
    field
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().map_err(|_| format!("bad coordinate '{}'", s)))
        .collect()
}

fn parse_line(fields: &[&str], reference: &ReferenceGenome) -> Result<Option<GeneAnnotation>, String> {
    // Tables dumped with a leading bin column.
    let fields = if fields.len() > 10 && !matches!(fields[2], "+" | "-") {
        &fields[1..]
    } else {
        fields
    };
    if fields.len() < 10 {
        return Err(format!("expected at least 10 columns, got {}", fields.len()));
    }
    let number = |i: usize| {
        fields[i]
            .parse::<u32>()
            .map_err(|_| format!("column {} is not a number: '{}'", i + 1, fields[i]))
    };
    let strand = match fields[2] {
        "+" => Strand::Forward,
        "-" => Strand::Reverse,
        other => return Err(format!("bad strand '{}'", other)),
    };
    let (tx_start, tx_end, cds_start, cds_end) = (number(3)?, number(4)?, number(5)?, number(6)?);
    let exon_count = number(7)? as usize;
    let starts = parse_coords(fields[8])?;
    let ends = parse_coords(fields[9])?;
    if starts.len() != exon_count || ends.len() != exon_count {
        return Err(format!("exonCount {} does not match exon lists", exon_count));
    }
    let name = fields
        .get(11)
        .filter(|n| !n.is_empty())
        .unwrap_or(&fields[0])
        .to_string();
    if fields[1] != reference.name() {
        debug!(gene = %name, chrom = fields[1], "gene on another sequence, skipping");
        return Ok(None);
    }

    let exons: Vec<(u32, u32)> = starts.into_iter().zip(ends).collect();
    let mut tx_seq = Vec::new();
    for &(start, end) in &exons {
        let bases = reference
            .as_bytes()
            .get(start as usize..end as usize)
            .filter(|_| start < end)
            .ok_or_else(|| format!("exon {}-{} outside the reference", start, end))?;
        tx_seq.extend(bases.iter().map(u8::to_ascii_uppercase));
    }
    if strand == Strand::Reverse {
        nucleotide::reverse_complement(&mut tx_seq);
    }

    let mut gene = GeneAnnotation {
        name,
        strand,
        tx_start,
        tx_end,
        exons,
        tx_seq,
        cds_start: 0,
        cds_end: 0,
        cds_bounds: (cds_start, cds_end),
    };
    if cds_start >= cds_end {
        debug!(gene = %gene.name, "no coding region, skipping");
        return Ok(None);
    }
    let (first, last) = match (gene.tx_offset(cds_start), gene.tx_offset(cds_end - 1)) {
        (Some(a), Some(b)) => (a.min(b), a.max(b)),
        _ => return Err("coding region boundary outside exons".into()),
    };
    gene.cds_start = first;
    gene.cds_end = last + 1;
    if gene.cds_len() % 3 != 0 {
        debug!(gene = %gene.name, cds_len = gene.cds_len(), "incomplete coding region, skipping");
        return Ok(None);
    }
    Ok(Some(gene))
}

/// Parse genePred text. Genes on other sequences, without a coding region
/// or with a coding length that is not a multiple of 3 are skipped.
pub fn parse_gene_pred(text: &str, reference: &ReferenceGenome) -> Result<Vec<GeneAnnotation>, ExportError> {
    let mut genes = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let gene = parse_line(&fields, reference).map_err(|message| ExportError::GenePred {
            line: index + 1,
            message,
        })?;
        genes.extend(gene);
    }
    Ok(genes)
}

/// Read a genePred file.
pub fn load_gene_pred<P: AsRef<Path>>(path: P, reference: &ReferenceGenome) -> Result<Vec<GeneAnnotation>, ExportError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_gene_pred(&text, reference)
}
