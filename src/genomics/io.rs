use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Sequence;

/// Errors raised while reading uploaded or reference input files.
#[derive(Debug, Error)]
pub enum InputError {
    /// Underlying file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Input contained no records at all.
    #[error("input is empty")]
    Empty,

    /// Input looked like neither FASTA nor VCF.
    #[error("input does not look like FASTA or VCF (first line: '{0}')")]
    UnrecognizedFormat(String),

    /// Sequence characters appeared before any `>` header.
    #[error("sequence data on line {0} precedes the first '>' header")]
    MissingHeader(usize),

    /// A BED-style mask line could not be parsed.
    #[error("mask line {line}: {reason}")]
    Mask {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
}

/// Format of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// One or more `>`-headed sequences.
    Fasta,
    /// VCF beginning with a `##fileformat=VCF` header.
    Vcf,
}

/// Read a whole file into a string, attaching the path to any failure.
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String, InputError> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Classify uploaded text by its first non-blank line.
pub fn sniff_format(text: &str) -> Result<InputFormat, InputError> {
    let first = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(InputError::Empty)?;
    if first.starts_with('>') {
        Ok(InputFormat::Fasta)
    } else if first.starts_with("##fileformat=VCF") {
        Ok(InputFormat::Vcf)
    } else {
        let preview: String = first.chars().take(40).collect();
        Err(InputError::UnrecognizedFormat(preview))
    }
}

/// Parse multi-record FASTA text, keeping records in file order.
///
/// The record name is the trimmed header line; sequence lines are concatenated
/// with whitespace removed.
pub fn parse_fasta(text: &str) -> Result<Vec<Sequence>, InputError> {
    let mut records: Vec<Sequence> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if let Some(header) = line.strip_prefix('>') {
            records.push(Sequence::new(header.trim(), Vec::new()));
            continue;
        }
        let bases = line.trim();
        if bases.is_empty() {
            continue;
        }
        match records.last_mut() {
            Some(record) => record
                .bases
                .extend(bases.bytes().filter(|b| !b.is_ascii_whitespace())),
            None => return Err(InputError::MissingHeader(idx + 1)),
        }
    }
    if records.is_empty() {
        return Err(InputError::Empty);
    }
    Ok(records)
}

/// Read and parse a FASTA file.
pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<Vec<Sequence>, InputError> {
    parse_fasta(&read_text(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiline_records() {
        let text = ">first one\nACGT\nacgt\n\n>second\r\nNNNN\r\n";
        let records = parse_fasta(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "first one");
        assert_eq!(records[0].bases, b"ACGTacgt");
        assert_eq!(records[1].name, "second");
        assert_eq!(records[1].bases, b"NNNN");
    }

    #[test]
    fn rejects_headerless_sequence() {
        assert!(matches!(
            parse_fasta("ACGT\n>x\nA\n"),
            Err(InputError::MissingHeader(1))
        ));
    }

    #[test]
    fn sniffs_formats() {
        assert_eq!(sniff_format("\n>s\nA").unwrap(), InputFormat::Fasta);
        assert_eq!(
            sniff_format("##fileformat=VCFv4.2\n").unwrap(),
            InputFormat::Vcf
        );
        assert!(matches!(
            sniff_format("hello"),
            Err(InputError::UnrecognizedFormat(_))
        ));
        assert!(matches!(sniff_format("  \n"), Err(InputError::Empty)));
    }
}
