//! Sample metadata table used to decorate leaves that were already in the
//! big tree.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::ExportError;

/// Metadata columns of one sample. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleMetadata {
    /// `strain`
    pub strain: Option<String>,
    /// `gisaid_epi_isl`
    pub epi_id: Option<String>,
    /// `genbank_accession`
    pub genbank: Option<String>,
    /// `date`
    pub date: Option<String>,
    /// `authors`
    pub author: Option<String>,
    /// `Nextstrain_clade`
    pub nextstrain_clade: Option<String>,
    /// `GISAID_clade`
    pub gisaid_clade: Option<String>,
    /// `pangolin_lineage` or `pango_lineage`
    pub lineage: Option<String>,
    /// `Nextstrain_lineage`
    pub nextstrain_lineage: Option<String>,
    /// `Nextstrain_clade_usher`
    pub nextstrain_clade_usher: Option<String>,
    /// `pango_lineage_usher`
    pub lineage_usher: Option<String>,
    /// `country`
    pub country: Option<String>,
    /// `division`
    pub division: Option<String>,
    /// `location`
    pub location: Option<String>,
    /// `country_exposure`
    pub country_exposure: Option<String>,
    /// `division_exposure`
    pub division_exposure: Option<String>,
    /// `originating_lab`
    pub originating_lab: Option<String>,
    /// `submitting_lab`
    pub submitting_lab: Option<String>,
    /// `region`
    pub region: Option<String>,
}

impl SampleMetadata {
    fn set(&mut self, column: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let slot = match column {
            "strain" => &mut self.strain,
            "gisaid_epi_isl" => &mut self.epi_id,
            "genbank_accession" if value != "?" => &mut self.genbank,
            "date" => &mut self.date,
            "authors" => &mut self.author,
            "Nextstrain_clade" => &mut self.nextstrain_clade,
            "GISAID_clade" => &mut self.gisaid_clade,
            "pangolin_lineage" | "pango_lineage" => &mut self.lineage,
            "Nextstrain_lineage" => &mut self.nextstrain_lineage,
            "Nextstrain_clade_usher" => &mut self.nextstrain_clade_usher,
            "pango_lineage_usher" => &mut self.lineage_usher,
            "country" => &mut self.country,
            "division" => &mut self.division,
            "location" => &mut self.location,
            "country_exposure" => &mut self.country_exposure,
            "division_exposure" => &mut self.division_exposure,
            "originating_lab" => &mut self.originating_lab,
            "submitting_lab" => &mut self.submitting_lab,
            "region" => &mut self.region,
            _ => return,
        };
        *slot = Some(value.to_string());
    }
}

/// Metadata rows indexed by EPI_ISL id, versionless GenBank accession and
/// strain name.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    rows: Vec<SampleMetadata>,
    index: HashMap<String, usize>,
    epi_pattern: Regex,
    genbank_pattern: Regex,
}

impl MetadataTable {
    /// Parse tab-separated text whose first line is a header starting with
    /// `strain`.
    pub fn from_tsv(text: &str, path: &Path) -> Result<Self, ExportError> {
        let error = |line: usize, message: String| ExportError::Metadata {
            path: path.to_path_buf(),
            line,
            message,
        };
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
        let header: Vec<&str> = match lines.next() {
            Some(line) if line.split('\t').next() == Some("strain") => line.split('\t').collect(),
            _ => return Err(error(1, "missing header line starting with 'strain'".into())),
        };

        let mut table = Self {
            rows: Vec::new(),
            index: HashMap::new(),
            epi_pattern: Regex::new(r"EPI_ISL_[0-9]+")?,
            genbank_pattern: Regex::new(r"(?:^|[^A-Za-z0-9])([A-Z]{2}[0-9]{6})(?:[^A-Za-z0-9]|$)")?,
        };
        for (i, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let words: Vec<&str> = line.split('\t').collect();
            if words.len() != header.len() {
                return Err(error(
                    i + 2,
                    format!("expected {} words but got {}", header.len(), words.len()),
                ));
            }
            let mut row = SampleMetadata::default();
            for (column, value) in header.iter().zip(&words) {
                row.set(column, value);
            }
            table.push(row);
        }
        debug!(rows = table.rows.len(), keys = table.index.len(), "loaded sample metadata");
        Ok(table)
    }

    /// Read a metadata file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ExportError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_tsv(&text, &path)
    }

    fn push(&mut self, row: SampleMetadata) {
        let slot = self.rows.len();
        let mut keys: Vec<String> = Vec::new();
        keys.extend(row.epi_id.clone());
        if let Some(accession) = &row.genbank {
            keys.push(accession.split('.').next().unwrap_or(accession).to_string());
        }
        keys.extend(row.strain.clone());
        for key in keys {
            self.index.insert(key, slot);
        }
        self.rows.push(row);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` for a table without rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn get(&self, key: &str) -> Option<&SampleMetadata> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    /// Find metadata for a tree leaf name.
    ///
    /// Tries, in order: an embedded `EPI_ISL_` id, an embedded GenBank
    /// accession, the whole name, the first two `|`-separated parts, and for
    /// condensed display names (`3_from_..._eg_<name>`) the example name.
    pub fn lookup(&self, name: &str) -> Option<&SampleMetadata> {
        let by_epi = || {
            self.epi_pattern
                .find(name)
                .and_then(|m| self.get(m.as_str()))
        };
        let by_genbank = || {
            self.genbank_pattern
                .captures(name)
                .and_then(|c| c.get(1))
                .and_then(|m| self.get(m.as_str()))
        };
        let by_parts = || {
            if !name.contains('|') {
                return None;
            }
            name.split('|')
                .take(2)
                .filter(|part| !part.is_empty())
                .find_map(|part| self.get(part))
        };
        let by_example = || {
            let starts_with_digit = name.bytes().next().is_some_and(|b| b.is_ascii_digit());
            if !starts_with_digit || !name.contains("_from_") {
                return None;
            }
            let (_, example) = name.split_once("_eg_")?;
            self.get(example)
        };
        by_epi()
            .or_else(by_genbank)
            .or_else(|| self.get(name))
            .or_else(by_parts)
            .or_else(by_example)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "strain\tgisaid_epi_isl\tgenbank_accession\tcountry\tpangolin_lineage\n\
                       England/A1/2020\tEPI_ISL_101\t?\tUK\tB.1.1.7\n\
                       USA/CA-1/2020\t\tMW123456.1\tUSA\tB.1\n\
                       Peru/P9/2021\t\t\tPeru\tC.37\n";

    fn table() -> MetadataTable {
        MetadataTable::from_tsv(TSV, Path::new("metadata.tsv")).unwrap()
    }

    #[test]
    fn looks_up_by_accessions_and_names() {
        let table = table();
        assert_eq!(table.len(), 3);
        let by_epi = table.lookup("hCoV-19/whatever|EPI_ISL_101|2020-03-01").unwrap();
        assert_eq!(by_epi.country.as_deref(), Some("UK"));
        assert_eq!(by_epi.genbank, None);
        let by_genbank = table.lookup("USA/CA-1/2020|MW123456.1|2020-04-02").unwrap();
        assert_eq!(by_genbank.lineage.as_deref(), Some("B.1"));
        assert!(table.lookup("Peru/P9/2021").is_some());
        assert!(table.lookup("Peru/P9/2021|2021-01-01").is_some());
        assert!(table.lookup("2_from_Peru_eg_Peru/P9/2021").is_some());
        assert!(table.lookup("XMW123456").is_none());
        assert!(table.lookup("nobody").is_none());
    }

    #[test]
    fn header_and_column_count_are_checked() {
        let err = MetadataTable::from_tsv("name\tcountry\n", Path::new("m.tsv")).unwrap_err();
        assert!(err.to_string().contains("strain"));
        let err = MetadataTable::from_tsv("strain\tcountry\nx\n", Path::new("m.tsv")).unwrap_err();
        assert!(matches!(err, ExportError::Metadata { line: 2, .. }));
    }
}
