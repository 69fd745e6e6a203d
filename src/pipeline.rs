//! One placement request from upload to tree JSON.
//!
//! Stages run in order and each one's output feeds the next: validation and
//! alignment (or VCF intake), the placement engine, subtree extraction, JSON
//! export and the per-sample summary. Everything is written to the configured
//! work directory.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PlaceConfig;
use crate::export::{
    amino_acid_changes, load_gene_pred, ExportError, GeneAnnotation, MetadataTable,
    TreeJsonExporter,
};
use crate::genomics::nucleotide::is_iupac_ambiguous;
use crate::genomics::{
    check_uploaded_vcf, parse_fasta, sniff_format, AlignedSample, AlignerError, AlignmentEngine,
    EngineError, Failure, IndelSummary, InputError, InputFormat, MaskSites, MaskedSnv,
    ReferenceGenome, SeedChainAligner, SequenceValidator, Snv, UploadedSample, VcfError,
    SAMPLE_PREFIX,
};
use crate::placement::{
    reconcile_sample_ids, EngineCommand, PathNode, PlacementBackend, PlacementClient,
    PlacementError, PlacementInfo, Placements, StabilityPoll, SystemBackend, Via,
};
use crate::tree::{CondensedNodes, SubtreeExtractor, SubtreeInfo, TreeError};

/// Header of the per-sample summary table.
pub const SUMMARY_HEADER: &str = "name\tnuc_mutations\taa_mutations\timputed_bases\tmutation_path\
    \tplacement_count\tparsimony_score_increase\tclade\tlineage\tlength\taligned_bases\
    \tins_bases\tins_ranges\tdel_bases\tdel_ranges\tmasked_mutations";

/// Header of the Spike change table.
pub const SPIKE_SUMMARY_HEADER: &str = "aa_mutation\tsample_count\tsample_frequency\tsample_ids";

const NOT_AVAILABLE: &str = "n/a";

/// Errors that abort a request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A work file could not be written.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Upload or reference input could not be read.
    #[error(transparent)]
    Input(#[from] InputError),

    /// The uploaded VCF is invalid.
    #[error(transparent)]
    Vcf(#[from] VcfError),

    /// The aligner could not be built.
    #[error(transparent)]
    Aligner(#[from] AlignerError),

    /// Alignment of the batch failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The placement engine failed or its output is unusable.
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// Subtree files disagree with each other.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Tree JSON could not be built.
    #[error(transparent)]
    Export(#[from] ExportError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_file(path: &Path, text: &str) -> Result<(), PipelineError> {
    fs::write(path, text).map_err(io_error(path))
}

/// Emits a timing event per finished stage.
#[derive(Debug)]
pub struct StageTimer {
    started: Instant,
    last: Instant,
}

impl StageTimer {
    /// Timer starting now.
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
        }
    }

    /// Log the time since the previous mark and return it.
    pub fn mark(&mut self, stage: &str) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        debug!(elapsed_ms = elapsed.as_millis() as u64, stage, "stage finished");
        elapsed
    }

    /// Time since the timer started.
    pub fn total(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Alignment statistics of a FASTA upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentSummary {
    /// Uploaded sequence length.
    pub length: u32,
    /// Bases inside alignment blocks.
    pub aligned_bases: u32,
    /// Insertions and deletions.
    pub indels: IndelSummary,
}

/// An uploaded sample that made it into the VCF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    /// Sample id as placed.
    pub id: String,
    /// Name as uploaded.
    pub original_name: String,
    /// Unmasked changes relative to the reference.
    pub snvs: Vec<Snv>,
    /// Changes at masked positions.
    pub masked: Vec<MaskedSnv>,
    /// Present for FASTA uploads.
    pub alignment: Option<AlignmentSummary>,
}

impl From<AlignedSample> for SampleRecord {
    fn from(sample: AlignedSample) -> Self {
        let aligned_bases = sample.alignment.blocks.iter().map(|b| b.len).sum();
        Self {
            id: sample.id,
            original_name: sample.original_name,
            snvs: sample.snvs,
            masked: sample.masked,
            alignment: Some(AlignmentSummary {
                length: sample.alignment.query_size,
                aligned_bases,
                indels: sample.indels,
            }),
        }
    }
}

impl From<UploadedSample> for SampleRecord {
    fn from(sample: UploadedSample) -> Self {
        Self {
            id: sample.id,
            original_name: sample.original_name,
            snvs: sample.snvs,
            masked: sample.masked,
            alignment: None,
        }
    }
}

/// Samples and VCF ready for the placement engine.
#[derive(Debug, Clone, Default)]
pub struct PreparedInput {
    /// Samples in VCF column order.
    pub samples: Vec<SampleRecord>,
    /// Samples rejected so far.
    pub failures: Vec<Failure>,
    /// VCF text for the engine.
    pub vcf: String,
}

/// Files written for one subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeSummary {
    /// Subtree number (0 for the single subtree).
    pub number: usize,
    /// Newick file to show.
    pub newick: PathBuf,
    /// Tree JSON file.
    pub json: PathBuf,
    /// Uploaded samples it contains.
    pub user_sample_ids: Vec<String>,
    /// Number of leaves.
    pub leaf_count: usize,
}

/// Everything a request produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Rejected or dropped samples, in the order they were rejected.
    pub failures: Vec<Failure>,
    /// Placed samples in VCF column order, with their final ids.
    pub samples: Vec<SampleRecord>,
    /// VCF given to the engine.
    pub vcf_path: Option<PathBuf>,
    /// BLAKE3 digest of the VCF text.
    pub vcf_fingerprint: Option<String>,
    /// How the placement request completed.
    pub via: Option<Via>,
    /// Per-sample placement results.
    pub placements: Placements,
    /// Numbered subtrees.
    pub subtrees: Vec<SubtreeSummary>,
    /// Single subtree with all uploads, when requested.
    pub single_subtree: Option<SubtreeSummary>,
    /// Per-sample TSV summary.
    pub summary_path: Option<PathBuf>,
    /// Spike amino-acid change TSV.
    pub spike_summary_path: Option<PathBuf>,
}

impl PipelineReport {
    /// Final sample ids in VCF column order.
    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.id.clone()).collect()
    }
}

/// Placement pipeline for one configured organism.
#[derive(Debug)]
pub struct Pipeline {
    config: PlaceConfig,
    reference: ReferenceGenome,
    mask: MaskSites,
    genes: Vec<GeneAnnotation>,
    metadata: Option<MetadataTable>,
    condensed: Option<CondensedNodes>,
    tree_names: Option<Vec<String>>,
    poll: StabilityPoll,
}

impl Pipeline {
    /// Load the reference and every optional annotation named in `config`.
    pub fn new(config: PlaceConfig) -> Result<Self, PipelineError> {
        let reference = ReferenceGenome::load(&config.reference)?;
        let mask = match &config.mask {
            Some(path) => MaskSites::load(path, reference.len())?,
            None => MaskSites::empty(reference.len()),
        };
        let genes = match &config.gene_pred {
            Some(path) => load_gene_pred(path, &reference)?,
            None => Vec::new(),
        };
        let metadata = config.metadata.as_ref().map(MetadataTable::load).transpose()?;
        let condensed = config
            .condensed_nodes
            .as_ref()
            .map(CondensedNodes::load)
            .transpose()?;
        let tree_names = match &config.tree_names {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(io_error(path))?;
                Some(
                    text.lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect(),
                )
            }
            None => None,
        };
        info!(
            organism = %config.organism,
            reference_len = reference.len(),
            masked = mask.count(),
            genes = genes.len(),
            "pipeline ready"
        );
        Ok(Self {
            reference,
            mask,
            genes,
            metadata,
            condensed,
            tree_names,
            poll: StabilityPoll::default(),
            config,
        })
    }

    /// Pipeline over an already loaded reference and mask, without
    /// annotations.
    pub fn from_parts(config: PlaceConfig, reference: ReferenceGenome, mask: MaskSites) -> Self {
        Self {
            config,
            reference,
            mask,
            genes: Vec::new(),
            metadata: None,
            condensed: None,
            tree_names: None,
            poll: StabilityPoll::default(),
        }
    }

    /// Use these gene annotations.
    pub fn with_genes(mut self, genes: Vec<GeneAnnotation>) -> Self {
        self.genes = genes;
        self
    }

    /// Use this sample metadata.
    pub fn with_metadata(mut self, metadata: MetadataTable) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Use this condensed-node table.
    pub fn with_condensed_nodes(mut self, table: CondensedNodes) -> Self {
        self.condensed = Some(table);
        self
    }

    /// Names already in the tree.
    pub fn with_tree_names(mut self, names: Vec<String>) -> Self {
        self.tree_names = Some(names);
        self
    }

    /// Override the results-file stability poll.
    pub fn with_stability_poll(mut self, poll: StabilityPoll) -> Self {
        self.poll = poll;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &PlaceConfig {
        &self.config
    }

    /// Reference genome.
    pub fn reference(&self) -> &ReferenceGenome {
        &self.reference
    }

    fn validator(&self) -> SequenceValidator {
        let validator = SequenceValidator::new(self.config.validator_config());
        match &self.tree_names {
            Some(names) => validator.with_tree_names(names.iter().cloned()),
            None => validator,
        }
    }

    /// Validate the upload and turn it into engine-ready VCF.
    pub fn prepare(&self, upload: &str) -> Result<PreparedInput, PipelineError> {
        let validator = self.validator();
        match sniff_format(upload)? {
            InputFormat::Fasta => {
                let outcome = validator.validate(parse_fasta(upload)?);
                let aligner = SeedChainAligner::with_defaults(&self.reference)?;
                let aligned =
                    AlignmentEngine::new(&self.reference, &self.mask, aligner).run(outcome.accepted)?;
                let mut failures = outcome.failures;
                failures.extend(aligned.failures);
                Ok(PreparedInput {
                    samples: aligned.samples.into_iter().map(SampleRecord::from).collect(),
                    failures,
                    vcf: aligned.vcf,
                })
            }
            InputFormat::Vcf => {
                let uploaded = check_uploaded_vcf(
                    upload,
                    &self.reference,
                    &self.mask,
                    &validator,
                    self.config.max_upload_samples,
                )?;
                if uploaded.skipped_rows > 0 {
                    warn!(rows = uploaded.skipped_rows, "skipped VCF rows that are not single-base changes");
                }
                Ok(PreparedInput {
                    samples: uploaded.samples.into_iter().map(SampleRecord::from).collect(),
                    failures: Vec::new(),
                    vcf: uploaded.vcf,
                })
            }
        }
    }

    /// Backend talking to the configured server and engine.
    pub fn system_backend(&self) -> SystemBackend {
        let read_timeout = self.config.daemon.as_ref().and_then(|d| d.read_timeout());
        SystemBackend::new(
            self.config.supervisor(),
            self.config.organism.clone(),
            vec![self.config.tree.clone()],
        )
        .with_read_timeout(read_timeout)
    }

    /// Run a request with the real server and engine.
    pub fn run(&self, upload: &str) -> Result<PipelineReport, PipelineError> {
        self.run_with(upload, self.system_backend())
    }

    /// Run a request, placing samples through `backend`.
    pub fn run_with<B: PlacementBackend>(
        &self,
        upload: &str,
        backend: B,
    ) -> Result<PipelineReport, PipelineError> {
        let mut timer = StageTimer::start();
        let work_dir = &self.config.work_dir;
        fs::create_dir_all(work_dir).map_err(io_error(work_dir))?;

        let prepared = self.prepare(upload)?;
        timer.mark("validate and align");
        let mut report = PipelineReport {
            failures: prepared.failures,
            ..PipelineReport::default()
        };
        if prepared.samples.is_empty() {
            info!(failures = report.failures.len(), "no samples left to place");
            return Ok(report);
        }

        let vcf_path = work_dir.join("user.vcf");
        write_file(&vcf_path, &prepared.vcf)?;
        let fingerprint = blake3::hash(prepared.vcf.as_bytes()).to_hex().to_string();
        debug!(path = %vcf_path.display(), %fingerprint, "wrote engine VCF");

        // Fresh per request so results left by an earlier run are never read; removed on drop.
        let out_dir = tempfile::Builder::new()
            .prefix("usher_outdir")
            .tempdir_in(work_dir)
            .map_err(io_error(work_dir))?;
        debug!(path = %out_dir.path().display(), "created engine output directory");
        let stderr_path = work_dir.join("usher.stderr");
        let command = self.engine_command(&vcf_path, out_dir.path());
        let retry_delay = self
            .config
            .daemon
            .as_ref()
            .map_or(Duration::from_secs(1), |d| d.retry_delay());
        let mut client = PlacementClient::new(backend, SAMPLE_PREFIX)
            .with_retry_delay(retry_delay)
            .with_anchor_samples(self.config.anchor_samples.clone());
        let run = client.place(&command, &stderr_path, &self.poll)?;
        timer.mark("placement");

        let mut sample_ids: Vec<String> = prepared.samples.iter().map(|s| s.id.clone()).collect();
        let dropped = reconcile_sample_ids(&mut sample_ids, &run.results.placements, SAMPLE_PREFIX);
        for id in dropped {
            report.failures.push(Failure::new(
                id.clone(),
                format!("Sample {} was not placed in the tree; skipping", id),
            ));
        }
        let placed: HashSet<&str> = sample_ids.iter().map(String::as_str).collect();
        report.samples = prepared
            .samples
            .into_iter()
            .filter_map(|mut sample| {
                if placed.contains(sample.id.as_str()) {
                    return Some(sample);
                }
                let prefixed = format!("{}{}", SAMPLE_PREFIX, sample.id);
                placed.contains(prefixed.as_str()).then(|| {
                    sample.id = prefixed;
                    sample
                })
            })
            .collect();

        let mut extractor = SubtreeExtractor::new(&sample_ids, work_dir);
        if let Some(table) = &self.condensed {
            extractor = extractor.with_condensed_nodes(table);
        }
        let subtrees = extractor.extract_all(&run.files.subtrees)?;
        let single = run
            .files
            .single_subtree
            .as_ref()
            .map(|files| extractor.extract(files))
            .transpose()?;
        timer.mark("subtrees");

        let placements = &run.results.placements;
        let mut exporter =
            TreeJsonExporter::new(&self.reference, &self.genes, placements, &self.config.organism)
                .with_source(self.config.source.clone());
        if let Some(metadata) = &self.metadata {
            exporter = exporter.with_metadata(metadata);
        }
        if let Some(base) = &self.config.lineage_url_base {
            exporter = exporter.with_lineage_url_base(base.clone());
        }
        if let Some(description) = &self.config.description {
            exporter = exporter.with_description(description.clone());
        }
        for subtree in &subtrees {
            report.subtrees.push(export_subtree(&exporter, subtree, work_dir)?);
        }
        if let Some(subtree) = &single {
            report.single_subtree = Some(export_subtree(&exporter, subtree, work_dir)?);
        }
        timer.mark("tree json");

        let order: Vec<&str> = match &single {
            Some(subtree) => subtree
                .display_names
                .iter()
                .map(String::as_str)
                .filter(|name| placed.contains(name))
                .collect(),
            None => sample_ids.iter().map(String::as_str).collect(),
        };
        let summary = sample_summary(&order, &report.samples, placements, &self.reference, &self.genes)?;
        let summary_path = work_dir.join("sample-summary.tsv");
        write_file(&summary_path, &summary.table)?;
        report.summary_path = Some(summary_path);
        if !self.genes.is_empty() {
            let spike_path = work_dir.join("spike-summary.tsv");
            write_file(&spike_path, &spike_summary(&summary.spike_changes, order.len()))?;
            report.spike_summary_path = Some(spike_path);
        }
        timer.mark("summary");

        info!(
            samples = report.samples.len(),
            failures = report.failures.len(),
            subtrees = report.subtrees.len(),
            via = ?run.via,
            total_ms = timer.total().as_millis() as u64,
            "placement request finished"
        );
        report.vcf_path = Some(vcf_path);
        report.vcf_fingerprint = Some(fingerprint);
        report.via = Some(run.via);
        report.placements = run.results.placements;
        Ok(report)
    }

    fn engine_command(&self, vcf: &Path, out_dir: &Path) -> EngineCommand {
        let config = &self.config;
        match config.single_subtree_size {
            Some(size) => EngineCommand::placement_with_single_subtree(
                config.engine.clone(),
                vcf,
                &config.tree,
                out_dir,
                config.subtree_size,
                size,
                config.threads,
            ),
            None => EngineCommand::placement(
                config.engine.clone(),
                vcf,
                &config.tree,
                out_dir,
                config.subtree_size,
                config.threads,
            ),
        }
    }
}

fn export_subtree(
    exporter: &TreeJsonExporter<'_>,
    subtree: &SubtreeInfo,
    work_dir: &Path,
) -> Result<SubtreeSummary, PipelineError> {
    let json = match subtree.number {
        0 => work_dir.join("single-subtree.json"),
        n => work_dir.join(format!("subtree-{}.json", n)),
    };
    exporter.write(subtree, &json)?;
    Ok(SubtreeSummary {
        number: subtree.number,
        newick: subtree.newick_path.clone(),
        json,
        user_sample_ids: subtree.user_sample_ids.clone(),
        leaf_count: subtree.leaf_count(),
    })
}

/// Summary table text plus the Spike changes seen per label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSummary {
    /// TSV text including the header.
    pub table: String,
    /// Spike (`S` gene) change label to sample ids, in row order.
    pub spike_changes: BTreeMap<String, Vec<String>>,
}

fn join<T: ToString>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

/// Root-to-sample path as `C241T, A23403G > G28881A`.
pub fn format_mutation_path(path: &[PathNode]) -> String {
    path.iter()
        .map(|node| join(&node.snvs, ", "))
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Sample changes with ambiguous bases left out and imputed bases added,
/// in position order.
fn changes_with_imputed(sample: &SampleRecord, info: &PlacementInfo, reference: &ReferenceGenome) -> Vec<Snv> {
    let mut by_position: BTreeMap<u32, Snv> = sample
        .snvs
        .iter()
        .filter(|snv| !is_iupac_ambiguous(snv.alternate))
        .map(|snv| (snv.position, *snv))
        .collect();
    for imputed in &info.imputed {
        let (Some(reference_base), [base]) = (reference.base(imputed.position), imputed.base.as_bytes()) else {
            continue;
        };
        by_position.insert(
            imputed.position,
            Snv::from_reference(imputed.position, reference_base.to_ascii_uppercase(), base.to_ascii_uppercase()),
        );
    }
    by_position.into_values().collect()
}

/// Build the per-sample summary, one row per id in `order`.
pub fn sample_summary(
    order: &[&str],
    samples: &[SampleRecord],
    placements: &Placements,
    reference: &ReferenceGenome,
    genes: &[GeneAnnotation],
) -> Result<SampleSummary, ExportError> {
    let mut summary = SampleSummary {
        table: format!("{}\n", SUMMARY_HEADER),
        ..SampleSummary::default()
    };
    for &id in order {
        let (Some(sample), Some(info)) = (samples.iter().find(|s| s.id == id), placements.get(id)) else {
            warn!(sample = %id, "no sample record or placement for summary row");
            continue;
        };
        let mut aa_labels = Vec::new();
        for gene in amino_acid_changes(&changes_with_imputed(sample, info, reference), &[], genes)? {
            for change in &gene.changes {
                if gene.gene == "S" {
                    summary
                        .spike_changes
                        .entry(change.clone())
                        .or_default()
                        .push(id.to_string());
                }
                aa_labels.push(format!("{}:{}", gene.gene, change));
            }
        }
        let imputed: Vec<String> = info
            .imputed
            .iter()
            .map(|b| format!("{}{}", b.position + 1, b.base))
            .collect();
        let path = if info.path.is_empty() {
            info.best_nodes.first().map(|b| b.path.as_slice()).unwrap_or_default()
        } else {
            info.path.as_slice()
        };
        let mut row = vec![
            id.to_string(),
            join(&sample.snvs, ","),
            aa_labels.join(","),
            imputed.join(","),
            format_mutation_path(path),
            info.best_placement_count.to_string(),
            info.parsimony_score.to_string(),
            info.clade.clone().unwrap_or_default(),
            info.lineage.clone().unwrap_or_default(),
        ];
        match &sample.alignment {
            Some(alignment) => row.extend([
                alignment.length.to_string(),
                alignment.aligned_bases.to_string(),
                alignment.indels.inserted_bases.to_string(),
                alignment.indels.insertion_ranges(),
                alignment.indels.deleted_bases.to_string(),
                alignment.indels.deletion_ranges(),
            ]),
            None => row.extend(std::iter::repeat(NOT_AVAILABLE.to_string()).take(6)),
        }
        let masked: Vec<String> = sample.masked.iter().map(|m| m.snv.to_string()).collect();
        row.push(masked.join(","));
        summary.table.push_str(&row.join("\t"));
        summary.table.push('\n');
    }
    Ok(summary)
}

/// Spike change table: most frequent change first, ties by label.
pub fn spike_summary(changes: &BTreeMap<String, Vec<String>>, total_samples: usize) -> String {
    let mut rows: Vec<(&String, &Vec<String>)> = changes.iter().collect();
    rows.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
    let mut text = format!("{}\n", SPIKE_SUMMARY_HEADER);
    for (change, ids) in rows {
        let frequency = ids.len() as f64 / total_samples.max(1) as f64;
        text.push_str(&format!(
            "S:{}\t{}\t{:.6}\t{}\n",
            change,
            ids.len(),
            frequency,
            ids.join(",")
        ));
    }
    text
}
