//! Sequence-level side of the pipeline: upload parsing and QC, reference
//! alignment, SNV extraction and VCF synthesis.
//!
//! Everything here runs before the placement engine is involved; the output is
//! a VCF whose genotype columns follow the final sample-id order.

mod aligner;
mod engine;
mod indels;
mod io;
pub mod nucleotide;
mod reference;
mod types;
mod uploaded_vcf;
mod validator;
mod variant_table;
mod vcf;

pub use aligner::{Aligner, AlignerConfig, AlignerError, SeedChainAligner};
pub use engine::{AlignedSample, AlignmentEngine, AlignmentOutcome, EngineError};
pub use indels::IndelSummary;
pub use io::{parse_fasta, read_fasta, read_text, sniff_format, InputError, InputFormat};
pub use reference::{MaskSites, ReferenceGenome};
pub use types::{
    AlignmentBlock, AlignmentRecord, MaskedSnv, Sequence, Snv, SnvParseError, Strand,
};
pub use uploaded_vcf::{check_uploaded_vcf, UploadedSample, UploadedVcf, DEFAULT_MAX_UPLOAD_SAMPLES};
pub use validator::{
    is_internal_node_name, replace_newick_chars, Failure, SequenceQc, SequenceValidator,
    ValidatedSequence, ValidationOutcome, ValidatorConfig, DEFAULT_MAX_N_FRACTION, SAMPLE_PREFIX,
};
pub use variant_table::{SnvSite, VariantTable, NO_CALL};
pub use vcf::{render_vcf, write_vcf, VcfError, VCF_FIXED_COLUMNS};
