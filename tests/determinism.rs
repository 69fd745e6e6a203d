#[path = "common/mod.rs"]
mod common;

use std::collections::HashSet;

use blake3::hash;
use common::{fasta, substitute, synthetic_genome};
use phyloplace::genomics::{MaskSites, ReferenceGenome};
use phyloplace::{PlaceConfig, Pipeline};

#[test]
fn prepared_vcf_is_deterministic() {
    let genome = synthetic_genome(3_000, 5);
    let mut mask = MaskSites::empty(genome.len());
    mask.insert(2_000, "seq_end");
    let config = PlaceConfig {
        min_len: Some(1_000),
        max_len: Some(5_000),
        ..PlaceConfig::default()
    };
    let pipeline = Pipeline::from_parts(config, ReferenceGenome::new("chrDeterministic", &genome), mask);

    let first = substitute(&genome, &[150, 900, 2_000]);
    let mut second = substitute(&genome, &[900, 2_500]);
    second[1_700..1_740].fill(b'n');
    let upload = fasta(&[("alpha", &first[..]), ("beta|2021", &second[..]), ("gamma", &genome[..])]);

    let mut fingerprints = HashSet::new();
    for _ in 0..5 {
        let prepared = pipeline.prepare(&upload).expect("prepare upload");
        assert_eq!(prepared.samples.len(), 3);
        fingerprints.insert(hash(prepared.vcf.as_bytes()));
    }

    assert_eq!(fingerprints.len(), 1, "outputs diverged across runs");
}
