//! Alignment and VCF synthesis throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phyloplace::genomics::{
    parse_fasta, AlignmentEngine, MaskSites, ReferenceGenome, SeedChainAligner, SequenceValidator,
    ValidatorConfig,
};

fn synthetic_genome(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            b"acgt"[(state >> 33) as usize % 4]
        })
        .collect()
}

fn upload(genome: &[u8], samples: usize) -> String {
    let mut text = String::new();
    for i in 0..samples {
        let mut bases = genome.to_vec();
        for pos in (97 * (i + 1)..genome.len()).step_by(1_500) {
            bases[pos] = if bases[pos] == b'a' { b'c' } else { b'a' };
        }
        text.push_str(&format!(">sample{}\n{}\n", i, String::from_utf8_lossy(&bases)));
    }
    text
}

fn benchmark_alignment(c: &mut Criterion) {
    let genome = synthetic_genome(30_000, 19);
    let reference = ReferenceGenome::new("chrBench", &genome);
    let mask = MaskSites::empty(genome.len());
    let validator = SequenceValidator::new(ValidatorConfig::for_database("wuhCor1"));

    c.bench_function("index_reference_30kb", |b| {
        b.iter(|| black_box(SeedChainAligner::with_defaults(&reference).unwrap()));
    });

    let mut group = c.benchmark_group("align_batch");
    for samples in [1usize, 10, 50] {
        let text = upload(&genome, samples);
        group.bench_with_input(BenchmarkId::from_parameter(samples), &text, |b, text| {
            b.iter(|| {
                let outcome = validator.validate(parse_fasta(text).unwrap());
                let aligner = SeedChainAligner::with_defaults(&reference).unwrap();
                let aligned = AlignmentEngine::new(&reference, &mask, aligner)
                    .run(outcome.accepted)
                    .unwrap();
                black_box(aligned.vcf.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_alignment);
criterion_main!(benches);
