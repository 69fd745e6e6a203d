//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

/// Compare `actual` with `tests/snapshots/<name>`, or rewrite the file when
/// `PHYLOPLACE_UPDATE_SNAPSHOTS` is set.
pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("PHYLOPLACE_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set PHYLOPLACE_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Deterministic pseudo-random genome of lower-case bases.
pub fn synthetic_genome(len: usize, seed: u64) -> Vec<u8> {
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

/// Copy of `genome` with a different base at each position.
pub fn substitute(genome: &[u8], positions: &[usize]) -> Vec<u8> {
    let mut bases = genome.to_vec();
    for &pos in positions {
        bases[pos] = if bases[pos] == b'a' { b'g' } else { b'a' };
    }
    bases
}

/// FASTA text with one unwrapped record per entry.
pub fn fasta(records: &[(&str, &[u8])]) -> String {
    records
        .iter()
        .map(|(name, bases)| format!(">{}\n{}\n", name, String::from_utf8_lossy(bases)))
        .collect()
}
