//! Seed-and-chain aligner for near-identical whole-genome queries.
//!
//! Exact k-mer seeds from the reference are merged into diagonal anchors, the
//! anchors are chained by dynamic programming, and each chain becomes one gapped
//! alignment on the forward strand. Runs on the same diagonal are merged into a
//! single block (mismatches stay inside blocks); a change of diagonal is an indel
//! and starts a new block.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use super::{AlignmentBlock, AlignmentRecord, ReferenceGenome, Sequence, Strand};

/// Penalty for a mismatch during end extension.
const EXTEND_MISMATCH: i64 = -3;
/// Extension stops once the score falls this far below its best value.
const EXTEND_XDROP: i64 = 12;
/// Upper bound on alignments reported per query.
const MAX_CHAINS: usize = 8;

/// Errors surfaced by the aligner.
#[derive(Debug, Error)]
pub enum AlignerError {
    /// Seed length must fit the 2-bit packed k-mer word.
    #[error("seed length {0} is outside the supported range 4..=31")]
    InvalidSeedLength(usize),

    /// Reference shorter than one seed.
    #[error("reference of {len} bases is shorter than the seed length {k}")]
    ReferenceTooShort {
        /// Reference length.
        len: usize,
        /// Seed length.
        k: usize,
    },
}

/// Produces alignments of a query sequence against a fixed reference.
pub trait Aligner {
    /// Align one query. An empty vector means the query could not be aligned;
    /// more than one record means several regions qualified.
    fn align(&self, query: &Sequence) -> Result<Vec<AlignmentRecord>, AlignerError>;
}

/// Tunables for [`SeedChainAligner`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignerConfig {
    /// Seed (k-mer) length.
    pub seed_len: usize,
    /// Seeds occurring more often than this in the reference are ignored.
    pub max_seed_occurrences: usize,
    /// Minimum number of matching bases for a reported alignment.
    pub min_score: u32,
    /// Minimum identity over called (non-N) aligned bases.
    pub min_identity: f64,
    /// Largest query or reference gap bridged between chained anchors.
    pub max_gap: u32,
    /// Chaining penalty for opening an indel.
    pub gap_open: i64,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            seed_len: 16,
            max_seed_occurrences: 4096,
            min_score: 50,
            min_identity: 0.9,
            max_gap: 5_000,
            gap_open: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Anchor {
    q: u32,
    t: u32,
    len: u32,
}

impl Anchor {
    fn on_diagonal(diag: i64, q_start: u32, q_end: u32) -> Self {
        Self {
            q: q_start,
            t: (q_start as i64 + diag) as u32,
            len: q_end - q_start,
        }
    }

    fn diag(&self) -> i64 {
        self.t as i64 - self.q as i64
    }

    fn q_end(&self) -> u32 {
        self.q + self.len
    }

    fn t_end(&self) -> u32 {
        self.t + self.len
    }
}

/// Seed-and-chain aligner over an in-memory k-mer index of the reference.
#[derive(Debug)]
pub struct SeedChainAligner {
    name: String,
    target: Vec<u8>,
    index: HashMap<u64, Vec<u32>>,
    config: AlignerConfig,
}

impl SeedChainAligner {
    /// Index the reference with the given configuration.
    pub fn new(reference: &ReferenceGenome, config: AlignerConfig) -> Result<Self, AlignerError> {
        let k = config.seed_len;
        if !(4..=31).contains(&k) {
            return Err(AlignerError::InvalidSeedLength(k));
        }
        if reference.len() < k {
            return Err(AlignerError::ReferenceTooShort {
                len: reference.len(),
                k,
            });
        }
        let target = reference.as_bytes().to_vec();
        let mut index: HashMap<u64, Vec<u32>> = HashMap::new();
        for (pos, code) in kmers(&target, k) {
            index.entry(code).or_default().push(pos);
        }
        debug!(kmers = index.len(), k, "indexed reference");
        Ok(Self {
            name: reference.name().to_string(),
            target,
            index,
            config,
        })
    }

    /// Index the reference with default settings.
    pub fn with_defaults(reference: &ReferenceGenome) -> Result<Self, AlignerError> {
        Self::new(reference, AlignerConfig::default())
    }

    /// Active configuration.
    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    fn anchors(&self, query: &[u8]) -> Vec<Anchor> {
        let k = self.config.seed_len as u32;
        let mut hits: Vec<(i64, u32)> = Vec::new();
        for (q, code) in kmers(query, self.config.seed_len) {
            if let Some(positions) = self.index.get(&code) {
                if positions.len() > self.config.max_seed_occurrences {
                    continue;
                }
                hits.extend(positions.iter().map(|&t| (t as i64 - q as i64, q)));
            }
        }
        hits.sort_unstable();

        let mut anchors = Vec::new();
        let mut iter = hits.into_iter();
        let Some((mut diag, first_q)) = iter.next() else {
            return anchors;
        };
        let (mut start, mut end) = (first_q, first_q + k);
        for (d, q) in iter {
            if d == diag && q <= end + k {
                end = end.max(q + k);
                continue;
            }
            anchors.push(Anchor::on_diagonal(diag, start, end));
            diag = d;
            start = q;
            end = q + k;
        }
        anchors.push(Anchor::on_diagonal(diag, start, end));
        anchors.sort_by_key(|a| (a.q, a.t));
        anchors
    }

    /// Best-scoring chain among `anchors`, as indices in chain order.
    fn best_chain(&self, anchors: &[Anchor]) -> Option<(i64, Vec<usize>)> {
        let n = anchors.len();
        let max_gap = self.config.max_gap as i64;
        let mut score = vec![0i64; n];
        let mut prev: Vec<Option<usize>> = vec![None; n];
        for i in 0..n {
            let b = anchors[i];
            score[i] = b.len as i64;
            for j in 0..i {
                let a = anchors[j];
                if a.q >= b.q || a.t >= b.t {
                    continue;
                }
                let q_gap = b.q as i64 - a.q_end() as i64;
                let t_gap = b.t as i64 - a.t_end() as i64;
                if q_gap > max_gap || t_gap > max_gap {
                    continue;
                }
                let overlap = (-q_gap.min(t_gap)).max(0);
                let gained = b.len as i64 - overlap;
                if gained <= 0 {
                    continue;
                }
                let shift = (a.diag() - b.diag()).abs();
                let penalty = if shift == 0 { 0 } else { self.config.gap_open + shift };
                let candidate = score[j] + gained - penalty;
                if candidate > score[i] {
                    score[i] = candidate;
                    prev[i] = Some(j);
                }
            }
        }
        let (end, &best) = score.iter().enumerate().max_by_key(|(_, s)| **s)?;
        let mut chain = vec![end];
        let mut cursor = end;
        while let Some(p) = prev[cursor] {
            chain.push(p);
            cursor = p;
        }
        chain.reverse();
        Some((best, chain))
    }

    fn same(&self, query: &[u8], q: u32, t: u32) -> bool {
        match (query.get(q as usize), self.target.get(t as usize)) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b) && !a.eq_ignore_ascii_case(&b'n'),
            _ => false,
        }
    }

    fn extension_score(&self, query: &[u8], q: u32, t: u32) -> i64 {
        if self.same(query, q, t) {
            1
        } else if query[q as usize].eq_ignore_ascii_case(&b'n') {
            0
        } else {
            EXTEND_MISMATCH
        }
    }

    /// Number of bases the block may grow leftwards under x-drop scoring.
    fn extend_left(&self, query: &[u8], q: u32, t: u32) -> u32 {
        let (mut score, mut best, mut best_len) = (0i64, 0i64, 0u32);
        let limit = q.min(t);
        for len in 1..=limit {
            score += self.extension_score(query, q - len, t - len);
            if score > best {
                best = score;
                best_len = len;
            } else if best - score > EXTEND_XDROP {
                break;
            }
        }
        best_len
    }

    /// Number of bases the block may grow rightwards under x-drop scoring.
    fn extend_right(&self, query: &[u8], q_end: u32, t_end: u32) -> u32 {
        let (mut score, mut best, mut best_len) = (0i64, 0i64, 0u32);
        let limit = (query.len() as u32 - q_end).min(self.target.len() as u32 - t_end);
        for len in 0..limit {
            score += self.extension_score(query, q_end + len, t_end + len);
            if score > best {
                best = score;
                best_len = len + 1;
            } else if best - score > EXTEND_XDROP {
                break;
            }
        }
        best_len
    }

    fn chain_to_blocks(&self, chain: &[Anchor], query: &[u8]) -> Vec<Anchor> {
        let mut blocks: Vec<Anchor> = Vec::new();
        for &anchor in chain {
            let mut next = anchor;
            if let Some(last) = blocks.last_mut() {
                let overlap = last
                    .q_end()
                    .saturating_sub(next.q)
                    .max(last.t_end().saturating_sub(next.t));
                if overlap >= next.len {
                    continue;
                }
                next.q += overlap;
                next.t += overlap;
                next.len -= overlap;
                if next.diag() == last.diag() {
                    last.len = next.q_end() - last.q;
                    continue;
                }
                while last.q_end() < next.q
                    && last.t_end() < next.t
                    && self.same(query, last.q_end(), last.t_end())
                {
                    last.len += 1;
                }
                while next.q > last.q_end()
                    && next.t > last.t_end()
                    && self.same(query, next.q - 1, next.t - 1)
                {
                    next.q -= 1;
                    next.t -= 1;
                    next.len += 1;
                }
            }
            blocks.push(next);
        }
        if let Some(first) = blocks.first_mut() {
            let grow = self.extend_left(query, first.q, first.t);
            first.q -= grow;
            first.t -= grow;
            first.len += grow;
        }
        if let Some(last) = blocks.last_mut() {
            last.len += self.extend_right(query, last.q_end(), last.t_end());
        }
        blocks
    }

    /// Matching and mismatching called bases across blocks; query Ns are ignored.
    fn tally(&self, blocks: &[Anchor], query: &[u8]) -> (u32, u32) {
        let (mut matches, mut mismatches) = (0, 0);
        for block in blocks {
            for offset in 0..block.len {
                let q = block.q + offset;
                if self.same(query, q, block.t + offset) {
                    matches += 1;
                } else if !query[q as usize].eq_ignore_ascii_case(&b'n') {
                    mismatches += 1;
                }
            }
        }
        (matches, mismatches)
    }
}

impl Aligner for SeedChainAligner {
    fn align(&self, query: &Sequence) -> Result<Vec<AlignmentRecord>, AlignerError> {
        let bases = &query.bases;
        let mut anchors = self.anchors(bases);
        let mut covered: Vec<(u32, u32)> = Vec::new();
        let mut records = Vec::new();

        while !anchors.is_empty() && records.len() < MAX_CHAINS {
            let Some((_, chain_ix)) = self.best_chain(&anchors) else {
                break;
            };
            let chain: Vec<Anchor> = chain_ix.iter().map(|&i| anchors[i]).collect();
            let blocks = self.chain_to_blocks(&chain, bases);
            let (matches, mismatches) = self.tally(&blocks, bases);
            let called = (matches + mismatches).max(1);
            let identity = matches as f64 / called as f64;
            if matches < self.config.min_score || identity < self.config.min_identity {
                break;
            }
            let span = (
                blocks.first().map_or(0, |b| b.q),
                blocks.last().map_or(0, |b| b.q_end()),
            );
            covered.push(span);
            records.push(AlignmentRecord {
                query_name: query.name.clone(),
                target_name: self.name.clone(),
                strand: Strand::Forward,
                query_size: bases.len() as u32,
                target_size: self.target.len() as u32,
                blocks: blocks
                    .iter()
                    .map(|b| AlignmentBlock::new(b.t, b.q, b.len))
                    .collect(),
            });
            anchors.retain(|a| {
                !covered
                    .iter()
                    .any(|&(start, end)| a.q >= start && a.q_end() <= end)
            });
        }

        debug!(
            query = %query.name,
            alignments = records.len(),
            "aligned query"
        );
        Ok(records)
    }
}

/// Forward-strand k-mers over ACGT-only windows as `(start, 2-bit code)`.
fn kmers(seq: &[u8], k: usize) -> impl Iterator<Item = (u32, u64)> + '_ {
    let mask = (1u64 << (2 * k)) - 1;
    let mut code = 0u64;
    let mut valid = 0usize;
    seq.iter().enumerate().filter_map(move |(i, &base)| {
        let bits = match base.to_ascii_lowercase() {
            b'a' => 0,
            b'c' => 1,
            b'g' => 2,
            b't' => 3,
            _ => {
                valid = 0;
                code = 0;
                return None;
            }
        };
        code = ((code << 2) | bits) & mask;
        valid += 1;
        if valid >= k {
            Some(((i + 1 - k) as u32, code))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random genome.
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

    fn aligner(genome: &[u8]) -> SeedChainAligner {
        let reference = ReferenceGenome::new("ref", genome);
        SeedChainAligner::with_defaults(&reference).unwrap()
    }

    #[test]
    fn identical_query_is_one_block() {
        let genome = synthetic_genome(2_000, 7);
        let records = aligner(&genome)
            .align(&Sequence::new("q", genome.clone()))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].blocks, vec![AlignmentBlock::new(0, 0, 2_000)]);
    }

    #[test]
    fn substitutions_stay_inside_one_block() {
        let genome = synthetic_genome(2_000, 11);
        let mut query = genome.clone();
        for pos in [30usize, 500, 503, 1_990] {
            query[pos] = if query[pos] == b'a' { b'g' } else { b'a' };
        }
        let records = aligner(&genome).align(&Sequence::new("q", query)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].blocks, vec![AlignmentBlock::new(0, 0, 2_000)]);
    }

    #[test]
    fn deletion_splits_blocks() {
        let genome = synthetic_genome(3_000, 3);
        let mut query = genome[..1_200].to_vec();
        query.extend_from_slice(&genome[1_209..]);
        let records = aligner(&genome).align(&Sequence::new("q", query)).unwrap();
        assert_eq!(records.len(), 1);
        let blocks = &records[0].blocks;
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].target_start, 0);
        assert_eq!(blocks[1].target_end(), 3_000);
        let t_gap = blocks[1].target_start - blocks[0].target_end();
        let q_gap = blocks[1].query_start - blocks[0].query_end();
        assert_eq!(t_gap - q_gap, 9);
    }

    #[test]
    fn insertion_splits_blocks() {
        let genome = synthetic_genome(3_000, 5);
        let mut query = genome[..1_500].to_vec();
        query.extend_from_slice(b"ttttt");
        query.extend_from_slice(&genome[1_500..]);
        let records = aligner(&genome).align(&Sequence::new("q", query)).unwrap();
        let blocks = &records[0].blocks;
        assert_eq!(blocks.len(), 2);
        let t_gap = blocks[1].target_start - blocks[0].target_end();
        let q_gap = blocks[1].query_start - blocks[0].query_end();
        assert_eq!(q_gap - t_gap, 5);
    }

    #[test]
    fn leading_ns_are_left_unaligned() {
        let genome = synthetic_genome(1_000, 13);
        let mut query = vec![b'n'; 40];
        query.extend_from_slice(&genome[40..]);
        let records = aligner(&genome).align(&Sequence::new("q", query)).unwrap();
        assert_eq!(records[0].blocks[0].target_start, 40);
        assert_eq!(records[0].blocks[0].query_start, 40);
    }

    #[test]
    fn unrelated_query_does_not_align() {
        let genome = synthetic_genome(2_000, 17);
        let query = synthetic_genome(2_000, 99);
        let records = aligner(&genome).align(&Sequence::new("q", query)).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn rearranged_query_yields_two_alignments() {
        let genome = synthetic_genome(4_000, 23);
        let mut query = genome[2_000..3_000].to_vec();
        query.extend_from_slice(&genome[500..1_500]);
        let records = aligner(&genome).align(&Sequence::new("q", query)).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn rejects_bad_seed_length() {
        let reference = ReferenceGenome::new("ref", b"acgtacgt");
        let config = AlignerConfig {
            seed_len: 40,
            ..AlignerConfig::default()
        };
        assert!(matches!(
            SeedChainAligner::new(&reference, config),
            Err(AlignerError::InvalidSeedLength(40))
        ));
    }
}
