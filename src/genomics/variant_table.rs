use super::MaskSites;

/// Genotype code for a missing call.
pub const NO_CALL: i32 = -1;

/// Accumulated calls at one reference position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnvSite {
    /// Lower-case reference base.
    pub reference: u8,
    /// Distinct alternate bases (lower-case) with occurrence counts, in order of first sighting.
    pub alts: Vec<(u8, u32)>,
    /// Per-sample genotype: `-1` no-call, `0` reference, `n` = `alts[n - 1]`.
    pub genotypes: Vec<i32>,
}

impl SnvSite {
    fn new(reference: u8, sample_count: usize) -> Self {
        Self {
            reference,
            alts: Vec::new(),
            genotypes: vec![NO_CALL; sample_count],
        }
    }

    /// Number of distinct alternate alleles.
    pub fn alt_count(&self) -> usize {
        self.alts.len()
    }

    /// Samples without a call here.
    pub fn no_calls(&self) -> usize {
        self.genotypes.iter().filter(|&&gt| gt < 0).count()
    }

    /// Samples with a reference or alternate call (VCF `AN`).
    pub fn called(&self) -> usize {
        self.genotypes.len() - self.no_calls()
    }

    /// A row is worth emitting when anything other than the reference was seen.
    pub fn is_reportable(&self) -> bool {
        !self.alts.is_empty() || self.no_calls() > 0
    }

    fn record(&mut self, observed: u8, sample: usize) -> i32 {
        if self.genotypes[sample] >= 0 {
            // Overlapping blocks: the first call wins.
            return self.genotypes[sample];
        }
        let gt = if observed == self.reference {
            0
        } else if observed == b'n' || observed == b'-' {
            NO_CALL
        } else {
            let ix = match self.alts.iter().position(|&(base, _)| base == observed) {
                Some(ix) => {
                    self.alts[ix].1 += 1;
                    ix
                }
                None => {
                    self.alts.push((observed, 1));
                    self.alts.len() - 1
                }
            };
            ix as i32 + 1
        };
        self.genotypes[sample] = gt;
        gt
    }
}

/// Dense position-indexed table of calls for a fixed, ordered sample set.
#[derive(Debug, Clone)]
pub struct VariantTable {
    sample_count: usize,
    sites: Vec<Option<SnvSite>>,
}

impl VariantTable {
    /// Empty table over a genome with `sample_count` genotype columns.
    pub fn new(genome_len: usize, sample_count: usize) -> Self {
        Self {
            sample_count,
            sites: vec![None; genome_len],
        }
    }

    /// Number of genotype columns.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Record what `sample` shows at `position`. `observed` of `n` or `-` is a
    /// no-call. Reference `N` positions are never called. Returns the sample's
    /// genotype code at the position afterwards.
    pub fn add_call(&mut self, position: u32, reference: u8, observed: u8, sample: usize) -> i32 {
        let reference = reference.to_ascii_lowercase();
        if reference == b'n' || sample >= self.sample_count {
            return NO_CALL;
        }
        let Some(slot) = self.sites.get_mut(position as usize) else {
            return NO_CALL;
        };
        let sample_count = self.sample_count;
        slot.get_or_insert_with(|| SnvSite::new(reference, sample_count))
            .record(observed.to_ascii_lowercase(), sample)
    }

    /// Site at a position, if any call was recorded.
    pub fn site(&self, position: u32) -> Option<&SnvSite> {
        self.sites.get(position as usize).and_then(Option::as_ref)
    }

    /// Reportable, unmasked sites in position order.
    pub fn rows<'a>(&'a self, mask: &'a MaskSites) -> impl Iterator<Item = (u32, &'a SnvSite)> + 'a {
        self.sites
            .iter()
            .enumerate()
            .filter_map(|(pos, site)| site.as_ref().map(|s| (pos as u32, s)))
            .filter(move |(pos, site)| !mask.is_masked(*pos) && site.is_reportable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genotypes_follow_alt_order() {
        let mut table = VariantTable::new(10, 4);
        assert_eq!(table.add_call(5, b'a', b'a', 0), 0);
        assert_eq!(table.add_call(5, b'a', b'G', 1), 1);
        assert_eq!(table.add_call(5, b'a', b't', 2), 2);
        assert_eq!(table.add_call(5, b'a', b'g', 3), 1);
        let site = table.site(5).unwrap();
        assert_eq!(site.alts, vec![(b'g', 2), (b't', 1)]);
        assert_eq!(site.genotypes, vec![0, 1, 2, 1]);
        assert_eq!(site.called(), 4);
    }

    #[test]
    fn first_call_wins_and_no_calls_can_be_filled() {
        let mut table = VariantTable::new(10, 2);
        table.add_call(1, b'c', b'c', 0);
        assert_eq!(table.add_call(1, b'c', b't', 0), 0);
        assert_eq!(table.add_call(1, b'c', b'-', 1), NO_CALL);
        assert_eq!(table.add_call(1, b'c', b't', 1), 1);
        assert_eq!(table.site(1).unwrap().no_calls(), 0);
    }

    #[test]
    fn reference_n_is_never_called() {
        let mut table = VariantTable::new(10, 1);
        assert_eq!(table.add_call(2, b'n', b'a', 0), NO_CALL);
        assert!(table.site(2).is_none());
    }

    #[test]
    fn rows_skip_uniform_reference_and_masked_sites() {
        let mut table = VariantTable::new(10, 2);
        for pos in 0..10 {
            table.add_call(pos, b'a', b'a', 0);
            table.add_call(pos, b'a', b'a', 1);
        }
        table.add_call(0, b'a', b'c', 0);
        let mut fresh = VariantTable::new(10, 2);
        fresh.add_call(3, b'a', b'n', 0);
        fresh.add_call(3, b'a', b'a', 1);
        fresh.add_call(4, b'a', b'g', 0);
        fresh.add_call(4, b'a', b'a', 1);
        let mut mask = MaskSites::empty(10);
        mask.insert(4, "test");
        let rows: Vec<u32> = fresh.rows(&mask).map(|(pos, _)| pos).collect();
        assert_eq!(rows, vec![3]);
        assert_eq!(table.rows(&MaskSites::empty(10)).count(), 0);
    }
}
