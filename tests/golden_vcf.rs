#[path = "common/mod.rs"]
mod common;

use common::assert_snapshot;
use phyloplace::genomics::{render_vcf, MaskSites, VariantTable};

#[test]
fn variant_table_matches_golden_vcf() {
    let reference = b"acgtacgtacga";
    let mut mask = MaskSites::empty(reference.len());
    mask.insert(8, "homoplasy");

    let mut table = VariantTable::new(reference.len(), 2);
    let calls: [(u32, u8, u8); 7] = [
        (2, b'a', b'g'),
        (5, b'n', b'c'),
        (7, b'c', b'g'),
        (8, b't', b'a'),
        (9, b'-', b'c'),
        (10, b'g', b'g'),
        (0, b'a', b'a'),
    ];
    for (position, first, second) in calls {
        let reference_base = reference[position as usize];
        table.add_call(position, reference_base, first, 0);
        table.add_call(position, reference_base, second, 1);
    }
    // A later call replaces an earlier no-call.
    table.add_call(9, b'c', b'c', 0);

    let ids = vec!["s1".to_string(), "s2".to_string()];
    let vcf = render_vcf("chrGolden", &ids, &table, &mask).expect("render vcf");
    assert_snapshot("vcf/two_samples.vcf", &vcf);
}
