// spec.md §8 scenario 2: merge sort smoke test.

mod common;

use pagebase::config::CachePolicyKind;
use pagebase::ops::sort;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[test]
fn sorting_ten_thousand_shuffled_integers_yields_the_identity_permutation() {
    let cfg = common::config(20, CachePolicyKind::Clock);
    let access = common::access(&cfg);
    access.create_table("foo").unwrap();

    let mut values: Vec<u32> = (1..=10_000u32).collect();
    let mut rng = StdRng::seed_from_u64(42);
    values.shuffle(&mut rng);

    for v in &values {
        common::append(&access, "foo", &v.to_be_bytes());
    }

    let key_of = |bytes: &[u8]| bytes.to_vec();
    let sorted_table = sort::sort(&access, &cfg, "foo", &key_of).unwrap();

    let out: Vec<u32> = access
        .scan_records(&sorted_table, |b| u32::from_be_bytes(b.try_into().unwrap()))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    let expected: Vec<u32> = (1..=10_000u32).collect();
    assert_eq!(out, expected);
}
