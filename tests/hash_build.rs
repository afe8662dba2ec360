// spec.md §8 scenario 3: hash build over (int, string) records.

mod common;

use pagebase::config::CachePolicyKind;
use pagebase::ops::hash;

fn rec(i: u32, name: &str) -> Vec<u8> {
    let mut b = i.to_le_bytes().to_vec();
    b.extend_from_slice(&(name.len() as u32).to_le_bytes());
    b.extend_from_slice(name.as_bytes());
    b
}

fn key_of(bytes: &[u8]) -> Vec<u8> {
    bytes[0..4].to_vec()
}

#[test]
fn every_inserted_key_is_findable_in_exactly_ten_buckets() {
    let cfg = common::config(32, CachePolicyKind::Clock);
    let access = common::access(&cfg);
    access.create_table("foo").unwrap();

    for i in 1..=10_000u32 {
        common::append(&access, "foo", &rec(i, &format!("n{}", i)));
    }

    let build = hash::build(&access, "foo", 10, &key_of).unwrap();
    assert_eq!(build.buckets().len(), 10);

    for i in 1..=10_000u32 {
        let target = i.to_le_bytes().to_vec();
        let found = build.find(&access, &key_of, &target).unwrap();
        assert_eq!(found.len(), 1, "key {} should resolve to exactly one record", i);
    }

    let miss = build.find(&access, &key_of, &10_001u32.to_le_bytes().to_vec()).unwrap();
    assert!(miss.is_empty());

    build.close(&access).unwrap();
}
