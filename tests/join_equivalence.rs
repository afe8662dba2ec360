// spec.md §8 scenario 4: inner join equivalence between sort-merge and nested-loop.
//
// The literal scale=10 fixture isn't recoverable from the distillation this crate was
// built from, so this test defines its own deterministic one: 10 "planets" x 3 flights
// each (30 flights, unique `num`), a variable number of tickets per flight (so some
// `num`s are unique and some repeat on both sides), plus a handful of tickets and
// flights that don't match anything on the other side.

mod common;

use pagebase::config::CachePolicyKind;
use pagebase::ops::join::{self, JoinOperand};
use std::collections::HashMap;

fn flight_rec(num: i32, planet: i32, craft: i32) -> Vec<u8> {
    let mut b = num.to_le_bytes().to_vec();
    b.extend_from_slice(&planet.to_le_bytes());
    b.extend_from_slice(&craft.to_le_bytes());
    b
}

fn ticket_rec(num: i32, pax: &str, price: f64) -> Vec<u8> {
    let mut b = num.to_le_bytes().to_vec();
    b.extend_from_slice(&(pax.len() as u32).to_le_bytes());
    b.extend_from_slice(pax.as_bytes());
    b.extend_from_slice(&price.to_le_bytes());
    b
}

fn num_key(bytes: &[u8]) -> Vec<u8> {
    bytes[0..4].to_vec()
}

fn build_fixture(access: &pagebase::TableAccess) {
    access.create_table("flight").unwrap();
    access.create_table("ticket").unwrap();

    for planet in 0..10i32 {
        for slot in 0..3i32 {
            let num = planet * 3 + slot;
            common::append(access, "flight", &flight_rec(num, planet, slot % 2));
            let ticket_count = (num % 4) + 1;
            for t in 0..ticket_count {
                common::append(
                    access,
                    "ticket",
                    &ticket_rec(num, &format!("pax{}-{}", num, t), 100.0 + num as f64),
                );
            }
        }
    }
    // Unmatched flights (no tickets reference them) and unmatched tickets (no flight
    // has that num), so the equivalence check also exercises the empty-match path.
    common::append(access, "flight", &flight_rec(9000, 1, 0));
    common::append(access, "flight", &flight_rec(9001, 2, 1));
    for n in 0..5 {
        common::append(access, "ticket", &ticket_rec(8000 + n, "ghost", 0.0));
    }
}

fn pair_key(pair: &(Vec<u8>, Vec<u8>)) -> (i32, i32) {
    (
        i32::from_le_bytes(pair.0[0..4].try_into().unwrap()),
        i32::from_le_bytes(pair.1[0..4].try_into().unwrap()),
    )
}

fn multiset(pairs: &[(Vec<u8>, Vec<u8>)]) -> HashMap<(i32, i32), u32> {
    let mut counts = HashMap::new();
    for p in pairs {
        *counts.entry(pair_key(p)).or_insert(0) += 1;
    }
    counts
}

#[test]
fn sort_merge_join_matches_nested_loop_join() {
    let cfg = common::config(70, CachePolicyKind::Clock);
    let access = common::access(&cfg);
    build_fixture(&access);

    let flight = JoinOperand::new("flight", &num_key);
    let ticket = JoinOperand::new("ticket", &num_key);
    let sort_merge_out = join::sort_merge_join(&access, &cfg, &flight, &ticket).unwrap();
    let sort_merge_pairs = sort_merge_out.pairs().to_vec();
    sort_merge_out.close(&access).unwrap();

    let flight = JoinOperand::new("flight", &num_key);
    let ticket = JoinOperand::new("ticket", &num_key);
    let nested_out = join::nested_loop_join(&access, &cfg, &flight, &ticket).unwrap();
    let nested_pairs = nested_out.pairs().to_vec();
    nested_out.close(&access).unwrap();

    assert!(!sort_merge_pairs.is_empty());
    assert_eq!(multiset(&sort_merge_pairs), multiset(&nested_pairs));
}
