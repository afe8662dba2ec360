// spec.md §8 scenario 6: an aborted write reverts to its pre-transaction bytes, visible
// to a second transaction reading the same page afterward.

mod common;

use pagebase::config::CachePolicyKind;
use pagebase::page::GetStatus;

#[test]
fn abort_reverts_the_page_before_a_later_transaction_reads_it() {
    let cfg = common::config(4, CachePolicyKind::Clock);
    let (access, manager) = common::access_with_txn_manager(&cfg);
    access.create_table("p").unwrap();
    let page_id = access.add_page("p", 1).unwrap();

    // Establish the pre-transaction state: slot 0 holds the four bytes below.
    let setup = manager.start();
    setup.with_page_mut(page_id, |p| p.put_record(&[0x00, 0x00, 0x00, 0x00], None)).unwrap();
    setup.commit().unwrap();

    // T1 overwrites slot 0, then aborts instead of committing.
    let t1 = manager.start();
    t1.with_page_mut(page_id, |p| p.put_record(&[0x2A, 0x00, 0x00, 0x00], Some(0))).unwrap();
    t1.abort().unwrap();

    // T2 sees the bytes as they were before T1's write.
    let t2 = manager.start();
    let pinned = t2.get(page_id).unwrap();
    let bytes = pinned.with_page(cfg.header_size, |p| p.get_record(0));
    assert_eq!(bytes, GetStatus::Ok(vec![0x00, 0x00, 0x00, 0x00]));
    drop(pinned);
    t2.commit().unwrap();
}
