//! # Property-Based Tests
//!
//! Determinism and isolation invariants checked with proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use quadfs_core::storage::{BlobStore, MemoryBlobStore};
use quadfs_core::{
    AccessLevel, ChangeSink, CommitContext, Dataset, PermissionFilteredGraph, PermissionIndex,
    Principal, Quad, QuadPattern, QuadSet, QuadStore, Store, Term, TransactionHeader,
    TransactionLog, canonical_checksum,
};
use std::sync::Arc;
use std::time::Duration;

fn quad(s: u8, o: u8) -> Quad {
    Quad::new(
        Term::iri(format!("urn:s{}", s)),
        Term::iri("urn:p"),
        Term::literal(o.to_string()),
    )
}

fn header() -> TransactionHeader {
    TransactionHeader::now("", "prop", "u", "User")
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Any byte payload reads back intact, and every sub-range matches.
    #[test]
    fn blob_bytes_and_ranges_roundtrip(
        data in vec(any::<u8>(), 0..4096),
        a in 0usize..5000,
        b in 0usize..5000,
    ) {
        let store = MemoryBlobStore::new();
        let info = store.write(&mut data.as_slice()).expect("write");
        prop_assert_eq!(info.size, data.len() as u64);

        let mut whole = Vec::new();
        store.read(&info.id, &mut whole, 0, None).expect("read");
        prop_assert_eq!(&whole, &data);

        let (start, end) = (a.min(b), a.max(b));
        let mut part = Vec::new();
        store.read(&info.id, &mut part, start as u64, Some(end as u64)).expect("range");
        let lo = start.min(data.len());
        let hi = end.min(data.len());
        prop_assert_eq!(part.as_slice(), &data[lo..hi]);
    }

    /// Replaying the log always rebuilds exactly the committed graph.
    #[test]
    fn log_replay_rebuilds_committed_state(
        batches in vec(vec((any::<bool>(), 0u8..8, 0u8..4), 1..10), 1..8),
        aborted in vec(any::<bool>(), 8),
    ) {
        let log = Arc::new(TransactionLog::in_memory().expect("log"));
        let dataset = Dataset::open(Arc::clone(&log), Duration::from_secs(1)).expect("open");

        for (i, batch) in batches.iter().enumerate() {
            let mut txn = dataset.begin_write(header()).expect("begin");
            for &(add, s, o) in batch {
                if add {
                    txn.add(quad(s, o)).expect("add");
                } else {
                    txn.delete(&quad(s, o)).expect("delete");
                }
            }
            if aborted.get(i).copied().unwrap_or(false) {
                txn.abort().expect("abort");
            } else {
                txn.commit().expect("commit");
            }
        }

        let mut replayed = QuadSet::new();
        log.replay(&mut ChangeSink::apply(&mut replayed)).expect("replay");
        let live = dataset.begin_read();
        prop_assert_eq!(
            canonical_checksum(&replayed).expect("checksum"),
            canonical_checksum(&live).expect("checksum")
        );
        prop_assert_eq!(replayed.len(), live.len());
    }

    /// A principal never observes a quad whose subject it cannot read.
    #[test]
    fn filtered_reads_never_leak(
        subjects in vec(0u8..8, 1..30),
        grants in vec((0u8..8, 0usize..5), 0..8),
    ) {
        let log = Arc::new(TransactionLog::in_memory().expect("log"));
        let dataset = Arc::new(Dataset::open(log, Duration::from_secs(1)).expect("open"));
        let permissions = Arc::new(PermissionIndex::in_memory().expect("permissions"));
        let graph = PermissionFilteredGraph::new(dataset, Arc::clone(&permissions));

        let ctx = CommitContext::new(Principal::admin("root", "Root"));
        let mut txn = graph.begin_write(&ctx, "seed").expect("begin");
        for (i, s) in subjects.iter().enumerate() {
            txn.add(quad(*s, (i % 4) as u8)).expect("add");
        }
        txn.commit().expect("commit");

        for (s, level) in &grants {
            permissions
                .grant("alice", &format!("urn:s{}", s), AccessLevel::ALL[*level])
                .expect("grant");
        }

        let alice = Principal::new("alice", "Alice");
        let read = graph.begin_read(&alice);
        for q in read.find(&QuadPattern::any()) {
            let subject = q.subject.as_iri().expect("iri subject");
            prop_assert!(permissions.resolve("alice", subject).can_read());
        }
        prop_assert_eq!(read.len(), read.find(&QuadPattern::any()).len());
    }

    /// Resolved access is monotone down the containment chain.
    #[test]
    fn inherited_access_never_shrinks(depth in 1usize..10, level in 0usize..5, at in 0usize..10) {
        let permissions = PermissionIndex::in_memory().expect("permissions");
        for i in 1..=depth {
            permissions.attach(&format!("urn:n{}", i), &format!("urn:n{}", i - 1));
        }
        let at = at.min(depth);
        permissions
            .grant("bob", &format!("urn:n{}", at), AccessLevel::ALL[level])
            .expect("grant");

        let mut previous = AccessLevel::None;
        for i in 0..=depth {
            let resolved = permissions.resolve("bob", &format!("urn:n{}", i));
            prop_assert!(resolved >= previous);
            previous = resolved;
        }
    }

    /// Arbitrary names either round-trip through the filesystem or are
    /// rejected as invalid; never anything else.
    #[test]
    fn filesystem_names(name in "[a-zA-Z0-9 ._-]{1,20}") {
        let store = Store::in_memory().expect("open");
        let ctx = CommitContext::new(Principal::admin("root", "Root"));
        let path = format!("/{}", name);
        match store.vfs().mkdir(&ctx, &path) {
            Ok(info) => {
                prop_assert!(info.is_directory);
                let listed = store.vfs().list(&ctx.principal, "/").expect("list");
                prop_assert_eq!(listed.len(), 1);
            }
            Err(e) => prop_assert!(matches!(e, quadfs_core::QuadFsError::InvalidArgument(_))),
        }
    }
}
