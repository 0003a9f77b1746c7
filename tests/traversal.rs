// Copyright 2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rand::{seq::SliceRandom, Rng};
use weave::{
    dag::{
        cone_root_indexes, update_outdated_cone_root_indexes, AbortSignal, ChildrenTraverser, ChildrenVisitor,
        ConcurrentParentsTraverser, ConcurrentParentsVisitor, ParentsTraverser, ParentsVisitor, TraversalError,
        TraverserStorage,
    },
    db::StorageError,
    storage::{CachedMetadata, Storage},
    types::{block::BlockId, tangle::MilestoneIndex},
};

use self::common::{block, random_block_id, TestTangle};

/// Counts metadata lookups.
struct CountingStorage<'a> {
    inner: &'a Storage,
    lookups: AtomicUsize,
}

impl<'a> CountingStorage<'a> {
    fn new(inner: &'a Storage) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl<'a> TraverserStorage for CountingStorage<'a> {
    fn cached_block_metadata(&self, block_id: &BlockId) -> Result<Option<CachedMetadata>, StorageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.cached_block_metadata(block_id)
    }

    fn solid_entry_points_contain(&self, block_id: &BlockId) -> bool {
        self.inner.solid_entry_points_contain(block_id)
    }

    fn solid_entry_point_index(&self, block_id: &BlockId) -> Option<MilestoneIndex> {
        self.inner.solid_entry_point_index(block_id)
    }

    fn child_block_ids(&self, block_id: &BlockId) -> Result<Vec<BlockId>, StorageError> {
        self.inner.child_block_ids(block_id)
    }
}

#[derive(Default)]
struct Recorder {
    consumed: Vec<BlockId>,
    missing: Vec<BlockId>,
}

impl ParentsVisitor for Recorder {
    type Error = TraversalError;

    fn condition(&mut self, _metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        self.consumed.push(metadata.block_id());
        Ok(())
    }

    fn on_missing_parent(&mut self, block_id: &BlockId) -> Result<(), Self::Error> {
        self.missing.push(*block_id);
        Ok(())
    }
}

fn position(order: &[BlockId], block_id: &BlockId) -> usize {
    order.iter().position(|id| id == block_id).unwrap()
}

#[test]
fn diamond_is_consumed_once_after_both_paths() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let a = test.store(block(&[entry_point]));
    let b = test.store(block(&[a]));
    let c = test.store(block(&[a]));
    let d = test.store(block(&[b, c]));

    let mut recorder = Recorder::default();
    ParentsTraverser::new(test.storage())
        .traverse(&[d], false, &mut recorder, &AbortSignal::new())
        .unwrap();

    let order = recorder.consumed;
    assert_eq!(order.len(), 4);
    assert_eq!(order.iter().collect::<HashSet<_>>().len(), 4);
    assert!(position(&order, &a) < position(&order, &b));
    assert!(position(&order, &a) < position(&order, &c));
    assert!(position(&order, &b) < position(&order, &d));
    assert!(position(&order, &c) < position(&order, &d));
}

#[test]
fn missing_parents_are_reported() {
    let test = TestTangle::new(&[]);
    let missing = random_block_id();
    let a = test.store(block(&[missing]));

    let mut recorder = Recorder::default();
    ParentsTraverser::new(test.storage())
        .traverse_parents_of_block(&a, false, &mut recorder, &AbortSignal::new())
        .unwrap();
    assert_eq!(recorder.missing, vec![missing]);
    assert!(recorder.consumed.is_empty());

    struct Strict;
    impl ParentsVisitor for Strict {
        type Error = TraversalError;

        fn condition(&mut self, _metadata: &CachedMetadata) -> Result<bool, Self::Error> {
            Ok(true)
        }
    }
    let err = ParentsTraverser::new(test.storage())
        .traverse(&[a], false, &mut Strict, &AbortSignal::new())
        .unwrap_err();
    assert!(matches!(err, TraversalError::BlockNotFound(id) if id == missing));
}

#[test]
fn future_cone_is_walked_breadth_first() {
    struct Collect(Vec<BlockId>);
    impl ChildrenVisitor for Collect {
        type Error = TraversalError;

        fn condition(&mut self, _metadata: &CachedMetadata) -> Result<bool, Self::Error> {
            Ok(true)
        }

        fn consume(&mut self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
            self.0.push(metadata.block_id());
            Ok(())
        }
    }

    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let a = test.store(block(&[entry_point]));
    let b = test.store(block(&[a]));
    let c = test.store(block(&[a]));
    let d = test.store(block(&[b, c]));

    let mut collect = Collect(Vec::new());
    ChildrenTraverser::new(test.storage())
        .traverse(&a, false, &mut collect, &AbortSignal::new())
        .unwrap();
    let order = collect.0;
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], a);
    assert_eq!(order[3], d);

    let mut collect = Collect(Vec::new());
    ChildrenTraverser::new(test.storage())
        .traverse_children_of_block(&a, false, &mut collect, &AbortSignal::new())
        .unwrap();
    assert_eq!(collect.0.len(), 3);
    assert!(!collect.0.contains(&a));
}

/// Confirms `x` with milestone 1 and returns a chain of unreferenced blocks on top of it, oldest first.
fn confirmed_chain(test: &TestTangle, entry_point: BlockId, len: usize) -> Vec<BlockId> {
    let x = test.store(block(&[entry_point]));
    test.confirm(1, &[x]);

    let mut chain = Vec::with_capacity(len);
    let mut tip = x;
    for _ in 0..len {
        tip = test.store(block(&[tip]));
        chain.push(tip);
    }
    chain
}

#[test]
fn cone_root_indexes_are_memoized_per_cmi() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let chain = confirmed_chain(&test, entry_point, 3);
    let storage = CountingStorage::new(test.storage());
    let newest = test.metadata(&chain[2]);

    let first = cone_root_indexes(&storage, &newest, MilestoneIndex(1), &AbortSignal::new()).unwrap();
    assert_eq!(first, (MilestoneIndex(1), MilestoneIndex(1)));
    let lookups = storage.lookups();
    assert!(lookups > 0);

    let second = cone_root_indexes(&storage, &newest, MilestoneIndex(1), &AbortSignal::new()).unwrap();
    assert_eq!(second, first);
    assert_eq!(storage.lookups(), lookups);

    // Every block on the way got memoized as well.
    for block_id in &chain {
        assert_eq!(test.metadata(block_id).cone_root_indexes().calculation_index, MilestoneIndex(1));
    }
}

#[test]
fn oldest_first_update_is_linear() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let chain = confirmed_chain(&test, entry_point, 3);

    // A new generation invalidates all memoized values.
    let storage = CountingStorage::new(test.storage());
    update_outdated_cone_root_indexes(&storage, &chain, MilestoneIndex(2), &AbortSignal::new()).unwrap();
    // One lookup for the block itself and one for its single parent, which is already up to date.
    assert_eq!(storage.lookups(), 2 * chain.len());

    let newest_first = chain.iter().rev().copied().collect::<Vec<_>>();
    let storage = CountingStorage::new(test.storage());
    update_outdated_cone_root_indexes(&storage, &newest_first, MilestoneIndex(3), &AbortSignal::new()).unwrap();
    assert!(storage.lookups() > 2 * chain.len());

    for block_id in &chain {
        let indexes = test.metadata(block_id).cone_root_indexes();
        assert_eq!(indexes.calculation_index, MilestoneIndex(3));
        assert_eq!((indexes.youngest, indexes.oldest), (MilestoneIndex(1), MilestoneIndex(1)));
    }
}

#[test]
fn missing_ancestor_invalidates_cone_root_indexes() {
    let test = TestTangle::new(&[]);
    let a = test.store(block(&[random_block_id()]));
    let b = test.store(block(&[a]));
    let metadata = test.metadata(&b);
    assert_eq!(
        cone_root_indexes(test.storage(), &metadata, MilestoneIndex(4), &AbortSignal::new()).unwrap(),
        (MilestoneIndex(0), MilestoneIndex(0))
    );
    assert_ne!(metadata.cone_root_indexes().calculation_index, MilestoneIndex(4));
}

#[test]
fn cone_root_indexes_stop_at_the_first_gap() {
    let test = TestTangle::new(&[]);
    let mut chain = vec![test.store(block(&[random_block_id()]))];
    for _ in 0..63 {
        let parent = *chain.last().unwrap();
        chain.push(test.store(block(&[parent])));
    }

    let storage = CountingStorage::new(test.storage());
    let abort = AbortSignal::new();
    for (walked, block_id) in chain.iter().enumerate() {
        let before = storage.lookups();
        let metadata = test.metadata(block_id);
        assert_eq!(
            cone_root_indexes(&storage, &metadata, MilestoneIndex(1), &abort).unwrap(),
            (MilestoneIndex(0), MilestoneIndex(0))
        );
        // Every block below once, plus the missing one.
        assert_eq!(storage.lookups() - before, walked + 1);
    }
    for block_id in &chain {
        assert_ne!(test.metadata(block_id).cone_root_indexes().calculation_index, MilestoneIndex(1));
    }
}

struct ConcurrentRecorder {
    consumed: Mutex<Vec<BlockId>>,
    entry_points: AtomicUsize,
}

impl ConcurrentParentsVisitor for ConcurrentRecorder {
    type Error = TraversalError;

    fn condition(&self, _metadata: &CachedMetadata) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn consume(&self, metadata: &CachedMetadata) -> Result<(), Self::Error> {
        self.consumed.lock().push(metadata.block_id());
        Ok(())
    }

    fn on_solid_entry_point(&self, _block_id: &BlockId) -> Result<(), Self::Error> {
        self.entry_points.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn concurrent_traversal_visits_every_block_once() {
    let mut rng = rand::thread_rng();
    let entry_points = (0..3).map(|_| random_block_id()).collect::<Vec<_>>();
    let test = TestTangle::new(&entry_points);

    let mut blocks = entry_points.clone();
    for _ in 0..300 {
        let count = rng.gen_range(1..=4);
        let parents = blocks.choose_multiple(&mut rng, count).copied().collect::<Vec<_>>();
        blocks.push(test.store(block(&parents)));
    }
    let tips = blocks[blocks.len() - 8..].to_vec();

    // The sequential traversal serves as reference.
    let mut reference = Recorder::default();
    ParentsTraverser::new(test.storage())
        .traverse(&tips, false, &mut reference, &AbortSignal::new())
        .unwrap();

    let recorder = ConcurrentRecorder {
        consumed: Mutex::new(Vec::new()),
        entry_points: AtomicUsize::new(0),
    };
    ConcurrentParentsTraverser::new(test.storage(), 4)
        .traverse(&tips, false, &recorder, &AbortSignal::new())
        .unwrap();

    let consumed = recorder.consumed.into_inner();
    let unique = consumed.iter().copied().collect::<HashSet<_>>();
    assert_eq!(consumed.len(), unique.len());
    assert_eq!(unique, reference.consumed.into_iter().collect::<HashSet<_>>());
    assert!(recorder.entry_points.load(Ordering::SeqCst) <= entry_points.len());
}

#[test]
fn concurrent_traversal_stops_on_error() {
    let test = TestTangle::new(&[]);
    let missing = random_block_id();
    let mut tip = test.store(block(&[missing]));
    for _ in 0..50 {
        tip = test.store(block(&[tip]));
    }
    let recorder = ConcurrentRecorder {
        consumed: Mutex::new(Vec::new()),
        entry_points: AtomicUsize::new(0),
    };
    let err = ConcurrentParentsTraverser::new(test.storage(), 4)
        .traverse(&[tip], false, &recorder, &AbortSignal::new())
        .unwrap_err();
    assert!(matches!(err, TraversalError::BlockNotFound(id) if id == missing));

    let abort = AbortSignal::new();
    abort.abort();
    let err = ConcurrentParentsTraverser::new(test.storage(), 2)
        .traverse(&[tip], false, &recorder, &abort)
        .unwrap_err();
    assert!(matches!(err, TraversalError::Aborted));
}

#[test]
fn concurrent_traversal_surfaces_visitor_panics() {
    struct PanicAfter(AtomicUsize);
    impl ConcurrentParentsVisitor for PanicAfter {
        type Error = TraversalError;

        fn condition(&self, _metadata: &CachedMetadata) -> Result<bool, Self::Error> {
            if self.0.fetch_sub(1, Ordering::SeqCst) == 1 {
                panic!("visitor failed");
            }
            Ok(true)
        }
    }

    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let mut blocks = vec![entry_point];
    for _ in 0..100 {
        let parents = blocks.iter().rev().take(2).copied().collect::<Vec<_>>();
        blocks.push(test.store(block(&parents)));
    }
    let tip = *blocks.last().unwrap();

    let traverser = ConcurrentParentsTraverser::new(test.storage(), 4);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        traverser.traverse(&[tip], false, &PanicAfter(AtomicUsize::new(10)), &AbortSignal::new())
    }));
    assert!(result.is_err());

    // The traverser is usable again afterwards.
    let recorder = ConcurrentRecorder {
        consumed: Mutex::new(Vec::new()),
        entry_points: AtomicUsize::new(0),
    };
    traverser.traverse(&[tip], false, &recorder, &AbortSignal::new()).unwrap();
    assert_eq!(recorder.consumed.lock().len(), 100);
}

#[test]
fn traversals_release_every_handle() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let a = test.store(block(&[entry_point]));
    let b = test.store(block(&[a]));
    let c = test.store(block(&[a, b]));

    let before = test.storage().live_handles();
    let mut recorder = Recorder::default();
    ParentsTraverser::new(test.storage())
        .traverse(&[c], false, &mut recorder, &AbortSignal::new())
        .unwrap();
    let abort = AbortSignal::new();
    abort.abort();
    ParentsTraverser::new(test.storage())
        .traverse(&[c], false, &mut recorder, &abort)
        .unwrap_err();
    assert_eq!(test.storage().live_handles(), before);
}

#[test]
fn solid_entry_points_are_the_border_of_the_pruned_tangle() {
    let entry_point = random_block_id();
    let test = TestTangle::new(&[entry_point]);
    let x = test.store(block(&[entry_point]));
    test.confirm(1, &[x]);
    let y = test.store(block(&[x]));
    test.confirm(2, &[y]);

    let entry_points = test
        .tangle
        .compute_solid_entry_points(MilestoneIndex(1), &AbortSignal::new())
        .unwrap();
    assert_eq!(entry_points.sorted(), vec![(x, MilestoneIndex(1))]);

    let entry_points = test
        .tangle
        .compute_solid_entry_points(MilestoneIndex(2), &AbortSignal::new())
        .unwrap();
    assert!(entry_points.is_empty());

    let err = test
        .tangle
        .compute_solid_entry_points(MilestoneIndex(3), &AbortSignal::new())
        .unwrap_err();
    assert!(err.is_critical());
}
