use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bkdtree::BKDTree;
use crate::error::KdIndexError;
use crate::kdtree::KDTree;
use crate::order::ArrayMetric;

type Point = [f64; 2];

fn growing(block_size: usize) -> BKDTree<Point, ArrayMetric> {
    BKDTree::new_with_block_size(2, ArrayMetric, block_size, 1).unwrap()
}

fn diag(count: usize) -> Vec<Point> {
    (0..count).map(|i| [i as f64, i as f64]).collect()
}

fn random_points(rng: &mut StdRng, count: usize, side: u32) -> Vec<Point> {
    (0..count)
        .map(|_| [rng.gen_range(0..side) as f64, rng.gen_range(0..side) as f64])
        .collect()
}

fn sort_points(points: &mut [Point]) {
    points.sort_by(|a, b| a.partial_cmp(b).unwrap());
}

fn brute_sq(a: &Point, b: &Point) -> f64 {
    let mut acc = 0.0;
    for dim in 0..2 {
        let delta = a[dim] - b[dim];
        acc += delta * delta;
    }
    acc
}

fn stored_points(tree: &BKDTree<Point, ArrayMetric>) -> Vec<Point> {
    let mut stored: Vec<Point> = tree.get_all().into_iter().copied().collect();
    sort_points(&mut stored);
    stored
}

/// Check that the level occupancy accounts for every inserted point, and
/// (when the base block is not at capacity, where the binary-counter form is
/// exact) that level `i` is occupied iff bit `i` of `count / block_size` is
/// set.
fn check_count_law(tree: &BKDTree<Point, ArrayMetric>) {
    let mut level_total = 0;
    for (level, size) in tree.level_sizes().into_iter().enumerate() {
        if let Some(size) = size {
            assert_eq!(size, tree.block_size() << level, "level holds a doubling count");
            level_total += size;
        }
    }
    assert_eq!(tree.len(), tree.base_len() + level_total);

    if tree.base_len() < tree.block_size() {
        let bits = tree.len() / tree.block_size();
        for (level, size) in tree.level_sizes().into_iter().enumerate() {
            assert_eq!(bits & (1 << level) != 0, size.is_some(), "level {level} occupancy");
        }
    }
}

#[test]
fn carries_like_a_binary_counter() {
    let mut tree = growing(2);

    tree.insert([0., 0.]).unwrap();
    assert_eq!(tree.base_len(), 1);
    assert_eq!(tree.level_sizes(), Vec::<Option<usize>>::new());

    tree.insert([1., 1.]).unwrap();
    assert_eq!(tree.base_len(), 2);
    assert_eq!(tree.level_sizes(), Vec::<Option<usize>>::new());

    tree.insert([2., 2.]).unwrap();
    assert_eq!(tree.base_len(), 1);
    assert_eq!(tree.level_sizes(), vec![Some(2)]);

    tree.insert([3., 3.]).unwrap();
    assert_eq!(tree.base_len(), 2);
    assert_eq!(tree.level_sizes(), vec![Some(2)]);

    tree.insert([4., 4.]).unwrap();
    assert_eq!(tree.base_len(), 1);
    assert_eq!(tree.level_sizes(), vec![None, Some(4)]);

    assert_eq!(tree.len(), 5);
    for i in 0..5 {
        assert!(tree.contains(&[i as f64, i as f64]));
    }
}

#[test]
fn count_law_under_single_inserts() {
    let mut tree = growing(3);
    for (i, point) in diag(100).into_iter().enumerate() {
        tree.insert(point).unwrap();
        assert_eq!(tree.len(), i + 1);
        check_count_law(&tree);
    }
    assert_eq!(stored_points(&tree), diag(100));
}

#[test]
fn duplicate_inserts_accumulate() {
    let mut tree = growing(2);
    for _ in 0..7 {
        tree.insert([3., 3.]).unwrap();
    }
    assert_eq!(tree.get(&[3., 3.]).len(), 7);
    assert!(tree.contains(&[3., 3.]));
    assert!(!tree.contains(&[3., 4.]));
}

#[test]
fn matches_static_tree_answers() {
    let mut rng = StdRng::seed_from_u64(21);
    let points = random_points(&mut rng, 500, 24);

    let mut grown = growing(4);
    for point in points.clone() {
        grown.insert(point).unwrap();
    }
    let fixed = KDTree::new(2, points, ArrayMetric, 1).unwrap();

    for x in 0..24 {
        for y in 0..24 {
            let query = [x as f64, y as f64];
            assert_eq!(grown.contains(&query), fixed.contains(&query));
            assert_eq!(grown.get(&query).len(), fixed.get(&query).len());
        }
    }

    for _ in 0..30 {
        let lower = [rng.gen_range(0..24) as f64, rng.gen_range(0..24) as f64];
        let upper = [
            lower[0] + rng.gen_range(0..10) as f64,
            lower[1] + rng.gen_range(0..10) as f64,
        ];
        let mut from_grown = Vec::new();
        grown.range_for_each(Some(&lower), Some(&upper), true, |point| {
            from_grown.push(*point);
            false
        });
        let mut from_fixed = Vec::new();
        fixed.range_for_each(Some(&lower), Some(&upper), true, |point| {
            from_fixed.push(*point);
            false
        });
        sort_points(&mut from_grown);
        sort_points(&mut from_fixed);
        assert_eq!(from_grown, from_fixed);

        let query = [rng.gen_range(0..24) as f64, rng.gen_range(0..24) as f64];
        let (_, grown_sq) = grown.nearest_neighbor(&query).unwrap();
        let (_, fixed_sq) = fixed.nearest_neighbor(&query).unwrap();
        assert_eq!(grown_sq, fixed_sq);
    }
}

#[test]
fn bulk_insert_matches_single_inserts() {
    let mut rng = StdRng::seed_from_u64(33);
    for &count in &[9usize, 17, 33, 100] {
        let points = random_points(&mut rng, count, 10);

        let mut bulk = growing(4);
        bulk.insert_many(points.clone()).unwrap();
        let mut single = growing(4);
        for point in points {
            single.insert(point).unwrap();
        }

        assert_eq!(bulk.len(), single.len());
        check_count_law(&bulk);
        check_count_law(&single);
        assert_eq!(stored_points(&bulk), stored_points(&single));

        let query = [5., 5.];
        assert_eq!(bulk.contains(&query), single.contains(&query));
        assert_eq!(bulk.get(&query).len(), single.get(&query).len());
        let bulk_nearest = bulk.nearest_neighbor(&[4.5, 4.5]).unwrap().1;
        let single_nearest = single.nearest_neighbor(&[4.5, 4.5]).unwrap().1;
        assert_eq!(bulk_nearest, single_nearest);
    }
}

#[test]
fn small_batches_use_single_inserts() {
    let mut tree = growing(4);
    tree.insert_many(diag(8)).unwrap();
    assert_eq!(tree.len(), 8);
    check_count_law(&tree);
    assert_eq!(stored_points(&tree), diag(8));

    tree.insert_many(Vec::new()).unwrap();
    assert_eq!(tree.len(), 8);
}

#[test]
fn bulk_insert_folds_an_exactly_filled_cascade() {
    let mut tree = growing(2);
    for point in diag(9) {
        tree.insert(point).unwrap();
    }
    assert_eq!(tree.base_len(), 1);
    assert_eq!(tree.level_sizes(), vec![None, None, Some(8)]);

    // the pending total is exactly block_size * 2^2, so the occupied level 2
    // must fold into the rebuild instead of being overwritten
    tree.insert_many((9..16).map(|i| [i as f64, i as f64]).collect())
        .unwrap();
    assert_eq!(tree.len(), 16);
    check_count_law(&tree);
    assert_eq!(tree.base_len(), 0);
    assert_eq!(tree.level_sizes(), vec![None, None, None, Some(16)]);
    assert_eq!(stored_points(&tree), diag(16));
}

#[test]
fn mixed_bulk_and_single_inserts() {
    let mut rng = StdRng::seed_from_u64(55);
    let mut tree = growing(3);
    let mut inserted = Vec::new();

    for round in 0..10 {
        if round % 2 == 0 {
            let batch = random_points(&mut rng, 20, 12);
            inserted.extend_from_slice(&batch);
            tree.insert_many(batch).unwrap();
        } else {
            for point in random_points(&mut rng, 3, 12) {
                inserted.push(point);
                tree.insert(point).unwrap();
            }
        }
        assert_eq!(tree.len(), inserted.len());
        check_count_law(&tree);
    }

    sort_points(&mut inserted);
    assert_eq!(stored_points(&tree), inserted);
}

#[test]
fn cancellation_stops_fanout() {
    let mut tree = growing(2);
    for point in diag(20) {
        tree.insert(point).unwrap();
    }

    let mut calls = 0;
    let cancelled = tree.for_each(|_| {
        calls += 1;
        true
    });
    assert!(cancelled);
    assert_eq!(calls, 1);

    let mut calls = 0;
    assert!(!tree.for_each(|_| {
        calls += 1;
        false
    }));
    assert_eq!(calls, 20);

    let mut calls = 0;
    let cancelled = tree.range_for_each(None, None, true, |_| {
        calls += 1;
        calls == 5
    });
    assert!(cancelled);
    assert_eq!(calls, 5);
}

#[test]
fn inverted_bounds_scan_nothing() {
    let mut tree = growing(2);
    for point in diag(20) {
        tree.insert(point).unwrap();
    }
    let mut calls = 0;
    let cancelled = tree.range_for_each(Some(&[9., 9.]), Some(&[1., 1.]), true, |_| {
        calls += 1;
        false
    });
    assert!(!cancelled);
    assert_eq!(calls, 0);
}

#[test]
fn first_match_spans_base_and_levels() {
    let mut tree = growing(2);
    for point in diag(11) {
        tree.insert(point).unwrap();
    }
    let first = tree
        .try_get_first(Some(&[4., 4.]), Some(&[6., 6.]), true)
        .unwrap();
    assert!(first[0] >= 4. && first[0] <= 6.);
    assert!(tree
        .try_get_first(Some(&[40., 40.]), Some(&[60., 60.]), true)
        .is_none());
}

#[test]
fn nearest_neighbor_threads_through_levels() {
    let mut rng = StdRng::seed_from_u64(77);
    let points = random_points(&mut rng, 300, 50);
    let mut tree = growing(4);
    for point in points.clone() {
        tree.insert(point).unwrap();
    }

    for _ in 0..50 {
        let query = [rng.gen_range(0..50) as f64, rng.gen_range(0..50) as f64];
        let (nearest, sq) = tree.nearest_neighbor(&query).unwrap();
        let expected = points
            .iter()
            .map(|point| brute_sq(point, &query))
            .fold(f64::INFINITY, f64::min);
        assert_eq!(sq, expected);
        assert_eq!(sq, brute_sq(nearest, &query));
    }

    let exact = points[0];
    assert_eq!(tree.nearest_neighbor(&exact).unwrap().1, 0.0);
}

#[test]
fn empty_tree_answers() {
    let tree = growing(4);
    assert!(tree.is_empty());
    assert!(!tree.contains(&[0., 0.]));
    assert!(tree.get(&[0., 0.]).is_empty());
    assert!(tree.nearest_neighbor(&[0., 0.]).is_none());
    assert!(tree.try_get_first(None, None, true).is_none());
    assert!(!tree.for_each(|_| true));
}

#[test]
fn rejects_bad_configuration() {
    assert!(matches!(
        BKDTree::<Point, _>::new_with_block_size(2, ArrayMetric, 1, 1),
        Err(KdIndexError::InvalidArgument(_))
    ));
    assert!(matches!(
        BKDTree::<Point, _>::new_with_block_size(0, ArrayMetric, 4, 1),
        Err(KdIndexError::InvalidArgument(_))
    ));
}

proptest! {
    #[test]
    fn bulk_insert_preserves_the_stored_multiset(
        block_size in 2usize..6,
        seed in prop::collection::vec((0u8..12, 0u8..12), 0..20),
        batch in prop::collection::vec((0u8..12, 0u8..12), 5..48),
    ) {
        let to_point = |&(x, y): &(u8, u8)| [x as f64, y as f64];

        let mut tree = BKDTree::new_with_block_size(2, ArrayMetric, block_size, 1).unwrap();
        for point in seed.iter().map(to_point) {
            tree.insert(point).unwrap();
        }
        tree.insert_many(batch.iter().map(to_point).collect()).unwrap();

        prop_assert_eq!(tree.len(), seed.len() + batch.len());
        check_count_law(&tree);

        let mut expected: Vec<Point> = seed.iter().chain(&batch).map(to_point).collect();
        sort_points(&mut expected);
        prop_assert_eq!(stored_points(&tree), expected.clone());

        let lower = [3., 3.];
        let upper = [9., 9.];
        let mut found = Vec::new();
        tree.range_for_each(Some(&lower), Some(&upper), true, |point| {
            found.push(*point);
            false
        });
        sort_points(&mut found);
        let brute: Vec<Point> = expected
            .into_iter()
            .filter(|point| (0..2).all(|dim| point[dim] >= lower[dim] && point[dim] <= upper[dim]))
            .collect();
        prop_assert_eq!(found, brute);
    }
}
