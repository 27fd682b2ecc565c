//! An immutable, balanced K-D tree over points of a user-defined type.
//!
//! ## Creation
//!
//! Use [`KDTree::new`] to build a tree from a value collection, or
//! [`KDTree::from_segments`] to build one from windows over several backing
//! slices. Trees are constructed once and never modified afterwards; for an
//! index that grows, see [`BKDTree`][crate::bkdtree::BKDTree].
//!
//! ## Search
//!
//! Use [`KDTree::contains`] / [`KDTree::get`] for exact-match lookup,
//! [`KDTree::range_for_each`] for axis-aligned range scans, and
//! [`KDTree::nearest_neighbor`] (available when the order is a
//! [`Metric`][crate::order::Metric]) for nearest-neighbor queries.
//!
//! Traversal callbacks return `false` to continue and `true` to cancel.
//!
//! ## Duplicates
//!
//! Duplicate points are permitted and reported with multiplicity. Note that
//! float `NaN` coordinates are not supported.
//!
//! ## Example
//!
//! ```
//! use kd_index::kdtree::KDTree;
//! use kd_index::order::ArrayMetric;
//!
//! let points = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
//! let tree = KDTree::new(2, points, ArrayMetric, 1).unwrap();
//!
//! assert!(tree.contains(&[1.0, 1.0]));
//! assert!(!tree.contains(&[1.0, 2.0]));
//!
//! let mut in_range = Vec::new();
//! tree.range_for_each(Some(&[0.5, 0.5]), Some(&[2.5, 2.5]), true, |point| {
//!     in_range.push(*point);
//!     false
//! });
//! assert_eq!(in_range, vec![[1.0, 1.0], [2.0, 2.0]]);
//! ```

mod build;
mod index;

pub use index::KDTree;
