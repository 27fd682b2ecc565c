//! A growing index composed of doubling K-D trees behind a small mutable
//! base block.
//!
//! ## Creation & insertion
//!
//! Use [`BKDTree::new`] (default block size) or
//! [`BKDTree::new_with_block_size`], then [`BKDTree::insert`] /
//! [`BKDTree::insert_many`]. Inserts land in the base block; when it
//! overflows, a binary-counter carry merges the block and the consumed levels
//! into one new [`KDTree`][crate::kdtree::KDTree] of exactly
//! `block_size * 2^level` points. Removal is not supported.
//!
//! ## Search
//!
//! All read operations mirror the static tree: the base block is scanned
//! first, then every occupied level in index order. Cancellation from a
//! callback short-circuits the fan-out, and nearest-neighbor search threads
//! its best-so-far through the levels so later trees prune against the
//! global bound.
//!
//! ## Example
//!
//! ```
//! use kd_index::bkdtree::BKDTree;
//! use kd_index::order::ArrayMetric;
//!
//! let mut tree = BKDTree::new(2, ArrayMetric).unwrap();
//! tree.insert_many((0..300).map(|i| [i as f64, (i % 7) as f64]).collect()).unwrap();
//! assert_eq!(tree.len(), 300);
//!
//! let mut hits = 0;
//! tree.range_for_each(Some(&[10.0, 0.0]), Some(&[20.0, 6.0]), true, |_| {
//!     hits += 1;
//!     false
//! });
//! assert_eq!(hits, 11);
//! ```

mod index;

pub use index::{BKDTree, DEFAULT_BLOCK_SIZE, MAX_LEVELS};

#[cfg(test)]
mod test;
