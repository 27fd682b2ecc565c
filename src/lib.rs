//! In-memory multidimensional point indexes over a user-defined value type
//! and dimension count.
//!
//! Two index shapes are provided:
//!
//! - [`KDTree`]: a static, balanced K-D tree built once over a fixed point
//!   set, laid out by recursive median partition over cycling dimensions.
//! - [`BKDTree`]: a growing index that buffers inserts in a small base block
//!   and merges overflow into a binary-counter cascade of doubling
//!   [`KDTree`]s, avoiding per-point rebalancing.
//!
//! Both support exact-match lookup, axis-aligned range scans, and (when the
//! order is a [`Metric`]) nearest-neighbor queries. Duplicate points are
//! permitted; removal is not supported.
//!
//! The dimensional order is supplied at construction as a [`Comparator`] or
//! [`Metric`] capability, usually a zero-sized carrier such as
//! [`ArrayMetric`].
//!
//! ## Example
//!
//! ```
//! use kd_index::{ArrayMetric, BKDTree};
//!
//! let mut tree = BKDTree::new_with_block_size(2, ArrayMetric, 4, 1).unwrap();
//! for i in 0..10 {
//!     tree.insert([i as f64, i as f64]).unwrap();
//! }
//!
//! assert!(tree.contains(&[3.0, 3.0]));
//!
//! let (nearest, sq) = tree.nearest_neighbor(&[4.2, 4.2]).unwrap();
//! assert_eq!(nearest, &[4.0, 4.0]);
//! assert!(sq < 0.1);
//! ```

pub mod bkdtree;
pub mod error;
pub mod kdtree;
pub mod order;
mod parallel;
pub mod segment;

pub use bkdtree::{BKDTree, DEFAULT_BLOCK_SIZE, MAX_LEVELS};
pub use error::{KdIndexError, Result};
pub use kdtree::KDTree;
pub use order::{coord_order, ArrayMetric, Comparator, Metric};
pub use segment::Segment;
