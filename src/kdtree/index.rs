use std::cmp::Ordering;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tinyvec::TinyVec;

use crate::error::{KdIndexError, Result};
use crate::kdtree::build::build_range;
use crate::order::{all_dims_equal, bounds_inverted, sq_dist, within_bounds, Comparator, Metric};
use crate::parallel::{clamp_max_threads, WorkerBudget};
use crate::segment::Segment;

/// A static, balanced K-D tree over `N` points of `T`.
///
/// The tree is a single array laid out by recursive median partition over
/// cycling dimensions, with a parallel array of dirty flags marking pivots
/// whose duplicates were pushed into the left half. It supports exact-match
/// lookup, axis-aligned range scans, and (under a
/// [`Metric`][crate::order::Metric] order) nearest-neighbor search.
///
/// Trees are immutable after construction; concurrent reads are safe.
#[derive(Debug, Clone)]
pub struct KDTree<T, C: Comparator<T>> {
    values: Vec<T>,
    dirties: Vec<bool>,
    num_dims: usize,
    comparator: C,
}

impl<T, C: Comparator<T>> KDTree<T, C> {
    /// Build a tree over `values` with `num_dims` dimensions.
    ///
    /// `max_threads` caps the worker count of the parallel build; it is
    /// clamped to `[1, available_parallelism]`, so pass `1` for a sequential
    /// build or `usize::MAX` for every hardware thread.
    ///
    /// ## Errors
    ///
    /// - If `num_dims` is zero.
    /// - If `values` is empty.
    pub fn new(num_dims: usize, values: Vec<T>, comparator: C, max_threads: usize) -> Result<Self>
    where
        T: Send,
        C: Sync,
    {
        validate_shape(num_dims, values.len())?;
        Ok(Self::build(num_dims, values, comparator, clamp_max_threads(max_threads)))
    }

    /// Build a tree over the concatenation of `segments`, in order.
    ///
    /// With more than one segment and `max_threads > 1`, the per-segment
    /// copies run concurrently; they write disjoint ranges of the new array.
    ///
    /// ## Errors
    ///
    /// - If `num_dims` is zero.
    /// - If the segments hold no values in total.
    pub fn from_segments(
        num_dims: usize,
        segments: &[Segment<'_, T>],
        comparator: C,
        max_threads: usize,
    ) -> Result<Self>
    where
        T: Clone + Send + Sync,
        C: Sync,
    {
        let total = segments.iter().map(Segment::len).sum();
        validate_shape(num_dims, total)?;
        let max_threads = clamp_max_threads(max_threads);

        let values: Vec<T> = if segments.len() > 1 && max_threads > 1 {
            segments
                .par_iter()
                .flat_map_iter(|segment| segment.as_slice().iter().cloned())
                .collect()
        } else {
            let mut values = Vec::with_capacity(total);
            for segment in segments {
                values.extend_from_slice(segment.as_slice());
            }
            values
        };

        Ok(Self::build(num_dims, values, comparator, max_threads))
    }

    fn build(num_dims: usize, mut values: Vec<T>, comparator: C, max_threads: usize) -> Self
    where
        T: Send,
        C: Sync,
    {
        let mut dirties = vec![false; values.len()];
        let budget = WorkerBudget::new(max_threads);
        build_range(&mut values, &mut dirties, 0, num_dims, &comparator, &budget);
        Self {
            values,
            dirties,
            num_dims,
            comparator,
        }
    }

    /// The number of points in the tree.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the tree is empty. Construction rejects empty input, so this
    /// is always `false`.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The number of dimensions the tree was built with.
    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    /// Whether some stored value equals `query` on every dimension.
    pub fn contains(&self, query: &T) -> bool {
        self.for_each_matching(query, |_| true)
    }

    /// Every stored value equal to `query` on all dimensions, with
    /// multiplicity preserved.
    pub fn get(&self, query: &T) -> Vec<&T> {
        let mut matches = Vec::new();
        self.for_each_matching(query, |value| {
            matches.push(value);
            false
        });
        matches
    }

    /// Invoke `f` for every stored value equal to `query` on all dimensions.
    ///
    /// `f` returns `true` to cancel the traversal; the method returns whether
    /// it was cancelled.
    pub fn for_each_matching<'a, F>(&'a self, query: &T, mut f: F) -> bool
    where
        F: FnMut(&'a T) -> bool,
    {
        let mut stack: TinyVec<[usize; 33]> = TinyVec::new();
        stack.push(0);
        stack.push(self.values.len() - 1);
        stack.push(0);

        while !stack.is_empty() {
            let axis = stack.pop().unwrap_or(0);
            let right = stack.pop().unwrap_or(0);
            let left = stack.pop().unwrap_or(0);

            let mid = (left + right) >> 1;
            let pivot = &self.values[mid];

            if all_dims_equal(&self.comparator, self.num_dims, query, pivot) && f(pivot) {
                return true;
            }

            let next_axis = (axis + 1) % self.num_dims;
            let ordering = self.comparator.compare(query, pivot, axis);

            if ordering != Ordering::Less && mid < right {
                stack.push(mid + 1);
                stack.push(right);
                stack.push(next_axis);
            }

            // equal values may sit in the left half when the pivot is dirty
            let descend_left =
                ordering == Ordering::Less || (ordering == Ordering::Equal && self.dirties[mid]);
            if descend_left && mid > left {
                stack.push(left);
                stack.push(mid - 1);
                stack.push(next_axis);
            }
        }

        false
    }

    /// Invoke `f` for every stored value, in array order.
    ///
    /// `f` returns `true` to cancel the traversal; the method returns whether
    /// it was cancelled.
    pub fn for_each<'a, F>(&'a self, mut f: F) -> bool
    where
        F: FnMut(&'a T) -> bool,
    {
        for value in &self.values {
            if f(value) {
                return true;
            }
        }
        false
    }

    /// Every stored value, in array order.
    pub fn get_all(&self) -> Vec<&T> {
        self.values.iter().collect()
    }

    /// Invoke `f` for every stored value inside the optional bounds.
    ///
    /// Bounds apply on every dimension at once; the lower bound is inclusive
    /// and the upper bound is inclusive iff `upper_inclusive`. Inverted
    /// bounds on any dimension yield no matches. `f` returns `true` to
    /// cancel; the method returns whether it was cancelled.
    pub fn range_for_each<'a, F>(
        &'a self,
        lower: Option<&T>,
        upper: Option<&T>,
        upper_inclusive: bool,
        mut f: F,
    ) -> bool
    where
        F: FnMut(&'a T) -> bool,
    {
        if bounds_inverted(&self.comparator, self.num_dims, lower, upper) {
            return false;
        }

        let mut stack: TinyVec<[usize; 33]> = TinyVec::new();
        stack.push(0);
        stack.push(self.values.len() - 1);
        stack.push(0);

        while !stack.is_empty() {
            let axis = stack.pop().unwrap_or(0);
            let right = stack.pop().unwrap_or(0);
            let left = stack.pop().unwrap_or(0);

            let mid = (left + right) >> 1;
            let pivot = &self.values[mid];

            if within_bounds(
                &self.comparator,
                self.num_dims,
                pivot,
                lower,
                upper,
                upper_inclusive,
            ) && f(pivot)
            {
                return true;
            }

            let next_axis = (axis + 1) % self.num_dims;
            let upper_ordering = upper.map(|upper| self.comparator.compare(upper, pivot, axis));

            if upper_ordering != Some(Ordering::Less) && mid < right {
                stack.push(mid + 1);
                stack.push(right);
                stack.push(next_axis);
            }

            // equal values may sit in the left half when the pivot is dirty
            let descend_left = lower
                .map_or(true, |lower| {
                    self.comparator.compare(lower, pivot, axis) != Ordering::Greater
                })
                || (self.dirties[mid] && upper_ordering == Some(Ordering::Equal));
            if descend_left && mid > left {
                stack.push(left);
                stack.push(mid - 1);
                stack.push(next_axis);
            }
        }

        false
    }

    /// The first stored value found inside the optional bounds, if any.
    ///
    /// No ordering is guaranteed across candidate values.
    pub fn try_get_first(
        &self,
        lower: Option<&T>,
        upper: Option<&T>,
        upper_inclusive: bool,
    ) -> Option<&T> {
        let mut first = None;
        self.range_for_each(lower, upper, upper_inclusive, |value| {
            first = Some(value);
            true
        });
        first
    }

    pub(crate) fn values(&self) -> &[T] {
        &self.values
    }

    #[cfg(test)]
    pub(crate) fn dirties(&self) -> &[bool] {
        &self.dirties
    }

    #[cfg(test)]
    pub(crate) fn comparator(&self) -> &C {
        &self.comparator
    }
}

impl<T, M: Metric<T>> KDTree<T, M> {
    /// The stored value nearest to `query` by squared Euclidean distance,
    /// with that squared distance.
    ///
    /// Ties keep the first value encountered during descent.
    pub fn nearest_neighbor(&self, query: &T) -> Option<(&T, f64)> {
        let mut best = None;
        self.nearest_into(query, &mut best);
        best
    }

    /// Fold this tree's nearest neighbor into a running best, reusing the
    /// caller's bound for pruning.
    pub(crate) fn nearest_into<'a>(&'a self, query: &T, best: &mut Option<(&'a T, f64)>) {
        let mut best_sq = best.as_ref().map_or(f64::INFINITY, |&(_, sq)| sq);
        let mut best_index = None;
        self.nearest_descend(
            0,
            self.values.len() - 1,
            0,
            query,
            &mut best_sq,
            &mut best_index,
        );
        if let Some(index) = best_index {
            *best = Some((&self.values[index], best_sq));
        }
    }

    fn nearest_descend(
        &self,
        left: usize,
        right: usize,
        axis: usize,
        query: &T,
        best_sq: &mut f64,
        best_index: &mut Option<usize>,
    ) {
        let mid = (left + right) >> 1;
        let pivot = &self.values[mid];

        let sq = sq_dist(&self.comparator, self.num_dims, query, pivot);
        if sq < *best_sq {
            *best_sq = sq;
            *best_index = Some(mid);
        }

        let ordering = self.comparator.compare(query, pivot, axis);
        let axis_delta = self.comparator.coord(pivot, axis) - self.comparator.coord(query, axis);
        let axis_sq = axis_delta * axis_delta;
        let next_axis = (axis + 1) % self.num_dims;

        let left_child = (mid > left).then_some((left, mid - 1));
        let right_child = (mid < right).then_some((mid + 1, right));
        let (near, far) = if ordering != Ordering::Less {
            (right_child, left_child)
        } else {
            (left_child, right_child)
        };

        if let Some((l, r)) = near {
            self.nearest_descend(l, r, next_axis, query, best_sq, best_index);
        }
        // cross the splitting plane only when it can still hold a closer
        // point, or when a dirty pivot hides equal values on the left
        if let Some((l, r)) = far {
            if axis_sq < *best_sq || (ordering == Ordering::Equal && self.dirties[mid]) {
                self.nearest_descend(l, r, next_axis, query, best_sq, best_index);
            }
        }
    }
}

fn validate_shape(num_dims: usize, num_values: usize) -> Result<()> {
    if num_dims == 0 {
        return Err(KdIndexError::InvalidArgument(
            "number of dimensions must be at least 1".to_string(),
        ));
    }
    if num_values == 0 {
        return Err(KdIndexError::InvalidArgument(
            "cannot build a tree over an empty value collection".to_string(),
        ));
    }
    Ok(())
}
