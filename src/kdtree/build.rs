use std::cmp::Ordering;

use crate::order::Comparator;
use crate::parallel::{WorkerBudget, PARALLEL_BUILD_THRESHOLD};

/// Recursively lay out `values` so that every subrange is median-partitioned
/// on its cycling dimension.
///
/// For a subrange of length `n` the pivot sits at `(n - 1) / 2`; everything
/// before it compares `<=` on the current dimension and everything after it
/// compares `>=`. The pivot's dirty flag records whether an equal value ended
/// up in the left half, which query descent must follow on a tied comparison.
pub(crate) fn build_range<T, C>(
    values: &mut [T],
    dirties: &mut [bool],
    axis: usize,
    num_dims: usize,
    comparator: &C,
    budget: &WorkerBudget,
) where
    T: Send,
    C: Comparator<T> + Sync,
{
    let len = values.len();
    if len <= 1 {
        return;
    }

    // Every flag in this range is still unset, so the stable value sort alone
    // keeps the two arrays in step.
    values.sort_by(|a, b| comparator.compare(a, b, axis));

    let mid = (len - 1) >> 1;
    let first_equal = {
        let pivot = &values[mid];
        values[..mid].partition_point(|v| comparator.compare(v, pivot, axis) == Ordering::Less)
    };
    dirties[mid] = first_equal < mid;

    let next_axis = (axis + 1) % num_dims;
    let (left_values, rest) = values.split_at_mut(mid);
    let (_, right_values) = rest.split_at_mut(1);
    let (left_dirties, rest) = dirties.split_at_mut(mid);
    let (_, right_dirties) = rest.split_at_mut(1);

    if len >= PARALLEL_BUILD_THRESHOLD && budget.try_acquire() {
        rayon::join(
            || build_range(left_values, left_dirties, next_axis, num_dims, comparator, budget),
            || build_range(right_values, right_dirties, next_axis, num_dims, comparator, budget),
        );
        budget.release();
    } else {
        build_range(left_values, left_dirties, next_axis, num_dims, comparator, budget);
        build_range(right_values, right_dirties, next_axis, num_dims, comparator, budget);
    }
}
