use crate::error::{KdIndexError, Result};
use crate::kdtree::KDTree;
use crate::order::{all_dims_equal, bounds_inverted, sq_dist, within_bounds, Comparator, Metric};
use crate::parallel::clamp_max_threads;
use crate::segment::Segment;

/// Default base-block capacity in [`BKDTree::new`].
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Maximum number of levels; level `i` holds `block_size * 2^i` points, so
/// inserting past this bound fails with
/// [`CapacityExceeded`][crate::error::KdIndexError::CapacityExceeded].
pub const MAX_LEVELS: usize = 32;

/// A growing point index: a mutable base block of capacity `block_size` plus
/// a binary-counter cascade of static [`KDTree`]s, where an occupied level
/// `i` holds exactly `block_size * 2^i` points.
///
/// Insertion is buffered in the base block; overflow triggers a carry that
/// rebuilds the lowest empty level from everything below it. Reads fan out
/// over the base block and every occupied level.
#[derive(Debug, Clone)]
pub struct BKDTree<T, C: Comparator<T>> {
    base: Vec<T>,
    levels: Vec<Option<KDTree<T, C>>>,
    count: usize,
    num_dims: usize,
    block_size: usize,
    max_threads: usize,
    comparator: C,
}

impl<T, C: Comparator<T>> BKDTree<T, C> {
    /// Create an empty tree with the default block size and a sequential
    /// carry build.
    ///
    /// ## Errors
    ///
    /// - If `num_dims` is zero.
    pub fn new(num_dims: usize, comparator: C) -> Result<Self> {
        Self::new_with_block_size(num_dims, comparator, DEFAULT_BLOCK_SIZE, 1)
    }

    /// Create an empty tree with the provided block size.
    ///
    /// `max_threads` caps the workers of every carry rebuild; it is clamped
    /// to `[1, available_parallelism]`.
    ///
    /// ## Errors
    ///
    /// - If `num_dims` is zero.
    /// - If `block_size` is below 2.
    pub fn new_with_block_size(
        num_dims: usize,
        comparator: C,
        block_size: usize,
        max_threads: usize,
    ) -> Result<Self> {
        if num_dims == 0 {
            return Err(KdIndexError::InvalidArgument(
                "number of dimensions must be at least 1".to_string(),
            ));
        }
        if block_size < 2 {
            return Err(KdIndexError::InvalidArgument(
                "block size must be at least 2".to_string(),
            ));
        }
        Ok(Self {
            base: Vec::with_capacity(block_size),
            levels: Vec::new(),
            count: 0,
            num_dims,
            block_size,
            max_threads: clamp_max_threads(max_threads),
            comparator,
        })
    }

    /// The number of points in the tree.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the tree holds no points.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The number of dimensions the tree was created with.
    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    /// The base-block capacity.
    pub fn block_size(&self) -> usize {
        self.block_size
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
    /// `f` returns `true` to cancel; the method returns whether it was
    /// cancelled. Cancellation also stops the fan-out into further levels.
    pub fn for_each_matching<'a, F>(&'a self, query: &T, mut f: F) -> bool
    where
        F: FnMut(&'a T) -> bool,
    {
        for value in &self.base {
            if all_dims_equal(&self.comparator, self.num_dims, query, value) && f(value) {
                return true;
            }
        }
        for tree in self.levels.iter().flatten() {
            if tree.for_each_matching(query, &mut f) {
                return true;
            }
        }
        false
    }

    /// Invoke `f` for every stored value: the base block first, then each
    /// occupied level in index order.
    ///
    /// `f` returns `true` to cancel; the method returns whether it was
    /// cancelled.
    pub fn for_each<'a, F>(&'a self, mut f: F) -> bool
    where
        F: FnMut(&'a T) -> bool,
    {
        for value in &self.base {
            if f(value) {
                return true;
            }
        }
        for tree in self.levels.iter().flatten() {
            if tree.for_each(&mut f) {
                return true;
            }
        }
        false
    }

    /// Every stored value: the base block first, then each occupied level.
    pub fn get_all(&self) -> Vec<&T> {
        let mut all = Vec::with_capacity(self.count);
        self.for_each(|value| {
            all.push(value);
            false
        });
        all
    }

    /// Invoke `f` for every stored value inside the optional bounds.
    ///
    /// Semantics match [`KDTree::range_for_each`]; the scan covers the base
    /// block and every occupied level.
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
        for value in &self.base {
            if within_bounds(
                &self.comparator,
                self.num_dims,
                value,
                lower,
                upper,
                upper_inclusive,
            ) && f(value)
            {
                return true;
            }
        }
        for tree in self.levels.iter().flatten() {
            if tree.range_for_each(lower, upper, upper_inclusive, &mut f) {
                return true;
            }
        }
        false
    }

    /// The first stored value found inside the optional bounds, if any.
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
}

impl<T, C> BKDTree<T, C>
where
    T: Clone + Send + Sync,
    C: Comparator<T> + Clone + Sync,
{
    /// Insert one value.
    ///
    /// Appends to the base block when it has room; otherwise carries into the
    /// lowest empty level by building one new [`KDTree`] over the base block
    /// and every level below it. The carry leaves the tree untouched on
    /// failure.
    ///
    /// ## Errors
    ///
    /// - If the carry would need a level at or above [`MAX_LEVELS`].
    pub fn insert(&mut self, value: T) -> Result<()> {
        if self.base.len() < self.block_size {
            self.base.push(value);
            self.count += 1;
            return Ok(());
        }

        let level = self
            .levels
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.levels.len());
        if level >= MAX_LEVELS {
            return Err(KdIndexError::CapacityExceeded(MAX_LEVELS));
        }

        // base + levels 0..level hold exactly block_size * 2^level points
        let tree = {
            let mut segments: Vec<Segment<'_, T>> = Vec::with_capacity(level + 1);
            segments.push(self.base.as_slice().into());
            for slot in &self.levels[..level] {
                if let Some(consumed) = slot {
                    segments.push(consumed.values().into());
                }
            }
            KDTree::from_segments(
                self.num_dims,
                &segments,
                self.comparator.clone(),
                self.max_threads,
            )?
        };

        for slot in &mut self.levels[..level] {
            *slot = None;
        }
        if level == self.levels.len() {
            self.levels.push(Some(tree));
        } else {
            self.levels[level] = Some(tree);
        }
        self.base.clear();
        self.base.push(value);
        self.count += 1;
        Ok(())
    }

    /// Insert a batch of values.
    ///
    /// Small batches (at most twice the block size) fall back to repeated
    /// single inserts. Larger batches rebuild every affected level at once:
    /// occupied levels are folded into a pending segment stack until the
    /// cascade below the fold point can hold the pending total, one tree is
    /// built per set bit of `pending / block_size`, and the remainder fills
    /// the fresh base block. The call is atomic: capacity is checked before
    /// any state changes.
    ///
    /// ## Errors
    ///
    /// - If the new total would need a level at or above [`MAX_LEVELS`].
    pub fn insert_many(&mut self, values: Vec<T>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let new_count = self.count + values.len();
        if (new_count / self.block_size) as u64 >= 1u64 << MAX_LEVELS {
            return Err(KdIndexError::CapacityExceeded(MAX_LEVELS));
        }

        if values.len() <= 2 * self.block_size {
            for value in values {
                self.insert(value)?;
            }
            return Ok(());
        }

        // Fold occupied levels upwards until the cascade below the fold point
        // can hold everything pending. The bound must stay inclusive: with a
        // pending total of exactly block_size * 2^L, bit L gets produced and
        // an unfolded occupied level L would be overwritten.
        let mut pending_total = self.base.len() + values.len();
        let mut capacity = self.block_size as u64;
        let mut fold = 0;
        let mut folded: Vec<KDTree<T, C>> = Vec::new();
        while capacity <= pending_total as u64 {
            if fold < self.levels.len() {
                if let Some(tree) = self.levels[fold].take() {
                    pending_total += tree.len();
                    folded.push(tree);
                }
            }
            capacity += (self.block_size as u64) << fold;
            fold += 1;
        }

        let used_bits = pending_total / self.block_size;
        let leftover = pending_total % self.block_size;

        // pending segment stack: the new list, the old base block, then each
        // folded level in index order
        let old_base = std::mem::take(&mut self.base);
        let mut stack: Vec<&[T]> = Vec::with_capacity(folded.len() + 2);
        stack.push(values.as_slice());
        stack.push(old_base.as_slice());
        for tree in &folded {
            stack.push(tree.values());
        }
        let mut head = 0;
        let mut offset = 0;

        let num_levels = (usize::BITS - used_bits.leading_zeros()) as usize;
        let mut rebuilt: Vec<Option<KDTree<T, C>>> = Vec::with_capacity(num_levels);
        for level in 0..num_levels {
            if used_bits & (1 << level) != 0 {
                let level_segments =
                    take_segments(&stack, &mut head, &mut offset, self.block_size << level);
                let tree = KDTree::from_segments(
                    self.num_dims,
                    &level_segments,
                    self.comparator.clone(),
                    self.max_threads,
                )?;
                rebuilt.push(Some(tree));
            } else {
                rebuilt.push(None);
            }
        }

        // the remainder fills the fresh base block
        let mut new_base = Vec::with_capacity(self.block_size);
        for segment in take_segments(&stack, &mut head, &mut offset, leftover) {
            new_base.extend_from_slice(segment.as_slice());
        }

        if self.levels.len() < num_levels {
            self.levels.resize_with(num_levels, || None);
        }
        for (level, slot) in rebuilt.into_iter().enumerate() {
            if slot.is_some() {
                self.levels[level] = slot;
            }
        }
        self.base = new_base;
        self.count = new_count;
        Ok(())
    }
}

impl<T, M: Metric<T>> BKDTree<T, M> {
    /// The stored value nearest to `query` by squared Euclidean distance,
    /// with that squared distance.
    ///
    /// The best-so-far threads through every level, so each tree prunes
    /// against the global bound.
    pub fn nearest_neighbor(&self, query: &T) -> Option<(&T, f64)> {
        let mut best: Option<(&T, f64)> = None;
        for value in &self.base {
            let sq = sq_dist(&self.comparator, self.num_dims, query, value);
            if best.map_or(true, |(_, best_sq)| sq < best_sq) {
                best = Some((value, sq));
            }
        }
        for tree in self.levels.iter().flatten() {
            tree.nearest_into(query, &mut best);
        }
        best
    }
}

#[cfg(test)]
impl<T, C: Comparator<T>> BKDTree<T, C> {
    pub(crate) fn base_len(&self) -> usize {
        self.base.len()
    }

    pub(crate) fn level_sizes(&self) -> Vec<Option<usize>> {
        self.levels
            .iter()
            .map(|slot| slot.as_ref().map(KDTree::len))
            .collect()
    }
}

/// Slice `count` values off the front of the pending segment stack, cutting
/// the head segment where needed.
fn take_segments<'a, T>(
    stack: &[&'a [T]],
    head: &mut usize,
    offset: &mut usize,
    mut count: usize,
) -> Vec<Segment<'a, T>> {
    let mut segments = Vec::new();
    while count > 0 {
        let slice = stack[*head];
        let available = slice.len() - *offset;
        if available == 0 {
            *head += 1;
            *offset = 0;
            continue;
        }
        let taken = available.min(count);
        segments.push(Segment::from(&slice[*offset..*offset + taken]));
        *offset += taken;
        count -= taken;
        if *offset == slice.len() {
            *head += 1;
            *offset = 0;
        }
    }
    segments
}
