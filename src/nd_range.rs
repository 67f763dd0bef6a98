//! Work-group decomposition of an index space and the per-invocation descriptors handed to kernels.

use std::ops::Index;

use derive_more::Display;

use crate::range::{Id, Range};

/// A global index space split into work-groups of `local_range`, translated by `offset`.
///
/// The three values are stored verbatim. `global_range` is expected to be a multiple of
/// `local_range`; when it is not, [`NDRange::group_range`] rounds up and the engine
/// still stops at the global extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{{global: {global_range}, local: {local_range}, offset: {offset}}}")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NDRange<const N: usize> {
    global_range: Range<N>,
    local_range: Range<N>,
    offset: Id<N>,
}

impl<const N: usize> NDRange<N> {
    /// Creates an ND-range with a zero offset.
    #[inline]
    pub fn new(global_range: impl Into<Range<N>>, local_range: impl Into<Range<N>>) -> Self {
        Self::with_offset(global_range, local_range, Id::default())
    }

    #[inline]
    pub fn with_offset(
        global_range: impl Into<Range<N>>,
        local_range: impl Into<Range<N>>,
        offset: impl Into<Id<N>>,
    ) -> Self {
        Self {
            global_range: global_range.into(),
            local_range: local_range.into(),
            offset: offset.into(),
        }
    }

    #[inline]
    pub fn global_range(&self) -> Range<N> {
        self.global_range
    }

    #[inline]
    pub fn local_range(&self) -> Range<N> {
        self.local_range
    }

    /// The number of work-groups on each dimension, rounding up.
    ///
    /// # Panics
    /// Panics if any dimension of the local range is zero.
    #[inline]
    pub fn group_range(&self) -> Range<N> {
        self.global_range / self.local_range
    }

    #[inline]
    pub fn offset(&self) -> Id<N> {
        self.offset
    }
}

/// A work-item of a flat launch: its global coordinate and the range it was enumerated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{global_id}")]
pub struct Item<const N: usize> {
    global_id: Id<N>,
    range: Range<N>,
    offset: Id<N>,
}

impl<const N: usize> Item<N> {
    #[inline]
    pub fn new(global_id: Id<N>, range: Range<N>, offset: Id<N>) -> Self {
        Self {
            global_id,
            range,
            offset,
        }
    }

    /// The global coordinate, offset included.
    #[inline]
    pub fn global_id(&self) -> Id<N> {
        self.global_id
    }

    /// The global coordinate in the given dimension.
    #[inline]
    pub fn get(&self, dimension: usize) -> isize {
        self.global_id[dimension]
    }

    #[inline]
    pub fn range(&self) -> Range<N> {
        self.range
    }

    #[inline]
    pub fn offset(&self) -> Id<N> {
        self.offset
    }

    /// Row-major position of the item inside its range, the offset removed.
    ///
    /// # Panics
    /// Panics if the item does not lie inside its range.
    #[inline]
    pub fn linear_id(&self) -> usize {
        let id = self.global_id - self.offset;
        self.range
            .linear(id)
            .unwrap_or_else(|| panic!("item {id} is outside of its range {}", self.range))
    }
}

impl<const N: usize> Index<usize> for Item<N> {
    type Output = isize;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.global_id[index]
    }
}

/// A work-item of an ND-range launch, aware of its work-group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{global_id} ({local_id})")]
pub struct NDItem<const N: usize> {
    global_id: Id<N>,
    local_id: Id<N>,
    nd_range: NDRange<N>,
}

impl<const N: usize> NDItem<N> {
    #[inline]
    pub fn new(global_id: Id<N>, local_id: Id<N>, nd_range: NDRange<N>) -> Self {
        Self {
            global_id,
            local_id,
            nd_range,
        }
    }

    #[inline]
    pub fn global_id(&self) -> Id<N> {
        self.global_id
    }

    /// The coordinate relative to the work-group.
    #[inline]
    pub fn local_id(&self) -> Id<N> {
        self.local_id
    }

    /// The work-group coordinate, `global_id / local_range` rounding down.
    #[inline]
    pub fn group_id(&self) -> Id<N> {
        self.global_id / self.nd_range.local_range()
    }

    #[inline]
    pub fn global_id_of(&self, dimension: usize) -> isize {
        self.global_id[dimension]
    }

    #[inline]
    pub fn local_id_of(&self, dimension: usize) -> isize {
        self.local_id[dimension]
    }

    #[inline]
    pub fn group_id_of(&self, dimension: usize) -> isize {
        self.group_id()[dimension]
    }

    #[inline]
    pub fn global_range(&self) -> Range<N> {
        self.nd_range.global_range()
    }

    #[inline]
    pub fn local_range(&self) -> Range<N> {
        self.nd_range.local_range()
    }

    #[inline]
    pub fn group_range(&self) -> Range<N> {
        self.nd_range.group_range()
    }

    #[inline]
    pub fn offset(&self) -> Id<N> {
        self.nd_range.offset()
    }

    #[inline]
    pub fn nd_range(&self) -> NDRange<N> {
        self.nd_range
    }
}

/// A work-group, the unit of work of
/// [`parallel_for_workgroup`](crate::exec::parallel_for_workgroup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("group {id}")]
pub struct Group<const N: usize> {
    id: Id<N>,
    nd_range: NDRange<N>,
}

impl<const N: usize> Group<N> {
    #[inline]
    pub fn new(id: Id<N>, nd_range: NDRange<N>) -> Self {
        Self { id, nd_range }
    }

    #[inline]
    pub fn group_id(&self) -> Id<N> {
        self.id
    }

    /// The group coordinate in the given dimension.
    #[inline]
    pub fn get(&self, dimension: usize) -> isize {
        self.id[dimension]
    }

    #[inline]
    pub fn local_range(&self) -> Range<N> {
        self.nd_range.local_range()
    }

    #[inline]
    pub fn global_range(&self) -> Range<N> {
        self.nd_range.global_range()
    }

    #[inline]
    pub fn group_range(&self) -> Range<N> {
        self.nd_range.group_range()
    }

    #[inline]
    pub fn offset(&self) -> Id<N> {
        self.nd_range.offset()
    }

    #[inline]
    pub fn nd_range(&self) -> NDRange<N> {
        self.nd_range
    }

    /// The number of work-items of this group on each dimension.
    /// Groups on the upper border are clipped to the global range.
    #[inline]
    pub fn item_range(&self) -> Range<N> {
        let global = self.global_range();
        let local = self.local_range();
        let origin = self.id * local;
        Range::new(std::array::from_fn(|index| {
            let start = origin[index].max(0) as usize;
            local[index].min(global[index].saturating_sub(start))
        }))
    }
}

impl<const N: usize> Index<usize> for Group<N> {
    type Output = isize;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.id[index]
    }
}
