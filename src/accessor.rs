use std::{
    marker::PhantomData,
    ops::{Index, IndexMut},
    ptr::NonNull,
};

use derive_more::Display;

use crate::{
    nd_range::{Item, NDItem},
    range::{Id, Range},
};

/// How a kernel intends to use an accessor. Advisory: it does not gate access.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    Read,
    Write,
    Atomic,
    #[default]
    ReadWrite,
    DiscardReadWrite,
}

/// Which kind of memory an accessor is meant to address. Advisory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Target {
    #[default]
    GlobalBuffer,
    ConstantBuffer,
    Local,
    HostBuffer,
}

/// Anything an [`Accessor`] can be indexed with.
pub trait AccessIndex<const N: usize> {
    /// The linear element offset inside `range`.
    ///
    /// # Panics
    /// Panics if the index lies outside of `range`.
    fn to_offset(self, range: &Range<N>) -> usize;
}

/// A flat row-major offset.
impl<const N: usize> AccessIndex<N> for usize {
    #[inline]
    fn to_offset(self, range: &Range<N>) -> usize {
        let size = range.size();
        assert!(
            self < size,
            "flat index {self} is out of bounds for {size} elements"
        );
        self
    }
}

impl<const N: usize> AccessIndex<N> for Id<N> {
    #[inline]
    fn to_offset(self, range: &Range<N>) -> usize {
        range
            .linear(self)
            .unwrap_or_else(|| panic!("index {self} is out of bounds for range {range}"))
    }
}

impl<const N: usize> AccessIndex<N> for Item<N> {
    #[inline]
    fn to_offset(self, range: &Range<N>) -> usize {
        self.global_id().to_offset(range)
    }
}

impl<const N: usize> AccessIndex<N> for NDItem<N> {
    #[inline]
    fn to_offset(self, range: &Range<N>) -> usize {
        self.global_id().to_offset(range)
    }
}

/// A bounds-checked view into a [`Buffer`](crate::buffer::Buffer), captured by kernels.
///
/// Accessors are `Copy` and any number of them may be live for one buffer. They do no
/// synchronization: under a parallel schedule, kernels must not write an element that
/// another invocation may read or write at the same time.
///
/// `Index`/`IndexMut` hand out element references. Holding a reference obtained from one
/// copy while another copy references the same element is undefined behaviour; prefer
/// [`get`](Accessor::get), [`set`](Accessor::set) and [`update`](Accessor::update), which
/// keep each reference inside a single call.
///
/// Writing through an accessor of a read-only buffer panics.
pub struct Accessor<'a, T, const N: usize> {
    data: NonNull<T>,
    range: Range<N>,
    read_only: bool,
    mode: Mode,
    target: Target,
    phantom: PhantomData<&'a [T]>,
}

impl<T, const N: usize> Clone for Accessor<'_, T, N> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, const N: usize> Copy for Accessor<'_, T, N> {}

unsafe impl<T: Send + Sync, const N: usize> Send for Accessor<'_, T, N> {}
unsafe impl<T: Send + Sync, const N: usize> Sync for Accessor<'_, T, N> {}

impl<T, const N: usize> std::fmt::Debug for Accessor<'_, T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("range", &self.range)
            .field("read_only", &self.read_only)
            .field("mode", &self.mode)
            .field("target", &self.target)
            .finish()
    }
}

impl<'a, T, const N: usize> Accessor<'a, T, N> {
    /// `data` must stay valid for `range.size()` elements during `'a`.
    #[inline]
    pub(crate) fn new(
        data: NonNull<T>,
        range: Range<N>,
        read_only: bool,
        mode: Mode,
        target: Target,
    ) -> Self {
        Self {
            data,
            range,
            read_only,
            mode,
            target,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn range(&self) -> Range<N> {
        self.range
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn target(&self) -> Target {
        self.target
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[inline]
    fn ptr(&self, index: impl AccessIndex<N>) -> *mut T {
        let offset = index.to_offset(&self.range);
        // SAFETY: `offset` is checked against the buffer's element count.
        unsafe { self.data.as_ptr().add(offset) }
    }

    #[inline]
    fn ptr_mut(&self, index: impl AccessIndex<N>) -> *mut T {
        assert!(!self.read_only, "write through an accessor of a read-only buffer");
        self.ptr(index)
    }

    /// Reads the element at `index`.
    #[inline]
    pub fn get(&self, index: impl AccessIndex<N>) -> T
    where
        T: Clone,
    {
        // SAFETY: in bounds; the caller keeps concurrent writes to this element away.
        unsafe { (*self.ptr(index)).clone() }
    }

    /// Overwrites the element at `index`.
    ///
    /// # Panics
    /// Panics if the buffer is read-only.
    #[inline]
    pub fn set(&self, index: impl AccessIndex<N>, value: T) {
        // SAFETY: in bounds and writable; the caller keeps other accesses to this element away.
        unsafe { *self.ptr_mut(index) = value }
    }

    /// Modifies the element at `index` in place.
    ///
    /// # Panics
    /// Panics if the buffer is read-only.
    #[inline]
    pub fn update<R>(&self, index: impl AccessIndex<N>, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: in bounds and writable; the caller keeps other accesses to this element away.
        f(unsafe { &mut *self.ptr_mut(index) })
    }
}

impl<T, I: AccessIndex<N>, const N: usize> Index<I> for Accessor<'_, T, N> {
    type Output = T;

    #[inline]
    fn index(&self, index: I) -> &Self::Output {
        // SAFETY: in bounds; the caller keeps concurrent writes to this element away.
        unsafe { &*self.ptr(index) }
    }
}

impl<T, I: AccessIndex<N>, const N: usize> IndexMut<I> for Accessor<'_, T, N> {
    #[inline]
    fn index_mut(&mut self, index: I) -> &mut Self::Output {
        // SAFETY: in bounds and writable; the caller keeps other accesses to this element away.
        unsafe { &mut *self.ptr_mut(index) }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessIndex, Mode, Target};
    use crate::{buffer::Buffer, id, nd_range::Item, range};

    #[test]
    fn test_offsets() {
        let r = range![2, 3];
        assert_eq!(AccessIndex::<2>::to_offset(4usize, &r), 4);
        assert_eq!(id![1, 2].to_offset(&r), 5);
        assert_eq!(Item::new(id![1, 0], r, id![0, 0]).to_offset(&r), 3);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_id_out_of_bounds() {
        let _ = id![0, 3].to_offset(&range![2, 3]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_flat_out_of_bounds() {
        let _ = AccessIndex::<2>::to_offset(6usize, &range![2, 3]);
    }

    #[test]
    fn test_access() {
        let buffer = Buffer::<u32, 2>::new(range![2, 3]);
        let a = buffer.get_access(Mode::Write, Target::GlobalBuffer);
        let mut b = buffer.access(Mode::Read);
        assert_eq!(a.mode(), Mode::Write);
        assert_eq!(b.target(), Target::GlobalBuffer);

        a.set(id![1, 1], 7);
        assert_eq!(b[4], 7);
        b[id![0, 2]] = 3;
        assert_eq!(a.get(2), 3);
        assert_eq!(a.update(5, |x| std::mem::replace(x, 9)), 0);
        assert_eq!(buffer.to_vec(), [0, 0, 3, 0, 7, 9]);
    }

    #[test]
    fn test_shared_across_threads() {
        use rayon::prelude::*;

        let buffer = Buffer::<u64, 1>::zeros(range![64]);
        let acc = buffer.access(Mode::Write);
        (0..64usize)
            .into_par_iter()
            .for_each(|x| acc.set(x, (x * x) as u64));
        let expected: Vec<u64> = (0..64).map(|x| x * x).collect();
        assert_eq!(buffer.to_vec(), expected);
    }

    #[test]
    #[should_panic(expected = "read-only")]
    fn test_read_only_write() {
        let host = [1, 2, 3];
        let buffer = Buffer::from_host_ref(&host, range![3]);
        let acc = buffer.access(Mode::Read);
        assert_eq!(acc[1], 2);
        acc.set(1, 5);
    }
}
