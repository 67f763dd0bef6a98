//! N-dimensional arrays shared with kernels through [`Accessor`]s.
//!
//! A [`Buffer`] either owns its elements or wraps host memory borrowed for `'a`:
//! - [`Buffer::new`], [`Buffer::zeros`], [`Buffer::from_slice`] and [`FromIterator`] allocate;
//! - [`Buffer::from_host`] wraps a mutable slice, writes are visible in it;
//! - [`Buffer::from_host_ref`] wraps a shared slice, writes through accessors panic;
//! - [`Buffer::with_storage`] delegates initial and final contents to a [`Storage`].
//!
//! Cloning a buffer always allocates: the clone never shares elements with its source.

use std::{cell::UnsafeCell, marker::PhantomData, ptr::NonNull};

use derive_more::{Deref, Display};
use thiserror::Error;

use crate::{
    accessor::{Accessor, Mode, Target},
    num::{DataType, Scalar},
    range::Range,
};

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer size error: range {range} needs {expected} elements, found {found}")]
    Size {
        range: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Deref)]
pub struct BufferId(uid::Id<BufferId>);

impl BufferId {
    #[inline]
    fn new() -> Self {
        Self(uid::Id::new())
    }
}

/// Lifecycle hooks of externally managed buffer memory.
///
/// A storage-backed buffer runs entirely on the calling thread: it calls
/// [`in_use`](Storage::in_use) when created, then on drop [`completed`](Storage::completed),
/// the copy into [`final_data`](Storage::final_data), and finally [`destroy`](Storage::destroy).
pub trait Storage<T> {
    /// Number of elements of the underlying data.
    fn size(&self) -> usize;
    /// Memory the buffer should use in place, or `None` to let the buffer allocate.
    fn host_data(&mut self) -> Option<&mut [T]>;
    /// Contents to initialize the buffer with, or `None` to skip initialization.
    fn initial_data(&self) -> Option<&[T]>;
    /// Where the final contents go when the buffer is dropped, or `None` to skip.
    fn final_data(&mut self) -> Option<&mut [T]>;
    /// Called once, after the final contents are written back.
    fn destroy(&mut self);
    /// Called when the buffer starts being used.
    fn in_use(&mut self);
    /// Called when the buffer is no longer used.
    fn completed(&mut self);
}

type WriteBack<'a, T> = fn(&mut (dyn Storage<T> + Send + 'a), Option<&[T]>, usize);

enum Store<'a, T> {
    Owned {
        _cells: Box<[UnsafeCell<T>]>,
    },
    Host(PhantomData<&'a mut [T]>),
    HostRef(PhantomData<&'a [T]>),
    Storage {
        storage: &'a mut (dyn Storage<T> + Send + 'a),
        owned: Option<Box<[UnsafeCell<T>]>>,
        write_back: WriteBack<'a, T>,
    },
}

impl<T> Store<'_, T> {
    #[inline]
    fn name(&self) -> &'static str {
        match self {
            Store::Owned { .. } => "owned",
            Store::Host(_) => "host",
            Store::HostRef(_) => "host (read-only)",
            Store::Storage { .. } => "storage",
        }
    }
}

#[inline]
fn alloc<T>(data: Vec<T>) -> (NonNull<T>, Box<[UnsafeCell<T>]>) {
    let cells: Box<[UnsafeCell<T>]> = data.into_iter().map(UnsafeCell::new).collect();
    let data = NonNull::new(UnsafeCell::raw_get(cells.as_ptr())).unwrap_or(NonNull::dangling());
    (data, cells)
}

/// Copies the final contents of a storage-backed buffer into [`Storage::final_data`].
///
/// `owned` is the buffer's own allocation, or `None` if it worked in [`Storage::host_data`].
/// Only raw pointers are compared, so a storage may return the same memory from both.
fn write_back<T: Clone>(
    storage: &mut (dyn Storage<T> + Send + '_),
    owned: Option<&[T]>,
    size: usize,
) {
    let contents = match owned {
        Some(contents) => contents.to_vec(),
        None => {
            let working = storage.host_data().map(|data| data.as_ptr());
            let target = storage.final_data().map(|data| data.as_ptr());
            if target.is_none() || target == working {
                return;
            }
            match storage.host_data() {
                Some(data) => data[..size.min(data.len())].to_vec(),
                None => return,
            }
        }
    };
    if let Some(target) = storage.final_data() {
        let len = contents.len().min(target.len());
        target[..len].clone_from_slice(&contents[..len]);
    }
}

#[inline]
fn check_size<const N: usize>(range: Range<N>, found: usize) -> Result<(), BufferError> {
    let expected = range.size();
    if found < expected {
        return Err(BufferError::Size {
            range: range.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// An `N`-dimensional array of `T` of shape `range`, stored row-major.
///
/// A buffer only moves across threads when `T` is both `Send` and `Sync`:
///
/// ```compile_fail
/// use std::cell::Cell;
/// use tessera::{Buffer, range};
///
/// fn assert_send<T: Send>(_: &T) {}
///
/// let host = [Cell::new(1), Cell::new(2)];
/// let buffer = Buffer::from_host_ref(&host, range![2]);
/// assert_send(&buffer);
/// ```
pub struct Buffer<'a, T, const N: usize> {
    id: BufferId,
    range: Range<N>,
    data: NonNull<T>,
    read_only: bool,
    store: Store<'a, T>,
}

// A read-only buffer shares a `&[T]`, which is only `Send` for `T: Sync`.
unsafe impl<T: Send + Sync, const N: usize> Send for Buffer<'_, T, N> {}
unsafe impl<T: Send + Sync, const N: usize> Sync for Buffer<'_, T, N> {}

impl<T, const N: usize> std::fmt::Debug for Buffer<'_, T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("range", &self.range)
            .field("store", &self.store.name())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl<T, const N: usize> Buffer<'static, T, N> {
    /// Allocates a buffer of `range` filled with `T::default()`.
    #[inline]
    pub fn new(range: impl Into<Range<N>>) -> Self
    where
        T: Default,
    {
        let range = range.into();
        let data = std::iter::repeat_with(T::default)
            .take(range.size())
            .collect();
        Self::owned(range, data)
    }

    /// Allocates a buffer of `range` holding `data`.
    pub fn try_from_vec(range: impl Into<Range<N>>, mut data: Vec<T>) -> Result<Self, BufferError> {
        let range = range.into();
        check_size(range, data.len())?;
        data.truncate(range.size());
        Ok(Self::owned(range, data))
    }

    /// Allocates a buffer of `range` holding `data`.
    ///
    /// # Panics
    /// Panics if `data` has fewer elements than `range`.
    #[inline]
    pub fn from_vec(range: impl Into<Range<N>>, data: Vec<T>) -> Self {
        Self::try_from_vec(range, data).expect("data must cover the buffer range")
    }
}

impl<T: Scalar, const N: usize> Buffer<'static, T, N> {
    /// Allocates a zero-filled buffer of `range`.
    #[inline]
    pub fn zeros(range: impl Into<Range<N>>) -> Self {
        let range = range.into();
        Self::owned(range, vec![T::zero(); range.size()])
    }

    /// Allocates a buffer of `range` filled with ones.
    #[inline]
    pub fn ones(range: impl Into<Range<N>>) -> Self {
        let range = range.into();
        Self::owned(range, vec![T::one(); range.size()])
    }
}

impl<T: Clone> Buffer<'static, T, 1> {
    /// Allocates a 1-dimensional buffer holding a copy of `data`.
    #[inline]
    pub fn from_slice(data: &[T]) -> Self {
        Self::owned(Range::new([data.len()]), data.to_vec())
    }
}

impl<T> FromIterator<T> for Buffer<'static, T, 1> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let data: Vec<T> = iter.into_iter().collect();
        Self::owned(Range::new([data.len()]), data)
    }
}

impl<'a, T, const N: usize> Buffer<'a, T, N> {
    fn owned(range: Range<N>, data: Vec<T>) -> Self {
        debug_assert_eq!(range.size(), data.len());
        let (data, cells) = alloc(data);
        let buffer = Self {
            id: BufferId::new(),
            range,
            data,
            read_only: false,
            store: Store::Owned { _cells: cells },
        };
        log::trace!("buffer {}: allocated {range}", buffer.id);
        buffer
    }

    /// Wraps `data` without copying. Writes through accessors land in `data`.
    pub fn try_from_host(
        data: &'a mut [T],
        range: impl Into<Range<N>>,
    ) -> Result<Self, BufferError> {
        let range = range.into();
        check_size(range, data.len())?;
        let data = NonNull::from(data).cast();
        let id = BufferId::new();
        log::trace!("buffer {id}: wrapped host memory of {range}");
        Ok(Self {
            id,
            range,
            data,
            read_only: false,
            store: Store::Host(PhantomData),
        })
    }

    /// Wraps `data` without copying. Writes through accessors land in `data`.
    ///
    /// # Panics
    /// Panics if `data` has fewer elements than `range`.
    #[inline]
    pub fn from_host(data: &'a mut [T], range: impl Into<Range<N>>) -> Self {
        Self::try_from_host(data, range).expect("host data must cover the buffer range")
    }

    /// Wraps `data` read-only without copying. Writes through accessors panic.
    pub fn try_from_host_ref(
        data: &'a [T],
        range: impl Into<Range<N>>,
    ) -> Result<Self, BufferError> {
        let range = range.into();
        check_size(range, data.len())?;
        let data = NonNull::from(data).cast();
        let id = BufferId::new();
        log::trace!("buffer {id}: wrapped read-only host memory of {range}");
        Ok(Self {
            id,
            range,
            data,
            read_only: true,
            store: Store::HostRef(PhantomData),
        })
    }

    /// Wraps `data` read-only without copying. Writes through accessors panic.
    ///
    /// # Panics
    /// Panics if `data` has fewer elements than `range`.
    #[inline]
    pub fn from_host_ref(data: &'a [T], range: impl Into<Range<N>>) -> Self {
        Self::try_from_host_ref(data, range).expect("host data must cover the buffer range")
    }

    /// Creates a buffer whose memory and lifecycle follow `storage`.
    ///
    /// The buffer works in [`Storage::host_data`] if provided, or in its own allocation otherwise.
    /// Either is initialized from [`Storage::initial_data`] when provided.
    pub fn try_with_storage(
        storage: &'a mut (dyn Storage<T> + Send + 'a),
        range: impl Into<Range<N>>,
    ) -> Result<Self, BufferError>
    where
        T: Clone + Default,
    {
        let range = range.into();
        let size = range.size();
        check_size(range, storage.size())?;
        if let Some(initial) = storage.initial_data() {
            check_size(range, initial.len())?;
        }
        if let Some(data) = storage.host_data() {
            check_size(range, data.len())?;
        }
        storage.in_use();

        // The working memory is borrowed last, so no later call on `storage` invalidates it.
        let initial = storage
            .initial_data()
            .map(|data| (data.as_ptr(), data[..size].to_vec()));
        let (data, owned) = match storage.host_data() {
            Some(host) => {
                let found = host.len();
                let host = host.get_mut(..size).ok_or(BufferError::Size {
                    range: range.to_string(),
                    expected: size,
                    found,
                })?;
                if let Some((ptr, initial)) = initial {
                    if ptr != host.as_ptr() {
                        host.clone_from_slice(&initial);
                    }
                }
                (NonNull::from(host).cast::<T>(), None)
            }
            None => {
                let contents = match initial {
                    Some((_, initial)) => initial,
                    None => std::iter::repeat_with(T::default).take(size).collect(),
                };
                let (data, cells) = alloc(contents);
                (data, Some(cells))
            }
        };

        let id = BufferId::new();
        log::trace!("buffer {id}: created from storage of {range}");
        Ok(Self {
            id,
            range,
            data,
            read_only: false,
            store: Store::Storage {
                storage,
                owned,
                write_back: write_back::<T>,
            },
        })
    }

    /// Creates a buffer whose memory and lifecycle follow `storage`.
    ///
    /// # Panics
    /// Panics if the storage holds fewer elements than `range`.
    #[inline]
    pub fn with_storage(
        storage: &'a mut (dyn Storage<T> + Send + 'a),
        range: impl Into<Range<N>>,
    ) -> Self
    where
        T: Clone + Default,
    {
        Self::try_with_storage(storage, range).expect("storage must cover the buffer range")
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn range(&self) -> Range<N> {
        self.range
    }

    /// Number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.range.size()
    }

    /// Size of the elements in bytes.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.size() * size_of::<T>()
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[inline]
    fn as_slice(&self) -> &[T] {
        // SAFETY: `data` is valid for `size` elements while `self` lives.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.size()) }
    }

    /// Returns an accessor to the elements. Any number of accessors may be live at once.
    #[inline]
    pub fn get_access(&self, mode: Mode, target: Target) -> Accessor<'_, T, N> {
        Accessor::new(self.data, self.range, self.read_only, mode, target)
    }

    /// Returns an accessor to the elements targeting [`Target::GlobalBuffer`].
    #[inline]
    pub fn access(&self, mode: Mode) -> Accessor<'_, T, N> {
        self.get_access(mode, Target::GlobalBuffer)
    }

    /// Copies the current contents out, in row-major order.
    #[inline]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.as_slice().to_vec()
    }

    #[inline]
    pub fn data_type(&self) -> DataType
    where
        T: Scalar,
    {
        T::DATA_TYPE
    }

    /// Copies the current contents out as raw bytes.
    #[inline]
    pub fn to_bytes(&self) -> Vec<u8>
    where
        T: Scalar,
    {
        bytemuck::cast_slice(self.as_slice()).to_vec()
    }
}

/// Allocates a new buffer with the current contents, whatever the source's storage.
impl<T: Clone, const N: usize> Clone for Buffer<'_, T, N> {
    fn clone(&self) -> Self {
        let buffer = Self::owned(self.range, self.to_vec());
        log::trace!("buffer {}: copied from {}", buffer.id, self.id);
        buffer
    }
}

impl<T, const N: usize> Drop for Buffer<'_, T, N> {
    fn drop(&mut self) {
        let size = self.size();
        if let Store::Storage {
            storage,
            owned,
            write_back,
        } = &mut self.store
        {
            storage.completed();
            // SAFETY: the buffer's own cells hold `size` elements and are no longer borrowed.
            let owned = owned.as_deref().map(|cells| unsafe {
                std::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()).cast_const(), size)
            });
            (*write_back)(&mut **storage, owned, size);
            storage.destroy();
        }
        log::trace!("buffer {}: dropped ({})", self.id, self.store.name());
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use itertools::Itertools;

    use super::{Buffer, BufferError, Storage};
    use crate::{
        accessor::Mode,
        exec::{ExecutorBuilder, parallel_for},
        id,
        num::DataType,
        range,
    };

    #[test]
    fn test_owned() {
        let buffer = Buffer::<f32, 3>::zeros(range![2, 3, 4]);
        assert_eq!(buffer.size(), 24);
        assert_eq!(buffer.byte_size(), 96);
        assert!(buffer.to_vec().iter().all(|&x| x == 0.0));

        let buffer = Buffer::<u8, 2>::ones(range![1, 3]);
        assert_eq!(buffer.to_vec(), [1, 1, 1]);

        let buffer = Buffer::<String, 1>::new(range![2]);
        assert_eq!(buffer.to_vec(), ["", ""]);
    }

    #[test]
    fn test_from_vec() -> Result<(), Box<dyn Error>> {
        let buffer = Buffer::try_from_vec(range![2, 2], vec![1, 2, 3, 4, 5])?;
        assert_eq!(buffer.to_vec(), [1, 2, 3, 4]);
        assert_eq!(buffer.access(Mode::Read)[id![1, 0]], 3);
        assert!(matches!(
            Buffer::try_from_vec(range![2, 2], vec![1, 2, 3]),
            Err(BufferError::Size {
                expected: 4,
                found: 3,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_host_round_trip() {
        let mut host = [1, 2, 3, 4];
        {
            let buffer = Buffer::from_host(&mut host, range![4]);
            let mut acc = buffer.access(Mode::ReadWrite);
            acc[2] = 42;
            assert_eq!(acc[2], 42);
        }
        assert_eq!(host, [1, 2, 42, 4]);
    }

    #[test]
    fn test_copy_round_trip() {
        let mut host = [1, 2, 3, 4];
        {
            let buffer = Buffer::from_host(&mut host, range![4]);
            let copy = buffer.clone();
            let mut acc = copy.access(Mode::ReadWrite);
            acc[2] = 42;
            assert_eq!(acc[2], 42);
            assert_eq!(buffer.to_vec(), [1, 2, 3, 4]);
        }
        assert_eq!(host, [1, 2, 3, 4]);

        let host = [5, 6];
        let buffer = Buffer::from_host_ref(&host, range![2]);
        let copy = buffer.clone();
        assert!(buffer.is_read_only());
        assert!(!copy.is_read_only());
        copy.access(Mode::Write).set(0, 7);
        assert_eq!(copy.to_vec(), [7, 6]);
        assert_eq!(host, [5, 6]);
    }

    #[test]
    fn test_host_too_short() {
        let mut host = [0u8; 5];
        assert!(Buffer::try_from_host(&mut host, range![2, 3]).is_err());
        assert!(Buffer::try_from_host_ref(&host, range![2, 3]).is_err());
        assert!(Buffer::try_from_host(&mut host, range![2, 2]).is_ok());
    }

    #[test]
    fn test_iterator() {
        let data = [3, 1, 4, 1, 5];
        let buffer: Buffer<_, 1> = data[1..4].iter().copied().collect();
        assert_eq!(buffer.range(), range![3]);
        assert_eq!(buffer.to_vec(), [1, 4, 1]);

        let buffer = Buffer::from_slice(&data);
        assert_eq!(buffer.to_vec(), data);
    }

    #[test]
    fn test_increment() {
        let buffer = Buffer::<i32, 1>::zeros(range![3]);
        let mut acc = buffer.access(Mode::ReadWrite);
        parallel_for(range![3], |it| acc[it] += 1);
        assert_eq!(buffer.to_vec(), [1, 1, 1]);
        parallel_for(range![3], |it| acc[it] += 1);
        assert_eq!(buffer.to_vec(), [2, 2, 2]);
    }

    #[test]
    fn test_read_only_kernel_idempotent() -> Result<(), Box<dyn Error>> {
        let data = (0..12).collect_vec();
        let a = Buffer::from_vec(range![3, 4], data.clone());
        let b = Buffer::<i32, 2>::zeros(range![3, 4]);
        let x = a.access(Mode::Read);
        let y = b.access(Mode::Write);

        let executor = ExecutorBuilder::new().workers(2).build()?;
        executor.parallel_for(range![3, 4], |it| y.set(it, x[it] * 2));
        let first = (a.to_vec(), b.to_vec());
        executor.parallel_for(range![3, 4], |it| y.set(it, x[it] * 2));
        let second = (a.to_vec(), b.to_vec());

        assert_eq!(first, second);
        assert_eq!(first.0, data);
        assert_eq!(first.1, data.iter().map(|x| x * 2).collect_vec());
        Ok(())
    }

    #[test]
    fn test_to_bytes() {
        let buffer = Buffer::from_vec(range![2], vec![1u16, 0x0203]);
        assert_eq!(buffer.data_type(), DataType::U16);
        assert_eq!(buffer.to_bytes(), [1u16.to_ne_bytes(), 0x0203u16.to_ne_bytes()].concat());
    }

    #[derive(Debug, Default)]
    struct LogStorage {
        host: Option<Vec<i32>>,
        initial: Option<Vec<i32>>,
        output: Vec<i32>,
        events: Vec<&'static str>,
    }

    impl Storage<i32> for LogStorage {
        fn size(&self) -> usize {
            self.output.len()
        }

        fn host_data(&mut self) -> Option<&mut [i32]> {
            self.host.as_deref_mut()
        }

        fn initial_data(&self) -> Option<&[i32]> {
            self.initial.as_deref()
        }

        fn final_data(&mut self) -> Option<&mut [i32]> {
            Some(&mut self.output)
        }

        fn destroy(&mut self) {
            self.events.push("destroy");
        }

        fn in_use(&mut self) {
            self.events.push("in_use");
        }

        fn completed(&mut self) {
            self.events.push("completed");
        }
    }

    #[test]
    fn test_storage_owned() {
        let mut storage = LogStorage {
            initial: Some(vec![1, 2, 3]),
            output: vec![0; 3],
            ..Default::default()
        };
        {
            let buffer = Buffer::<i32, 1>::with_storage(&mut storage, range![3]);
            assert_eq!(buffer.to_vec(), [1, 2, 3]);
            let acc = buffer.access(Mode::ReadWrite);
            parallel_for(range![3], |it| acc.update(it, |x| *x *= 10));
        }
        assert_eq!(storage.output, [10, 20, 30]);
        assert_eq!(storage.events, ["in_use", "completed", "destroy"]);
    }

    #[test]
    fn test_storage_host() {
        let mut storage = LogStorage {
            host: Some(vec![0; 4]),
            initial: Some(vec![4, 3, 2, 1]),
            output: vec![0; 4],
            ..Default::default()
        };
        {
            let buffer = Buffer::<i32, 2>::with_storage(&mut storage, range![2, 2]);
            let acc = buffer.access(Mode::ReadWrite);
            acc.set(id![1, 1], 9);
        }
        assert_eq!(storage.host.as_deref(), Some(&[4, 3, 2, 9][..]));
        assert_eq!(storage.output, [4, 3, 2, 9]);
    }

    /// Works on one vector for host, initial and final data.
    #[derive(Debug, Default)]
    struct InPlaceStorage {
        data: Vec<i32>,
        events: Vec<&'static str>,
    }

    impl Storage<i32> for InPlaceStorage {
        fn size(&self) -> usize {
            self.data.len()
        }

        fn host_data(&mut self) -> Option<&mut [i32]> {
            Some(&mut self.data)
        }

        fn initial_data(&self) -> Option<&[i32]> {
            Some(&self.data)
        }

        fn final_data(&mut self) -> Option<&mut [i32]> {
            Some(&mut self.data)
        }

        fn destroy(&mut self) {
            self.events.push("destroy");
        }

        fn in_use(&mut self) {
            self.events.push("in_use");
        }

        fn completed(&mut self) {
            self.events.push("completed");
        }
    }

    #[test]
    fn test_storage_in_place() {
        let mut storage = InPlaceStorage {
            data: vec![1, 2, 3, 4, 5, 6],
            ..Default::default()
        };
        {
            let buffer = Buffer::<i32, 2>::with_storage(&mut storage, range![2, 3]);
            assert_eq!(buffer.to_vec(), [1, 2, 3, 4, 5, 6]);
            let acc = buffer.access(Mode::ReadWrite);
            parallel_for(range![2, 3], |it| acc.update(it, |x| *x = -*x));
        }
        assert_eq!(storage.data, [-1, -2, -3, -4, -5, -6]);
        assert_eq!(storage.events, ["in_use", "completed", "destroy"]);
    }

    #[test]
    fn test_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Buffer<'static, f32, 2>>();
        assert_sync::<Buffer<'static, f32, 2>>();
        assert_send::<Buffer<'static, String, 1>>();
    }

    #[test]
    fn test_storage_too_small() {
        let mut storage = LogStorage {
            output: vec![0; 2],
            ..Default::default()
        };
        assert!(Buffer::<i32, 1>::try_with_storage(&mut storage, range![3]).is_err());
        assert!(storage.events.is_empty());
    }
}
