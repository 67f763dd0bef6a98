//! The iteration engine.
//!
//! Every launch shape reduces to one recursive walk over the dimensions of a [`Range`]:
//! dimension 0 is the outermost loop and dimension `N - 1` varies fastest, which matches
//! the row-major storage order of [`Buffer`](crate::buffer::Buffer).
//!
//! The free functions run on the calling thread in enumeration order and accept `FnMut`
//! kernels. An [`Executor`] selects a [`Schedule`]; its parallel schedule fans the
//! outermost dimension out on a fixed-size worker pool and requires `Fn + Sync` kernels.
//! Every launch returns only after all invocations have completed.

#[cfg(feature = "rayon")]
use std::sync::Arc;

use derive_more::Display;
use thiserror::Error;

use crate::{
    nd_range::{Group, Item, NDItem, NDRange},
    range::{Id, Range},
};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("executor error: the parallel schedule needs at least one worker")]
    Workers,
    #[cfg(feature = "rayon")]
    #[error("executor error: failed to build the worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// How the invocations of a launch are distributed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Schedule {
    /// All invocations on the calling thread, in enumeration order.
    #[default]
    #[display("sequential")]
    Sequential,
    /// The outermost dimension statically split over a pool of this many workers.
    /// No ordering holds between invocations of different workers.
    #[display("parallel({_0})")]
    Parallel(usize),
}

impl Schedule {
    /// A parallel schedule with one worker per available core.
    #[inline]
    pub fn parallel() -> Self {
        let workers = std::thread::available_parallelism().map_or(1, |x| x.get());
        Self::Parallel(workers)
    }
}

#[inline]
fn to_id<const N: usize>(index: &[usize; N]) -> Id<N> {
    Id::new(index.map(|x| x as isize))
}

/// Walks the dimensions `N - level..N` of `extent`, setting each slot of `index` in turn.
/// `level` counts the dimensions left; at level 0 the coordinate is complete and `f` runs.
fn iterate<const N: usize, F>(extent: &[usize; N], level: usize, index: &mut [usize; N], f: &mut F)
where
    F: FnMut(&[usize; N]),
{
    match level {
        0 => f(index),
        _ => {
            let dimension = N - level;
            for x in 0..extent[dimension] {
                index[dimension] = x;
                iterate(extent, level - 1, index, f);
            }
        }
    }
}

/// Enumerates every coordinate of `range` on the calling thread.
#[inline]
fn enumerate<const N: usize>(range: Range<N>, mut f: impl FnMut(&[usize; N])) {
    let extent = range.to_array();
    let mut index = [0; N];
    iterate(&extent, N, &mut index, &mut f);
}

/// Splits dimension 0 of `extent` into at most `workers` contiguous chunks, one pool task each.
/// Each task owns its coordinate and walks the inner dimensions sequentially.
#[cfg(feature = "rayon")]
fn enumerate_parallel<const N: usize, F>(
    pool: &rayon::ThreadPool,
    workers: usize,
    range: Range<N>,
    f: &F,
) where
    F: Fn(&[usize; N]) + Sync,
{
    let extent = range.to_array();
    let outer = extent[0];
    let chunk = outer.div_ceil(workers.max(1));
    if chunk == 0 {
        return;
    }
    pool.scope(|scope| {
        for start in (0..outer).step_by(chunk) {
            let end = (start + chunk).min(outer);
            scope.spawn(move |_| {
                let mut index = [0; N];
                for x in start..end {
                    index[0] = x;
                    iterate(&extent, N - 1, &mut index, &mut |index| f(index));
                }
            });
        }
    });
}

#[inline]
fn check_local<const N: usize>(nd_range: &NDRange<N>) {
    assert!(
        !nd_range.local_range().is_empty(),
        "work-group range {} has a zero extent",
        nd_range.local_range()
    );
}

/// Invokes `f` once per coordinate of `[0, range)`.
#[inline]
pub fn parallel_for<const N: usize>(range: impl Into<Range<N>>, f: impl FnMut(Item<N>)) {
    parallel_for_offset(range, Id::default(), f)
}

/// Invokes `f` once per coordinate of `[0, range)`, each translated by `offset`.
pub fn parallel_for_offset<const N: usize>(
    range: impl Into<Range<N>>,
    offset: impl Into<Id<N>>,
    mut f: impl FnMut(Item<N>),
) {
    let range = range.into();
    let offset = offset.into();
    log::trace!("parallel_for: range {range}, offset {offset}");
    enumerate(range, |index| f(Item::new(to_id(index) + offset, range, offset)));
}

/// Invokes `f` once per coordinate of the global range of `nd_range`.
///
/// # Panics
/// Panics if the local range has a zero extent.
pub fn parallel_for_nd<const N: usize>(nd_range: NDRange<N>, mut f: impl FnMut(NDItem<N>)) {
    check_local(&nd_range);
    log::trace!("parallel_for_nd: {nd_range}");
    let local = nd_range.local_range();
    let offset = nd_range.offset();
    enumerate(nd_range.global_range(), |index| {
        let global = to_id(index) + offset;
        f(NDItem::new(global, global % local, nd_range))
    });
}

/// Invokes `f` once per work-group of `nd_range`.
/// The kernel iterates its own work-items, usually with [`parallel_for_workitem`].
///
/// # Panics
/// Panics if the local range has a zero extent.
pub fn parallel_for_workgroup<const N: usize>(nd_range: NDRange<N>, mut f: impl FnMut(Group<N>)) {
    check_local(&nd_range);
    log::trace!("parallel_for_workgroup: {nd_range}");
    enumerate(nd_range.group_range(), |index| {
        f(Group::new(to_id(index), nd_range))
    });
}

/// Invokes `f` once per work-item of `group`, never past the global range.
pub fn parallel_for_workitem<const N: usize>(group: Group<N>, mut f: impl FnMut(Item<N>)) {
    let range = group.global_range();
    let offset = group.offset();
    let origin = group.group_id() * group.local_range() + offset;
    enumerate(group.item_range(), |index| {
        f(Item::new(origin + to_id(index), range, offset))
    });
}

/// Runs `f` once on the calling thread.
#[inline]
pub fn single_task<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[derive(Debug, Default, Clone)]
pub struct ExecutorBuilder {
    pub schedule: Schedule,
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Uses the parallel schedule with `workers` workers.
    pub fn workers(self, workers: usize) -> Self {
        self.schedule(Schedule::Parallel(workers))
    }

    pub fn build(self) -> Result<Executor, ExecError> {
        let schedule = self.schedule;
        match schedule {
            Schedule::Sequential => Ok(Executor {
                schedule,
                #[cfg(feature = "rayon")]
                pool: None,
            }),
            Schedule::Parallel(0) => Err(ExecError::Workers),
            #[cfg(feature = "rayon")]
            Schedule::Parallel(workers) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|index| format!("tessera-worker-{index}"))
                    .build()?;
                log::debug!("executor: built a pool of {workers} workers");
                let pool = Some(Arc::new(pool));
                Ok(Executor { schedule, pool })
            }
            #[cfg(not(feature = "rayon"))]
            Schedule::Parallel(workers) => {
                log::debug!(
                    "executor: {workers} workers requested without `rayon`, running sequentially"
                );
                Ok(Executor { schedule })
            }
        }
    }
}

/// Launches kernels under a fixed [`Schedule`].
///
/// A parallel executor owns its worker pool; clones share it.
#[derive(Debug, Default, Clone)]
pub struct Executor {
    schedule: Schedule,
    #[cfg(feature = "rayon")]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Executor {
    /// An executor running every launch on the calling thread.
    #[inline]
    pub fn sequential() -> Self {
        Self::default()
    }

    #[inline]
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Returns an executor for another schedule, sharing the pool if the schedule is unchanged.
    pub fn with_schedule(&self, schedule: Schedule) -> Result<Self, ExecError> {
        match schedule == self.schedule {
            true => Ok(self.clone()),
            false => ExecutorBuilder::new().schedule(schedule).build(),
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(range = %range)))]
    fn launch<const N: usize, F>(&self, range: Range<N>, f: F)
    where
        F: Fn(&[usize; N]) + Sync,
    {
        let start = instant::Instant::now();
        match self.schedule {
            Schedule::Sequential => enumerate(range, f),
            #[cfg(feature = "rayon")]
            Schedule::Parallel(workers) => match &self.pool {
                Some(pool) => enumerate_parallel(pool, workers, range, &f),
                None => enumerate(range, f),
            },
            #[cfg(not(feature = "rayon"))]
            Schedule::Parallel(_) => enumerate(range, f),
        }
        log::trace!(
            "launch: range {range} on {} in {:?}",
            self.schedule,
            start.elapsed()
        );
    }

    /// Invokes `f` once per coordinate of `[0, range)`.
    #[inline]
    pub fn parallel_for<const N: usize, F>(&self, range: impl Into<Range<N>>, f: F)
    where
        F: Fn(Item<N>) + Sync,
    {
        self.parallel_for_offset(range, Id::default(), f)
    }

    /// Invokes `f` once per coordinate of `[0, range)`, each translated by `offset`.
    pub fn parallel_for_offset<const N: usize, F>(
        &self,
        range: impl Into<Range<N>>,
        offset: impl Into<Id<N>>,
        f: F,
    ) where
        F: Fn(Item<N>) + Sync,
    {
        let range = range.into();
        let offset = offset.into();
        self.launch(range, |index| f(Item::new(to_id(index) + offset, range, offset)));
    }

    /// Invokes `f` once per coordinate of the global range of `nd_range`.
    ///
    /// # Panics
    /// Panics if the local range has a zero extent.
    pub fn parallel_for_nd<const N: usize, F>(&self, nd_range: NDRange<N>, f: F)
    where
        F: Fn(NDItem<N>) + Sync,
    {
        check_local(&nd_range);
        let local = nd_range.local_range();
        let offset = nd_range.offset();
        self.launch(nd_range.global_range(), |index| {
            let global = to_id(index) + offset;
            f(NDItem::new(global, global % local, nd_range))
        });
    }

    /// Invokes `f` once per work-group of `nd_range`.
    ///
    /// # Panics
    /// Panics if the local range has a zero extent.
    pub fn parallel_for_workgroup<const N: usize, F>(&self, nd_range: NDRange<N>, f: F)
    where
        F: Fn(Group<N>) + Sync,
    {
        check_local(&nd_range);
        self.launch(nd_range.group_range(), |index| {
            f(Group::new(to_id(index), nd_range))
        });
    }

    /// Invokes `f` once per work-item of `group`, never past the global range.
    pub fn parallel_for_workitem<const N: usize, F>(&self, group: Group<N>, f: F)
    where
        F: Fn(Item<N>) + Sync,
    {
        let range = group.global_range();
        let offset = group.offset();
        let origin = group.group_id() * group.local_range() + offset;
        self.launch(group.item_range(), |index| {
            f(Item::new(origin + to_id(index), range, offset))
        });
    }
}
