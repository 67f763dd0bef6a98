//! `tessera` runs data-parallel kernels on the host over 1 to 3-dimensional index spaces.
//!
//! ## Key Components
//! 1. **Index Spaces**:
//!    - [`Range`] extents and [`Id`] coordinates with element-wise arithmetic.
//!    - [`NDRange`] splits a global range into work-groups.
//!
//! 2. **Execution Engine**:
//!    - Flat launches hand kernels an [`Item`], ND-range launches an [`NDItem`].
//!    - Hierarchical launches run per [`Group`], then per work-item of the group.
//!    - An [`Executor`] fans the outermost dimension out on a worker pool.
//!
//! 3. **Memory**:
//!    - [`Buffer`]s own or wrap row-major data.
//!    - Kernels read and write it through `Copy` [`Accessor`]s.
//!
//! 4. **Platform**:
//!    - Host-only [`Device`], [`Context`] and [`Queue`] objects with pluggable error handlers.
//!
//! ```
//! use tessera::{Buffer, Mode, parallel_for, range};
//!
//! let buffer = Buffer::<u32, 2>::zeros(range![2, 3]);
//! let mut acc = buffer.access(Mode::ReadWrite);
//! parallel_for(range![2, 3], |item| acc[item] = item.linear_id() as u32);
//! assert_eq!(buffer.to_vec(), [0, 1, 2, 3, 4, 5]);
//! ```

pub mod accessor;
pub mod buffer;
pub mod exec;
pub mod nd_range;
pub mod num;
pub mod platform;
pub mod range;

pub use accessor::{AccessIndex, Accessor, Mode, Target};
pub use buffer::{Buffer, BufferError, BufferId, Storage};
pub use exec::{
    ExecError, Executor, ExecutorBuilder, Schedule, parallel_for, parallel_for_nd,
    parallel_for_offset, parallel_for_workgroup, parallel_for_workitem, single_task,
};
pub use nd_range::{Group, Item, NDItem, NDRange};
pub use platform::{
    Context, DefaultErrorHandler, Device, DeviceSelector, DeviceType, ErrorHandler, Exception,
    GpuSelector, HostSelector, Platform, Queue, command_group,
};
pub use range::{Id, IndexError, Range};

/// Installs a `tracing` subscriber printing launch spans to stderr.
#[cfg(feature = "trace")]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .try_init();
}
