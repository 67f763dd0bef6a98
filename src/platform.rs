//! Host-only platform objects: devices, contexts, queues and error reporting.
//!
//! Every kernel runs on the host. A [`Queue`] owns the [`Executor`] its command groups
//! launch kernels with and runs each submitted command group immediately.

use std::sync::{Arc, LazyLock};

use derive_more::Display;
use thiserror::Error;

use crate::{
    buffer::BufferError,
    exec::{ExecError, Executor},
    range::IndexError,
};

#[derive(Debug, Error)]
pub enum Exception {
    #[error("range error: {0}")]
    Range(#[from] IndexError),
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
    #[error("pool error: {0}")]
    Pool(#[from] ExecError),
    #[error("device error: {0}")]
    Device(String),
}

/// Receives the errors raised by command groups of the objects it was given to.
pub trait ErrorHandler: std::fmt::Debug + Send + Sync {
    fn report_error(&self, error: &Exception);
}

/// Logs every reported error.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn report_error(&self, error: &Exception) {
        log::error!("{error}");
    }
}

static DEFAULT_HANDLER: LazyLock<Arc<dyn ErrorHandler>> =
    LazyLock::new(|| Arc::new(DefaultErrorHandler));

/// The handler used by objects constructed without one.
#[inline]
pub fn default_handler() -> Arc<dyn ErrorHandler> {
    DEFAULT_HANDLER.clone()
}

#[derive(Debug, Default, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    #[default]
    Host,
    Cpu,
    Gpu,
    Accelerator,
}

#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{name} ({device_type})")]
pub struct Device {
    name: String,
    device_type: DeviceType,
}

impl Device {
    /// The host device, the only one available.
    #[inline]
    pub fn host() -> Self {
        Self {
            name: "host".into(),
            device_type: DeviceType::Host,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        self.device_type == DeviceType::Host
    }
}

/// Scores devices; the device with the highest score is selected.
pub trait DeviceSelector {
    /// A negative score rejects the device.
    fn score(&self, device: &Device) -> i32;

    /// Picks the best device of all the platforms.
    fn select(&self) -> Result<Device, Exception> {
        Platform::get_platforms()
            .iter()
            .flat_map(|platform| platform.get_devices(None))
            .map(|device| (self.score(&device), device))
            .filter(|(score, _)| *score >= 0)
            .max_by_key(|(score, _)| *score)
            .map(|(_, device)| device)
            .ok_or_else(|| Exception::Device("no device accepted by the selector".into()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HostSelector;

impl DeviceSelector for HostSelector {
    fn score(&self, device: &Device) -> i32 {
        if device.is_host() { 1 } else { -1 }
    }
}

/// Prefers GPUs, falling back to any other device.
#[derive(Debug, Default, Clone, Copy)]
pub struct GpuSelector;

impl DeviceSelector for GpuSelector {
    fn score(&self, device: &Device) -> i32 {
        match device.device_type() {
            DeviceType::Gpu => 2,
            _ => 1,
        }
    }
}

/// The host platform.
#[derive(Debug, Clone)]
pub struct Platform {
    handler: Arc<dyn ErrorHandler>,
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(default_handler())
    }
}

impl Platform {
    #[inline]
    pub fn new(handler: Arc<dyn ErrorHandler>) -> Self {
        Self { handler }
    }

    /// All the platforms available.
    pub fn get_platforms() -> Vec<Platform> {
        vec![Platform::default()]
    }

    /// The devices of this platform, restricted to `device_type` if given.
    pub fn get_devices(&self, device_type: Option<DeviceType>) -> Vec<Device> {
        [Device::host()]
            .into_iter()
            .filter(|device| device_type.is_none_or(|t| t == device.device_type()))
            .collect()
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        true
    }

    /// No extension is supported.
    #[inline]
    pub fn has_extension(&self, name: &str) -> bool {
        log::debug!("platform extension {name} is not supported");
        false
    }

    #[inline]
    pub fn handler(&self) -> Arc<dyn ErrorHandler> {
        self.handler.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    device: Device,
    handler: Arc<dyn ErrorHandler>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            device: Device::host(),
            handler: default_handler(),
        }
    }
}

impl Context {
    /// Creates a context on the device picked by `selector`.
    pub fn new(selector: &impl DeviceSelector) -> Result<Self, Exception> {
        Self::with_handler(selector, default_handler())
    }

    pub fn with_handler(
        selector: &impl DeviceSelector,
        handler: Arc<dyn ErrorHandler>,
    ) -> Result<Self, Exception> {
        let device = selector.select()?;
        log::debug!("context created on {device}");
        Ok(Self { device, handler })
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn handler(&self) -> Arc<dyn ErrorHandler> {
        self.handler.clone()
    }
}

/// Runs command groups in submission order, each one to completion before `submit` returns.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    context: Context,
    executor: Executor,
}

impl Queue {
    /// Creates a queue that launches kernels on the calling thread.
    #[inline]
    pub fn new(context: Context) -> Self {
        Self::with_executor(context, Executor::sequential())
    }

    #[inline]
    pub fn with_executor(context: Context, executor: Executor) -> Self {
        Self { context, executor }
    }

    /// Creates a queue in a new context on the device picked by `selector`.
    pub fn from_selector(selector: &impl DeviceSelector) -> Result<Self, Exception> {
        Ok(Self::new(Context::new(selector)?))
    }

    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[inline]
    pub fn device(&self) -> &Device {
        self.context.device()
    }

    #[inline]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Runs the command group `f` now.
    #[inline]
    pub fn submit<R>(&self, f: impl FnOnce(&Executor) -> R) -> R {
        log::trace!("command group submitted on {}", self.device());
        f(&self.executor)
    }

    /// Runs the command group `f` now. Its error, if any, is reported to the context's handler.
    pub fn try_submit<R, E>(
        &self,
        f: impl FnOnce(&Executor) -> Result<R, E>,
    ) -> Result<R, Exception>
    where
        E: Into<Exception>,
    {
        self.submit(f).map_err(|err| {
            let err = err.into();
            self.context.handler.report_error(&err);
            err
        })
    }
}

/// Runs the command group `f` on `queue` now.
#[inline]
pub fn command_group<R>(queue: &Queue, f: impl FnOnce(&Executor) -> R) -> R {
    queue.submit(f)
}
