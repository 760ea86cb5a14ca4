use parking_lot::Mutex;
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};
use vol_port::store::{AsOperationSequencer, OperationSequencer};

mod attachment;
mod snapshot;
mod volume;
mod volume_type;

/// The internal operations interface for all resources.
pub mod operations;
/// Generic interface implemented for all resources.
pub mod operations_helper;
/// Generic resources map.
pub mod resource_map;

/// Trait which allows a resource's unique identifier to be returned as the
/// associated type `Uid`.
pub trait ResourceUid {
    /// The type of the identifier.
    type Uid;
    /// The identifier itself.
    fn uid(&self) -> &Self::Uid;
}

impl<T: AsOperationSequencer + std::fmt::Debug + Clone> OperationSequencer for ResourceMutex<T> {
    fn sequence(&self) -> bool {
        self.lock().as_mut().sequence()
    }
    fn complete(&self) {
        self.lock().as_mut().complete();
    }
}

/// Operation Guard for a ResourceMutex<T> type.
pub type OperationGuardArc<T> = OperationGuard<ResourceMutex<T>, T>;

/// Ref-counted resource wrapped with a mutex.
#[derive(Debug, Clone)]
pub struct ResourceMutex<T> {
    inner: Arc<ResourceMutexInner<T>>,
}
/// Inner Resource which holds the mutex and an immutable value for peeking
/// into immutable fields such as identification fields.
#[derive(Debug)]
pub struct ResourceMutexInner<T> {
    resource: Mutex<T>,
    immutable_peek: Arc<T>,
}
impl<T: Clone> From<T> for ResourceMutex<T> {
    fn from(resource: T) -> Self {
        let immutable_peek = Arc::new(resource.clone());
        let resource = Mutex::new(resource);
        Self {
            inner: Arc::new(ResourceMutexInner {
                resource,
                immutable_peek,
            }),
        }
    }
}
impl<T> Deref for ResourceMutex<T> {
    type Target = Mutex<T>;
    fn deref(&self) -> &Self::Target {
        &self.inner.resource
    }
}
impl<T: Clone> ResourceMutex<T> {
    /// Peek the initial resource value without locking.
    /// # Note:
    /// This is only useful for immutable fields, such as the resource
    /// identifier.
    pub fn immutable_ref(&self) -> &Arc<T> {
        &self.inner.immutable_peek
    }
    /// Peek the initial resource value without locking, returning the `Arc`
    /// directly.
    pub fn immutable_arc(&self) -> Arc<T> {
        self.inner.immutable_peek.clone()
    }
}

impl<T: OperationSequencer, R> Deref for OperationGuard<T, R> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
impl<T: OperationSequencer, R> DerefMut for OperationGuard<T, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<T: OperationSequencer + Sized, R> AsRef<R> for OperationGuard<T, R> {
    fn as_ref(&self) -> &R {
        self.peek()
    }
}

/// Holds the resource's operation sequence exclusively for the guard's whole
/// lifetime; unlocks the sequence on drop.
#[derive(Debug)]
pub struct OperationGuard<T: OperationSequencer, R> {
    inner: T,
    inner_value: R,
    locked: bool,
}
impl<T: OperationSequencer + Sized, R> OperationGuard<T, R> {
    fn unlock(&mut self) {
        if self.locked {
            self.locked = false;
            self.inner.complete();
        }
    }
    /// Peek at the resource without locking.
    /// Note, this value may be outdated *during* an operation, and so must
    /// not be used to inspect fields which are being mutated.
    /// To inspect fields being mutated, please use the locked resource
    /// itself.
    fn peek(&self) -> &R {
        &self.inner_value
    }
    /// Create an operation guard for the resource.
    pub fn try_sequence(resource: &T, value: fn(&T) -> R) -> Result<Self, String> {
        // use result variable to make sure the mutex's temporary guard is
        // dropped
        match resource.sequence() {
            true => Ok(Self {
                inner: resource.clone(),
                inner_value: value(resource),
                locked: true,
            }),
            false => Err(format!("Resource '{resource:?}' is busy")),
        }
    }
}

/// Refresh the guard's peek value from the locked resource.
pub trait UpdateInnerValue {
    /// Refresh the value.
    fn update(&mut self);
}
impl<R: Clone + std::fmt::Debug + AsOperationSequencer> UpdateInnerValue
    for OperationGuard<ResourceMutex<R>, R>
{
    fn update(&mut self) {
        self.inner_value = self.inner.lock().clone();
    }
}

impl<T: OperationSequencer + Sized, R> Drop for OperationGuard<T, R> {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Tracing simple string messages with resource specific information,
/// eg: volume.uuid for volumes.
pub trait TraceStrLog {
    /// Error level message.
    fn error(&self, message: &str);
    /// Warn level message.
    fn warn(&self, message: &str);
    /// Info level message.
    fn info(&self, message: &str);
    /// Debug level message.
    fn debug(&self, message: &str);
    /// Trace level message.
    fn trace(&self, message: &str);
}

/// Execute code within a resource specific span which contains resource
/// specific information, such as volume.uuid for volumes.
/// # Example:
/// let volume = VolumeSpec::default();
/// volume.warn_span(|| tracing::warn!("This volume is not online"));
pub trait TraceSpan {
    /// Error span.
    fn error_span<F: FnOnce()>(&self, f: F);
    /// Warn span.
    fn warn_span<F: FnOnce()>(&self, f: F);
    /// Info span.
    fn info_span<F: FnOnce()>(&self, f: F);
    /// Debug span.
    fn debug_span<F: FnOnce()>(&self, f: F);
    /// Trace span.
    fn trace_span<F: FnOnce()>(&self, f: F);
}

/// Implements `TraceStrLog` for the given $type.
/// $log_macro is the logging fn, provided as a macro so we can statically
/// specify the log level: ($Self:tt, $Level:expr, $Message:tt)
#[macro_export]
macro_rules! impl_trace_str_log {
    ($log_macro:tt, $type:tt) => {
        impl $crate::controller::resources::TraceStrLog for $type {
            fn error(&self, message: &str) {
                $log_macro!(self, tracing::Level::ERROR, message);
            }
            fn warn(&self, message: &str) {
                $log_macro!(self, tracing::Level::WARN, message);
            }
            fn info(&self, message: &str) {
                $log_macro!(self, tracing::Level::INFO, message);
            }
            fn debug(&self, message: &str) {
                $log_macro!(self, tracing::Level::DEBUG, message);
            }
            fn trace(&self, message: &str) {
                $log_macro!(self, tracing::Level::TRACE, message);
            }
        }
        impl $crate::controller::resources::TraceStrLog
            for $crate::controller::resources::OperationGuardArc<$type>
        {
            fn error(&self, message: &str) {
                let peek = self.as_ref();
                $log_macro!(peek, tracing::Level::ERROR, message);
            }
            fn warn(&self, message: &str) {
                let peek = self.as_ref();
                $log_macro!(peek, tracing::Level::WARN, message);
            }
            fn info(&self, message: &str) {
                let peek = self.as_ref();
                $log_macro!(peek, tracing::Level::INFO, message);
            }
            fn debug(&self, message: &str) {
                let peek = self.as_ref();
                $log_macro!(peek, tracing::Level::DEBUG, message);
            }
            fn trace(&self, message: &str) {
                let peek = self.as_ref();
                $log_macro!(peek, tracing::Level::TRACE, message);
            }
        }
    };
}

/// Implements `TraceSpan` for the given $type.
/// $span_macro is the resource specific fn, provided as a macro so we can
/// statically specify the log level: ($Self:tt, $Level:expr, $func:expr)
#[macro_export]
macro_rules! impl_trace_span {
    ($span_macro:tt, $type:tt) => {
        impl $crate::controller::resources::TraceSpan for $type {
            fn error_span<F: FnOnce()>(&self, f: F) {
                $span_macro!(self, tracing::Level::ERROR, f);
            }
            fn warn_span<F: FnOnce()>(&self, f: F) {
                $span_macro!(self, tracing::Level::WARN, f);
            }
            fn info_span<F: FnOnce()>(&self, f: F) {
                $span_macro!(self, tracing::Level::INFO, f);
            }
            fn debug_span<F: FnOnce()>(&self, f: F) {
                $span_macro!(self, tracing::Level::DEBUG, f);
            }
            fn trace_span<F: FnOnce()>(&self, f: F) {
                $span_macro!(self, tracing::Level::TRACE, f);
            }
        }
    };
}
