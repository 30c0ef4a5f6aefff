//! Device, queue and fence.
//!
//! A [`Device`] wraps the active backend's single queue and its single
//! monotonically increasing fence. Every synchronization point in the
//! renderer is a fence value:
//!
//! - a frame slot stores the value signaled after its submission and is
//!   reused only once the fence reaches it;
//! - [`Device::wait_idle`] signals a fresh value and waits for it.
//!
//! Queue submission, resize and shutdown take the device lock. The lock is
//! reentrant so a caller holding it for a whole stop-the-world operation can
//! still submit and wait.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::backend::{FenceStatus, GpuBackend, GpuTexture};
use crate::commands::Command;
use crate::error::RhiError;

/// Queue bookkeeping protected by the device lock.
#[derive(Debug, Default)]
pub struct QueueState {
    last_signaled: Cell<u64>,
}

/// Guard holding the device lock.
pub type DeviceLock<'a> = ReentrantMutexGuard<'a, QueueState>;

/// One GPU connection with one queue and one fence.
pub struct Device {
    backend: Arc<dyn GpuBackend>,
    queue: ReentrantMutex<QueueState>,
    fence_timeout: Duration,
}

impl Device {
    /// Wrap a backend. Fence waits longer than `fence_timeout` are reported
    /// as [`RhiError::FenceTimeout`].
    pub fn new(backend: Arc<dyn GpuBackend>, fence_timeout: Duration) -> Self {
        Self {
            backend,
            queue: ReentrantMutex::new(QueueState::default()),
            fence_timeout,
        }
    }

    /// The active backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Take the device lock for a multi-step operation.
    pub fn lock(&self) -> DeviceLock<'_> {
        self.queue.lock()
    }

    /// Submit a command list and signal a new fence value after it.
    ///
    /// Returns the value; the list's resources may be reused once
    /// [`completed_value`](Self::completed_value) reaches it.
    pub fn submit(&self, commands: Vec<Command>) -> Result<u64, RhiError> {
        let queue = self.queue.lock();
        log::debug!(
            "submitting {} commands on the {} queue",
            commands.len(),
            self.backend.name()
        );
        self.backend.submit(commands)?;
        Self::signal_locked(&self.backend, &queue)
    }

    /// Increment the fence and enqueue a signal for the new value.
    pub fn signal(&self) -> Result<u64, RhiError> {
        let queue = self.queue.lock();
        Self::signal_locked(&self.backend, &queue)
    }

    fn signal_locked(backend: &Arc<dyn GpuBackend>, queue: &QueueState) -> Result<u64, RhiError> {
        let value = queue.last_signaled.get() + 1;
        backend.signal(value)?;
        queue.last_signaled.set(value);
        Ok(value)
    }

    /// Block until the fence reaches `value`.
    pub fn wait(&self, value: u64) -> Result<(), RhiError> {
        if self.backend.completed_value() >= value {
            return Ok(());
        }
        log::trace!("waiting for fence value {value}");
        match self.backend.wait(value, self.fence_timeout)? {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::Unsignaled => Err(RhiError::FenceTimeout {
                value,
                completed: self.backend.completed_value(),
            }),
        }
    }

    /// Signal a new value and wait for it: every earlier submission has
    /// retired when this returns.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        let value = {
            let queue = self.queue.lock();
            Self::signal_locked(&self.backend, &queue)?
        };
        self.wait(value)
    }

    /// Queue presentation after all earlier submissions.
    pub fn present(&self, texture: &GpuTexture, image_index: u32) -> Result<(), RhiError> {
        let _queue = self.queue.lock();
        self.backend.present(texture, image_index)
    }

    /// Highest fence value the GPU has reached.
    pub fn completed_value(&self) -> u64 {
        self.backend.completed_value()
    }

    /// Highest fence value enqueued so far.
    pub fn last_signaled(&self) -> u64 {
        self.queue.lock().last_signaled.get()
    }

    /// Returns true when no signaled value is outstanding.
    pub fn is_idle(&self) -> bool {
        self.completed_value() >= self.last_signaled()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend.name())
            .field("last_signaled", &self.last_signaled())
            .field("completed", &self.completed_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    fn device() -> (Device, crate::backend::software::SoftwareQueueControl) {
        let backend = SoftwareBackend::new().unwrap();
        let control = backend.control();
        (
            Device::new(Arc::new(backend), Duration::from_secs(5)),
            control,
        )
    }

    #[test]
    fn test_signal_is_monotonic() {
        let (device, _) = device();
        assert_eq!(device.signal().unwrap(), 1);
        assert_eq!(device.signal().unwrap(), 2);
        assert_eq!(device.submit(Vec::new()).unwrap(), 3);
        assert_eq!(device.last_signaled(), 3);
    }

    #[test]
    fn test_wait_idle() {
        let (device, _) = device();
        device.submit(Vec::new()).unwrap();
        device.wait_idle().unwrap();
        assert!(device.is_idle());
        assert_eq!(device.completed_value(), 2);
    }

    #[test]
    fn test_wait_times_out() {
        let backend = SoftwareBackend::new().unwrap();
        let control = backend.control();
        let device = Device::new(Arc::new(backend), Duration::from_millis(20));
        control.pause();
        let value = device.signal().unwrap();
        assert_eq!(
            device.wait(value).unwrap_err(),
            RhiError::FenceTimeout {
                value: 1,
                completed: 0
            }
        );
        control.resume();
        device.wait(value).unwrap();
    }

    #[test]
    fn test_lock_is_reentrant() {
        let (device, _) = device();
        let _guard = device.lock();
        device.wait_idle().unwrap();
    }
}
