//! RHI error types.

use thiserror::Error;

/// Errors reported by the RHI.
///
/// Construction failures surface from [`Renderer::new`](crate::Renderer::new);
/// everything else is returned from the failing operation and leaves the
/// renderer usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RhiError {
    /// The device, queue, fence or a heap could not be created.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    /// A native API call failed.
    #[error("backend failure: {0}")]
    Backend(String),
    /// The handle is null or was never issued.
    #[error("invalid {kind} handle {handle}")]
    InvalidHandle { kind: &'static str, handle: u32 },
    /// The handle refers to a destroyed object.
    #[error("{kind} handle {handle} refers to a destroyed object")]
    StaleHandle { kind: &'static str, handle: u32 },
    /// An argument is out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The call is not valid in the current renderer state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// The payload does not fit in the upload ring even after wrapping.
    #[error("upload of {requested} bytes exceeds the upload ring capacity of {capacity} bytes")]
    UploadOverflow { requested: u64, capacity: u64 },
    /// A linear descriptor heap ran out of slots.
    #[error("{heap} descriptor heap exhausted (capacity {capacity})")]
    DescriptorHeapExhausted { heap: &'static str, capacity: u32 },
    /// The GPU did not reach a fence value in time.
    #[error("timed out waiting for fence value {value} (completed {completed})")]
    FenceTimeout { value: u64, completed: u64 },
    /// The device stopped processing work.
    #[error("GPU device lost")]
    DeviceLost,
    /// The active backend does not provide a required capability.
    #[error("backend is missing required capabilities: {0}")]
    MissingCapability(String),
    /// The renderer configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RhiError {
    /// Returns true for exhaustion errors a caller can recover from by
    /// taking a slower path.
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::UploadOverflow { .. } | Self::DescriptorHeapExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RhiError::DeviceLost;
        assert_eq!(err.to_string(), "GPU device lost");

        let err = RhiError::InitializationFailed("no adapter".to_string());
        assert_eq!(err.to_string(), "initialization failed: no adapter");

        let err = RhiError::StaleHandle {
            kind: "buffer",
            handle: 3,
        };
        assert_eq!(err.to_string(), "buffer handle 3 refers to a destroyed object");
    }

    #[test]
    fn test_exhaustion_classification() {
        assert!(
            RhiError::UploadOverflow {
                requested: 10,
                capacity: 4
            }
            .is_exhaustion()
        );
        assert!(!RhiError::DeviceLost.is_exhaustion());
    }
}
