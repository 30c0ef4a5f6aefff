//! Opaque resource handles.
//!
//! Every object the renderer owns is exposed to callers as a 32-bit handle.
//! Handles are 1-based indices into a dense table; `0` is reserved as the
//! null handle. A handle stays bound to the same slot for the lifetime of
//! the table, so a destroyed handle can be recognised and rejected instead
//! of silently resolving to a newer resource.

use std::fmt;

/// Common behaviour of all typed handles.
pub trait Handle: Copy + Eq + fmt::Debug {
    /// Human readable name of the object kind, used in error messages.
    const KIND: &'static str;

    /// Builds a handle from its raw value.
    fn from_raw(raw: u32) -> Self;

    /// Returns the raw 32-bit value.
    fn raw(self) -> u32;

    /// Returns true for the reserved null handle.
    fn is_null(self) -> bool {
        self.raw() == 0
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The reserved null handle.
            pub const NULL: Self = Self(0);
        }

        impl Handle for $name {
            const KIND: &'static str = $kind;

            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

define_handle!(
    /// Handle to a GPU buffer.
    BufferHandle,
    "buffer"
);
define_handle!(
    /// Handle to a GPU texture (including swapchain back buffers).
    TextureHandle,
    "texture"
);
define_handle!(
    /// Handle to a sampler.
    SamplerHandle,
    "sampler"
);
define_handle!(
    /// Handle to a shader module.
    ShaderModuleHandle,
    "shader module"
);
define_handle!(
    /// Handle to an immutable graphics pipeline.
    PipelineHandle,
    "pipeline"
);
define_handle!(
    /// Handle to a bind group layout.
    BindGroupLayoutHandle,
    "bind group layout"
);
define_handle!(
    /// Handle to a bind group.
    BindGroupHandle,
    "bind group"
);
define_handle!(
    /// Handle to a swapchain.
    SwapchainHandle,
    "swapchain"
);
define_handle!(
    /// Handle to an open command list.
    CommandListHandle,
    "command list"
);

static_assertions::assert_eq_size!(BufferHandle, u32);
static_assertions::assert_eq_size!(TextureHandle, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(BufferHandle::NULL.is_null());
        assert!(BufferHandle::default().is_null());
        assert!(!BufferHandle::from_raw(1).is_null());
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(TextureHandle::from_raw(7).to_string(), "texture#7");
        assert_eq!(BindGroupHandle::from_raw(2).to_string(), "bind group#2");
    }

    #[test]
    fn test_raw_round_trip() {
        let handle = PipelineHandle::from_raw(42);
        assert_eq!(handle.raw(), 42);
        assert_eq!(PipelineHandle::from_raw(handle.raw()), handle);
    }
}
