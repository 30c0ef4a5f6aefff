//! Per-frame contexts for multiple frames in flight.
//!
//! Each in-flight frame owns a [`FrameContext`]: its command recorder, its
//! shader-visible descriptor heaps and its upload ring. The CPU records frame
//! N+1 into one context while the GPU still executes frame N from another:
//!
//! ```text
//! Frame 0: [CPU record] [submit] ────────────────────────────────────────────►
//!                                [GPU execute frame 0] ──────────────────────►
//!
//! Frame 1:               [CPU record] [submit] ──────────────────────────────►
//!                                             [GPU execute frame 1] ─────────►
//!
//! Frame 2 (slot 0):                 [wait F0] [CPU record] [submit] ─────────►
//!
//! Time ──────────────────────────────────────────────────────────────────────►
//! ```
//!
//! A context moves through `Idle → Recording → Submitted` and back to
//! `Recording` only after the device fence reached the value stamped on its
//! last submission. Reusing a slot earlier would let the CPU overwrite
//! staging memory and descriptors the GPU is still reading.

use crate::descriptors::GpuDescriptorAllocator;
use crate::device::Device;
use crate::commands::CommandList;
use crate::error::RhiError;
use crate::resources::UploadRing;

/// Lifecycle of a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// Never used, or released at shutdown.
    #[default]
    Idle,
    /// The slot was reset and commands are being recorded.
    Recording,
    /// The slot's command list was handed to the queue.
    Submitted,
}

/// Transient per-frame resources.
#[derive(Debug)]
pub struct FrameContext {
    index: u32,
    state: FrameState,
    fence_value: u64,
    /// Command recorder, reused every time the slot comes around.
    pub commands: CommandList,
    /// Shader-visible descriptor heaps, cursors reset per use.
    pub descriptors: GpuDescriptorAllocator,
    /// Staging memory for buffer and texture uploads.
    pub upload: UploadRing,
}

impl FrameContext {
    /// Create an idle context for slot `index`.
    pub fn new(index: u32, descriptors: GpuDescriptorAllocator, upload: UploadRing) -> Self {
        Self {
            index,
            state: FrameState::Idle,
            fence_value: 0,
            commands: CommandList::new(),
            descriptors,
            upload,
        }
    }

    /// Slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Fence value stamped on the last submission from this slot, 0 if none.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Wait until the GPU retired this slot's previous work, then reset it.
    pub fn begin(&mut self, device: &Device) -> Result<(), RhiError> {
        if self.fence_value > 0 {
            device.wait(self.fence_value)?;
        }
        self.reset();
        Ok(())
    }

    /// Reset the recorder, descriptor cursors and upload ring.
    ///
    /// Only valid once the slot's fence value has been reached.
    pub fn reset(&mut self) {
        self.commands.reset();
        self.descriptors.reset();
        self.upload.reset();
        self.state = FrameState::Recording;
    }

    /// Record that the slot's work was submitted under `fence_value`.
    pub fn mark_submitted(&mut self, fence_value: u64) {
        debug_assert!(fence_value >= self.fence_value);
        self.fence_value = fence_value;
        self.state = FrameState::Submitted;
    }

    /// Return the slot to `Idle` after a final idle wait.
    pub fn release(&mut self) {
        self.commands.close();
        self.state = FrameState::Idle;
    }
}
