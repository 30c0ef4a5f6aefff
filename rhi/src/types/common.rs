//! Common types shared across the RHI.

// ============================================================================
// Extent2d
// ============================================================================

/// 2D extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered by the extent.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns true if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ============================================================================
// Viewport
// ============================================================================

/// Viewport configuration for rendering.
///
/// Uses the D3D/wgpu conventions: depth range `[0, 1]`, origin at the
/// top-left corner, +Y in NDC pointing up and mapped to decreasing pixel
/// rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// X coordinate of the viewport's top-left corner.
    pub x: f32,
    /// Y coordinate of the viewport's top-left corner.
    pub y: f32,
    /// Width of the viewport.
    pub width: f32,
    /// Height of the viewport.
    pub height: f32,
    /// Minimum depth value (default: 0.0).
    pub min_depth: f32,
    /// Maximum depth value (default: 1.0).
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    /// Create a new viewport with standard `[0, 1]` depth range.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Create a viewport covering a whole target.
    pub fn from_extent(extent: Extent2d) -> Self {
        Self::new(0.0, 0.0, extent.width as f32, extent.height as f32)
    }
}

// ============================================================================
// Scissor Rectangle
// ============================================================================

/// Scissor rectangle for clipping rendering.
///
/// Pixels outside the scissor rectangle are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    /// X coordinate of the top-left corner.
    pub x: i32,
    /// Y coordinate of the top-left corner.
    pub y: i32,
    /// Width of the scissor rectangle.
    pub width: u32,
    /// Height of the scissor rectangle.
    pub height: u32,
}

impl ScissorRect {
    /// Create a new scissor rectangle.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a scissor rectangle covering a whole target.
    pub fn from_extent(extent: Extent2d) -> Self {
        Self::new(0, 0, extent.width, extent.height)
    }
}

// ============================================================================
// Clear color
// ============================================================================

/// RGBA clear color for color attachments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    /// Opaque black.
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Create a clear color.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Components as an `[r, g, b, a]` array.
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<[f32; 4]> for ClearColor {
    fn from(rgba: [f32; 4]) -> Self {
        Self::new(rgba[0], rgba[1], rgba[2], rgba[3])
    }
}
