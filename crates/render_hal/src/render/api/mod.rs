//! Backend-neutral rendering API
//!
//! Everything a collaborator needs to drive rendering without naming a native
//! handle: the capability traits each backend implements and the plain data
//! types passed through them.

mod render_backend;

pub use crate::render::handles::BufferHandle;
pub use render_backend::{Backend, Frame, GpuObject, ShaderProgram};

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// RGBA clear colour with normalized float components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClearColor {
    /// Red component
    pub r: f32,
    /// Green component
    pub g: f32,
    /// Blue component
    pub b: f32,
    /// Alpha component
    pub a: f32,
}

impl ClearColor {
    /// Opaque black
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    /// Opaque white
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    /// Fully transparent black
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Create a colour from float components
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create a colour from 8-bit components
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            f32::from(a) / 255.0,
        )
    }

    /// True when every component lies in `[0, 1]`
    pub fn is_normalized(&self) -> bool {
        self.to_array().iter().all(|c| (0.0..=1.0).contains(c))
    }

    /// Components as `[r, g, b, a]`
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for ClearColor {
    fn default() -> Self {
        Self::BLACK
    }
}

bitflags! {
    /// Attachments present on a render target
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Attachments: u8 {
        /// Colour attachment
        const COLOR = 0b01;
        /// Depth attachment
        const DEPTH = 0b10;
    }
}

/// One indexed draw inside a multi-draw-indirect batch
///
/// The field order and size match both `DrawElementsIndirectCommand` in
/// OpenGL and `VkDrawIndexedIndirectCommand`, so the same bytes feed either
/// backend's indirect buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    /// Number of indices to draw
    pub index_count: u32,
    /// Number of instances to draw
    pub instance_count: u32,
    /// First index within the bound index buffer
    pub first_index: u32,
    /// Value added to every index before fetching vertices
    pub base_vertex: i32,
    /// First instance id
    pub base_instance: u32,
}

impl DrawIndexedIndirect {
    /// Size of one command in bytes
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    /// Single-instance draw of `index_count` indices starting at `first_index`
    pub const fn new(first_index: u32, index_count: u32) -> Self {
        Self {
            index_count,
            instance_count: 1,
            first_index,
            base_vertex: 0,
            base_instance: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn indirect_command_matches_native_layout() {
        assert_eq!(DrawIndexedIndirect::STRIDE, 20);
        let command = DrawIndexedIndirect::new(6, 3);
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&command));
        assert_eq!(words, &[3, 1, 6, 0, 0]);
    }

    #[test]
    fn rgba8_colours_are_normalized() {
        let color = ClearColor::from_rgba8(255, 128, 0, 51);
        assert_relative_eq!(color.r, 1.0);
        assert_relative_eq!(color.g, 0.501_960_8, epsilon = 1e-6);
        assert_relative_eq!(color.b, 0.0);
        assert_relative_eq!(color.a, 0.2, epsilon = 1e-6);
        assert!(color.is_normalized());
        assert!(!ClearColor::new(-0.1, 0.0, 0.0, 1.0).is_normalized());
    }

    #[test]
    fn attachments_combine() {
        let both = Attachments::COLOR | Attachments::DEPTH;
        assert!(both.contains(Attachments::DEPTH));
        assert!(!Attachments::COLOR.contains(Attachments::DEPTH));
    }
}
