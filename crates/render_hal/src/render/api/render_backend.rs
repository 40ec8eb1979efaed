//! Backend abstraction traits for the rendering system
//!
//! This module defines the capabilities every native backend must provide so
//! that [`RenderDevice`](crate::render::RenderDevice) can drive it without
//! knowing which API sits underneath.
//!
//! The two backends disagree on where commands go. OpenGL executes calls
//! against the current context immediately; Vulkan records them into a
//! command buffer that is submitted later. The traits paper over this with an
//! `Encoder`: the frame owns it, and programs and objects write their bind
//! and draw commands through it. For OpenGL the encoder is the context itself,
//! for Vulkan it is the frame's command buffer.

use super::{Attachments, ClearColor, DrawIndexedIndirect};
use crate::render::handles::BufferHandle;
use crate::render::layout::VertexLayout;
use crate::render::shader::ProgramStatus;
use crate::render::RenderResult;

/// A native graphics backend
///
/// Implemented by zero-sized marker types. Exactly one backend is compiled
/// into a given binary, so generic code over `B: Backend` monomorphizes to
/// direct native calls.
pub trait Backend: Sized + 'static {
    /// Human-readable backend name for logs
    const NAME: &'static str;

    /// Destination for bind and draw commands, owned by a frame
    type Encoder;
    /// Render target type
    type Frame: Frame<Self>;
    /// Linked shader program type
    type Program: ShaderProgram<Self>;
    /// GPU buffer bundle type
    type Object: GpuObject<Self>;
}

/// A render target, on-screen or off-screen
pub trait Frame<B: Backend> {
    /// True when every required attachment exists and the dimensions are valid
    ///
    /// Pure query: it never changes GPU state.
    fn is_complete(&self) -> bool;

    /// Width and height in pixels
    fn dimensions(&self) -> (u32, u32);

    /// Attachments present on the target
    fn attachments(&self) -> Attachments;

    /// Make this frame the destination of subsequent draws
    ///
    /// Idempotent: binding an already-bound frame does nothing further.
    fn set_as_render_target(&self) -> RenderResult<()>;

    /// Reset colour, and depth if present, to `color` / far plane
    fn clear(&self, color: ClearColor) -> RenderResult<()>;

    /// Command destination used by programs and objects drawing into this frame
    fn encoder(&self) -> &B::Encoder;
}

/// A compiled and linked shader program
pub trait ShaderProgram<B: Backend> {
    /// Outcome of compilation and linking
    fn status(&self) -> &ProgramStatus;

    /// True only once every stage compiled and the program linked
    fn usable(&self) -> bool {
        self.status().is_linked()
    }

    /// Vertex layouts the program was built for, one per binding
    ///
    /// `None` when the program reads attributes by location from whatever
    /// vertex state is bound.
    fn vertex_layouts(&self) -> Option<&[VertexLayout]> {
        None
    }

    /// Make this program current for subsequent draws
    fn bind(&self, encoder: &B::Encoder) -> RenderResult<()>;
}

/// A bundle of vertex buffers and handle-addressed index buffers
pub trait GpuObject<B: Backend> {
    /// Number of vertex buffers owned by the object
    fn vertex_buffer_count(&self) -> usize;

    /// Layouts of the vertex buffers, in binding order
    fn vertex_layouts(&self) -> &[VertexLayout];

    /// Number of index buffers owned by the object
    fn index_buffer_count(&self) -> usize;

    /// Number of indices in the buffer behind `handle`, if it exists
    fn index_count(&self, handle: BufferHandle) -> Option<u32>;

    /// Activate the object's vertex streams
    fn bind(&self, encoder: &B::Encoder) -> RenderResult<()>;

    /// Draw every index of the buffer behind `handle`
    fn draw(&self, encoder: &B::Encoder, handle: BufferHandle) -> RenderResult<()>;

    /// Draw `commands` from the buffer behind `handle` in one submission
    ///
    /// Callers must have validated every command against
    /// [`index_count`](Self::index_count); draws keep the order of `commands`.
    fn multi_draw(
        &self,
        encoder: &B::Encoder,
        handle: BufferHandle,
        commands: &[DrawIndexedIndirect],
    ) -> RenderResult<()>;
}
