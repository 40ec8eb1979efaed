//! # Render HAL
//!
//! A graphics hardware-abstraction layer that puts one contract in front of two
//! incompatible native backends: OpenGL (immediate mode) and Vulkan (explicit,
//! queue based). Engine code builds frames, shader programs and GPU objects,
//! wires them into a [`RenderDevice`](render::RenderDevice) and calls
//! `render()` without knowing which backend was compiled in.
//!
//! ## Features
//!
//! - **Build-time backend selection**: `vulkan` (default) or `opengl`
//! - **Typed memory ownership**: [`MemoryBlock`](foundation::memory::MemoryBlock)
//!   views and [`OwnedMemoryBlock`](foundation::memory::OwnedMemoryBlock) allocations
//! - **Multi-draw batching**: index snippets validated before submission
//! - **RAII native handles**: every buffer, program and frame releases its handles on drop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use render_hal::prelude::*;
//!
//! let mut device = Device::new(&frame, &program, Some(&object));
//! device.set_handle(index_buffer)?;
//! device.set_indices(IndexSnippetList::from(vec![(0, 3), (3, 3)]));
//! device.clear()?;
//! device.render()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

#[cfg(all(feature = "vulkan", feature = "opengl"))]
compile_error!("features `vulkan` and `opengl` are mutually exclusive; enable exactly one backend");

pub mod config;
pub mod foundation;
pub mod render;

#[cfg(test)]
pub(crate) mod testing;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, HalConfig},
        foundation::memory::{MemoryBlock, MemoryError, OwnedMemoryBlock},
        render::{
            api::{Backend, BufferHandle, ClearColor, Frame, GpuObject, ShaderProgram},
            shader::{ProgramStatus, ShaderBuilder, ShaderStage},
            snippet::{IndexSnippet, IndexSnippetList},
            layout::{AttributeFormat, VertexAttribute, VertexLayout},
            RenderDevice, RenderError, RenderOutcome, RenderResult,
        },
    };

    #[cfg(any(feature = "vulkan", feature = "opengl"))]
    pub use crate::render::backends::{ActiveBackend, Device};
}
