//! Rendering abstraction
//!
//! Backend-neutral contract ([`api`]), the data every backend shares
//! (shader sources, vertex layouts, index snippets, buffer handles) and the
//! [`RenderDevice`] that drives one render invocation. Concrete native
//! implementations live under [`backends`] and are selected with Cargo
//! features at build time.
//!
//! # Error taxonomy
//!
//! - Configuration mistakes discovered during `render()` (no handle, device
//!   not ready, snippets out of bounds) are not errors: they come back as a
//!   [`RenderOutcome`] and are logged, and nothing reaches the GPU.
//! - Shader compile and link failures leave the program in a non-usable
//!   [`ProgramStatus`](shader::ProgramStatus) with the driver log attached.
//! - Precondition violations at API boundaries (bad handles, malformed vertex
//!   data, undersized copies) are [`RenderError`] values.
//! - Native API failures are [`RenderError`] values wrapping the backend error.

pub mod api;
pub mod backends;
pub mod device;
pub mod handles;
pub mod layout;
pub mod shader;
pub mod snippet;

pub use api::{Backend, ClearColor, DrawIndexedIndirect, Frame, GpuObject, ShaderProgram};
pub use device::{Refusal, RenderDevice, RenderOutcome};
pub use handles::{BufferHandle, HandleTable};

use crate::foundation::memory::MemoryError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors raised by the rendering layer
#[derive(Error, Debug)]
pub enum RenderError {
    /// Native resource creation failed
    ///
    /// Occurs when a buffer, texture, framebuffer or program object cannot be
    /// created by the driver.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Backend-specific error occurred
    ///
    /// Wraps failures reported by the native API during recording or
    /// submission.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// The GPU object does not own an index buffer with this handle
    #[error("No index buffer registered under handle {0}")]
    InvalidHandle(BufferHandle),

    /// An operation needed a GPU object but the device has none
    #[error("Render device has no GPU object")]
    NoObject,

    /// Vertex data does not match its declared layout
    #[error("Invalid vertex data: {0}")]
    InvalidVertexData(String),

    /// Index buffers must hold at least one index
    #[error("Index buffers cannot be empty")]
    EmptyIndexBuffer,

    /// A push-constant write does not fit the program's range
    #[error("Push constant write of {size} bytes at offset {offset} exceeds the {capacity}-byte range")]
    PushConstantOverflow {
        /// Byte offset of the write
        offset: u32,
        /// Length of the write in bytes
        size: usize,
        /// Size of the program's push-constant range
        capacity: u32,
    },

    /// A shader source file could not be read
    #[error("Failed to read shader file {path:?}: {source}")]
    ShaderFile {
        /// File that was requested
        path: PathBuf,
        /// Underlying IO failure
        source: std::io::Error,
    },

    /// Memory block precondition failed
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Vulkan API failure
    #[cfg(feature = "vulkan")]
    #[error(transparent)]
    Vulkan(#[from] backends::vulkan::VulkanError),
}
