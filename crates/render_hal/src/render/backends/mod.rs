//! Native backend implementations
//!
//! Exactly one backend is compiled in, picked by Cargo feature. Engine code
//! names it through [`ActiveBackend`] and [`Device`] so switching backends is
//! a build flag rather than a code change.

#[cfg(feature = "opengl")]
pub mod opengl;
#[cfg(feature = "vulkan")]
pub mod vulkan;

#[cfg(feature = "vulkan")]
/// Backend selected at build time
pub type ActiveBackend = vulkan::Vulkan;

#[cfg(all(feature = "opengl", not(feature = "vulkan")))]
/// Backend selected at build time
pub type ActiveBackend = opengl::OpenGl;

#[cfg(any(feature = "vulkan", feature = "opengl"))]
/// Render device over the backend selected at build time
pub type Device<'a> = crate::render::RenderDevice<'a, ActiveBackend>;
