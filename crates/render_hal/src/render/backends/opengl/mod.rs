//! OpenGL backend
//!
//! Immediate-mode rendering through [`glow`]. Every call executes against
//! the current context as soon as it is made, so the encoder handed to
//! programs and objects is the context itself.
//!
//! The context is created by the collaborator that owns the window and is
//! shared with the backend as an `Rc<glow::Context>`. It must be current on
//! the calling thread for every operation, including drops.

pub mod frame;
pub mod object;
pub mod shader;

pub use frame::{GlFrame, OffscreenFrame, WindowFrame};
pub use object::GlGpuObject;
pub use shader::{GlShaderProgram, GlUniformLocation, UniformValue};

use glow::HasContext;

use crate::render::api::Backend;
use crate::render::{RenderError, RenderResult};

/// OpenGL backend marker
pub struct OpenGl;

impl Backend for OpenGl {
    const NAME: &'static str = "OpenGL";

    type Encoder = glow::Context;
    type Frame = GlFrame;
    type Program = GlShaderProgram;
    type Object = GlGpuObject;
}

/// Turn a pending GL error into a backend error naming `operation`
pub(crate) fn check_error(gl: &glow::Context, operation: &str) -> RenderResult<()> {
    let code = unsafe { gl.get_error() };
    if code == glow::NO_ERROR {
        Ok(())
    } else {
        log::error!("[GL] {} failed with {}", operation, error_name(code));
        Err(RenderError::BackendError(format!("{operation} failed with {}", error_name(code))))
    }
}

/// Symbolic name of a GL error code
pub fn error_name(code: u32) -> String {
    match code {
        glow::INVALID_ENUM => "GL_INVALID_ENUM".to_string(),
        glow::INVALID_VALUE => "GL_INVALID_VALUE".to_string(),
        glow::INVALID_OPERATION => "GL_INVALID_OPERATION".to_string(),
        glow::INVALID_FRAMEBUFFER_OPERATION => "GL_INVALID_FRAMEBUFFER_OPERATION".to_string(),
        glow::OUT_OF_MEMORY => "GL_OUT_OF_MEMORY".to_string(),
        other => format!("GL error 0x{other:04x}"),
    }
}

/// Map a failed GL object creation to a resource error
pub(crate) fn creation_failed(what: &str) -> impl FnOnce(String) -> RenderError + '_ {
    move |reason| {
        log::error!("[GL] Failed to create {}: {}", what, reason);
        RenderError::ResourceCreationFailed(format!("{what}: {reason}"))
    }
}
