//! OpenGL render targets
//!
//! [`WindowFrame`] draws into the default framebuffer of the collaborator's
//! context. [`OffscreenFrame`] owns a framebuffer object with an RGBA8 colour
//! texture and a 24-bit depth renderbuffer. [`GlFrame`] is the backend frame
//! type and wraps either.

use std::cell::Cell;
use std::rc::Rc;

use glow::HasContext;

use super::{check_error, creation_failed, OpenGl};
use crate::render::api::{Attachments, ClearColor, Frame};
use crate::render::{RenderError, RenderResult};

/// Native framebuffer object
pub type GlFramebuffer = <glow::Context as HasContext>::Framebuffer;
/// Native texture object
pub type GlTexture = <glow::Context as HasContext>::Texture;
/// Native renderbuffer object
pub type GlRenderbuffer = <glow::Context as HasContext>::Renderbuffer;

fn as_gl_size(value: u32) -> RenderResult<i32> {
    i32::try_from(value).map_err(|_| RenderError::ResourceCreationFailed(format!("{value} exceeds the GL size range")))
}

unsafe fn clear_bound(gl: &glow::Context, color: ClearColor, attachments: Attachments) {
    let mut mask = 0;
    if attachments.contains(Attachments::COLOR) {
        gl.clear_color(color.r, color.g, color.b, color.a);
        mask |= glow::COLOR_BUFFER_BIT;
    }
    if attachments.contains(Attachments::DEPTH) {
        gl.depth_mask(true);
        gl.clear_depth_f32(1.0);
        mask |= glow::DEPTH_BUFFER_BIT;
    }
    gl.clear(mask);
}

/// Default framebuffer of a window-owned context
pub struct WindowFrame {
    gl: Rc<glow::Context>,
    width: Cell<u32>,
    height: Cell<u32>,
    attachments: Attachments,
}

impl WindowFrame {
    /// Frame over the default framebuffer, which has a depth buffer when `has_depth`
    pub fn new(gl: Rc<glow::Context>, width: u32, height: u32, has_depth: bool) -> Self {
        let attachments = if has_depth {
            Attachments::COLOR | Attachments::DEPTH
        } else {
            Attachments::COLOR
        };
        Self {
            gl,
            width: Cell::new(width),
            height: Cell::new(height),
            attachments,
        }
    }

    /// Track a window resize
    pub fn resize(&self, width: u32, height: u32) {
        log::debug!("[FRAME] Window frame resized to {}x{}", width, height);
        self.width.set(width);
        self.height.set(height);
    }

    fn bind(&self) -> RenderResult<()> {
        let (width, height) = (as_gl_size(self.width.get())?, as_gl_size(self.height.get())?);
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            self.gl.viewport(0, 0, width, height);
        }
        Ok(())
    }
}

/// Framebuffer object with its own colour texture and depth renderbuffer
pub struct OffscreenFrame {
    gl: Rc<glow::Context>,
    framebuffer: GlFramebuffer,
    color: GlTexture,
    depth: GlRenderbuffer,
    width: u32,
    height: u32,
    complete: bool,
}

impl OffscreenFrame {
    /// Create a `width` by `height` offscreen frame
    ///
    /// The completeness check runs once here; [`Frame::is_complete`] only
    /// reports its result.
    pub fn new(gl: Rc<glow::Context>, width: u32, height: u32) -> RenderResult<Self> {
        let (w, h) = (as_gl_size(width)?, as_gl_size(height)?);

        unsafe {
            let framebuffer = gl.create_framebuffer().map_err(creation_failed("framebuffer"))?;
            let color = match gl.create_texture() {
                Ok(texture) => texture,
                Err(e) => {
                    gl.delete_framebuffer(framebuffer);
                    return Err(creation_failed("colour texture")(e));
                }
            };
            let depth = match gl.create_renderbuffer() {
                Ok(renderbuffer) => renderbuffer,
                Err(e) => {
                    gl.delete_texture(color);
                    gl.delete_framebuffer(framebuffer);
                    return Err(creation_failed("depth renderbuffer")(e));
                }
            };

            // from here on Drop releases everything
            let mut frame = Self {
                gl,
                framebuffer,
                color,
                depth,
                width,
                height,
                complete: false,
            };
            let gl = &frame.gl;

            if w > 0 && h > 0 {
                gl.bind_texture(glow::TEXTURE_2D, Some(color));
                gl.tex_storage_2d(glow::TEXTURE_2D, 1, glow::RGBA8, w, h);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
                gl.bind_texture(glow::TEXTURE_2D, None);

                gl.bind_renderbuffer(glow::RENDERBUFFER, Some(depth));
                gl.renderbuffer_storage(glow::RENDERBUFFER, glow::DEPTH_COMPONENT24, w, h);
                gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            }

            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, glow::TEXTURE_2D, Some(color), 0);
            gl.framebuffer_renderbuffer(glow::FRAMEBUFFER, glow::DEPTH_ATTACHMENT, glow::RENDERBUFFER, Some(depth));
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            check_error(gl, "offscreen frame creation")?;

            frame.complete = status == glow::FRAMEBUFFER_COMPLETE && w > 0 && h > 0;
            if frame.complete {
                log::debug!("[FRAME] Created {}x{} offscreen frame", width, height);
            } else {
                log::warn!(
                    "[FRAME] Offscreen frame {}x{} is incomplete (status 0x{:04x})",
                    width,
                    height,
                    status
                );
            }
            Ok(frame)
        }
    }

    /// Colour texture holding the rendered result
    pub const fn color_texture(&self) -> GlTexture {
        self.color
    }

    fn bind(&self) -> RenderResult<()> {
        let (width, height) = (as_gl_size(self.width)?, as_gl_size(self.height)?);
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.framebuffer));
            self.gl.viewport(0, 0, width, height);
        }
        Ok(())
    }
}

impl Drop for OffscreenFrame {
    fn drop(&mut self) {
        log::debug!("[FRAME] Destroying {}x{} offscreen frame", self.width, self.height);
        unsafe {
            self.gl.delete_framebuffer(self.framebuffer);
            self.gl.delete_renderbuffer(self.depth);
            self.gl.delete_texture(self.color);
        }
    }
}

/// OpenGL render target
pub enum GlFrame {
    /// Default framebuffer
    Window(WindowFrame),
    /// Framebuffer object
    Offscreen(OffscreenFrame),
}

impl GlFrame {
    fn gl(&self) -> &glow::Context {
        match self {
            Self::Window(frame) => &frame.gl,
            Self::Offscreen(frame) => &frame.gl,
        }
    }
}

impl From<WindowFrame> for GlFrame {
    fn from(frame: WindowFrame) -> Self {
        Self::Window(frame)
    }
}

impl From<OffscreenFrame> for GlFrame {
    fn from(frame: OffscreenFrame) -> Self {
        Self::Offscreen(frame)
    }
}

impl Frame<OpenGl> for GlFrame {
    fn is_complete(&self) -> bool {
        match self {
            Self::Window(frame) => frame.width.get() > 0 && frame.height.get() > 0,
            Self::Offscreen(frame) => frame.complete,
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Window(frame) => (frame.width.get(), frame.height.get()),
            Self::Offscreen(frame) => (frame.width, frame.height),
        }
    }

    fn attachments(&self) -> Attachments {
        match self {
            Self::Window(frame) => frame.attachments,
            Self::Offscreen(_) => Attachments::COLOR | Attachments::DEPTH,
        }
    }

    fn set_as_render_target(&self) -> RenderResult<()> {
        match self {
            Self::Window(frame) => frame.bind(),
            Self::Offscreen(frame) => frame.bind(),
        }
    }

    fn clear(&self, color: ClearColor) -> RenderResult<()> {
        self.set_as_render_target()?;
        unsafe { clear_bound(self.gl(), color, self.attachments()) };
        check_error(self.gl(), "clear")
    }

    fn encoder(&self) -> &glow::Context {
        self.gl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_sizes_reject_overflow() {
        assert_eq!(as_gl_size(1024).unwrap(), 1024);
        assert!(matches!(as_gl_size(u32::MAX), Err(RenderError::ResourceCreationFailed(_))));
    }
}
