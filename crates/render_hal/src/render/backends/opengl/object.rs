//! Vertex array object with its vertex, index and indirect buffers

use std::cell::Cell;
use std::rc::Rc;

use glow::HasContext;

use super::{check_error, creation_failed, OpenGl};
use crate::foundation::memory::MemoryBlock;
use crate::render::api::{DrawIndexedIndirect, GpuObject};
use crate::render::handles::{BufferHandle, HandleTable};
use crate::render::layout::{AttributeFormat, InputRate, VertexLayout};
use crate::render::{RenderError, RenderResult};

/// Native buffer object
pub type GlBuffer = <glow::Context as HasContext>::Buffer;
/// Native vertex array object
pub type GlVertexArray = <glow::Context as HasContext>::VertexArray;

/// How an attribute is fed to `glVertexAttrib*Pointer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttribPointer {
    /// Component count
    pub size: i32,
    /// GL component type
    pub data_type: u32,
    /// Normalize fixed-point data to `[0, 1]`
    pub normalized: bool,
    /// Use the integer pointer variant
    pub integer: bool,
}

/// Pointer parameters for an attribute format
pub const fn attrib_pointer(format: AttributeFormat) -> AttribPointer {
    match format {
        AttributeFormat::Float | AttributeFormat::Vec2 | AttributeFormat::Vec3 | AttributeFormat::Vec4 => AttribPointer {
            size: format.component_count() as i32,
            data_type: glow::FLOAT,
            normalized: false,
            integer: false,
        },
        AttributeFormat::UByte4Norm => AttribPointer {
            size: 4,
            data_type: glow::UNSIGNED_BYTE,
            normalized: true,
            integer: false,
        },
        AttributeFormat::UInt => AttribPointer {
            size: 1,
            data_type: glow::UNSIGNED_INT,
            normalized: false,
            integer: true,
        },
    }
}

struct GlIndexBuffer {
    buffer: GlBuffer,
    index_count: u32,
}

/// OpenGL GPU object
pub struct GlGpuObject {
    gl: Rc<glow::Context>,
    vao: GlVertexArray,
    vertex_buffers: Vec<GlBuffer>,
    layouts: Vec<VertexLayout>,
    index_buffers: HandleTable<GlIndexBuffer>,
    indirect: Cell<Option<(GlBuffer, usize)>>,
}

impl GlGpuObject {
    /// Create an object with an empty vertex array
    pub fn new(gl: Rc<glow::Context>) -> RenderResult<Self> {
        let vao = unsafe { gl.create_vertex_array() }.map_err(creation_failed("vertex array"))?;
        log::debug!("[OBJECT] Created vertex array {:?}", vao);
        Ok(Self {
            gl,
            vao,
            vertex_buffers: Vec::new(),
            layouts: Vec::new(),
            index_buffers: HandleTable::new(),
            indirect: Cell::new(None),
        })
    }

    /// Upload vertex data described by `layout`; returns the buffer's position
    pub fn add_vertex_buffer(&mut self, data: MemoryBlock<'_>, layout: &VertexLayout) -> RenderResult<u32> {
        let vertex_count = layout.vertex_count(data.size())?;
        if vertex_count == 0 {
            return Err(RenderError::InvalidVertexData("vertex buffers cannot be empty".to_string()));
        }
        let stride = i32::try_from(layout.stride())
            .map_err(|_| RenderError::InvalidVertexData(format!("stride {} is too large", layout.stride())))?;

        let gl = &self.gl;
        unsafe {
            let buffer = gl.create_buffer().map_err(creation_failed("vertex buffer"))?;
            self.vertex_buffers.push(buffer);
            self.layouts.push(layout.clone());

            gl.bind_vertex_array(Some(self.vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, data.as_bytes(), glow::STATIC_DRAW);

            for attribute in layout.attributes() {
                let pointer = attrib_pointer(attribute.format);
                let offset = attribute.offset as i32;
                gl.enable_vertex_attrib_array(attribute.location);
                if pointer.integer {
                    gl.vertex_attrib_pointer_i32(attribute.location, pointer.size, pointer.data_type, stride, offset);
                } else {
                    gl.vertex_attrib_pointer_f32(
                        attribute.location,
                        pointer.size,
                        pointer.data_type,
                        pointer.normalized,
                        stride,
                        offset,
                    );
                }
                if layout.rate() == InputRate::Instance {
                    gl.vertex_attrib_divisor(attribute.location, 1);
                }
            }

            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        check_error(gl, "vertex buffer upload")?;

        let position = u32::try_from(self.vertex_buffers.len() - 1)
            .map_err(|_| RenderError::InvalidVertexData("too many vertex buffers".to_string()))?;
        log::debug!(
            "[OBJECT] Vertex buffer {}: {} vertices, stride {}",
            position,
            vertex_count,
            stride
        );
        Ok(position)
    }

    /// Upload 32-bit indices and return the handle naming them
    pub fn add_index_buffer(&mut self, indices: &[u32]) -> RenderResult<BufferHandle> {
        if indices.is_empty() {
            return Err(RenderError::EmptyIndexBuffer);
        }
        let index_count = u32::try_from(indices.len())
            .map_err(|_| RenderError::ResourceCreationFailed(format!("{} indices exceed u32", indices.len())))?;

        let gl = &self.gl;
        let buffer = unsafe {
            let buffer = gl.create_buffer().map_err(creation_failed("index buffer"))?;
            // element array bindings are vertex array state
            gl.bind_vertex_array(Some(self.vao));
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ELEMENT_ARRAY_BUFFER, bytemuck::cast_slice(indices), glow::STATIC_DRAW);
            gl.bind_vertex_array(None);
            buffer
        };
        let handle = self.index_buffers.insert(GlIndexBuffer { buffer, index_count });
        check_error(gl, "index buffer upload")?;

        log::debug!("[OBJECT] Index buffer {} holds {} indices", handle, index_count);
        Ok(handle)
    }

    fn index_buffer(&self, handle: BufferHandle) -> RenderResult<&GlIndexBuffer> {
        self.index_buffers.get(handle).ok_or(RenderError::InvalidHandle(handle))
    }

    fn upload_indirect(&self, gl: &glow::Context, commands: &[DrawIndexedIndirect]) -> RenderResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(commands);
        let buffer = match self.indirect.get() {
            Some((buffer, capacity)) if capacity >= bytes.len() => {
                unsafe {
                    gl.bind_buffer(glow::DRAW_INDIRECT_BUFFER, Some(buffer));
                    gl.buffer_sub_data_u8_slice(glow::DRAW_INDIRECT_BUFFER, 0, bytes);
                }
                buffer
            }
            existing => {
                let buffer = match existing {
                    Some((buffer, _)) => buffer,
                    None => unsafe { gl.create_buffer() }.map_err(creation_failed("indirect buffer"))?,
                };
                unsafe {
                    gl.bind_buffer(glow::DRAW_INDIRECT_BUFFER, Some(buffer));
                    gl.buffer_data_u8_slice(glow::DRAW_INDIRECT_BUFFER, bytes, glow::STREAM_DRAW);
                }
                self.indirect.set(Some((buffer, bytes.len())));
                buffer
            }
        };
        log::trace!("[OBJECT] Uploaded {} indirect commands to {:?}", commands.len(), buffer);
        Ok(())
    }
}

impl GpuObject<OpenGl> for GlGpuObject {
    fn vertex_buffer_count(&self) -> usize {
        self.vertex_buffers.len()
    }

    fn vertex_layouts(&self) -> &[VertexLayout] {
        &self.layouts
    }

    fn index_buffer_count(&self) -> usize {
        self.index_buffers.len()
    }

    fn index_count(&self, handle: BufferHandle) -> Option<u32> {
        self.index_buffers.get(handle).map(|ib| ib.index_count)
    }

    fn bind(&self, encoder: &glow::Context) -> RenderResult<()> {
        unsafe { encoder.bind_vertex_array(Some(self.vao)) };
        Ok(())
    }

    fn draw(&self, encoder: &glow::Context, handle: BufferHandle) -> RenderResult<()> {
        let index_buffer = self.index_buffer(handle)?;
        let count = i32::try_from(index_buffer.index_count)
            .map_err(|_| RenderError::BackendError(format!("{} indices exceed GLsizei", index_buffer.index_count)))?;

        unsafe {
            encoder.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(index_buffer.buffer));
            encoder.draw_elements(glow::TRIANGLES, count, glow::UNSIGNED_INT, 0);
        }
        check_error(encoder, "indexed draw")
    }

    fn multi_draw(&self, encoder: &glow::Context, handle: BufferHandle, commands: &[DrawIndexedIndirect]) -> RenderResult<()> {
        let index_buffer = self.index_buffer(handle)?;
        if commands.is_empty() {
            return Ok(());
        }
        let draw_count = i32::try_from(commands.len())
            .map_err(|_| RenderError::BackendError(format!("{} indirect draws exceed GLsizei", commands.len())))?;

        self.upload_indirect(encoder, commands)?;
        unsafe {
            encoder.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(index_buffer.buffer));
            encoder.multi_draw_elements_indirect_offset(
                glow::TRIANGLES,
                glow::UNSIGNED_INT,
                0,
                draw_count,
                DrawIndexedIndirect::STRIDE as i32,
            );
            encoder.bind_buffer(glow::DRAW_INDIRECT_BUFFER, None);
        }
        check_error(encoder, "multi-draw-indirect")
    }
}

impl Drop for GlGpuObject {
    fn drop(&mut self) {
        log::debug!(
            "[OBJECT] Deleting vertex array {:?} with {} vertex and {} index buffers",
            self.vao,
            self.vertex_buffers.len(),
            self.index_buffers.len()
        );
        unsafe {
            for buffer in &self.vertex_buffers {
                self.gl.delete_buffer(*buffer);
            }
            for index_buffer in self.index_buffers.values() {
                self.gl.delete_buffer(index_buffer.buffer);
            }
            if let Some((buffer, _)) = self.indirect.take() {
                self.gl.delete_buffer(buffer);
            }
            self.gl.delete_vertex_array(self.vao);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formats_use_float_pointers() {
        let pointer = attrib_pointer(AttributeFormat::Vec3);
        assert_eq!(pointer.size, 3);
        assert_eq!(pointer.data_type, glow::FLOAT);
        assert!(!pointer.integer);
    }

    #[test]
    fn packed_colours_are_normalized_bytes() {
        let pointer = attrib_pointer(AttributeFormat::UByte4Norm);
        assert_eq!((pointer.size, pointer.data_type, pointer.normalized), (4, glow::UNSIGNED_BYTE, true));
    }

    #[test]
    fn integer_attributes_use_integer_pointers() {
        assert!(attrib_pointer(AttributeFormat::UInt).integer);
    }
}
