//! Vertex and index buffers drawn as one object

use std::sync::Arc;

use ash::vk;

use super::buffer::Buffer;
use super::context::{DeviceShared, LogicalDevice};
use super::frame::{InFlight, VkEncoder};
use super::Vulkan;
use crate::foundation::memory::MemoryBlock;
use crate::render::api::{DrawIndexedIndirect, GpuObject};
use crate::render::handles::{BufferHandle, HandleTable};
use crate::render::layout::VertexLayout;
use crate::render::{RenderError, RenderResult};

struct IndexBuffer {
    buffer: Arc<Buffer>,
    index_count: u32,
}

/// Vulkan GPU object
///
/// Vertex buffer `n` is bound to binding `n`, matching the binding order
/// produced for [`vertex_layouts`](GpuObject::vertex_layouts) when a program
/// is built. Buffers are shared with the encoders that record them, so
/// dropping the object while a frame is in flight keeps them alive until the
/// frame's fence signals.
pub struct VkGpuObject {
    shared: Arc<DeviceShared>,
    vertex_buffers: Vec<Arc<Buffer>>,
    layouts: Vec<VertexLayout>,
    index_buffers: HandleTable<IndexBuffer>,
}

impl VkGpuObject {
    /// Create an object with no buffers
    pub fn new(device: &LogicalDevice) -> Self {
        Self {
            shared: Arc::clone(device.shared()),
            vertex_buffers: Vec::new(),
            layouts: Vec::new(),
            index_buffers: HandleTable::new(),
        }
    }

    /// Upload vertex data described by `layout`; returns its binding number
    pub fn add_vertex_buffer(&mut self, data: MemoryBlock<'_>, layout: &VertexLayout) -> RenderResult<u32> {
        let vertex_count = layout.vertex_count(data.size())?;
        if vertex_count == 0 {
            return Err(RenderError::InvalidVertexData("vertex buffers cannot be empty".to_string()));
        }

        let buffer = Arc::new(Buffer::with_data(
            &self.shared,
            data.as_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?);
        let binding = u32::try_from(self.vertex_buffers.len())
            .map_err(|_| RenderError::InvalidVertexData("too many vertex buffers".to_string()))?;
        log::debug!(
            "[OBJECT] Vertex buffer at binding {}: {} vertices, stride {}",
            binding,
            vertex_count,
            layout.stride()
        );

        self.vertex_buffers.push(buffer);
        self.layouts.push(layout.clone());
        Ok(binding)
    }

    /// Upload 32-bit indices and return the handle naming them
    pub fn add_index_buffer(&mut self, indices: &[u32]) -> RenderResult<BufferHandle> {
        if indices.is_empty() {
            return Err(RenderError::EmptyIndexBuffer);
        }
        let index_count = u32::try_from(indices.len())
            .map_err(|_| RenderError::ResourceCreationFailed(format!("{} indices exceed u32", indices.len())))?;

        let buffer = Arc::new(Buffer::with_data(
            &self.shared,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?);
        let handle = self.index_buffers.insert(IndexBuffer { buffer, index_count });
        log::debug!("[OBJECT] Index buffer {} holds {} indices", handle, index_count);
        Ok(handle)
    }

    fn index_buffer(&self, handle: BufferHandle) -> RenderResult<&IndexBuffer> {
        self.index_buffers.get(handle).ok_or(RenderError::InvalidHandle(handle))
    }
}

impl GpuObject<Vulkan> for VkGpuObject {
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

    fn bind(&self, encoder: &VkEncoder) -> RenderResult<()> {
        if self.vertex_buffers.is_empty() {
            return Ok(());
        }

        let buffers: Vec<vk::Buffer> = self.vertex_buffers.iter().map(|buffer| buffer.handle()).collect();
        let offsets = vec![0; buffers.len()];
        for buffer in &self.vertex_buffers {
            encoder.retain(InFlight::Buffer(Arc::clone(buffer)));
        }
        unsafe {
            encoder
                .device()
                .cmd_bind_vertex_buffers(encoder.command_buffer(), 0, &buffers, &offsets);
        }
        Ok(())
    }

    fn draw(&self, encoder: &VkEncoder, handle: BufferHandle) -> RenderResult<()> {
        let index_buffer = self.index_buffer(handle)?;
        let device = encoder.device();
        let command_buffer = encoder.command_buffer();
        encoder.retain(InFlight::Buffer(Arc::clone(&index_buffer.buffer)));

        unsafe {
            device.cmd_bind_index_buffer(command_buffer, index_buffer.buffer.handle(), 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(command_buffer, index_buffer.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    fn multi_draw(&self, encoder: &VkEncoder, handle: BufferHandle, commands: &[DrawIndexedIndirect]) -> RenderResult<()> {
        let index_buffer = self.index_buffer(handle)?;
        if commands.is_empty() {
            return Ok(());
        }

        let indirect = encoder.upload_indirect(commands)?;
        encoder.retain(InFlight::Buffer(Arc::clone(&index_buffer.buffer)));
        let device = encoder.device();
        let command_buffer = encoder.command_buffer();
        let draw_count = u32::try_from(commands.len())
            .map_err(|_| RenderError::BackendError(format!("{} indirect draws exceed u32", commands.len())))?;

        unsafe {
            device.cmd_bind_index_buffer(command_buffer, index_buffer.buffer.handle(), 0, vk::IndexType::UINT32);
            if encoder.multi_draw_indirect() {
                device.cmd_draw_indexed_indirect(command_buffer, indirect, 0, draw_count, DrawIndexedIndirect::STRIDE);
            } else {
                // without the feature drawCount must be 0 or 1
                for i in 0..draw_count {
                    let offset = vk::DeviceSize::from(i * DrawIndexedIndirect::STRIDE);
                    device.cmd_draw_indexed_indirect(command_buffer, indirect, offset, 1, DrawIndexedIndirect::STRIDE);
                }
            }
        }
        Ok(())
    }
}
