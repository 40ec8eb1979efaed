//! Buffer management for vertex, index and indirect data
//!
//! Each buffer owns its own `vkAllocateMemory` allocation in host-visible,
//! host-coherent memory, so uploads are a plain map and copy with no staging
//! pass. Buffers keep the device core alive and free their memory on drop.

use std::sync::Arc;

use ash::vk;

use super::context::{DeviceShared, VulkanError, VulkanResult};

/// GPU buffer wrapper with automatic memory management
pub struct Buffer {
    shared: Arc<DeviceShared>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a host-visible buffer of `size` bytes
    pub(crate) fn new(shared: &Arc<DeviceShared>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "buffers must hold at least one byte".to_string(),
            });
        }

        let device = &shared.device;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = find_memory_type(
            &shared.memory_properties,
            mem_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .and_then(|memory_type_index| {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(mem_requirements.size)
                .memory_type_index(memory_type_index);
            Ok(unsafe { device.allocate_memory(&alloc_info, None)? })
        });

        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(e));
        }

        log::trace!("[BUFFER] Created {:?} of {} bytes ({:?})", buffer, size, usage);
        Ok(Self {
            shared: Arc::clone(shared),
            buffer,
            memory,
            size,
        })
    }

    /// Create a buffer holding a copy of `bytes`
    pub(crate) fn with_data(shared: &Arc<DeviceShared>, bytes: &[u8], usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        let buffer = Self::new(shared, bytes.len() as vk::DeviceSize, usage)?;
        buffer.write_bytes(bytes)?;
        Ok(buffer)
    }

    /// Copy `bytes` to the start of the buffer
    pub fn write_bytes(&self, bytes: &[u8]) -> VulkanResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes into a {}-byte buffer", bytes.len(), self.size),
            });
        }

        unsafe {
            let data_ptr = self
                .shared
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data_ptr.cast::<u8>(), bytes.len());
            self.shared.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_buffer(self.buffer, None);
            self.shared.device.free_memory(self.memory, None);
        }
    }
}

/// Find memory type with required properties
pub(crate) fn find_memory_type(
    mem_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..mem_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && mem_properties.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}
