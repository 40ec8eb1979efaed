//! Vulkan backend
//!
//! Explicit, queue-based rendering. Commands are recorded into the frame's
//! command buffer and only reach the GPU when the frame is submitted to a
//! [`Queue`]:
//!
//! ```rust,ignore
//! let instance = VulkanInstance::from_config(&config.device)?;
//! let family = DeviceQueueFamily::select_graphics(&instance, config.device.prefer_discrete_gpu)?;
//! let device = LogicalDevice::new(&instance, &family, &ExtensionList::from_config(&config.device))?;
//! let queue = device.get_hardware_queue(0)?;
//!
//! let frame = VkFrame::new(&device, 800, 600)?;
//! let program = VkShaderProgram::new(&device, &frame, &builder, object.vertex_layouts())?;
//! let mut render = Device::new(&frame, &program, Some(&object));
//! render.set_handle(indices)?;
//! render.clear()?;
//! render.render()?;
//! frame.submit(&queue)?;
//! ```

pub mod buffer;
pub mod context;
pub mod frame;
pub mod object;
pub mod shader;
pub mod sync;

pub use context::{DeviceQueueFamily, ExtensionList, LogicalDevice, Queue, VulkanError, VulkanInstance, VulkanResult};
pub use frame::{VkEncoder, VkFrame};
pub use object::VkGpuObject;
pub use shader::VkShaderProgram;

use crate::render::api::Backend;

/// Vulkan backend marker
pub struct Vulkan;

impl Backend for Vulkan {
    const NAME: &'static str = "Vulkan";

    type Encoder = VkEncoder;
    type Frame = VkFrame;
    type Program = VkShaderProgram;
    type Object = VkGpuObject;
}

#[cfg(test)]
mod tests {
    use super::context::tests::headless_device;
    use super::*;
    use crate::render::api::GpuObject;
    use crate::render::shader::{ShaderBuilder, ShaderStage};
    use crate::render::{Refusal, RenderDevice, RenderOutcome};

    #[test]
    fn unusable_program_is_refused_on_hardware() {
        let Some(device) = headless_device() else {
            return;
        };
        let frame = VkFrame::new(&device, 8, 8).unwrap();
        let mut object = VkGpuObject::new(&device);
        let handle = object.add_index_buffer(&[0, 1, 2]).unwrap();

        let mut builder = ShaderBuilder::new();
        builder.set_shader_source(ShaderStage::Vertex, "not spir-v");
        let program = VkShaderProgram::new(&device, &frame, &builder, object.vertex_layouts()).unwrap();

        let mut render = RenderDevice::<Vulkan>::new(&frame, &program, Some(&object));
        render.set_handle(handle).unwrap();
        assert_eq!(render.render().unwrap(), RenderOutcome::Refused(Refusal::ProgramUnusable));
        assert!(!frame.is_recording());
    }
}
