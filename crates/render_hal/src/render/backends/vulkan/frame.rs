//! Offscreen Vulkan render target
//!
//! A [`VkFrame`] owns colour and depth images, a render pass and framebuffer
//! over them, a command buffer and a fence. Recording starts lazily the first
//! time the frame becomes a render target and ends at [`VkFrame::submit`].
//! Before recording again the frame waits on its fence, so command memory
//! (including the per-frame indirect-command arena) is never rewritten while
//! the GPU may still read it.
//!
//! Buffers and pipelines referenced by recorded commands are retained by the
//! encoder until that fence signals. Dropping a program or object between
//! `render()` and `submit()` therefore only releases its last handle once the
//! GPU is done with it.
//!
//! The colour image ends each submission in `TRANSFER_SRC_OPTIMAL`, ready to
//! be copied or blitted by whoever presents the result.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use ash::vk;

use super::buffer::{find_memory_type, Buffer};
use super::context::{DeviceShared, LogicalDevice, Queue, VulkanError, VulkanResult};
use super::shader::GraphicsPipeline;
use super::sync::Fence;
use super::Vulkan;
use crate::render::api::{Attachments, ClearColor, DrawIndexedIndirect, Frame};
use crate::render::RenderResult;

/// Colour attachment format
pub const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const DEPTH_CANDIDATES: [vk::Format; 4] = [
    vk::Format::D32_SFLOAT,
    vk::Format::X8_D24_UNORM_PACK32,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

const MIN_INDIRECT_BYTES: u64 = 256;

/// Image, memory and view of one framebuffer attachment
struct Attachment {
    shared: Arc<DeviceShared>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    format: vk::Format,
}

impl Attachment {
    fn new(
        shared: &Arc<DeviceShared>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let device = &shared.device;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory = find_memory_type(
            &shared.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .and_then(|memory_type_index| {
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type_index);
            let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
            if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
                unsafe { device.free_memory(memory, None) };
                return Err(VulkanError::Api(e));
            }
            Ok(memory)
        });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            shared: Arc::clone(shared),
            image,
            memory,
            view,
            format,
        })
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_image_view(self.view, None);
            self.shared.device.destroy_image(self.image, None);
            self.shared.device.free_memory(self.memory, None);
        }
    }
}

struct RenderPass {
    shared: Arc<DeviceShared>,
    handle: vk::RenderPass,
}

impl RenderPass {
    fn new(shared: &Arc<DeviceShared>, depth_format: vk::Format) -> VulkanResult<Self> {
        let attachments = [
            vk::AttachmentDescription::builder()
                .format(COLOR_FORMAT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .build(),
            vk::AttachmentDescription::builder()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [
            vk::SubpassDependency::builder()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(stages | vk::PipelineStageFlags::TRANSFER)
                .dst_stage_mask(stages)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .build(),
            vk::SubpassDependency::builder()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::TRANSFER)
                .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .build(),
        ];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let handle = unsafe { shared.device.create_render_pass(&create_info, None)? };
        Ok(Self {
            shared: Arc::clone(shared),
            handle,
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_render_pass(self.handle, None) };
    }
}

struct Framebuffer {
    shared: Arc<DeviceShared>,
    handle: vk::Framebuffer,
}

impl Framebuffer {
    fn new(shared: &Arc<DeviceShared>, render_pass: &RenderPass, views: &[vk::ImageView], extent: vk::Extent2D) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle)
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe { shared.device.create_framebuffer(&create_info, None)? };
        Ok(Self {
            shared: Arc::clone(shared),
            handle,
        })
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_framebuffer(self.handle, None) };
    }
}

#[derive(Default)]
struct IndirectArena {
    buffers: Vec<Buffer>,
    next: usize,
}

/// Native resource kept alive by the commands that reference it
#[allow(dead_code)] // held until the frame's fence signals, never read
pub(crate) enum InFlight {
    Buffer(Arc<Buffer>),
    Pipeline(Arc<GraphicsPipeline>),
}

/// Command destination of a [`VkFrame`]
///
/// Wraps the frame's primary command buffer and the host-visible buffers that
/// hold indirect draw commands for the recording in progress.
pub struct VkEncoder {
    shared: Arc<DeviceShared>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    indirect: RefCell<IndirectArena>,
    in_flight: RefCell<Vec<InFlight>>,
}

impl VkEncoder {
    fn new(shared: &Arc<DeviceShared>) -> VulkanResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(shared.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { shared.device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { shared.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { shared.device.destroy_command_pool(command_pool, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            shared: Arc::clone(shared),
            command_pool,
            command_buffer,
            indirect: RefCell::new(IndirectArena::default()),
            in_flight: RefCell::new(Vec::new()),
        })
    }

    /// Command buffer receiving this frame's commands
    pub const fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub(crate) fn device(&self) -> &ash::Device {
        &self.shared.device
    }

    pub(crate) fn multi_draw_indirect(&self) -> bool {
        self.shared.multi_draw_indirect
    }

    /// Copy `commands` into the arena and return the buffer holding them at offset 0
    pub(crate) fn upload_indirect(&self, commands: &[DrawIndexedIndirect]) -> VulkanResult<vk::Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(commands);
        let needed = bytes.len() as u64;
        let mut arena = self.indirect.borrow_mut();
        let slot = arena.next;

        if arena.buffers.get(slot).map_or(true, |buffer| buffer.size() < needed) {
            let size = needed.max(MIN_INDIRECT_BYTES).next_power_of_two();
            let buffer = Buffer::new(&self.shared, size, vk::BufferUsageFlags::INDIRECT_BUFFER)?;
            log::trace!("[FRAME] Indirect arena slot {} grown to {} bytes", slot, size);
            if slot < arena.buffers.len() {
                arena.buffers[slot] = buffer;
            } else {
                arena.buffers.push(buffer);
            }
        }

        let buffer = &arena.buffers[slot];
        buffer.write_bytes(bytes)?;
        let handle = buffer.handle();
        arena.next += 1;
        Ok(handle)
    }

    fn reset_arena(&self) {
        self.indirect.borrow_mut().next = 0;
    }

    /// Keep `resource` alive until the recorded commands have executed
    pub(crate) fn retain(&self, resource: InFlight) {
        self.in_flight.borrow_mut().push(resource);
    }

    fn release_in_flight(&self) {
        let released = std::mem::take(&mut *self.in_flight.borrow_mut());
        if !released.is_empty() {
            log::trace!("[FRAME] Released {} in-flight resources", released.len());
        }
    }
}

impl Drop for VkEncoder {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_command_pool(self.command_pool, None) };
    }
}

/// Offscreen render target with its own command buffer and fence
pub struct VkFrame {
    shared: Arc<DeviceShared>,
    extent: vk::Extent2D,
    encoder: VkEncoder,
    framebuffer: Framebuffer,
    render_pass: RenderPass,
    color: Attachment,
    depth: Attachment,
    fence: Fence,
    clear_color: Cell<ClearColor>,
    recording: Cell<bool>,
    pending: Cell<bool>,
}

impl VkFrame {
    /// Create a `width` by `height` offscreen frame on `device`
    pub fn new(device: &LogicalDevice, width: u32, height: u32) -> VulkanResult<Self> {
        if width == 0 || height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("frame dimensions must be non-zero, got {width}x{height}"),
            });
        }

        let shared = device.shared();
        let extent = vk::Extent2D { width, height };
        let depth_format = Self::select_depth_format(shared)?;

        let color = Attachment::new(
            shared,
            extent,
            COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = Attachment::new(
            shared,
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        let render_pass = RenderPass::new(shared, depth_format)?;
        let framebuffer = Framebuffer::new(shared, &render_pass, &[color.view, depth.view], extent)?;
        let encoder = VkEncoder::new(shared)?;
        let fence = Fence::new(shared, true)?;

        log::debug!(
            "[FRAME] Created {}x{} offscreen frame (depth format {:?})",
            width,
            height,
            depth_format
        );

        Ok(Self {
            shared: Arc::clone(shared),
            extent,
            encoder,
            framebuffer,
            render_pass,
            color,
            depth,
            fence,
            clear_color: Cell::new(ClearColor::default()),
            recording: Cell::new(false),
            pending: Cell::new(false),
        })
    }

    fn select_depth_format(shared: &DeviceShared) -> VulkanResult<vk::Format> {
        DEPTH_CANDIDATES
            .into_iter()
            .find(|format| {
                let props = unsafe {
                    shared
                        .instance()
                        .get_physical_device_format_properties(shared.physical_device, *format)
                };
                props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or_else(|| VulkanError::InitializationFailed("No supported depth attachment format".to_string()))
    }

    /// End recording and submit the frame's commands to `queue`
    ///
    /// Does nothing when no command was recorded since the last submission.
    pub fn submit(&self, queue: &Queue) -> VulkanResult<()> {
        if !self.recording.get() {
            log::debug!("[FRAME] Nothing recorded, skipping submission");
            return Ok(());
        }

        let device = &self.shared.device;
        let command_buffer = self.encoder.command_buffer;
        self.recording.set(false);
        unsafe {
            device.cmd_end_render_pass(command_buffer);
            device.end_command_buffer(command_buffer)?;
        }

        self.fence.reset()?;
        queue.submit(&[command_buffer], self.fence.handle())?;
        self.pending.set(true);
        log::trace!("[FRAME] Submitted to queue {}", queue.index());
        Ok(())
    }

    /// Block until the last submission has finished executing
    pub fn wait(&self) -> VulkanResult<()> {
        if self.pending.get() {
            self.fence.wait(u64::MAX)?;
            self.pending.set(false);
            self.encoder.release_in_flight();
        }
        Ok(())
    }

    /// True between the first command of a frame and its submission
    pub fn is_recording(&self) -> bool {
        self.recording.get()
    }

    #[cfg(test)]
    pub(crate) fn in_flight_count(&self) -> usize {
        self.encoder.in_flight.borrow().len()
    }

    /// Colour image holding the rendered result
    pub const fn color_image(&self) -> vk::Image {
        self.color.image
    }

    /// Formats of the colour and depth attachments
    pub const fn formats(&self) -> (vk::Format, vk::Format) {
        (self.color.format, self.depth.format)
    }

    /// Frame size
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub(crate) const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle
    }

    fn full_rect(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    fn begin_recording(&self) -> VulkanResult<()> {
        self.wait()?;
        self.encoder.reset_arena();

        let device = &self.shared.device;
        let command_buffer = self.encoder.command_buffer;
        let color = self.clear_color.get();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.to_array(),
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass.handle)
            .framebuffer(self.framebuffer.handle)
            .render_area(self.full_rect())
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(command_buffer, &begin_info)?;
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[self.full_rect()]);
        }

        self.recording.set(true);
        log::trace!("[FRAME] Recording started");
        Ok(())
    }
}

impl Frame<Vulkan> for VkFrame {
    fn is_complete(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn attachments(&self) -> Attachments {
        Attachments::COLOR | Attachments::DEPTH
    }

    fn set_as_render_target(&self) -> RenderResult<()> {
        if !self.recording.get() {
            self.begin_recording()?;
        }
        Ok(())
    }

    fn clear(&self, color: ClearColor) -> RenderResult<()> {
        self.clear_color.set(color);
        self.set_as_render_target()?;

        let attachments = [
            vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: color.to_array(),
                    },
                },
            },
            vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
            },
        ];
        let rects = [vk::ClearRect {
            rect: self.full_rect(),
            base_array_layer: 0,
            layer_count: 1,
        }];

        unsafe {
            self.shared
                .device
                .cmd_clear_attachments(self.encoder.command_buffer, &attachments, &rects);
        }
        Ok(())
    }

    fn encoder(&self) -> &VkEncoder {
        &self.encoder
    }
}

impl Drop for VkFrame {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            log::error!("[FRAME] Failed to wait for in-flight work before destruction: {}", e);
            unsafe {
                let _ = self.shared.device.device_wait_idle();
            }
        }
        log::debug!("[FRAME] Destroying {}x{} frame", self.extent.width, self.extent.height);
    }
}

#[cfg(test)]
mod tests {
    use super::super::context::tests::headless_device;
    use super::*;

    #[test]
    fn zero_sized_frame_is_rejected() {
        let Some(device) = headless_device() else {
            return;
        };
        assert!(matches!(
            VkFrame::new(&device, 0, 16),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn clear_submit_and_wait() {
        let Some(device) = headless_device() else {
            eprintln!("skipping: no Vulkan implementation available");
            return;
        };
        let queue = device.get_hardware_queue(0).unwrap();
        let frame = VkFrame::new(&device, 4, 4).unwrap();

        assert!(frame.is_complete());
        assert_eq!(frame.dimensions(), (4, 4));
        assert!(!frame.is_recording());

        frame.clear(ClearColor::WHITE).unwrap();
        frame.set_as_render_target().unwrap();
        assert!(frame.is_recording());

        frame.submit(&queue).unwrap();
        assert!(!frame.is_recording());
        frame.wait().unwrap();

        // a second round re-records after the fence
        frame.clear(ClearColor::BLACK).unwrap();
        frame.submit(&queue).unwrap();
        device.block_until_idle().unwrap();
    }

    #[test]
    fn indirect_arena_reuses_slots_after_reset() {
        let Some(device) = headless_device() else {
            return;
        };
        let frame = VkFrame::new(&device, 4, 4).unwrap();
        let commands = [DrawIndexedIndirect::new(0, 3); 4];

        let first = frame.encoder.upload_indirect(&commands).unwrap();
        let second = frame.encoder.upload_indirect(&commands).unwrap();
        assert_ne!(first, second);

        frame.encoder.reset_arena();
        assert_eq!(frame.encoder.upload_indirect(&commands).unwrap(), first);
    }

    #[test]
    fn dropped_object_outlives_recorded_commands() {
        use super::super::object::VkGpuObject;
        use crate::foundation::memory::MemoryBlock;
        use crate::render::api::GpuObject;
        use crate::render::layout::{AttributeFormat, VertexLayout};

        let Some(device) = headless_device() else {
            return;
        };
        let queue = device.get_hardware_queue(0).unwrap();
        let frame = VkFrame::new(&device, 4, 4).unwrap();

        let mut object = VkGpuObject::new(&device);
        let layout = VertexLayout::packed(&[AttributeFormat::Vec3]);
        object.add_vertex_buffer(MemoryBlock::new(&[0.0f32; 9]), &layout).unwrap();
        object.add_vertex_buffer(MemoryBlock::new(&[1.0f32; 9]), &layout).unwrap();

        frame.set_as_render_target().unwrap();
        object.bind(frame.encoder()).unwrap();
        drop(object);
        assert_eq!(frame.in_flight_count(), 2);

        frame.submit(&queue).unwrap();
        assert_eq!(frame.in_flight_count(), 2);
        frame.wait().unwrap();
        assert_eq!(frame.in_flight_count(), 0);
    }
}
