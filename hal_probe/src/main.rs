//! Hardware probe for the render HAL
//!
//! Brings up the compiled-in backend headlessly, clears an offscreen frame
//! once and tears everything down again. Useful as a smoke test on a new
//! machine or driver.
//!
//! ```text
//! hal_probe [config.toml|config.ron]
//! ```

use render_hal::config::{ConfigError, HalConfig};
use render_hal::foundation::logging;
use render_hal::render::Backend;
use thiserror::Error;

#[derive(Error, Debug)]
#[cfg_attr(not(feature = "vulkan"), allow(dead_code))]
enum ProbeError {
    #[error("render: {0}")]
    Render(#[from] render_hal::render::RenderError),

    #[cfg(feature = "vulkan")]
    #[error("vulkan: {0}")]
    Vulkan(#[from] render_hal::render::backends::vulkan::VulkanError),
}

fn load_config() -> Result<HalConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => HalConfig::load_validated(&path),
        None => Ok(HalConfig::new("hal_probe")),
    }
}

#[cfg(feature = "vulkan")]
fn probe(config: &HalConfig) -> Result<(), ProbeError> {
    use render_hal::render::backends::vulkan::{DeviceQueueFamily, ExtensionList, LogicalDevice, VkFrame, VulkanInstance};
    use render_hal::render::Frame;

    let instance = VulkanInstance::from_config(&config.device)?;
    log::info!("Vulkan instance ready (validation: {})", instance.validation_enabled());

    let family = DeviceQueueFamily::select_graphics(&instance, config.device.prefer_discrete_gpu)?;
    let extensions = ExtensionList::from_config(&config.device);
    let device = LogicalDevice::new(&instance, &family, &extensions)?;
    log::info!(
        "Logical device on '{}' with {} queues, multi-draw-indirect: {}",
        family.device_name(),
        family.queue_count(),
        device.supports_multi_draw_indirect()
    );

    let queue = device.get_hardware_queue(0)?;
    let frame = VkFrame::new(&device, config.frame.width, config.frame.height)?;
    frame.clear(config.frame.clear_color)?;
    frame.submit(&queue)?;
    frame.wait()?;
    device.block_until_idle()?;
    log::info!("Cleared a {}x{} frame", config.frame.width, config.frame.height);

    // resources first, device last
    drop(frame);
    drop(queue);
    drop(device);
    Ok(())
}

#[cfg(all(feature = "opengl", not(feature = "vulkan")))]
fn probe(_config: &HalConfig) -> Result<(), ProbeError> {
    log::warn!("The OpenGL backend renders into a context owned by the windowing layer");
    log::warn!("Create a glow::Context there and pass it to GlFrame, GlShaderProgram and GlGpuObject");
    Ok(())
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init_with_level("info");
            log::error!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    logging::init_with_level(&config.logging.level);

    log::info!(
        "Probing {} backend for '{}'",
        render_hal::prelude::ActiveBackend::NAME,
        config.device.application_name
    );

    match probe(&config) {
        Ok(()) => log::info!("Probe finished"),
        Err(e) => {
            log::error!("Probe failed: {}", e);
            std::process::exit(1);
        }
    }
}
