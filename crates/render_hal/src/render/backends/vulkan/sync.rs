//! Synchronization primitives

use std::sync::Arc;

use ash::vk;

use super::context::{DeviceShared, VulkanResult};

/// Fence wrapper with RAII cleanup
pub struct Fence {
    shared: Arc<DeviceShared>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub(crate) fn new(shared: &Arc<DeviceShared>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { shared.device.create_fence(&create_info, None)? };

        Ok(Self {
            shared: Arc::clone(shared),
            fence,
        })
    }

    /// Wait for the fence to become signaled
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe { self.shared.device.wait_for_fences(&[self.fence], true, timeout)? };
        Ok(())
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.shared.device.reset_fences(&[self.fence])? };
        Ok(())
    }

    /// True when the fence is signaled, without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        Ok(unsafe { self.shared.device.get_fence_status(self.fence)? })
    }

    /// Get the fence handle
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_fence(self.fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::context::tests::headless_device;
    use super::*;

    #[test]
    fn fence_starts_in_requested_state() {
        let Some(device) = headless_device() else {
            return;
        };
        let fence = Fence::new(device.shared(), true).unwrap();
        assert!(fence.is_signaled().unwrap());
        fence.wait(0).unwrap();

        fence.reset().unwrap();
        assert!(!fence.is_signaled().unwrap());
        assert!(Fence::new(device.shared(), false).unwrap().wait(0).is_err());
    }
}
