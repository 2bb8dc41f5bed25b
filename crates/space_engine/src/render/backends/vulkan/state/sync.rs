//! Synchronization primitives for GPU/CPU coordination
//!
//! Semaphores order GPU work (acquire before draw, draw before present).
//! Fences let the CPU wait for a submission. Both are RAII wrappers.

use std::thread;
use std::time::Duration;

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive
///
/// Signaled by one queue operation and waited on by another, e.g. image
/// acquisition signals and the draw submission waits.
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait until signaled, sleeping `poll_interval` after every timed-out wait
    ///
    /// Returns the number of waits that timed out before the fence signaled.
    pub fn wait_polling(&self, timeout: u64, poll_interval: Duration) -> VulkanResult<u32> {
        poll_until_signaled(
            || unsafe { self.device.wait_for_fences(&[self.fence], true, timeout) },
            poll_interval,
        )
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Repeat `wait` while it reports `TIMEOUT`
///
/// Any other error ends the loop and is returned.
pub fn poll_until_signaled<F>(mut wait: F, poll_interval: Duration) -> VulkanResult<u32>
where
    F: FnMut() -> Result<(), vk::Result>,
{
    let mut timeouts = 0u32;
    loop {
        match wait() {
            Ok(()) => return Ok(timeouts),
            Err(vk::Result::TIMEOUT) => {
                timeouts = timeouts.saturating_add(1);
                if timeouts == 1 || timeouts % 100 == 0 {
                    log::debug!("Fence still unsignaled after {timeouts} timed-out waits");
                }
                if !poll_interval.is_zero() {
                    thread::sleep(poll_interval);
                }
            }
            Err(e) => return Err(VulkanError::Api(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_returns_immediately_when_signaled() {
        let timeouts = poll_until_signaled(|| Ok(()), Duration::from_millis(1)).unwrap();
        assert_eq!(timeouts, 0);
    }

    #[test]
    fn test_poll_retries_timeouts_until_signaled() {
        let mut remaining = 3;
        let timeouts = poll_until_signaled(
            || {
                if remaining == 0 {
                    Ok(())
                } else {
                    remaining -= 1;
                    Err(vk::Result::TIMEOUT)
                }
            },
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(timeouts, 3);
    }

    #[test]
    fn test_poll_propagates_device_loss() {
        let mut calls = 0;
        let result = poll_until_signaled(
            || {
                calls += 1;
                if calls < 2 {
                    Err(vk::Result::TIMEOUT)
                } else {
                    Err(vk::Result::ERROR_DEVICE_LOST)
                }
            },
            Duration::ZERO,
        );
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))));
        assert_eq!(calls, 2);
    }
}
