//! Per-frame acquire, record, submit and present cycle
//!
//! [`FrameDriver`] owns the control flow only. Everything that touches the
//! device sits behind [`FrameBackend`], which the scene implements, so the
//! recovery rules for stale surfaces can be exercised with a scripted backend.
//!
//! A surface is *stale* when acquire or present reports `SUBOPTIMAL_KHR` or
//! `ERROR_OUT_OF_DATE_KHR`. Stale results are outcomes, never errors.

use ash::vk;

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Upper bound for stale-surface reruns of one frame
pub const MAX_STALE_RETRIES: u32 = 2;

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available; `suboptimal` asks for a rebuild after this frame
    Acquired {
        /// Index of the acquired image
        index: u32,
        /// The surface no longer matches the swapchain exactly
        suboptimal: bool,
    },
    /// The swapchain cannot be used any more
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented against an up-to-date surface
    Presented,
    /// Suboptimal or out of date; the generation must be rebuilt
    Stale,
}

/// What happened to one requested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame reached the screen and the surface is current
    Presented,
    /// Present reported a stale surface; the generation was rebuilt and the
    /// frame was not resubmitted
    PresentedStale,
    /// The surface stayed stale through every allowed rerun
    GaveUp,
    /// The window has a zero-sized extent; nothing was drawn
    Skipped,
}

/// Map the result of `vkAcquireNextImageKHR`
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> VulkanResult<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(VulkanError::Api(e)),
    }
}

/// Map the result of `vkQueuePresentKHR`
pub fn classify_present(result: Result<bool, vk::Result>) -> VulkanResult<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
        Err(e) => Err(VulkanError::Api(e)),
    }
}

/// Device-facing steps of one frame
pub trait FrameBackend {
    /// Size the window currently wants
    fn current_extent(&self) -> vk::Extent2D;

    /// Extent the active generation was built for, `None` before the first build
    fn active_extent(&self) -> Option<vk::Extent2D>;

    /// Replace the active generation with one sized to `extent`
    fn rebuild(&mut self, extent: vk::Extent2D) -> VulkanResult<()>;

    /// Acquire the next swapchain image
    fn acquire(&mut self) -> VulkanResult<AcquireOutcome>;

    /// Record all draws into the command buffer and submit it
    fn record_and_submit(&mut self, image_index: u32) -> VulkanResult<()>;

    /// Wait for the submission to finish, then present
    fn wait_and_present(&mut self, image_index: u32) -> VulkanResult<PresentOutcome>;
}

/// Drives frames through a [`FrameBackend`] with bounded stale-surface recovery
#[derive(Debug, Clone, Copy)]
pub struct FrameDriver {
    max_stale_retries: u32,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new(MAX_STALE_RETRIES)
    }
}

impl FrameDriver {
    /// Create a driver; `max_stale_retries` is capped at [`MAX_STALE_RETRIES`]
    pub fn new(max_stale_retries: u32) -> Self {
        Self {
            max_stale_retries: max_stale_retries.min(MAX_STALE_RETRIES),
        }
    }

    /// Reruns allowed per frame
    pub fn max_stale_retries(&self) -> u32 {
        self.max_stale_retries
    }

    /// Produce one frame
    ///
    /// The generation is rebuilt first if the window extent changed. An
    /// out-of-date acquire rebuilds and tries again. A suboptimal acquire still
    /// draws and presents the frame, then rebuilds and runs it again. A stale
    /// present rebuilds without resubmitting. Each rerun counts against
    /// `max_stale_retries`; once they are used up the frame ends with
    /// [`FrameOutcome::GaveUp`].
    pub fn drive<B: FrameBackend>(&self, backend: &mut B) -> VulkanResult<FrameOutcome> {
        let mut retries = 0u32;

        loop {
            let extent = backend.current_extent();
            if extent.width == 0 || extent.height == 0 {
                log::trace!("Skipping frame for zero-sized extent");
                return Ok(FrameOutcome::Skipped);
            }

            if backend.active_extent() != Some(extent) {
                log::debug!("Extent changed to {}x{}, rebuilding", extent.width, extent.height);
                backend.rebuild(extent)?;
            }

            let (index, suboptimal) = match backend.acquire()? {
                AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    log::debug!("Acquire reported an out-of-date swapchain");
                    backend.rebuild(extent)?;
                    if !self.take_retry(&mut retries) {
                        return Ok(FrameOutcome::GaveUp);
                    }
                    continue;
                }
            };

            backend.record_and_submit(index)?;

            if backend.wait_and_present(index)? == PresentOutcome::Stale {
                log::debug!("Present reported a stale surface");
                backend.rebuild(extent)?;
                return Ok(FrameOutcome::PresentedStale);
            }

            if !suboptimal {
                return Ok(FrameOutcome::Presented);
            }

            log::debug!("Acquire reported a suboptimal swapchain");
            backend.rebuild(extent)?;
            if !self.take_retry(&mut retries) {
                return Ok(FrameOutcome::GaveUp);
            }
        }
    }

    fn take_retry(&self, retries: &mut u32) -> bool {
        if *retries >= self.max_stale_retries {
            log::warn!("Surface still stale after {} reruns, giving up on this frame", *retries);
            return false;
        }
        *retries += 1;
        true
    }
}
