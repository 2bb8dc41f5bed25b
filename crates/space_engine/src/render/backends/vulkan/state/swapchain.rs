//! Vulkan swapchain management
//!
//! Handles swapchain creation and replacement following RAII principles. The
//! choices that depend only on what the surface reports (extent, transform,
//! composite alpha, sharing) are plain functions so they can be checked without
//! a device.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use super::frame_driver::{classify_acquire, classify_present, AcquireOutcome, PresentOutcome};
use crate::render::backends::vulkan::initialization::surface::{
    pick_present_mode, pick_surface_format, SurfaceSupport,
};
use crate::render::backends::vulkan::{DeviceContext, QueueFamilyIndices, VulkanError, VulkanResult};

const COMPOSITE_ALPHA_PREFERENCE: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
    vk::CompositeAlphaFlagsKHR::OPAQUE,
];

struct SwapchainImageView {
    device: Device,
    view: vk::ImageView,
}

impl Drop for SwapchainImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

struct SwapchainHandle {
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Swapchain with one color view per image
///
/// Views are declared before the swapchain so they are destroyed first. The
/// images themselves belong to the swapchain.
pub struct Swapchain {
    views: Vec<SwapchainImageView>,
    handle: SwapchainHandle,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the context's surface
    ///
    /// `old_swapchain` may be null. When it is not, the driver may recycle its
    /// resources; the caller still destroys it afterwards.
    pub fn new(
        ctx: &DeviceContext,
        support: &SurfaceSupport,
        requested_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let device = ctx.device();
        let caps = &support.capabilities;

        let format = pick_surface_format(&support.formats)?;
        let present_mode = pick_present_mode(&support.present_modes);
        let extent = choose_extent(caps, requested_extent);
        let (sharing_mode, family_indices) = sharing(ctx.queue_families());

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface().handle())
            .min_image_count(caps.min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(choose_pre_transform(caps))
            .composite_alpha(choose_composite_alpha(caps.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = ctx.swapchain_loader().clone();
        let handle = SwapchainHandle {
            swapchain: unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? },
            loader,
        };

        let images = unsafe {
            handle
                .loader
                .get_swapchain_images(handle.swapchain)
                .map_err(VulkanError::Api)?
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::R,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::B,
                    a: vk::ComponentSwizzle::A,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            views.push(SwapchainImageView {
                device: device.clone(),
                view: unsafe { device.create_image_view(&view_info, None).map_err(VulkanError::Api)? },
            });
        }

        log::info!(
            "Created swapchain {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            images.len(),
            format.format,
            present_mode
        );

        Ok(Self {
            views,
            handle,
            images,
            format,
            present_mode,
            extent,
        })
    }

    /// Acquire the next image, signalling `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout: u64) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.handle
                .loader
                .acquire_next_image(self.handle.swapchain, timeout, semaphore, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Present image `index` on `queue` once `wait_semaphores` are signaled
    pub fn present(
        &self,
        queue: vk::Queue,
        index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VulkanResult<PresentOutcome> {
        let swapchains = [self.handle.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe { self.handle.loader.queue_present(queue, &present_info) };
        classify_present(result)
    }

    /// Get the swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle.swapchain
    }

    /// One color view per image, in image order
    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.views.iter().map(|v| v.view).collect()
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Chosen surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Chosen present mode
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Use the surface's extent unless it leaves the choice to us
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width.max(caps.min_image_extent.width)),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height.max(caps.min_image_extent.height)),
    }
}

/// IDENTITY when supported, otherwise whatever the surface currently uses
pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// First supported mode in pre-multiplied, post-multiplied, inherit, opaque order
pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    COMPOSITE_ALPHA_PREFERENCE
        .into_iter()
        .find(|mode| supported.contains(*mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Concurrent sharing across both families when they differ
pub fn sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    #[test]
    fn test_current_extent_wins_when_defined() {
        let caps = caps(vk::Extent2D { width: 800, height: 600 });
        let chosen = choose_extent(&caps, vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(chosen, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_sentinel_extent_clamps_the_request() {
        let caps = caps(vk::Extent2D { width: u32::MAX, height: u32::MAX });
        assert_eq!(
            choose_extent(&caps, vk::Extent2D { width: 1024, height: 768 }),
            vk::Extent2D { width: 1024, height: 768 }
        );
        assert_eq!(
            choose_extent(&caps, vk::Extent2D { width: 8, height: 9000 }),
            vk::Extent2D { width: 16, height: 2048 }
        );
    }

    #[test]
    fn test_pre_transform_prefers_identity() {
        let mut caps = caps(vk::Extent2D { width: 1, height: 1 });
        assert_eq!(choose_pre_transform(&caps), vk::SurfaceTransformFlagsKHR::IDENTITY);

        caps.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        caps.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_pre_transform(&caps), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }

    #[test]
    fn test_composite_alpha_order() {
        let all = vk::CompositeAlphaFlagsKHR::OPAQUE
            | vk::CompositeAlphaFlagsKHR::INHERIT
            | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
            | vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED;
        assert_eq!(choose_composite_alpha(all), vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED);
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::empty()),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }

    #[test]
    fn test_sharing_follows_family_split() {
        let shared = QueueFamilyIndices { graphics: 0, present: 0 };
        assert_eq!(sharing(shared), (vk::SharingMode::EXCLUSIVE, Vec::new()));

        let split = QueueFamilyIndices { graphics: 0, present: 2 };
        assert_eq!(sharing(split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }
}
