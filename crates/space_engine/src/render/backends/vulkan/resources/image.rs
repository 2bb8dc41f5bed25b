//! Images with their own allocation and a view
//!
//! Each handle lives in its own owning field, declared in destroy order:
//! view, then image, then memory.

use ash::{vk, Device};

use super::memory::{DeviceAllocation, HostMemory};
use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// Format used for depth attachments
pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

struct ImageViewHandle {
    device: Device,
    view: vk::ImageView,
}

impl Drop for ImageViewHandle {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

struct ImageHandle {
    device: Device,
    image: vk::Image,
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

/// Parameters for [`Image::new`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Pixel format
    pub format: vk::Format,
    /// Memory layout
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Required memory properties
    pub memory_properties: vk::MemoryPropertyFlags,
    /// Aspect the view exposes
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Depth attachment matching [`DEPTH_FORMAT`]
    pub fn depth(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            format: DEPTH_FORMAT,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }
}

/// 2D image with bound memory and a view
pub struct Image {
    view: ImageViewHandle,
    image: ImageHandle,
    memory: DeviceAllocation,
    desc: ImageDesc,
}

impl Image {
    /// Create the image, bind memory and create a view with `desc.aspect`
    pub fn new(ctx: &DeviceContext, desc: ImageDesc) -> VulkanResult<Self> {
        let device = ctx.device();

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = ImageHandle {
            device: device.clone(),
            image: unsafe { device.create_image(&image_info, None).map_err(VulkanError::Api)? },
        };

        let requirements = unsafe { device.get_image_memory_requirements(image.image) };
        let memory = DeviceAllocation::new(device, ctx.memory_properties(), requirements, desc.memory_properties)?;

        unsafe {
            device
                .bind_image_memory(image.image, memory.handle(), 0)
                .map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = ImageViewHandle {
            device: device.clone(),
            view: unsafe { device.create_image_view(&view_info, None).map_err(VulkanError::Api)? },
        };

        Ok(Self {
            view,
            image,
            memory,
            desc,
        })
    }

    /// Get the image view handle
    pub fn view(&self) -> vk::ImageView {
        self.view.view
    }

    /// Bytes of device memory backing the image
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.memory.size()
    }

    /// Size in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }
}

/// Depth attachment sized to one swapchain extent
pub struct DepthImage {
    image: Image,
}

impl DepthImage {
    /// Create a D16 depth image with a depth-aspect view
    pub fn new(ctx: &DeviceContext, extent: vk::Extent2D) -> VulkanResult<Self> {
        let image = Image::new(ctx, ImageDesc::depth(extent))?;
        log::debug!(
            "Created {:?} depth image {}x{} in {} bytes",
            image.format(),
            image.extent().width,
            image.extent().height,
            image.allocation_size()
        );
        Ok(Self { image })
    }

    /// Get the depth view handle
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }
}
