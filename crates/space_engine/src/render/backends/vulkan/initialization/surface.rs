//! Presentation surface and the policies that pick its format and present mode

use ash::extensions::khr;
use ash::vk;

use super::context::{VulkanError, VulkanResult};

/// Owned `VkSurfaceKHR`, destroyed with its loader
pub struct PresentationSurface {
    loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl PresentationSurface {
    /// Take ownership of a surface created by the window system
    pub fn new(loader: khr::Surface, surface: vk::SurfaceKHR) -> Self {
        Self { loader, surface }
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Whether a queue family of `physical_device` can present to this surface
    pub fn supports_family(&self, physical_device: vk::PhysicalDevice, family: u32) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Query capabilities, formats and present modes in one go
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
            })
        }
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

/// Snapshot of what a surface supports on one physical device
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format and color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

const PREFERRED_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

/// Pick the color format for swapchain images
///
/// A single `UNDEFINED` entry means the surface has no preference. Otherwise
/// the first preferred 8-bit UNORM format in sRGB-nonlinear space wins, and the
/// first reported format is the fallback.
pub fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    let first = formats.first().ok_or_else(|| {
        VulkanError::InitializationFailed("Surface reports no formats".to_string())
    })?;

    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    let preferred = PREFERRED_FORMATS.iter().find_map(|wanted| {
        formats.iter().find(|candidate| {
            candidate.format == *wanted && candidate.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    });

    Ok(*preferred.unwrap_or(first))
}

/// MAILBOX, then IMMEDIATE, then the always-available FIFO
pub fn pick_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_undefined_means_free_choice() {
        let picked = pick_surface_format(&[format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )])
        .unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(picked.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_preference_order_beats_report_order() {
        let picked = pick_surface_format(&[
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ])
        .unwrap();
        assert_eq!(picked.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_wrong_color_space_falls_back_to_first() {
        let picked = pick_surface_format(&[
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::HDR10_ST2084_EXT),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ])
        .unwrap();
        assert_eq!(picked.format, vk::Format::A2B10G10R10_UNORM_PACK32);
    }

    #[test]
    fn test_no_formats_is_an_error() {
        assert!(pick_surface_format(&[]).is_err());
    }

    #[test]
    fn test_present_mode_preference() {
        use vk::PresentModeKHR as Mode;
        assert_eq!(pick_present_mode(&[Mode::FIFO, Mode::IMMEDIATE, Mode::MAILBOX]), Mode::MAILBOX);
        assert_eq!(pick_present_mode(&[Mode::FIFO, Mode::IMMEDIATE]), Mode::IMMEDIATE);
        assert_eq!(pick_present_mode(&[Mode::FIFO_RELAXED]), Mode::FIFO);
    }
}
