//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules.

/// Vulkan initialization types (context, surface, window)
pub mod initialization;

/// Vulkan resource management (buffers, images, descriptors)
pub mod resources;

/// Vulkan rendering operations (shaders, pipelines, render passes, commands)
pub mod rendering;

/// Per-surface state: swapchains, generations, synchronization and the frame driver
pub mod state;

// Re-export core initialization types
pub use initialization::context::{
    DeviceContext, PhysicalDeviceInfo, QueueFamilyIndices, VulkanError, VulkanResult,
};
pub use initialization::window::{ExtentQuery, GamepadSticks, PointerEvent, Window, WindowError};

// Re-export resource types
pub use resources::buffer::{pack_strided, Buffer};
pub use resources::descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use resources::image::{DepthImage, Image};

// Re-export rendering types
pub use rendering::commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use rendering::framebuffer::Framebuffer;
pub use rendering::pipeline::{
    Pipeline, PipelineBuilder, PipelineCache, PipelineDescriptor, PipelineLayout, SpecializationConstants,
};
pub use rendering::render_pass::RenderPass;
pub use rendering::shader::ShaderModule;

// Re-export state types
pub use state::frame_driver::{AcquireOutcome, FrameBackend, FrameDriver, FrameOutcome, PresentOutcome};
pub use state::generation::{Generation, GenerationArena, GenerationState};
pub use state::swapchain::Swapchain;
pub use state::sync::{Fence, Semaphore};
