//! Drawable scene entities

use ash::vk;

use crate::render::backends::vulkan::{ActiveRenderPass, CommandPool, DeviceContext, PipelineCache, VulkanResult};

/// What an entity needs to (re)build its pipeline and upload its geometry
pub struct RegisterContext<'a> {
    /// Device the entity allocates from
    pub device_context: &'a DeviceContext,
    /// Layout shared by every pipeline; set 0 binding 0 is the view-projection uniform
    pub pipeline_layout: vk::PipelineLayout,
    /// Render pass of the active generation
    pub render_pass: vk::RenderPass,
    /// Shared pipeline cache
    pub pipeline_cache: &'a PipelineCache,
    /// Pool for one-shot transfer commands
    pub command_pool: &'a CommandPool,
}

/// Something the scene draws every frame
///
/// `register` runs when the entity is added and again after every generation
/// rebuild, because a pipeline is only valid with the render pass it was built
/// for. Geometry that does not depend on the render pass should be uploaded on
/// the first call only.
pub trait Entity {
    /// Build pipelines against `ctx.render_pass`
    fn register(&mut self, ctx: &RegisterContext<'_>) -> VulkanResult<()>;

    /// Record draw commands; the scene has already bound the descriptor set
    /// and set viewport and scissor
    fn draw(&self, pass: &mut ActiveRenderPass<'_>);
}
