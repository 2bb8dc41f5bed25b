//! Reference grid on the XZ plane

use std::path::{Path, PathBuf};

use ash::vk;
use space_engine::prelude::*;
use space_engine::render::backends::vulkan::{ActiveRenderPass, Pipeline};

use crate::curve::Vertex;

/// Gray level of the grid lines, fed to `grid.frag` as constant 0
const GRID_SHADE: f32 = 0.35;

/// Fragment shader constants for the grid color
fn grid_constants() -> VulkanResult<SpecializationConstants> {
    SpecializationConstants::default().with(0, GRID_SHADE)
}

/// Line endpoints for a square grid centered on the origin at `y = 0`
///
/// `half_extent` is rounded down to whole cells. Each of the `2 * cells + 1`
/// lines per axis contributes two vertices.
pub fn grid_lines(half_extent: f32, spacing: f32) -> Vec<Vertex> {
    if !(spacing > 0.0) || !(half_extent > 0.0) {
        return Vec::new();
    }
    let cells = (half_extent / spacing).floor() as i32;
    let edge = cells as f32 * spacing;

    let mut vertices = Vec::with_capacity((cells as usize * 2 + 1) * 4);
    for i in -cells..=cells {
        let offset = i as f32 * spacing;
        vertices.push(Vertex::from(Vec3::new(offset, 0.0, -edge)));
        vertices.push(Vertex::from(Vec3::new(offset, 0.0, edge)));
        vertices.push(Vertex::from(Vec3::new(-edge, 0.0, offset)));
        vertices.push(Vertex::from(Vec3::new(edge, 0.0, offset)));
    }
    vertices
}

/// Floor grid drawn under the scene
///
/// The vertices never change, so they go to device-local memory once through
/// a staging copy.
pub struct ReferenceGrid {
    shader_dir: PathBuf,
    vertices: Vec<Vertex>,
    buffer: Option<Buffer>,
    pipeline: Option<Pipeline>,
}

impl ReferenceGrid {
    /// Grid reaching `half_extent` from the origin with lines every `spacing`
    pub fn new(half_extent: f32, spacing: f32, shader_dir: impl AsRef<Path>) -> Self {
        Self {
            shader_dir: shader_dir.as_ref().to_path_buf(),
            vertices: grid_lines(half_extent, spacing),
            buffer: None,
            pipeline: None,
        }
    }

    /// Number of vertices drawn
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

impl Entity for ReferenceGrid {
    fn register(&mut self, ctx: &RegisterContext<'_>) -> VulkanResult<()> {
        if self.vertices.is_empty() {
            return Ok(());
        }

        let context = ctx.device_context;
        if self.buffer.is_none() {
            let buffer = Buffer::device_local_with_data(
                context,
                ctx.command_pool,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                &self.vertices,
            )?;
            log::debug!("Uploaded grid: {} vertices", self.vertices.len());
            self.buffer = Some(buffer);
        }

        let device = context.device();
        let vertex = ShaderModule::from_file(device, self.shader_dir.join("line.vert.spv"))?;
        let fragment = ShaderModule::from_file(device, self.shader_dir.join("grid.frag.spv"))?;

        let mut builder = PipelineBuilder::new(device, ctx.pipeline_layout, ctx.render_pass);
        builder
            .shader_stage(vk::ShaderStageFlags::VERTEX, vertex.handle())
            .specialized_shader_stage(vk::ShaderStageFlags::FRAGMENT, fragment.handle(), grid_constants()?)
            .topology(vk::PrimitiveTopology::LINE_LIST)
            .polygon_mode(vk::PolygonMode::FILL)
            .depth_buffered(true)
            .vertex_binding(0, std::mem::size_of::<Vertex>() as u32, vk::VertexInputRate::VERTEX)
            .vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)?;

        self.pipeline = None;
        self.pipeline = Some(builder.build(Some(ctx.pipeline_cache))?);
        Ok(())
    }

    fn draw(&self, pass: &mut ActiveRenderPass<'_>) {
        let (Some(pipeline), Some(buffer)) = (&self.pipeline, &self.buffer) else {
            return;
        };
        pass.bind_pipeline(pipeline.handle());
        pass.bind_vertex_buffers(0, &[buffer.handle()], &[0]);
        pass.draw(u32::try_from(self.vertices.len()).unwrap_or(u32::MAX), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_grid_line_count() {
        // 21 lines per axis, two axes, two vertices per line
        assert_eq!(grid_lines(10.0, 1.0).len(), 84);
        assert_eq!(grid_lines(1.0, 1.0).len(), 12);
    }

    #[test]
    fn test_grid_lies_on_floor_within_bounds() {
        for v in grid_lines(5.0, 0.5) {
            assert_relative_eq!(v.position[1], 0.0);
            assert!(v.position[0].abs() <= 5.0 + 1e-5);
            assert!(v.position[2].abs() <= 5.0 + 1e-5);
        }
    }

    #[test]
    fn test_partial_cells_are_dropped() {
        let vertices = grid_lines(2.5, 1.0);
        assert_eq!(vertices.len(), 20);
        assert_relative_eq!(vertices[0].position[2], -2.0);
    }

    #[test]
    fn test_grid_shade_is_constant_zero() {
        let constants = grid_constants().unwrap();
        assert_eq!(constants.entries().len(), 1);
        assert_eq!(constants.entries()[0].constant_id, 0);
        assert_eq!(constants.data(), &GRID_SHADE.to_ne_bytes());
    }

    #[test]
    fn test_degenerate_grid_is_empty() {
        assert!(grid_lines(10.0, 0.0).is_empty());
        assert!(grid_lines(0.0, 1.0).is_empty());
        assert!(grid_lines(f32::NAN, 1.0).is_empty());
    }
}
