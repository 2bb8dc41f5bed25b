//! Clamped B-spline curve drawn as indexed line segments

use std::path::{Path, PathBuf};

use ash::vk;
use bytemuck::{Pod, Zeroable};
use space_engine::prelude::*;
use space_engine::render::backends::vulkan::{ActiveRenderPass, Pipeline};
use thiserror::Error;

/// Samples taken along the curve, endpoints included once each
pub const SAMPLE_STEPS: usize = 1000;

/// Degree of the demo spline
pub const DEGREE: usize = 3;

const LINE_WIDTH: f32 = 2.0;

/// Bytes between consecutive vertices in the GPU buffer, positions padded to 16
const VERTEX_STRIDE: usize = 16;

/// Curve construction errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SplineError {
    /// A degree-p spline needs at least p + 1 control points
    #[error("degree {degree} needs at least {} control points, got {count}", .degree + 1)]
    TooFewControlPoints {
        /// Requested degree
        degree: usize,
        /// Control points supplied
        count: usize,
    },
}

/// Vertex with a position only
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in world space
    pub position: [f32; 3],
}

impl From<Vec3> for Vertex {
    fn from(v: Vec3) -> Self {
        Self {
            position: [v.x, v.y, v.z],
        }
    }
}

/// B-spline with a clamped uniform knot vector over `[0, 1]`
#[derive(Debug, Clone)]
pub struct BSpline {
    control_points: Vec<Vec3>,
    degree: usize,
    knots: Vec<f32>,
}

impl BSpline {
    /// Build the spline; the curve starts at the first control point and ends at the last
    pub fn new(control_points: Vec<Vec3>, degree: usize) -> Result<Self, SplineError> {
        let count = control_points.len();
        if count <= degree {
            return Err(SplineError::TooFewControlPoints { degree, count });
        }

        let spans = count - degree;
        let step = 1.0 / spans as f32;
        let mut knots = vec![0.0; degree + 1];
        knots.extend((1..spans).map(|i| step * i as f32));
        knots.extend(std::iter::repeat(1.0).take(degree + 1));

        Ok(Self {
            control_points,
            degree,
            knots,
        })
    }

    /// Knot vector, `control_points + degree + 1` entries
    pub fn knots(&self) -> &[f32] {
        &self.knots
    }

    /// Evaluate at `t` with de Boor's algorithm; `t` is clamped to `[0, 1]`
    pub fn evaluate(&self, t: f32) -> Vec3 {
        let t = t.clamp(0.0, 1.0);
        let p = self.degree;
        let n = self.control_points.len();

        // Knot span containing t; t == 1 falls into the last non-empty span
        let k = (p..n).rev().find(|&i| self.knots[i] <= t).unwrap_or(p);

        let mut d: Vec<Vec3> = self.control_points[k - p..=k].to_vec();
        for r in 1..=p {
            for j in (r..=p).rev() {
                let i = j + k - p;
                let denom = self.knots[i + p + 1 - r] - self.knots[i];
                let alpha = if denom.abs() < f32::EPSILON {
                    0.0
                } else {
                    (t - self.knots[i]) / denom
                };
                d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
            }
        }
        d[p]
    }

    /// `steps + 1` evenly spaced samples from `t = 0` to `t = 1`
    pub fn sample(&self, steps: usize) -> Vec<Vec3> {
        let steps = steps.max(1);
        (0..=steps)
            .map(|i| self.evaluate(i as f32 / steps as f32))
            .collect()
    }
}

/// Control points of the demo curve
pub fn demo_control_points() -> Vec<Vec3> {
    vec![
        Vec3::new(4.0, 1.0, 8.3),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(-3.0, 1.0, -2.1),
        Vec3::new(2.0, 1.0, 0.0),
        Vec3::new(4.0, 1.0, 5.0),
        Vec3::new(3.2, -1.0, 0.0),
        Vec3::new(6.0, 1.0, 0.3),
    ]
}

/// Line-list indices joining consecutive points: 0 1, 1 2, 2 3, ...
pub fn segment_indices(point_count: usize) -> Vec<u16> {
    let count = point_count.saturating_sub(1) * 2;
    (0..count)
        .map(|i| u16::try_from(i / 2 + i % 2).unwrap_or(u16::MAX))
        .collect()
}

struct CurveGpu {
    vertices: Buffer,
    indices: Buffer,
    index_count: u32,
}

/// The demo spline as a scene entity
///
/// Vertices and indices live in host-visible memory and are written once.
pub struct Curve {
    shader_dir: PathBuf,
    points: Vec<Vertex>,
    gpu: Option<CurveGpu>,
    pipeline: Option<Pipeline>,
    line_width: f32,
}

impl Curve {
    /// Sample `spline` into a drawable curve
    pub fn new(spline: &BSpline, shader_dir: impl AsRef<Path>) -> Self {
        let points = spline
            .sample(SAMPLE_STEPS)
            .into_iter()
            .map(Vertex::from)
            .collect();
        Self {
            shader_dir: shader_dir.as_ref().to_path_buf(),
            points,
            gpu: None,
            pipeline: None,
            line_width: 1.0,
        }
    }

    /// Sampled points
    pub fn points(&self) -> &[Vertex] {
        &self.points
    }

    fn upload(&self, ctx: &DeviceContext) -> VulkanResult<CurveGpu> {
        let indices = segment_indices(self.points.len());
        let vertex_bytes = (self.points.len() * VERTEX_STRIDE) as vk::DeviceSize;
        let vertices = Buffer::host_visible(ctx, vertex_bytes, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        vertices.upload_strided(&self.points, VERTEX_STRIDE)?;
        let index_buffer = Buffer::host_visible_with_data(ctx, vk::BufferUsageFlags::INDEX_BUFFER, &indices)?;
        log::debug!(
            "Uploaded curve: {} vertices in {} bytes, {} indices",
            self.points.len(),
            vertices.size(),
            indices.len()
        );

        Ok(CurveGpu {
            vertices,
            indices: index_buffer,
            index_count: u32::try_from(indices.len()).unwrap_or(u32::MAX),
        })
    }
}

impl Entity for Curve {
    fn register(&mut self, ctx: &RegisterContext<'_>) -> VulkanResult<()> {
        let context = ctx.device_context;
        if self.gpu.is_none() {
            self.gpu = Some(self.upload(context)?);
        }

        let device = context.device();
        let vertex = ShaderModule::from_file(device, self.shader_dir.join("line.vert.spv"))?;
        let fragment = ShaderModule::from_file(device, self.shader_dir.join("curve.frag.spv"))?;

        let polygon_mode = if context.physical_device().supports_non_solid_fill() {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        };

        let mut builder = PipelineBuilder::new(device, ctx.pipeline_layout, ctx.render_pass);
        builder
            .shader_stage(vk::ShaderStageFlags::VERTEX, vertex.handle())
            .shader_stage(vk::ShaderStageFlags::FRAGMENT, fragment.handle())
            .topology(vk::PrimitiveTopology::LINE_LIST)
            .polygon_mode(polygon_mode)
            .depth_buffered(true)
            .dynamic_state(vk::DynamicState::LINE_WIDTH)
            .vertex_binding(0, VERTEX_STRIDE as u32, vk::VertexInputRate::VERTEX)
            .vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)?;

        // Release the old pipeline before building its replacement
        self.pipeline = None;
        self.pipeline = Some(builder.build(Some(ctx.pipeline_cache))?);
        self.line_width = LINE_WIDTH.min(context.physical_device().max_line_width());
        Ok(())
    }

    fn draw(&self, pass: &mut ActiveRenderPass<'_>) {
        let (Some(pipeline), Some(gpu)) = (&self.pipeline, &self.gpu) else {
            return;
        };
        pass.bind_pipeline(pipeline.handle());
        pass.bind_vertex_buffers(0, &[gpu.vertices.handle()], &[0]);
        pass.bind_index_buffer(gpu.indices.handle(), 0, vk::IndexType::UINT16);
        pass.set_line_width(self.line_width);
        pass.draw_indexed(gpu.index_count, 0, 0);
    }
}
