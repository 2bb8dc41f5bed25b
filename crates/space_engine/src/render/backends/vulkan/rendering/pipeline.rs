//! Graphics pipeline builder
//!
//! [`PipelineDescriptor`] is plain data: shader stages keyed by stage, vertex
//! bindings keyed by binding index, attributes, rasterization choices and the
//! dynamic-state set. A stage may carry [`SpecializationConstants`] that are
//! baked into its module at pipeline creation. [`PipelineBuilder`] wraps one descriptor together with
//! the device, layout and render pass the pipeline will be valid for, and turns
//! it into a [`Pipeline`] exactly once.
//!
//! Every built pipeline uses one sample, a pass-through stencil, opaque color
//! writes, and dynamic viewport and scissor. Callers set both before each draw.

use std::collections::BTreeMap;
use std::ffi::CStr;

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// States that are dynamic in every pipeline
const ALWAYS_DYNAMIC: [vk::DynamicState; 2] = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Constant values for one shader stage's `constant_id` slots
///
/// Values are packed back to back in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SpecializationConstants {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

// Field-wise equality; `vk::SpecializationMapEntry` does not implement `PartialEq`
impl PartialEq for SpecializationConstants {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.constant_id == b.constant_id && a.offset == b.offset && a.size == b.size)
            && self.data == other.data
    }
}

impl SpecializationConstants {
    /// Append a value for `constant_id`; `false` and no change when the id is taken
    pub fn add<T: bytemuck::Pod>(&mut self, constant_id: u32, value: T) -> bool {
        if self.entries.iter().any(|e| e.constant_id == constant_id) {
            return false;
        }
        let bytes = bytemuck::bytes_of(&value);
        self.entries.push(vk::SpecializationMapEntry {
            constant_id,
            offset: self.data.len() as u32,
            size: bytes.len(),
        });
        self.data.extend_from_slice(bytes);
        true
    }

    /// Builder-style [`add`](Self::add) that fails on a duplicate id
    pub fn with<T: bytemuck::Pod>(mut self, constant_id: u32, value: T) -> VulkanResult<Self> {
        if !self.add(constant_id, value) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Specialization constant {constant_id} set twice"),
            });
        }
        Ok(self)
    }

    pub fn entries(&self) -> &[vk::SpecializationMapEntry] {
        &self.entries
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrowing create info; valid while `self` is
    fn info(&self) -> vk::SpecializationInfo {
        vk::SpecializationInfo::builder()
            .map_entries(&self.entries)
            .data(&self.data)
            .build()
    }
}

#[derive(Debug, Clone)]
struct ShaderStage {
    module: vk::ShaderModule,
    specialization: Option<SpecializationConstants>,
}

/// Accumulated pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    line_width: f32,
    depth_buffered: bool,
    stages: BTreeMap<u32, ShaderStage>,
    bindings: BTreeMap<u32, vk::VertexInputBindingDescription>,
    attributes: Vec<vk::VertexInputAttributeDescription>,
    dynamic_states: Vec<vk::DynamicState>,
}

impl Default for PipelineDescriptor {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::LINE,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            depth_buffered: false,
            stages: BTreeMap::new(),
            bindings: BTreeMap::new(),
            attributes: Vec::new(),
            dynamic_states: ALWAYS_DYNAMIC.to_vec(),
        }
    }
}

impl PipelineDescriptor {
    /// Set or replace the module for `stage`, dropping any constants it had
    pub fn set_shader_stage(&mut self, stage: vk::ShaderStageFlags, module: vk::ShaderModule) {
        self.stages.insert(
            stage.as_raw(),
            ShaderStage {
                module,
                specialization: None,
            },
        );
    }

    /// Set or replace the module for `stage` together with its constants
    ///
    /// An empty constant set is stored as none.
    pub fn set_specialized_shader_stage(
        &mut self,
        stage: vk::ShaderStageFlags,
        module: vk::ShaderModule,
        constants: SpecializationConstants,
    ) {
        self.stages.insert(
            stage.as_raw(),
            ShaderStage {
                module,
                specialization: (!constants.is_empty()).then_some(constants),
            },
        );
    }

    /// Set or replace the vertex binding at `binding`
    pub fn set_vertex_binding(&mut self, binding: u32, stride: u32, input_rate: vk::VertexInputRate) {
        self.bindings.insert(
            binding,
            vk::VertexInputBindingDescription {
                binding,
                stride,
                input_rate,
            },
        );
    }

    /// Add a vertex attribute reading from an already registered binding
    ///
    /// Returns `false` and changes nothing when `binding` is unknown. An
    /// attribute at an existing location replaces the previous one.
    pub fn add_vertex_attribute(&mut self, location: u32, binding: u32, format: vk::Format, offset: u32) -> bool {
        if !self.bindings.contains_key(&binding) {
            return false;
        }

        let attribute = vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        };
        match self.attributes.iter_mut().find(|a| a.location == location) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        true
    }

    /// [`add_vertex_attribute`](Self::add_vertex_attribute) as an error when rejected
    pub fn require_vertex_attribute(
        &mut self,
        location: u32,
        binding: u32,
        format: vk::Format,
        offset: u32,
    ) -> VulkanResult<()> {
        if self.add_vertex_attribute(location, binding, format, offset) {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: format!("Vertex attribute at location {location} uses unregistered binding {binding}"),
            })
        }
    }

    /// Make `state` dynamic; duplicates are ignored
    pub fn add_dynamic_state(&mut self, state: vk::DynamicState) {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
    }

    /// Shader stages in stage-bit order
    pub fn shader_stages(&self) -> impl Iterator<Item = (vk::ShaderStageFlags, vk::ShaderModule)> + '_ {
        self.stages
            .iter()
            .map(|(stage, entry)| (vk::ShaderStageFlags::from_raw(*stage), entry.module))
    }

    /// Constants attached to `stage`, if any
    pub fn specialization(&self, stage: vk::ShaderStageFlags) -> Option<&SpecializationConstants> {
        self.stages.get(&stage.as_raw())?.specialization.as_ref()
    }

    /// Vertex bindings in binding order
    pub fn vertex_bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        self.bindings.values().copied().collect()
    }

    /// Vertex attributes in insertion order
    pub fn vertex_attributes(&self) -> &[vk::VertexInputAttributeDescription] {
        &self.attributes
    }

    /// Dynamic states, viewport and scissor first
    pub fn dynamic_states(&self) -> &[vk::DynamicState] {
        &self.dynamic_states
    }

    /// Primitive topology
    pub fn topology(&self) -> vk::PrimitiveTopology {
        self.topology
    }

    /// Polygon fill mode
    pub fn polygon_mode(&self) -> vk::PolygonMode {
        self.polygon_mode
    }

    /// Front face winding
    pub fn front_face(&self) -> vk::FrontFace {
        self.front_face
    }

    /// Whether depth test and write are on
    pub fn depth_buffered(&self) -> bool {
        self.depth_buffered
    }

    fn validate(&self) -> VulkanResult<()> {
        if !self.stages.contains_key(&vk::ShaderStageFlags::VERTEX.as_raw()) {
            return Err(VulkanError::InvalidOperation {
                reason: "Graphics pipeline needs a vertex shader stage".to_string(),
            });
        }
        Ok(())
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout over the given descriptor set layouts
    pub fn new(device: &Device, set_layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);

        let layout = unsafe {
            device
                .create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device: device.clone(),
            layout,
        })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Pipeline cache wrapper with RAII cleanup
pub struct PipelineCache {
    device: Device,
    cache: vk::PipelineCache,
}

impl PipelineCache {
    /// Create an empty cache
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let create_info = vk::PipelineCacheCreateInfo::builder();

        let cache = unsafe {
            device
                .create_pipeline_cache(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device: device.clone(),
            cache,
        })
    }

    /// Get the cache handle
    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_cache(self.cache, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct Pipeline {
    device: Device,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Single-use builder producing one [`Pipeline`] for one render pass and layout
pub struct PipelineBuilder<'a> {
    device: &'a Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    descriptor: PipelineDescriptor,
}

impl<'a> PipelineBuilder<'a> {
    /// Start from the defaults: triangle list, line fill, no culling, clockwise front faces
    pub fn new(device: &'a Device, layout: vk::PipelineLayout, render_pass: vk::RenderPass) -> Self {
        Self {
            device,
            layout,
            render_pass,
            descriptor: PipelineDescriptor::default(),
        }
    }

    /// Set the module for a shader stage, entry point `main`
    pub fn shader_stage(&mut self, stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> &mut Self {
        self.descriptor.set_shader_stage(stage, module);
        self
    }

    /// Describe a vertex buffer binding
    pub fn vertex_binding(&mut self, binding: u32, stride: u32, input_rate: vk::VertexInputRate) -> &mut Self {
        self.descriptor.set_vertex_binding(binding, stride, input_rate);
        self
    }

    /// Set the module for a shader stage with specialization constants
    pub fn specialized_shader_stage(
        &mut self,
        stage: vk::ShaderStageFlags,
        module: vk::ShaderModule,
        constants: SpecializationConstants,
    ) -> &mut Self {
        self.descriptor.set_specialized_shader_stage(stage, module, constants);
        self
    }

    /// Add a vertex attribute
    ///
    /// Fails with [`VulkanError::InvalidOperation`] when `binding` has not been
    /// described yet.
    pub fn vertex_attribute(
        &mut self,
        location: u32,
        binding: u32,
        format: vk::Format,
        offset: u32,
    ) -> VulkanResult<&mut Self> {
        self.descriptor.require_vertex_attribute(location, binding, format, offset)?;
        Ok(self)
    }

    /// Primitive topology
    pub fn topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.descriptor.topology = topology;
        self
    }

    /// Polygon fill mode
    pub fn polygon_mode(&mut self, mode: vk::PolygonMode) -> &mut Self {
        self.descriptor.polygon_mode = mode;
        self
    }

    /// Face culling
    pub fn cull_mode(&mut self, mode: vk::CullModeFlags) -> &mut Self {
        self.descriptor.cull_mode = mode;
        self
    }

    /// Front face winding
    pub fn front_face(&mut self, face: vk::FrontFace) -> &mut Self {
        self.descriptor.front_face = face;
        self
    }

    /// Static line width, ignored when line width is dynamic
    pub fn line_width(&mut self, width: f32) -> &mut Self {
        self.descriptor.line_width = width;
        self
    }

    /// Enable depth test and write with a less-or-equal compare
    pub fn depth_buffered(&mut self, enabled: bool) -> &mut Self {
        self.descriptor.depth_buffered = enabled;
        self
    }

    /// Make a state dynamic in addition to viewport and scissor
    pub fn dynamic_state(&mut self, state: vk::DynamicState) -> &mut Self {
        self.descriptor.add_dynamic_state(state);
        self
    }

    /// Create the pipeline, consuming the builder
    pub fn build(self, cache: Option<&PipelineCache>) -> VulkanResult<Pipeline> {
        let d = &self.descriptor;
        d.validate()?;

        // Specialization infos point into the descriptor and must outlive `stages`
        let specializations: Vec<Option<vk::SpecializationInfo>> = d
            .stages
            .values()
            .map(|entry| entry.specialization.as_ref().map(SpecializationConstants::info))
            .collect();
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = d
            .shader_stages()
            .zip(&specializations)
            .map(|((stage, module), specialization)| {
                let info = vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage)
                    .module(module)
                    .name(ENTRY_POINT);
                match specialization {
                    Some(specialization) => info.specialization_info(specialization).build(),
                    None => info.build(),
                }
            })
            .collect();

        let bindings = d.vertex_bindings();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&d.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(d.topology)
            .primitive_restart_enable(false);

        // Counts only; the values come from dynamic state at draw time
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(d.polygon_mode)
            .cull_mode(d.cull_mode)
            .front_face(d.front_face)
            .depth_bias_enable(false)
            .line_width(d.line_width);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let stencil = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(d.depth_buffered)
            .depth_write_enable(d.depth_buffered)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .front(stencil)
            .back(stencil);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments)
            .blend_constants([1.0, 1.0, 1.0, 1.0]);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&d.dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0);

        let cache = cache.map_or_else(vk::PipelineCache::null, PipelineCache::handle);
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(cache, &[create_info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };

        let pipeline = pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Driver returned no pipeline".to_string(),
        })?;

        Ok(Pipeline {
            device: self.device.clone(),
            pipeline,
        })
    }
}
