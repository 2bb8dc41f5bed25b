//! The scene: long-lived pipeline objects, the generation arena and the frame loop

use std::time::Duration;

use ash::vk;

use crate::config::FrameConfig;
use crate::foundation::math::{aspect_ratio, model_view_projection, perspective, Mat4};
use crate::render::backends::vulkan::{
    AcquireOutcome, CommandPool, CommandRecorder, DescriptorSetLayout, DescriptorSetLayoutBuilder, DeviceContext,
    ExtentQuery, Fence, FrameBackend, FrameDriver, FrameOutcome, Generation, GenerationArena,
    PipelineCache, PipelineLayout, PresentOutcome, Semaphore, VulkanError, VulkanResult,
};
use crate::render::{Entity, RegisterContext};

/// Renders registered entities into the window surface
///
/// Fields drop in order: generations first (their command buffers go back to
/// the pool), then entities, sync objects and finally the long-lived layouts
/// and the command pool.
pub struct Scene<'ctx> {
    generations: GenerationArena<Generation>,
    entities: Vec<Box<dyn Entity>>,
    image_acquired: Semaphore,
    frame_fence: Fence,
    pipeline_cache: PipelineCache,
    pipeline_layout: PipelineLayout,
    descriptor_set_layout: DescriptorSetLayout,
    command_pool: CommandPool,
    context: &'ctx DeviceContext,
    config: FrameConfig,
    extent_query: ExtentQuery,
    view: Mat4,
    driver: FrameDriver,
}

impl<'ctx> Scene<'ctx> {
    /// Create the long-lived objects and, if the window has a size, the first generation
    pub fn new(context: &'ctx DeviceContext, config: FrameConfig, extent_query: ExtentQuery) -> VulkanResult<Self> {
        config.validate().map_err(|reason| VulkanError::InvalidOperation { reason })?;

        let device = context.device();
        let descriptor_set_layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(vk::ShaderStageFlags::VERTEX)
            .build(device)?;
        let pipeline_layout = PipelineLayout::new(device, &[descriptor_set_layout.handle()])?;
        let pipeline_cache = PipelineCache::new(device)?;
        let command_pool = CommandPool::new(device.clone(), context.queue_families().graphics)?;

        let mut scene = Self {
            generations: GenerationArena::new(),
            entities: Vec::new(),
            image_acquired: Semaphore::new(device.clone())?,
            frame_fence: Fence::new(device.clone(), false)?,
            pipeline_cache,
            pipeline_layout,
            descriptor_set_layout,
            command_pool,
            context,
            driver: FrameDriver::new(config.max_stale_retries),
            config,
            extent_query,
            view: Mat4::identity(),
        };

        let extent = (scene.extent_query)();
        if extent.width > 0 && extent.height > 0 {
            scene.rebuild(extent)?;
        }
        Ok(scene)
    }

    /// Add an entity; it is registered right away when a generation exists
    pub fn add_entity(&mut self, mut entity: Box<dyn Entity>) -> VulkanResult<()> {
        if let Some(generation) = self.generations.active() {
            let ctx = RegisterContext {
                device_context: self.context,
                pipeline_layout: self.pipeline_layout.handle(),
                render_pass: generation.render_pass().handle(),
                pipeline_cache: &self.pipeline_cache,
                command_pool: &self.command_pool,
            };
            entity.register(&ctx)?;
        }
        self.entities.push(entity);
        Ok(())
    }

    /// Set the camera view matrix used from the next frame on
    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    /// Render and present one frame
    pub fn submit_frame(&mut self) -> VulkanResult<FrameOutcome> {
        let driver = self.driver;
        let outcome = driver.drive(self)?;
        log::trace!("Frame outcome: {outcome:?}");
        Ok(outcome)
    }

    /// `clip * projection * view` for the given extent
    pub fn view_projection(&self, extent: vk::Extent2D) -> Mat4 {
        let projection = perspective(
            self.config.fov_degrees,
            aspect_ratio(extent.width, extent.height),
            self.config.near_plane,
            self.config.far_plane,
        );
        model_view_projection(&projection, &self.view, &Mat4::identity())
    }

    /// Number of generations built so far
    pub fn generation_serial(&self) -> u64 {
        self.generations.serial()
    }

    /// Number of registered entities
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn active_generation(&self) -> VulkanResult<&Generation> {
        self.generations.active().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "No active swapchain generation".to_string(),
        })
    }

    fn register_entities(&mut self) -> VulkanResult<()> {
        let Some(generation) = self.generations.active() else {
            return Ok(());
        };
        let ctx = RegisterContext {
            device_context: self.context,
            pipeline_layout: self.pipeline_layout.handle(),
            render_pass: generation.render_pass().handle(),
            pipeline_cache: &self.pipeline_cache,
            command_pool: &self.command_pool,
        };
        for entity in &mut self.entities {
            entity.register(&ctx)?;
        }
        Ok(())
    }

    fn clear_values(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.config.clear_depth,
                    stencil: 0,
                },
            },
        ]
    }
}

impl FrameBackend for Scene<'_> {
    fn current_extent(&self) -> vk::Extent2D {
        (self.extent_query)()
    }

    fn active_extent(&self) -> Option<vk::Extent2D> {
        self.generations.active().map(Generation::requested_extent)
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        let context = self.context;
        let set_layout = &self.descriptor_set_layout;
        let command_pool = &self.command_pool;

        self.generations.rebuild(
            || context.wait_idle(),
            |previous| Generation::build(context, extent, previous, set_layout, command_pool),
        )?;
        log::info!(
            "Swapchain generation {} active at {}x{}",
            self.generations.serial(),
            extent.width,
            extent.height
        );

        self.register_entities()
    }

    fn acquire(&mut self) -> VulkanResult<AcquireOutcome> {
        self.active_generation()?
            .swapchain()
            .acquire_next_image(self.image_acquired.handle(), self.config.frame_timeout_ns)
    }

    fn record_and_submit(&mut self, image_index: u32) -> VulkanResult<()> {
        let generation = self.active_generation()?;
        let device = self.context.device();
        let extent = generation.extent();

        let mvp: [[f32; 4]; 4] = self.view_projection(extent).into();
        generation.uniform_buffer().upload_value(&mvp)?;

        let command_buffer = generation.command_buffer();
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }

        let framebuffer = generation.framebuffer(image_index)?;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: framebuffer.extent(),
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let clear_values = self.clear_values();

        let mut recorder = CommandRecorder::new(command_buffer, device.clone());
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        {
            let mut pass = recorder.begin_render_pass(
                generation.render_pass().handle(),
                framebuffer.handle(),
                render_area,
                &clear_values,
            )?;
            pass.bind_descriptor_sets(self.pipeline_layout.handle(), &[generation.descriptor_set()]);
            pass.set_viewport(&viewport);
            pass.set_scissor(&render_area);
            for entity in &self.entities {
                entity.draw(&mut pass);
            }
        }
        let command_buffer = recorder.end()?;

        self.frame_fence.reset()?;

        let wait_semaphores = [self.image_acquired.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers);

        unsafe {
            device
                .queue_submit(
                    self.context.graphics_queue(),
                    &[submit_info.build()],
                    self.frame_fence.handle(),
                )
                .map_err(VulkanError::Api)
        }
    }

    fn wait_and_present(&mut self, image_index: u32) -> VulkanResult<PresentOutcome> {
        let poll_interval = Duration::from_micros(self.config.fence_poll_interval_us);
        let timeouts = self
            .frame_fence
            .wait_polling(self.config.frame_timeout_ns, poll_interval)?;
        if timeouts > 0 {
            log::debug!("Frame fence needed {} extra waits", timeouts);
        }

        self.active_generation()?
            .swapchain()
            .present(self.context.present_queue(), image_index, &[])
    }
}

impl Drop for Scene<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("wait_idle failed while dropping the scene: {e}");
        }
        self.generations.clear();
    }
}
