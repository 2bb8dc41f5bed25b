//! Swapchain generations
//!
//! A [`Generation`] is every resource whose size or format follows the surface:
//! swapchain, depth image, render pass, framebuffers, the uniform buffer with
//! its descriptor set, and the command buffer recorded against them. Members
//! are only ever combined with members of the same generation.
//!
//! [`GenerationArena`] owns at most two generations. Replacement waits for the
//! device to go idle, moves the active generation into the retiring slot,
//! builds the successor against it, destroys the retiring one and only then
//! activates the successor.

use std::mem;

use ash::{vk, Device};

use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::resources::descriptor_set::write_uniform_buffer;
use crate::render::backends::vulkan::resources::image::DEPTH_FORMAT;
use crate::render::backends::vulkan::{
    Buffer, CommandPool, DepthImage, DescriptorPool, DescriptorSetLayout, DeviceContext, Framebuffer,
    RenderPass, Swapchain, VulkanError, VulkanResult,
};

/// Lifecycle of one generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// Resources are being created
    Building,
    /// Used for every frame
    Active,
    /// Superseded; kept only until its successor is built
    Retiring,
    /// All resources released
    Destroyed,
}

/// Two-slot owner of the active generation and the one being replaced
pub struct GenerationArena<G> {
    active: Option<G>,
    retiring: Option<G>,
    state: GenerationState,
    serial: u64,
}

impl<G> Default for GenerationArena<G> {
    fn default() -> Self {
        Self {
            active: None,
            retiring: None,
            state: GenerationState::Destroyed,
            serial: 0,
        }
    }
}

impl<G> GenerationArena<G> {
    /// Empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation frames are drawn with
    pub fn active(&self) -> Option<&G> {
        self.active.as_ref()
    }

    /// State of the newest generation
    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Number of generations activated so far
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Replace the active generation
    ///
    /// `wait_idle` runs first whenever a generation is active. `build` receives
    /// the retiring generation, if any. The retiring generation is dropped
    /// before the new one becomes visible, also when `build` fails; the arena is
    /// then left empty.
    pub fn rebuild<E, W, B>(&mut self, wait_idle: W, build: B) -> Result<&G, E>
    where
        W: FnOnce() -> Result<(), E>,
        B: FnOnce(Option<&G>) -> Result<G, E>,
    {
        if self.active.is_some() {
            wait_idle()?;
            self.retiring = self.active.take();
            self.set_state(GenerationState::Retiring);
        }

        self.set_state(GenerationState::Building);
        let built = build(self.retiring.as_ref());

        if let Some(retired) = self.retiring.take() {
            drop(retired);
            log::debug!("Generation {} destroyed", self.serial);
        }

        match built {
            Ok(next) => {
                self.serial += 1;
                self.set_state(GenerationState::Active);
                Ok(self.active.insert(next))
            }
            Err(e) => {
                self.set_state(GenerationState::Destroyed);
                Err(e)
            }
        }
    }

    /// Drop every generation
    pub fn clear(&mut self) {
        self.retiring = None;
        self.active = None;
        self.set_state(GenerationState::Destroyed);
    }

    fn set_state(&mut self, state: GenerationState) {
        log::trace!("Generation {}: {:?} -> {:?}", self.serial, self.state, state);
        self.state = state;
    }
}

struct CommandBufferHandle {
    device: Device,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

impl Drop for CommandBufferHandle {
    fn drop(&mut self) {
        unsafe {
            self.device.free_command_buffers(self.pool, &[self.buffer]);
        }
    }
}

/// One set of per-surface resources, all sized to one extent
///
/// Fields drop in dependency order: the command buffer first, the swapchain
/// last.
pub struct Generation {
    command_buffer: CommandBufferHandle,
    framebuffers: Vec<Framebuffer>,
    // Owned only so they are released with the generation
    _descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    uniform_buffer: Buffer,
    render_pass: RenderPass,
    _depth_image: DepthImage,
    swapchain: Swapchain,
    requested_extent: vk::Extent2D,
}

impl Generation {
    /// Build a generation for `extent`
    ///
    /// `previous` hands its swapchain over as `old_swapchain`. `set_layout`
    /// describes binding 0 as the uniform buffer; `command_pool` must outlive
    /// the generation.
    pub fn build(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        previous: Option<&Self>,
        set_layout: &DescriptorSetLayout,
        command_pool: &CommandPool,
    ) -> VulkanResult<Self> {
        let device = ctx.device();
        let support = ctx.surface().support(ctx.physical_device().device)?;
        let old_swapchain = previous.map_or_else(vk::SwapchainKHR::null, |g| g.swapchain.handle());

        let swapchain = Swapchain::new(ctx, &support, extent, old_swapchain)?;
        let image_extent = swapchain.extent();

        let depth_image = DepthImage::new(ctx, image_extent)?;
        let uniform_buffer = Buffer::host_visible(
            ctx,
            mem::size_of::<[f32; 16]>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        uniform_buffer.upload(Mat4::identity().as_slice())?;

        let render_pass = RenderPass::new_forward_pass(device, swapchain.format().format, DEPTH_FORMAT)?;

        let framebuffers = framebuffer_attachments(&swapchain.image_views(), depth_image.view())
            .iter()
            .map(|attachments| Framebuffer::new(device, render_pass.handle(), attachments, image_extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        let descriptor_pool = DescriptorPool::for_layout(device, set_layout, 1)?;
        let descriptor_set = descriptor_pool.allocate(set_layout)?;
        write_uniform_buffer(device, descriptor_set, 0, uniform_buffer.handle());

        let buffer = command_pool
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "Command pool returned no command buffer".to_string(),
            })?;
        let command_buffer = CommandBufferHandle {
            device: device.clone(),
            pool: command_pool.handle(),
            buffer,
        };

        log::info!(
            "Built generation at {}x{} with {} framebuffers over {} images ({:?})",
            image_extent.width,
            image_extent.height,
            framebuffers.len(),
            swapchain.image_count(),
            swapchain.present_mode()
        );

        Ok(Self {
            command_buffer,
            framebuffers,
            _descriptor_pool: descriptor_pool,
            descriptor_set,
            uniform_buffer,
            render_pass,
            _depth_image: depth_image,
            swapchain,
            requested_extent: extent,
        })
    }

    /// Extent this generation was requested for, compared against the window
    pub fn requested_extent(&self) -> vk::Extent2D {
        self.requested_extent
    }

    /// Actual image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// The swapchain
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Render pass every pipeline drawing into this generation must be built for
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Framebuffer for swapchain image `index`
    pub fn framebuffer(&self, index: u32) -> VulkanResult<&Framebuffer> {
        self.framebuffers
            .get(index as usize)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!(
                    "Image index {index} out of range for {} framebuffers",
                    self.framebuffers.len()
                ),
            })
    }

    /// Uniform buffer holding the view-projection matrix
    pub fn uniform_buffer(&self) -> &Buffer {
        &self.uniform_buffer
    }

    /// Descriptor set pointing at the uniform buffer
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// The primary command buffer
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer.buffer
    }
}

/// Attachments for one framebuffer per color view, all sharing `depth`
pub fn framebuffer_attachments(color_views: &[vk::ImageView], depth: vk::ImageView) -> Vec<[vk::ImageView; 2]> {
    color_views.iter().map(|&color| [color, depth]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::state::swapchain::choose_extent;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        WaitIdle,
        Built { id: u32, previous: Option<u32> },
        Destroyed(u32),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    /// Swapchain sized the way the surface allows
    struct MockSwapchain {
        extent: vk::Extent2D,
        image_count: usize,
    }

    impl MockSwapchain {
        fn new(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> Self {
            Self {
                extent: choose_extent(caps, requested),
                image_count: caps.min_image_count as usize + 1,
            }
        }
    }

    /// Framebuffers take their extent and count from the swapchain only
    struct MockGeneration {
        id: u32,
        requested_extent: vk::Extent2D,
        swapchain: MockSwapchain,
        framebuffers: Vec<vk::Extent2D>,
        log: Log,
    }

    impl MockGeneration {
        fn build(id: u32, caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D, log: Log) -> Self {
            let swapchain = MockSwapchain::new(caps, requested);
            let framebuffers = vec![swapchain.extent; swapchain.image_count];
            Self {
                id,
                requested_extent: requested,
                swapchain,
                framebuffers,
                log,
            }
        }
    }

    fn surface(max: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: max,
            ..Default::default()
        }
    }

    impl Drop for MockGeneration {
        fn drop(&mut self) {
            self.log.borrow_mut().push(Event::Destroyed(self.id));
        }
    }

    fn rebuild(arena: &mut GenerationArena<MockGeneration>, log: &Log, id: u32, extent: vk::Extent2D) {
        rebuild_on(arena, log, id, &surface(vk::Extent2D { width: 4096, height: 4096 }), extent);
    }

    fn rebuild_on(
        arena: &mut GenerationArena<MockGeneration>,
        log: &Log,
        id: u32,
        caps: &vk::SurfaceCapabilitiesKHR,
        extent: vk::Extent2D,
    ) {
        let wait_log = Rc::clone(log);
        let build_log = Rc::clone(log);
        arena
            .rebuild(
                || {
                    wait_log.borrow_mut().push(Event::WaitIdle);
                    Ok::<(), VulkanError>(())
                },
                |previous| {
                    build_log.borrow_mut().push(Event::Built {
                        id,
                        previous: previous.map(|p| p.id),
                    });
                    Ok(MockGeneration::build(id, caps, extent, Rc::clone(&build_log)))
                },
            )
            .unwrap();
    }

    #[test]
    fn test_first_build_skips_idle_wait() {
        let log: Log = Rc::default();
        let mut arena = GenerationArena::new();
        assert_eq!(arena.state(), GenerationState::Destroyed);

        rebuild(&mut arena, &log, 1, vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(*log.borrow(), vec![Event::Built { id: 1, previous: None }]);
        assert_eq!(arena.state(), GenerationState::Active);
        assert_eq!(arena.serial(), 1);
    }

    #[test]
    fn test_resize_destroys_old_generation_before_activation() {
        let log: Log = Rc::default();
        let mut arena = GenerationArena::new();
        rebuild(&mut arena, &log, 1, vk::Extent2D { width: 1024, height: 768 });
        rebuild(&mut arena, &log, 2, vk::Extent2D { width: 800, height: 600 });

        assert_eq!(
            *log.borrow(),
            vec![
                Event::Built { id: 1, previous: None },
                Event::WaitIdle,
                Event::Built { id: 2, previous: Some(1) },
                Event::Destroyed(1),
            ]
        );

        let active = arena.active().unwrap();
        assert_eq!(active.id, 2);
        assert_eq!(active.swapchain.extent, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(active.framebuffers.len(), active.swapchain.image_count);
        assert!(active
            .framebuffers
            .iter()
            .all(|fb| *fb == vk::Extent2D { width: 800, height: 600 }));
    }

    #[test]
    fn test_framebuffers_follow_clamped_swapchain_extent() {
        let log: Log = Rc::default();
        let mut arena = GenerationArena::new();
        let small_surface = surface(vk::Extent2D { width: 800, height: 600 });
        let requested = vk::Extent2D { width: 1024, height: 768 };
        rebuild_on(&mut arena, &log, 1, &small_surface, requested);

        let active = arena.active().unwrap();
        assert_eq!(active.requested_extent, requested);
        assert_eq!(active.swapchain.extent, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(active.framebuffers, vec![vk::Extent2D { width: 800, height: 600 }; 3]);
    }

    #[test]
    fn test_framebuffers_follow_fixed_surface_extent() {
        let log: Log = Rc::default();
        let mut arena = GenerationArena::new();
        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 640, height: 360 },
            ..surface(vk::Extent2D { width: 4096, height: 4096 })
        };
        rebuild_on(&mut arena, &log, 1, &fixed, vk::Extent2D { width: 1920, height: 1080 });

        let active = arena.active().unwrap();
        assert!(active
            .framebuffers
            .iter()
            .all(|fb| *fb == vk::Extent2D { width: 640, height: 360 }));
    }

    #[test]
    fn test_failed_build_still_destroys_retiring() {
        let log: Log = Rc::default();
        let mut arena = GenerationArena::new();
        rebuild(&mut arena, &log, 1, vk::Extent2D { width: 640, height: 480 });

        let result = arena.rebuild(
            || Ok(()),
            |_| Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)),
        );
        assert!(result.is_err());
        assert!(arena.active().is_none());
        assert_eq!(arena.state(), GenerationState::Destroyed);
        assert_eq!(log.borrow().last(), Some(&Event::Destroyed(1)));
    }

    #[test]
    fn test_failed_idle_wait_keeps_active() {
        let log: Log = Rc::default();
        let mut arena = GenerationArena::new();
        rebuild(&mut arena, &log, 1, vk::Extent2D { width: 640, height: 480 });

        let result = arena.rebuild(
            || Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)),
            |_| unreachable!("build must not run after a failed wait"),
        );
        assert!(result.is_err());
        assert_eq!(arena.active().map(|g| g.id), Some(1));
    }

    #[test]
    fn test_clear_destroys_active() {
        let log: Log = Rc::default();
        let mut arena = GenerationArena::new();
        rebuild(&mut arena, &log, 7, vk::Extent2D { width: 1, height: 1 });
        arena.clear();
        assert_eq!(log.borrow().last(), Some(&Event::Destroyed(7)));
        assert!(arena.active().is_none());
    }

    #[test]
    fn test_one_framebuffer_per_image_sharing_depth() {
        let colors: Vec<vk::ImageView> = (1..=3).map(vk::ImageView::from_raw).collect();
        let depth = vk::ImageView::from_raw(99);
        let attachments = framebuffer_attachments(&colors, depth);
        assert_eq!(attachments.len(), 3);
        for (pair, color) in attachments.iter().zip(&colors) {
            assert_eq!(pair, &[*color, depth]);
        }
    }
}
