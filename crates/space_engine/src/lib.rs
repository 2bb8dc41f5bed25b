//! # Space Engine
//!
//! Frame-resource and swapchain lifecycle management for small interactive
//! Vulkan scenes.
//!
//! ## Features
//!
//! - **Device bootstrap**: instance, surface, queue families and logical device
//!   owned by one [`DeviceContext`](render::backends::vulkan::DeviceContext)
//! - **Resources**: buffers and images with host-visible and staged uploads
//! - **Pipeline builder**: incremental pipeline description with a terminal build
//! - **Swapchain generations**: per-extent resources rebuilt and swapped as a unit
//! - **Frame driver**: acquire, record, submit and present with bounded recovery
//!   from stale surfaces
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use space_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     space_engine::foundation::logging::init();
//!
//!     let config = SpaceConfig::default();
//!     let mut window = Window::new(&config.window)?;
//!     let context = DeviceContext::new(&config.bootstrap, &mut window)?;
//!
//!     let extent_window = window.extent_query();
//!     let mut scene = Scene::new(&context, config.frame.clone(), extent_window)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         scene.submit_frame()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{BootstrapConfig, Config, ConfigError, FrameConfig, SpaceConfig, WindowConfig},
        foundation::math::{Mat4, Vec3},
        render::{
            backends::vulkan::{
                Buffer, CommandPool, DeviceContext, FrameOutcome, PipelineBuilder,
                ShaderModule, SpecializationConstants, VulkanError, VulkanResult, Window,
            },
            Entity, RegisterContext, Scene,
        },
    };
}
