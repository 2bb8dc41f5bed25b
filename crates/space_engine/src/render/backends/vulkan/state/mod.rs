//! Per-surface state and the per-frame submission cycle

pub mod frame_driver;
pub mod generation;
pub mod swapchain;
pub mod sync;
