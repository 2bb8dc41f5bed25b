//! Command recording, render passes, shaders and pipelines

pub mod commands;
pub mod framebuffer;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
