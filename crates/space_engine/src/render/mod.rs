//! Rendering: the Vulkan backend plus the scene that drives it
//!
//! [`Scene`] ties the long-lived pipeline objects, the generation arena and the
//! frame driver together. Anything that draws implements [`Entity`].

pub mod backends;
mod entity;
mod scene;

pub use entity::{Entity, RegisterContext};
pub use scene::Scene;
