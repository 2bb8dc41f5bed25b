//! Device-memory backed resources and descriptor plumbing

pub mod buffer;
pub mod descriptor_set;
pub mod image;
pub mod memory;
