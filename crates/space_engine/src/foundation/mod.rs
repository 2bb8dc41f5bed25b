//! Foundation utilities shared by the renderer and applications

pub mod logging;
pub mod math;
