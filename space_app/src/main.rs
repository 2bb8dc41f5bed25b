//! Spline viewer
//!
//! Draws a clamped cubic B-spline above a reference grid. Arrow keys or a
//! left-drag orbit the camera, WASD or a right-drag pans, Q/E or the wheel
//! zoom and Escape quits. A connected gamepad walks and looks in first person.

mod camera;
mod curve;
mod grid;
mod input;

use std::process::ExitCode;
use std::time::Instant;

use glfw::{Action, Key};
use space_engine::foundation::logging;
use space_engine::prelude::*;

use camera::TrackballCamera;
use curve::{demo_control_points, BSpline, Curve, DEGREE};
use grid::ReferenceGrid;
use input::{PointerController, StickMotion};

const CONFIG_PATH: &str = "space.toml";

/// Radians per second while an arrow key is held
const ROTATE_SPEED: f32 = 1.5;
/// World units per second while a pan key is held
const PAN_SPEED: f32 = 2.0;
/// Zoom amount per second while a zoom key is held
const ZOOM_SPEED: f32 = 2.0;

const GRID_HALF_EXTENT: f32 = 10.0;
const GRID_SPACING: f32 = 1.0;

fn axis(window: &Window, negative: Key, positive: Key) -> f32 {
    let mut value = 0.0;
    if window.is_key_down(negative) {
        value -= 1.0;
    }
    if window.is_key_down(positive) {
        value += 1.0;
    }
    value
}

fn update_camera(window: &Window, camera: &mut TrackballCamera, dt: f32) {
    let orbit_side = axis(window, Key::Left, Key::Right);
    let orbit_up = axis(window, Key::Down, Key::Up);
    camera.rotate(orbit_side * ROTATE_SPEED * dt, orbit_up * ROTATE_SPEED * dt);

    let pan_side = axis(window, Key::A, Key::D);
    let pan_up = axis(window, Key::S, Key::W);
    camera.pan(pan_side * PAN_SPEED * dt, pan_up * PAN_SPEED * dt);

    let zoom = axis(window, Key::Q, Key::E) + axis(window, Key::PageUp, Key::PageDown);
    camera.zoom(zoom * ZOOM_SPEED * dt);
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = SpaceConfig::load_or_default(CONFIG_PATH)?;
    config.validate().map_err(ConfigError::Invalid)?;

    let mut window = Window::new(&config.window)?;
    let context = DeviceContext::new(&config.bootstrap, &mut window)?;
    let mut scene = Scene::new(&context, config.frame.clone(), window.extent_query())?;

    let grid = ReferenceGrid::new(GRID_HALF_EXTENT, GRID_SPACING, &config.shader_dir);
    let spline = BSpline::new(demo_control_points(), DEGREE)?;
    log::debug!("Spline knots: {:?}", spline.knots());
    let curve = Curve::new(&spline, &config.shader_dir);
    log::debug!(
        "Grid: {} vertices, curve: {} samples",
        grid.vertex_count(),
        curve.points().len()
    );
    scene.add_entity(Box::new(grid))?;
    scene.add_entity(Box::new(curve))?;
    log::info!("Scene ready with {} entities", scene.entity_count());

    let mut camera = TrackballCamera::default();
    let mut pointer = PointerController::default();
    let mut last_frame = Instant::now();
    let mut gave_up = 0_u64;

    while !window.should_close() {
        window.poll_events();
        for (key, action) in window.take_key_events() {
            if key == Key::Escape && action == Action::Press {
                window.set_should_close(true);
            }
        }

        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        update_camera(&window, &mut camera, dt);
        let cursor_area = window.cursor_area();
        for event in window.take_pointer_events() {
            if let Some(action) = pointer.handle(event, cursor_area) {
                action.apply(&mut camera);
            }
        }
        if let Some(sticks) = window.gamepad_sticks() {
            StickMotion::from_sticks(&sticks, dt).apply(&mut camera);
        }
        scene.set_view(camera.view_matrix());

        match scene.submit_frame()? {
            FrameOutcome::GaveUp => {
                gave_up += 1;
                log::warn!("Surface kept going stale, frame dropped ({gave_up} so far)");
            }
            FrameOutcome::Skipped => std::thread::sleep(std::time::Duration::from_millis(16)),
            FrameOutcome::Presented | FrameOutcome::PresentedStale => {}
        }
    }

    let extent = window.framebuffer_extent();
    log::info!(
        "Shutting down at {}x{} after {} swapchain generations, camera at {:?} looking at {:?}",
        extent.width,
        extent.height,
        scene.generation_serial(),
        camera.eye(),
        camera.center()
    );
    Ok(())
}

fn main() -> ExitCode {
    logging::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
