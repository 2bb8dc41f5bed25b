//! GLFW window used as the single presentation target
//!
//! The window owns the event loop side of things. The renderer only sees it
//! through two narrow seams: the instance extensions and surface it needs at
//! bootstrap, and an [`ExtentQuery`] it polls before every frame.

use std::cell::Cell;
use std::rc::Rc;

use ash::vk;
use thiserror::Error;

use crate::config::WindowConfig;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Returns the current drawable size in pixels
pub type ExtentQuery = Box<dyn Fn() -> vk::Extent2D>;

/// Mouse input buffered between polls
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    /// A mouse button went down or came back up
    Button {
        /// Which button
        button: glfw::MouseButton,
        /// `true` on press
        pressed: bool,
    },
    /// Cursor position in screen coordinates
    Moved {
        /// Distance from the left edge
        x: f64,
        /// Distance from the top edge
        y: f64,
    },
    /// Vertical wheel offset, positive away from the user
    Scroll(f64),
}

/// Stick positions of a gamepad, each axis in `[-1, 1]` with `+y` pointing down
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GamepadSticks {
    /// Left stick `[x, y]`
    pub left: [f32; 2],
    /// Right stick `[x, y]`
    pub right: [f32; 2],
}

/// GLFW window wrapper
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    framebuffer_size: Rc<Cell<vk::Extent2D>>,
    key_events: Vec<(glfw::Key, glfw::Action)>,
    pointer_events: Vec<PointerEvent>,
}

impl Window {
    /// Create a resizable window without a client API
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan is not supported by GLFW".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);
        window.set_cursor_pos_polling(true);
        window.set_mouse_button_polling(true);
        window.set_scroll_polling(true);

        let (width, height) = window.get_framebuffer_size();
        let framebuffer_size = Rc::new(Cell::new(to_extent(width, height)));

        log::info!("Created {}x{} window \"{}\"", config.width, config.height, config.title);

        Ok(Self {
            glfw,
            window,
            events,
            framebuffer_size,
            key_events: Vec::new(),
            pointer_events: Vec::new(),
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request that the window close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the GLFW event queue, tracking size changes and buffering input
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("Framebuffer resized to {width}x{height}");
                    self.framebuffer_size.set(to_extent(width, height));
                }
                glfw::WindowEvent::Key(key, _, action, _) => {
                    self.key_events.push((key, action));
                }
                glfw::WindowEvent::Close => self.window.set_should_close(true),
                other => self.pointer_events.extend(pointer_event(&other)),
            }
        }
    }

    /// Key events received since the last call
    pub fn take_key_events(&mut self) -> Vec<(glfw::Key, glfw::Action)> {
        std::mem::take(&mut self.key_events)
    }

    /// Pointer events received since the last call, oldest first
    pub fn take_pointer_events(&mut self) -> Vec<PointerEvent> {
        std::mem::take(&mut self.pointer_events)
    }

    /// Sticks of the first joystick, if it is a mapped gamepad
    pub fn gamepad_sticks(&self) -> Option<GamepadSticks> {
        let joystick = self.glfw.get_joystick(glfw::JoystickId::Joystick1);
        if !joystick.is_gamepad() {
            return None;
        }
        let state = joystick.get_gamepad_state()?;
        Some(GamepadSticks {
            left: [
                state.get_axis(glfw::GamepadAxis::AxisLeftX),
                state.get_axis(glfw::GamepadAxis::AxisLeftY),
            ],
            right: [
                state.get_axis(glfw::GamepadAxis::AxisRightX),
                state.get_axis(glfw::GamepadAxis::AxisRightY),
            ],
        })
    }

    /// Whether a key is currently held down
    pub fn is_key_down(&self, key: glfw::Key) -> bool {
        matches!(self.window.get_key(key), glfw::Action::Press | glfw::Action::Repeat)
    }

    /// Current framebuffer size in pixels
    pub fn framebuffer_extent(&self) -> vk::Extent2D {
        self.framebuffer_size.get()
    }

    /// Window size in screen coordinates, the space cursor positions use
    pub fn cursor_area(&self) -> vk::Extent2D {
        let (width, height) = self.window.get_size();
        to_extent(width, height)
    }

    /// A query the renderer can poll without borrowing the window
    pub fn extent_query(&self) -> ExtentQuery {
        let size = Rc::clone(&self.framebuffer_size);
        Box::new(move || size.get())
    }

    /// Vulkan instance extensions GLFW needs to create a surface
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create a Vulkan surface for this window
    pub fn create_surface(&mut self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}

fn pointer_event(event: &glfw::WindowEvent) -> Option<PointerEvent> {
    match *event {
        glfw::WindowEvent::MouseButton(button, action, _) => Some(PointerEvent::Button {
            button,
            pressed: action != glfw::Action::Release,
        }),
        glfw::WindowEvent::CursorPos(x, y) => Some(PointerEvent::Moved { x, y }),
        glfw::WindowEvent::Scroll(_, y) => Some(PointerEvent::Scroll(y)),
        _ => None,
    }
}

fn to_extent(width: i32, height: i32) -> vk::Extent2D {
    vk::Extent2D {
        width: u32::try_from(width).unwrap_or(0),
        height: u32::try_from(height).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_sizes_clamp_to_zero() {
        let extent = to_extent(-1, 600);
        assert_eq!(extent.width, 0);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_mouse_events_become_pointer_events() {
        let press = glfw::WindowEvent::MouseButton(glfw::MouseButton::Button2, glfw::Action::Press, glfw::Modifiers::empty());
        assert_eq!(
            pointer_event(&press),
            Some(PointerEvent::Button {
                button: glfw::MouseButton::Button2,
                pressed: true
            })
        );

        let release =
            glfw::WindowEvent::MouseButton(glfw::MouseButton::Button1, glfw::Action::Release, glfw::Modifiers::empty());
        assert!(matches!(pointer_event(&release), Some(PointerEvent::Button { pressed: false, .. })));

        assert_eq!(
            pointer_event(&glfw::WindowEvent::CursorPos(12.5, 40.0)),
            Some(PointerEvent::Moved { x: 12.5, y: 40.0 })
        );
        assert_eq!(pointer_event(&glfw::WindowEvent::Scroll(3.0, -1.0)), Some(PointerEvent::Scroll(-1.0)));
        assert_eq!(pointer_event(&glfw::WindowEvent::Close), None);
        assert_eq!(pointer_event(&glfw::WindowEvent::FramebufferSize(800, 600)), None);
    }

    #[test]
    fn test_extent_query_tracks_shared_size() {
        let size = Rc::new(Cell::new(to_extent(1024, 768)));
        let query: ExtentQuery = {
            let size = Rc::clone(&size);
            Box::new(move || size.get())
        };
        assert_eq!(query().width, 1024);
        size.set(to_extent(800, 600));
        assert_eq!(query().width, 800);
        assert_eq!(query().height, 600);
    }
}
