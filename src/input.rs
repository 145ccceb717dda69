use glam::Vec2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{Key, NamedKey};

/// Pixels of trackpad scroll treated as one wheel notch.
const PIXELS_PER_WHEEL_STEP: f32 = 50.0;

/// Per-frame accumulation of pointer and keyboard input for the viewer.
///
/// Events that egui consumed are never pushed here, so orbiting does not
/// start when the user clicks the overlay button.
#[derive(Debug, Default)]
pub struct Input {
    drag: Vec2,
    wheel: f32,
    cursor_pos: Option<Vec2>,
    left_pressed: bool,
    toggle_pressed: bool,
    quit_pressed: bool,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ev: InputEvent) {
        match ev {
            InputEvent::Key { key, pressed } => self.apply_key(&key, pressed),
            InputEvent::Wheel { steps } => self.wheel += steps,
            InputEvent::MouseButton { button: MouseButton::Left, pressed } => self.left_pressed = pressed,
            InputEvent::MouseButton { .. } => {}
            InputEvent::CursorPos { x, y } => {
                let pos = Vec2::new(x, y);
                if let (true, Some(previous)) = (self.left_pressed, self.cursor_pos) {
                    self.drag += pos - previous;
                }
                self.cursor_pos = Some(pos);
            }
            InputEvent::CursorLeft => {
                self.cursor_pos = None;
                self.left_pressed = false;
            }
            InputEvent::Other => {}
        }
    }

    /// Pointer movement in pixels while the primary button was held.
    pub fn take_drag(&mut self) -> Option<Vec2> {
        let drag = std::mem::take(&mut self.drag);
        (drag != Vec2::ZERO).then_some(drag)
    }

    /// Wheel notches since the last call; positive means scrolled up.
    pub fn consume_wheel_delta(&mut self) -> Option<f32> {
        if self.wheel.abs() > 0.0 {
            let d = self.wheel;
            self.wheel = 0.0;
            Some(d)
        } else {
            None
        }
    }

    pub fn take_toggle_pressed(&mut self) -> bool {
        std::mem::take(&mut self.toggle_pressed)
    }

    pub fn take_quit_pressed(&mut self) -> bool {
        std::mem::take(&mut self.quit_pressed)
    }

    pub fn left_held(&self) -> bool {
        self.left_pressed
    }

    pub fn cursor_position(&self) -> Option<Vec2> {
        self.cursor_pos
    }

    /// Drops held-button state, e.g. after the window loses focus.
    pub fn release_all(&mut self) {
        self.left_pressed = false;
        self.drag = Vec2::ZERO;
    }

    fn apply_key(&mut self, key: &Key, pressed: bool) {
        if !pressed {
            return;
        }
        match ViewerAction::from_key(key) {
            Some(ViewerAction::TogglePlayback) => self.toggle_pressed = true,
            Some(ViewerAction::Quit) => self.quit_pressed = true,
            None => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerAction {
    TogglePlayback,
    Quit,
}

impl ViewerAction {
    fn from_key(key: &Key) -> Option<Self> {
        match key {
            Key::Named(NamedKey::Space) => Some(Self::TogglePlayback),
            Key::Named(NamedKey::Escape) => Some(Self::Quit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key { key: Key, pressed: bool },
    Wheel { steps: f32 },
    MouseButton { button: MouseButton, pressed: bool },
    CursorPos { x: f32, y: f32 },
    CursorLeft,
    Other,
}

impl InputEvent {
    pub fn from_window_event(ev: &WindowEvent) -> Self {
        match ev {
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / PIXELS_PER_WHEEL_STEP,
                };
                InputEvent::Wheel { steps }
            }
            WindowEvent::CursorMoved { position, .. } => {
                InputEvent::CursorPos { x: position.x as f32, y: position.y as f32 }
            }
            WindowEvent::CursorLeft { .. } => InputEvent::CursorLeft,
            WindowEvent::MouseInput { state, button, .. } => {
                InputEvent::MouseButton { button: *button, pressed: *state == ElementState::Pressed }
            }
            WindowEvent::KeyboardInput { event, .. } if !event.repeat => InputEvent::Key {
                key: event.logical_key.clone(),
                pressed: event.state == ElementState::Pressed,
            },
            _ => InputEvent::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(x: f32, y: f32) -> InputEvent {
        InputEvent::CursorPos { x, y }
    }

    #[test]
    fn drag_accumulates_only_while_left_held() {
        let mut input = Input::new();
        input.push(cursor(10.0, 10.0));
        input.push(cursor(20.0, 10.0));
        assert_eq!(input.take_drag(), None);

        input.push(InputEvent::MouseButton { button: MouseButton::Left, pressed: true });
        input.push(cursor(25.0, 14.0));
        input.push(cursor(30.0, 20.0));
        assert_eq!(input.take_drag(), Some(Vec2::new(10.0, 10.0)));
        assert_eq!(input.take_drag(), None);

        input.push(InputEvent::MouseButton { button: MouseButton::Left, pressed: false });
        input.push(cursor(50.0, 50.0));
        assert_eq!(input.take_drag(), None);
    }

    #[test]
    fn wheel_is_consumed_once() {
        let mut input = Input::new();
        input.push(InputEvent::Wheel { steps: 1.0 });
        input.push(InputEvent::Wheel { steps: 0.5 });
        assert_eq!(input.consume_wheel_delta(), Some(1.5));
        assert_eq!(input.consume_wheel_delta(), None);
    }

    #[test]
    fn space_requests_toggle_on_press_only() {
        let mut input = Input::new();
        input.push(InputEvent::Key { key: Key::Character("p".into()), pressed: true });
        assert!(!input.take_toggle_pressed());
        input.push(InputEvent::Key { key: Key::Named(NamedKey::Space), pressed: false });
        assert!(!input.take_toggle_pressed());
        input.push(InputEvent::Key { key: Key::Named(NamedKey::Space), pressed: true });
        assert!(input.take_toggle_pressed());
        assert!(!input.take_toggle_pressed());
    }

    #[test]
    fn escape_requests_quit() {
        let mut input = Input::new();
        input.push(InputEvent::Key { key: Key::Named(NamedKey::Escape), pressed: true });
        assert!(input.take_quit_pressed());
    }

    #[test]
    fn leaving_window_releases_drag() {
        let mut input = Input::new();
        input.push(InputEvent::MouseButton { button: MouseButton::Left, pressed: true });
        input.push(cursor(0.0, 0.0));
        input.push(InputEvent::CursorLeft);
        assert!(!input.left_held());
        assert!(input.cursor_position().is_none());
    }
}
