use glam::Vec3;
use winit::dpi::PhysicalSize;

use crate::animation::AnimationMixer;
use crate::camera3d::{Camera3D, OrbitControls};
use crate::config::ViewerConfig;
use crate::input::Input;
use crate::playback::{PlaybackController, ToggleOutcome};
use crate::scene::Scene;

/// Everything the frame loop mutates: scene, camera rig, animation state and
/// the loading indicator. Owned by the application and handed out by `&mut`.
pub struct ViewerContext {
    pub scene: Scene,
    pub camera: Camera3D,
    pub controls: OrbitControls,
    pub mixer: Option<AnimationMixer>,
    pub playback: PlaybackController,
    loading: bool,
    viewport: PhysicalSize<u32>,
}

impl ViewerContext {
    pub fn new(config: &ViewerConfig, viewport: PhysicalSize<u32>) -> Self {
        let scene = Scene::from_config(&config.scene, &config.shadow);
        let mut controls = OrbitControls::from_config(&config.controls);
        let mut camera = Camera3D::from_config(&config.camera, Vec3::from_array(config.controls.target), viewport);
        controls.update(&mut camera);
        Self {
            scene,
            camera,
            controls,
            mixer: None,
            playback: PlaybackController::new(),
            loading: true,
            viewport,
        }
    }

    pub fn viewport(&self) -> PhysicalSize<u32> {
        self.viewport
    }

    /// Tracks the window size; the projection follows on the next frame.
    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        self.viewport = size;
        self.camera.set_viewport(size);
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn hide_loading(&mut self) {
        self.loading = false;
    }

    pub fn toggle_playback(&mut self) -> ToggleOutcome {
        self.playback.toggle()
    }

    /// Feeds this frame's pointer and key gestures to the camera rig and the
    /// playback toggle.
    pub fn apply_input(&mut self, input: &mut Input) {
        if let Some(drag) = input.take_drag() {
            self.controls.rotate(drag, self.viewport.height as f32);
        }
        if let Some(steps) = input.consume_wheel_delta() {
            self.controls.dolly(steps);
        }
        if input.take_toggle_pressed() {
            self.toggle_playback();
        }
    }

    /// Advances the animation by `dt` seconds and eases the orbit camera.
    pub fn update(&mut self, dt: f32) {
        if let (Some(mixer), Some(model)) = (self.mixer.as_mut(), self.scene.model_mut()) {
            self.playback.apply(mixer);
            mixer.update(dt, model);
        }
        self.controls.update(&mut self.camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputEvent;
    use crate::playback::PlaybackState;
    use winit::event::MouseButton;

    fn context() -> ViewerContext {
        ViewerContext::new(&ViewerConfig::default(), PhysicalSize::new(1280, 720))
    }

    #[test]
    fn starts_loading_with_camera_inside_orbit_limits() {
        let ctx = context();
        assert!(ctx.is_loading());
        assert!(ctx.mixer.is_none());
        let distance = ctx.controls.distance(&ctx.camera);
        assert!((5.0..=20.0).contains(&distance), "distance {distance}");
        let polar = ctx.controls.polar_angle(&ctx.camera);
        assert!((0.5 - 1e-4..=1.5 + 1e-4).contains(&polar), "polar {polar}");
    }

    #[test]
    fn resize_updates_aspect_and_viewport() {
        let mut ctx = context();
        ctx.resize(PhysicalSize::new(800, 400));
        assert_eq!(ctx.viewport(), PhysicalSize::new(800, 400));
        assert!((ctx.camera.aspect - 2.0).abs() < 1e-6);
    }

    #[test]
    fn update_without_model_only_moves_camera() {
        let mut ctx = context();
        ctx.update(0.5);
        assert!(ctx.mixer.is_none());
        assert!(ctx.scene.model().is_none());
    }

    #[test]
    fn toggle_key_before_load_changes_nothing() {
        let mut ctx = context();
        let mut input = Input::new();
        input.push(InputEvent::Key { key: winit::keyboard::Key::Named(winit::keyboard::NamedKey::Space), pressed: true });
        ctx.apply_input(&mut input);
        assert_eq!(ctx.playback.state(), PlaybackState::Paused);
        assert!(!ctx.playback.is_attached());
    }

    #[test]
    fn drag_queues_orbit_rotation() {
        let mut ctx = context();
        let mut input = Input::new();
        input.push(InputEvent::CursorPos { x: 100.0, y: 100.0 });
        input.push(InputEvent::MouseButton { button: MouseButton::Left, pressed: true });
        input.push(InputEvent::CursorPos { x: 160.0, y: 100.0 });
        ctx.apply_input(&mut input);
        assert!(ctx.controls.pending_rotation().x.abs() > 0.0);
    }
}
