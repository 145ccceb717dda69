use crate::config::{CameraConfig, ControlsConfig};
use glam::{Mat4, Vec2, Vec3};
use winit::dpi::PhysicalSize;

const DEFAULT_UP: Vec3 = Vec3::Y;
const POLAR_EPSILON: f32 = 1.0e-6;

/// Perspective camera looking at a target point.
#[derive(Debug, Clone)]
pub struct Camera3D {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

impl Camera3D {
    pub fn new(position: Vec3, target: Vec3, fov_y_radians: f32, near: f32, far: f32) -> Self {
        Self { position, target, up: DEFAULT_UP, fov_y_radians, near, far, aspect: 1.0 }
    }

    pub fn from_config(config: &CameraConfig, target: Vec3, viewport: PhysicalSize<u32>) -> Self {
        let mut camera = Self::new(
            Vec3::from_array(config.position),
            target,
            config.fov_degrees.to_radians(),
            config.near,
            config.far,
        );
        camera.set_viewport(viewport);
        camera
    }

    /// Zero-sized viewports (minimised windows) keep the previous aspect.
    pub fn set_viewport(&mut self, viewport: PhysicalSize<u32>) {
        if viewport.width > 0 && viewport.height > 0 {
            self.aspect = viewport.width as f32 / viewport.height as f32;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, self.aspect.max(0.0001), self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// Damped orbit controller that keeps the camera on a sphere around `target`.
///
/// Rotation and dolly requests accumulate into a pending delta which `update`
/// applies fractionally each frame, so motion eases out after input stops.
/// Panning is not supported; the target stays fixed.
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_polar_angle: f32,
    pub max_polar_angle: f32,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    delta_theta: f32,
    delta_phi: f32,
    scale: f32,
}

impl OrbitControls {
    pub fn new(target: Vec3) -> Self {
        Self {
            target,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            min_polar_angle: 0.0,
            max_polar_angle: std::f32::consts::PI,
            enable_damping: false,
            damping_factor: 0.05,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            delta_theta: 0.0,
            delta_phi: 0.0,
            scale: 1.0,
        }
    }

    pub fn from_config(config: &ControlsConfig) -> Self {
        let mut controls = Self::new(Vec3::from_array(config.target));
        controls.min_distance = config.min_distance;
        controls.max_distance = config.max_distance;
        controls.min_polar_angle = config.min_polar_angle;
        controls.max_polar_angle = config.max_polar_angle;
        controls.enable_damping = true;
        controls.damping_factor = config.damping_factor;
        controls.rotate_speed = config.rotate_speed;
        controls.zoom_speed = config.zoom_speed;
        controls
    }

    /// Queues a rotation for a pointer drag of `drag` pixels. A drag across the
    /// full viewport height turns the camera once around the target.
    pub fn rotate(&mut self, drag: Vec2, viewport_height: f32) {
        if viewport_height <= 0.0 {
            return;
        }
        let turn = std::f32::consts::TAU * self.rotate_speed / viewport_height;
        self.delta_theta -= drag.x * turn;
        self.delta_phi -= drag.y * turn;
    }

    /// Positive steps move the camera toward the target.
    pub fn dolly(&mut self, wheel_steps: f32) {
        if wheel_steps == 0.0 {
            return;
        }
        let zoom_scale = 0.95_f32.powf(self.zoom_speed * wheel_steps.abs());
        if wheel_steps > 0.0 {
            self.scale *= zoom_scale;
        } else {
            self.scale /= zoom_scale;
        }
    }

    pub fn update(&mut self, camera: &mut Camera3D) {
        let offset = camera.position - self.target;
        let mut radius = offset.length();
        let (mut theta, mut phi) = if radius > 0.0 {
            (offset.x.atan2(offset.z), (offset.y / radius).clamp(-1.0, 1.0).acos())
        } else {
            (0.0, 0.0)
        };

        if self.enable_damping {
            theta += self.delta_theta * self.damping_factor;
            phi += self.delta_phi * self.damping_factor;
        } else {
            theta += self.delta_theta;
            phi += self.delta_phi;
        }

        phi = phi.clamp(self.min_polar_angle, self.max_polar_angle);
        phi = phi.clamp(POLAR_EPSILON, std::f32::consts::PI - POLAR_EPSILON);
        radius = (radius * self.scale).clamp(self.min_distance, self.max_distance);

        let sin_phi = phi.sin();
        let offset = Vec3::new(radius * sin_phi * theta.sin(), radius * phi.cos(), radius * sin_phi * theta.cos());
        camera.position = self.target + offset;
        camera.target = self.target;

        if self.enable_damping {
            self.delta_theta *= 1.0 - self.damping_factor;
            self.delta_phi *= 1.0 - self.damping_factor;
        } else {
            self.delta_theta = 0.0;
            self.delta_phi = 0.0;
        }
        self.scale = 1.0;
    }

    pub fn distance(&self, camera: &Camera3D) -> f32 {
        camera.position.distance(self.target)
    }

    pub fn polar_angle(&self, camera: &Camera3D) -> f32 {
        let offset = camera.position - self.target;
        let radius = offset.length();
        if radius <= 0.0 {
            return 0.0;
        }
        (offset.y / radius).clamp(-1.0, 1.0).acos()
    }

    pub fn pending_rotation(&self) -> Vec2 {
        Vec2::new(self.delta_theta, self.delta_phi)
    }
}
