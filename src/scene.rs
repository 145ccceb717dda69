use crate::config::{SceneConfig, ShadowConfig};
use crate::environment::EnvironmentMaps;
use crate::mesh::Mesh;
use crate::model::ModelInstance;
use glam::{Mat4, Vec3};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct StandardMaterial {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub double_sided: bool,
}

impl Default for StandardMaterial {
    fn default() -> Self {
        Self { base_color: [1.0, 1.0, 1.0, 1.0], metallic: 0.0, roughness: 1.0, double_sided: false }
    }
}

/// A standalone mesh placed directly in the scene.
#[derive(Clone, Debug)]
pub struct SceneMesh {
    pub mesh: Arc<Mesh>,
    pub material: StandardMaterial,
    pub transform: Mat4,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
}

/// Cone light with inverse-square falloff cut off at `range`.
#[derive(Clone, Debug)]
pub struct SpotLight {
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
    pub decay: f32,
    /// Half-angle of the cone in radians.
    pub angle: f32,
    /// Fraction of the cone over which the edge fades out.
    pub penumbra: f32,
    pub position: Vec3,
    pub target: Vec3,
    pub cast_shadow: bool,
    pub shadow_bias: f32,
    /// PCF kernel spacing in shadow-map texels.
    pub shadow_radius: f32,
}

impl SpotLight {
    pub fn direction(&self) -> Vec3 {
        (self.target - self.position).try_normalize().unwrap_or(Vec3::NEG_Y)
    }

    /// Perspective frustum covering the cone, for shadow rendering.
    pub fn shadow_view_projection(&self) -> Mat4 {
        let dir = self.direction();
        let up = if dir.abs_diff_eq(Vec3::NEG_Y, 1e-3) || dir.abs_diff_eq(Vec3::Y, 1e-3) { Vec3::Z } else { Vec3::Y };
        let view = Mat4::look_at_rh(self.position, self.position + dir, up);
        let fov = (self.angle * 2.0).clamp(0.01, std::f32::consts::PI - 0.01);
        let far = if self.range > 0.0 { self.range } else { 500.0 };
        Mat4::perspective_rh(fov, 1.0, 0.5, far) * view
    }

    /// Cosines of the outer cone edge and of the point where the fade starts.
    pub fn cone_cosines(&self) -> (f32, f32) {
        let outer = self.angle.cos();
        let inner = (self.angle * (1.0 - self.penumbra.clamp(0.0, 1.0))).cos();
        (outer, inner)
    }
}

#[derive(Clone, Debug)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

#[derive(Clone)]
pub struct SceneEnvironment {
    pub maps: Arc<EnvironmentMaps>,
    pub intensity: f32,
}

/// Root of everything the renderer draws.
///
/// `revision` increments on every structural change (environment or model
/// added) so GPU-side caches know when to rebuild.
pub struct Scene {
    pub clear_color: [f32; 3],
    pub ground: SceneMesh,
    pub spot_light: SpotLight,
    pub ambient: AmbientLight,
    environment: Option<SceneEnvironment>,
    model: Option<ModelInstance>,
    revision: u64,
}

impl Scene {
    pub fn from_config(config: &SceneConfig, shadow: &ShadowConfig) -> Self {
        let ground_cfg = &config.ground;
        let ground = SceneMesh {
            mesh: Arc::new(Mesh::plane(ground_cfg.size, ground_cfg.segments)),
            material: StandardMaterial {
                base_color: [ground_cfg.color[0], ground_cfg.color[1], ground_cfg.color[2], 1.0],
                metallic: ground_cfg.metallic,
                roughness: ground_cfg.roughness,
                double_sided: true,
            },
            transform: Mat4::IDENTITY,
            cast_shadow: false,
            receive_shadow: true,
        };
        let light_cfg = &config.spot_light;
        let spot_light = SpotLight {
            color: Vec3::from_array(light_cfg.color),
            intensity: light_cfg.intensity,
            range: light_cfg.range,
            decay: 2.0,
            angle: light_cfg.angle,
            penumbra: light_cfg.penumbra,
            position: Vec3::from_array(light_cfg.position),
            target: Vec3::from_array(light_cfg.target),
            cast_shadow: shadow.enabled,
            shadow_bias: shadow.bias,
            shadow_radius: shadow.pcf_radius.max(0.0),
        };
        Self {
            clear_color: config.clear_color,
            ground,
            spot_light,
            ambient: AmbientLight { color: Vec3::from_array(config.ambient_color), intensity: config.ambient_intensity },
            environment: None,
            model: None,
            revision: 0,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn environment(&self) -> Option<&SceneEnvironment> {
        self.environment.as_ref()
    }

    pub fn set_environment(&mut self, environment: SceneEnvironment) {
        self.environment = Some(environment);
        self.bump_revision();
    }

    pub fn model(&self) -> Option<&ModelInstance> {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> Option<&mut ModelInstance> {
        self.model.as_mut()
    }

    pub fn add_model(&mut self, model: ModelInstance) {
        self.model = Some(model);
        self.bump_revision();
    }

    fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_scene() -> Scene {
        Scene::from_config(&SceneConfig::default(), &ShadowConfig::default())
    }

    #[test]
    fn default_scene_matches_stage_setup() {
        let scene = default_scene();
        assert_eq!(scene.clear_color, [0.0, 0.0, 0.0]);
        assert!(!scene.ground.cast_shadow);
        assert!(scene.ground.receive_shadow);
        assert!(scene.ground.material.double_sided);
        assert_eq!(scene.ground.material.metallic, 0.4);
        assert_eq!(scene.ground.material.roughness, 0.5);
        assert_eq!(scene.spot_light.position, Vec3::new(0.0, 25.0, 0.0));
        assert_eq!(scene.spot_light.direction(), Vec3::NEG_Y);
        assert!(scene.spot_light.cast_shadow);
        assert_eq!(scene.ambient.intensity, 0.1);
        assert!(scene.environment().is_none());
        assert!(scene.model().is_none());
    }

    #[test]
    fn spot_shadow_frustum_contains_cone_axis() {
        let scene = default_scene();
        let light = &scene.spot_light;
        let clip = light.shadow_view_projection() * Vec3::new(0.0, 0.0, 0.0).extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "{ndc:?}");
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn full_penumbra_fades_from_axis() {
        let scene = default_scene();
        let (outer, inner) = scene.spot_light.cone_cosines();
        assert!((outer - 0.22_f32.cos()).abs() < 1e-6);
        assert_eq!(inner, 1.0);
    }

    #[test]
    fn structural_changes_bump_revision() {
        let mut scene = default_scene();
        let before = scene.revision();
        scene.set_environment(SceneEnvironment { maps: Arc::new(EnvironmentMaps::blank()), intensity: 1.0 });
        assert!(scene.revision() > before);
    }
}
