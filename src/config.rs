use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/viewer.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "WindowConfig::default_title")]
    pub title: String,
    #[serde(default = "WindowConfig::default_width")]
    pub width: u32,
    #[serde(default = "WindowConfig::default_height")]
    pub height: u32,
    #[serde(default = "WindowConfig::default_vsync")]
    pub vsync: bool,
    #[serde(default = "WindowConfig::default_maximized")]
    pub maximized: bool,
    #[serde(default = "WindowConfig::default_msaa_samples")]
    pub msaa_samples: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetConfig {
    #[serde(default = "AssetConfig::default_environment")]
    pub environment: PathBuf,
    #[serde(default = "AssetConfig::default_model")]
    pub model: PathBuf,
    #[serde(default = "AssetConfig::default_environment_intensity")]
    pub environment_intensity: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_fov_degrees")]
    pub fov_degrees: f32,
    #[serde(default = "CameraConfig::default_near")]
    pub near: f32,
    #[serde(default = "CameraConfig::default_far")]
    pub far: f32,
    #[serde(default = "CameraConfig::default_position")]
    pub position: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlsConfig {
    #[serde(default = "ControlsConfig::default_damping_factor")]
    pub damping_factor: f32,
    #[serde(default = "ControlsConfig::default_min_distance")]
    pub min_distance: f32,
    #[serde(default = "ControlsConfig::default_max_distance")]
    pub max_distance: f32,
    #[serde(default = "ControlsConfig::default_min_polar_angle")]
    pub min_polar_angle: f32,
    #[serde(default = "ControlsConfig::default_max_polar_angle")]
    pub max_polar_angle: f32,
    #[serde(default = "ControlsConfig::default_target")]
    pub target: [f32; 3],
    #[serde(default = "ControlsConfig::default_rotate_speed")]
    pub rotate_speed: f32,
    #[serde(default = "ControlsConfig::default_zoom_speed")]
    pub zoom_speed: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroundConfig {
    #[serde(default = "GroundConfig::default_size")]
    pub size: f32,
    #[serde(default = "GroundConfig::default_segments")]
    pub segments: u32,
    #[serde(default = "GroundConfig::default_color")]
    pub color: [f32; 3],
    #[serde(default = "GroundConfig::default_metallic")]
    pub metallic: f32,
    #[serde(default = "GroundConfig::default_roughness")]
    pub roughness: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpotLightConfig {
    #[serde(default = "SpotLightConfig::default_color")]
    pub color: [f32; 3],
    #[serde(default = "SpotLightConfig::default_intensity")]
    pub intensity: f32,
    #[serde(default = "SpotLightConfig::default_range")]
    pub range: f32,
    #[serde(default = "SpotLightConfig::default_angle")]
    pub angle: f32,
    #[serde(default = "SpotLightConfig::default_penumbra")]
    pub penumbra: f32,
    #[serde(default = "SpotLightConfig::default_position")]
    pub position: [f32; 3],
    #[serde(default = "SpotLightConfig::default_target")]
    pub target: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelPlacementConfig {
    #[serde(default = "ModelPlacementConfig::default_position")]
    pub position: [f32; 3],
    #[serde(default = "ModelPlacementConfig::default_scale")]
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "SceneConfig::default_clear_color")]
    pub clear_color: [f32; 3],
    #[serde(default = "SceneConfig::default_ambient_color")]
    pub ambient_color: [f32; 3],
    #[serde(default = "SceneConfig::default_ambient_intensity")]
    pub ambient_intensity: f32,
    #[serde(default)]
    pub ground: GroundConfig,
    #[serde(default)]
    pub spot_light: SpotLightConfig,
    #[serde(default)]
    pub model: ModelPlacementConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShadowConfig {
    #[serde(default = "ShadowConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "ShadowConfig::default_resolution")]
    pub resolution: u32,
    #[serde(default = "ShadowConfig::default_bias")]
    pub bias: f32,
    #[serde(default = "ShadowConfig::default_pcf_radius")]
    pub pcf_radius: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct ViewerConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub controls: ControlsConfig,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ViewerConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub model: Option<PathBuf>,
    pub environment: Option<PathBuf>,
}

impl WindowConfig {
    fn default_title() -> String {
        "Rig Viewer".to_string()
    }

    const fn default_width() -> u32 {
        1280
    }

    const fn default_height() -> u32 {
        720
    }

    const fn default_vsync() -> bool {
        true
    }

    const fn default_maximized() -> bool {
        true
    }

    const fn default_msaa_samples() -> u32 {
        4
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: Self::default_title(),
            width: Self::default_width(),
            height: Self::default_height(),
            vsync: Self::default_vsync(),
            maximized: Self::default_maximized(),
            msaa_samples: Self::default_msaa_samples(),
        }
    }
}

impl AssetConfig {
    fn default_environment() -> PathBuf {
        PathBuf::from("assets/hdri/studio_small_09_4k.hdr")
    }

    fn default_model() -> PathBuf {
        PathBuf::from("assets/toon_robot/scene.gltf")
    }

    const fn default_environment_intensity() -> f32 {
        1.0
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            environment: Self::default_environment(),
            model: Self::default_model(),
            environment_intensity: Self::default_environment_intensity(),
        }
    }
}

impl CameraConfig {
    const fn default_fov_degrees() -> f32 {
        50.0
    }

    const fn default_near() -> f32 {
        1.0
    }

    const fn default_far() -> f32 {
        1000.0
    }

    const fn default_position() -> [f32; 3] {
        [3.0, 1.0, 15.0]
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: Self::default_fov_degrees(),
            near: Self::default_near(),
            far: Self::default_far(),
            position: Self::default_position(),
        }
    }
}

impl ControlsConfig {
    const fn default_damping_factor() -> f32 {
        0.05
    }

    const fn default_min_distance() -> f32 {
        5.0
    }

    const fn default_max_distance() -> f32 {
        20.0
    }

    const fn default_min_polar_angle() -> f32 {
        0.5
    }

    const fn default_max_polar_angle() -> f32 {
        1.5
    }

    const fn default_target() -> [f32; 3] {
        [0.0, 1.0, 0.0]
    }

    const fn default_rotate_speed() -> f32 {
        1.0
    }

    const fn default_zoom_speed() -> f32 {
        1.0
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            damping_factor: Self::default_damping_factor(),
            min_distance: Self::default_min_distance(),
            max_distance: Self::default_max_distance(),
            min_polar_angle: Self::default_min_polar_angle(),
            max_polar_angle: Self::default_max_polar_angle(),
            target: Self::default_target(),
            rotate_speed: Self::default_rotate_speed(),
            zoom_speed: Self::default_zoom_speed(),
        }
    }
}

impl GroundConfig {
    const fn default_size() -> f32 {
        40.0
    }

    const fn default_segments() -> u32 {
        32
    }

    const fn default_color() -> [f32; 3] {
        [0.0, 0.0, 0.0]
    }

    const fn default_metallic() -> f32 {
        0.4
    }

    const fn default_roughness() -> f32 {
        0.5
    }
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            segments: Self::default_segments(),
            color: Self::default_color(),
            metallic: Self::default_metallic(),
            roughness: Self::default_roughness(),
        }
    }
}

impl SpotLightConfig {
    const fn default_color() -> [f32; 3] {
        [1.0, 1.0, 1.0]
    }

    const fn default_intensity() -> f32 {
        3000.0
    }

    const fn default_range() -> f32 {
        100.0
    }

    const fn default_angle() -> f32 {
        0.22
    }

    const fn default_penumbra() -> f32 {
        1.0
    }

    const fn default_position() -> [f32; 3] {
        [0.0, 25.0, 0.0]
    }

    const fn default_target() -> [f32; 3] {
        [0.0, 0.0, 0.0]
    }
}

impl Default for SpotLightConfig {
    fn default() -> Self {
        Self {
            color: Self::default_color(),
            intensity: Self::default_intensity(),
            range: Self::default_range(),
            angle: Self::default_angle(),
            penumbra: Self::default_penumbra(),
            position: Self::default_position(),
            target: Self::default_target(),
        }
    }
}

impl ModelPlacementConfig {
    const fn default_position() -> [f32; 3] {
        [0.0, 0.0, -1.0]
    }

    const fn default_scale() -> f32 {
        1.5
    }
}

impl Default for ModelPlacementConfig {
    fn default() -> Self {
        Self { position: Self::default_position(), scale: Self::default_scale() }
    }
}

impl SceneConfig {
    const fn default_clear_color() -> [f32; 3] {
        [0.0, 0.0, 0.0]
    }

    const fn default_ambient_color() -> [f32; 3] {
        [1.0, 1.0, 1.0]
    }

    const fn default_ambient_intensity() -> f32 {
        0.1
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            clear_color: Self::default_clear_color(),
            ambient_color: Self::default_ambient_color(),
            ambient_intensity: Self::default_ambient_intensity(),
            ground: GroundConfig::default(),
            spot_light: SpotLightConfig::default(),
            model: ModelPlacementConfig::default(),
        }
    }
}

impl ShadowConfig {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_resolution() -> u32 {
        2048
    }

    const fn default_bias() -> f32 {
        -0.0001
    }

    const fn default_pcf_radius() -> f32 {
        1.0
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            resolution: Self::default_resolution(),
            bias: Self::default_bias(),
            pcf_radius: Self::default_pcf_radius(),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ViewerConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
        if let Some(model) = &overrides.model {
            self.assets.model = model.clone();
        }
        if let Some(environment) = &overrides.environment {
            self.assets.environment = environment.clone();
        }
    }
}

impl ViewerConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.applied_fields().is_empty()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.vsync.is_some() {
            fields.push("vsync");
        }
        if self.model.is_some() {
            fields.push("model");
        }
        if self.environment.is_some() {
            fields.push("environment");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_scene_literals() {
        let cfg = ViewerConfig::default();
        assert_eq!(cfg.camera.fov_degrees, 50.0);
        assert_eq!((cfg.camera.near, cfg.camera.far), (1.0, 1000.0));
        assert_eq!(cfg.camera.position, [3.0, 1.0, 15.0]);
        assert_eq!(cfg.controls.target, [0.0, 1.0, 0.0]);
        assert_eq!((cfg.controls.min_distance, cfg.controls.max_distance), (5.0, 20.0));
        assert_eq!((cfg.controls.min_polar_angle, cfg.controls.max_polar_angle), (0.5, 1.5));
        assert_eq!(cfg.scene.ground.size, 40.0);
        assert_eq!(cfg.scene.ground.segments, 32);
        assert_eq!(cfg.scene.spot_light.intensity, 3000.0);
        assert_eq!(cfg.scene.spot_light.angle, 0.22);
        assert_eq!(cfg.scene.spot_light.position, [0.0, 25.0, 0.0]);
        assert_eq!(cfg.scene.ambient_intensity, 0.1);
        assert_eq!(cfg.scene.model.position, [0.0, 0.0, -1.0]);
        assert_eq!(cfg.scene.model.scale, 1.5);
        assert_eq!(cfg.shadow.bias, -0.0001);
    }

    #[test]
    fn shipped_config_matches_builtin_defaults() {
        let shipped = ViewerConfig::load(DEFAULT_CONFIG_PATH).expect("shipped config");
        let defaults = ViewerConfig::default();
        assert_eq!(shipped.window, defaults.window);
        assert_eq!(shipped.assets, defaults.assets);
        assert_eq!(shipped.camera, defaults.camera);
        assert_eq!(shipped.controls, defaults.controls);
        assert_eq!(shipped.scene.spot_light, defaults.scene.spot_light);
        assert_eq!(shipped.scene.ground, defaults.scene.ground);
        assert_eq!(shipped.shadow, defaults.shadow);
        assert_eq!(shipped, defaults);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{ "window": {{ "width": 640 }}, "scene": {{ "spot_light": {{ "intensity": 10.0 }} }} }}"#)
            .expect("write config");
        let cfg = ViewerConfig::load(file.path()).expect("load config");
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
        assert_eq!(cfg.scene.spot_light.intensity, 10.0);
        assert_eq!(cfg.scene.spot_light.angle, 0.22);
        assert_eq!(cfg.assets.model, PathBuf::from("assets/toon_robot/scene.gltf"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cfg = ViewerConfig::load_or_default(dir.path().join("absent.json"));
        assert_eq!(cfg.window.title, "Rig Viewer");
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut cfg = ViewerConfig::default();
        let overrides = ViewerConfigOverrides {
            height: Some(600),
            model: Some(PathBuf::from("robots/other.glb")),
            ..Default::default()
        };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.assets.model, PathBuf::from("robots/other.glb"));
        assert_eq!(overrides.applied_fields(), vec!["height", "model"]);
        assert!(ViewerConfigOverrides::default().is_empty());
    }
}
