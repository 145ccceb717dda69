use glam::Vec3;
use std::sync::Arc;

use super::context::ViewerContext;
use crate::animation::AnimationMixer;
use crate::config::{ModelPlacementConfig, ViewerConfig};
use crate::environment::{BakeSettings, EnvironmentMaps};
use crate::loader::{spawn_environment_load, spawn_model_load, AssetTask, LoadError, TaskPoll};
use crate::model::{ModelAsset, ModelInstance, ShadowFlags};
use crate::scene::SceneEnvironment;

/// Drives the two startup loads and applies each result to the viewer
/// context as soon as it arrives. The loads are independent; either may
/// finish first and either may fail without affecting the other.
pub struct Bootstrapper {
    environment: Option<AssetTask<EnvironmentMaps>>,
    model: Option<AssetTask<ModelAsset>>,
    environment_intensity: f32,
    placement: ModelPlacementConfig,
    errors: Vec<LoadError>,
}

impl Bootstrapper {
    pub fn start(config: &ViewerConfig) -> Self {
        Self::start_with(config, BakeSettings::default())
    }

    pub fn start_with(config: &ViewerConfig, bake: BakeSettings) -> Self {
        log::info!(
            "[viewer] Loading environment {} and model {}",
            config.assets.environment.display(),
            config.assets.model.display()
        );
        Self {
            environment: Some(spawn_environment_load(config.assets.environment.clone(), bake)),
            model: Some(spawn_model_load(config.assets.model.clone())),
            environment_intensity: config.assets.environment_intensity,
            placement: config.scene.model.clone(),
            errors: Vec::new(),
        }
    }

    /// Applies whatever finished since the last call. Never blocks.
    pub fn poll(&mut self, ctx: &mut ViewerContext) {
        if let Some(task) = self.environment.as_mut() {
            if let TaskPoll::Ready(result) = task.poll() {
                self.environment = None;
                match result {
                    Ok(maps) => apply_environment(ctx, maps, self.environment_intensity),
                    Err(err) => self.record_error(err),
                }
            }
        }
        if let Some(task) = self.model.as_mut() {
            if let TaskPoll::Ready(result) = task.poll() {
                self.model = None;
                match result {
                    Ok(asset) => apply_model(ctx, asset, &self.placement),
                    Err(err) => self.record_error(err),
                }
            }
        }
    }

    /// True once both loads have resolved, successfully or not.
    pub fn is_settled(&self) -> bool {
        self.environment.is_none() && self.model.is_none()
    }

    pub fn errors(&self) -> &[LoadError] {
        &self.errors
    }

    fn record_error(&mut self, err: LoadError) {
        log::error!("[assets] {err}");
        self.errors.push(err);
    }
}

/// Makes the baked maps the scene's reflection and ambient light source.
pub fn apply_environment(ctx: &mut ViewerContext, maps: EnvironmentMaps, intensity: f32) {
    if !maps.is_finite() {
        log::error!("[assets] Environment '{}' produced non-finite lighting data; ignoring it", maps.label);
        return;
    }
    log::info!("[viewer] Environment '{}' applied", maps.label);
    ctx.scene.set_environment(SceneEnvironment { maps: Arc::new(maps), intensity });
}

/// Places the model in the scene and parks its first clip, paused, on the
/// frame-0 pose.
pub fn apply_model(ctx: &mut ViewerContext, asset: ModelAsset, placement: &ModelPlacementConfig) {
    let asset = Arc::new(asset);
    let mut instance = ModelInstance::new(Arc::clone(&asset));
    instance.set_shadows(ShadowFlags { cast: true, receive: true });
    instance.position = Vec3::from_array(placement.position);
    instance.scale = placement.scale;
    ctx.scene.add_model(instance);

    if !asset.clips.is_empty() {
        let mut mixer = AnimationMixer::new(Arc::clone(&asset));
        let handles: Vec<_> = (0..asset.clips.len()).filter_map(|clip| mixer.clip_action(clip)).collect();
        if let Some(&first) = handles.first() {
            if let Some(action) = mixer.action_mut(first) {
                action.play();
                action.paused = true;
                action.time = 0.0;
            }
            if let Some(model) = ctx.scene.model_mut() {
                mixer.update(0.0, model);
            }
            ctx.playback.attach(first);
        }
        ctx.mixer = Some(mixer);
    } else {
        ctx.mixer = None;
    }
    ctx.hide_loading();
    log::info!("[viewer] Model '{}' ready ({} clip(s))", asset.label, asset.clips.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::load_model;
    use crate::playback::PlaybackState;
    use winit::dpi::PhysicalSize;

    fn fixture() -> ModelAsset {
        load_model(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/gltf/rig_fixture.gltf")).expect("fixture loads")
    }

    fn context() -> ViewerContext {
        ViewerContext::new(&ViewerConfig::default(), PhysicalSize::new(1280, 720))
    }

    #[test]
    fn applied_model_is_paused_on_first_frame() {
        let mut ctx = context();
        apply_model(&mut ctx, fixture(), &ModelPlacementConfig::default());

        let mixer = ctx.mixer.as_ref().expect("mixer built");
        assert_eq!(mixer.actions().len(), 2);
        let first = &mixer.actions()[0];
        assert!(first.is_running());
        assert!(first.paused);
        assert_eq!(first.time, 0.0);
        assert!(!mixer.actions()[1].is_running());
        assert!(!ctx.is_loading());
        assert_eq!(ctx.playback.state(), PlaybackState::Paused);
    }

    #[test]
    fn applied_model_is_placed_and_casts_shadows() {
        let mut ctx = context();
        apply_model(&mut ctx, fixture(), &ModelPlacementConfig::default());
        let model = ctx.scene.model().expect("model in scene");
        assert_eq!(model.position, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(model.scale, 1.5);
        assert!(model.mesh_shadows().iter().all(|flags| flags.cast && flags.receive));
    }

    #[test]
    fn paused_update_keeps_frame_zero_pose() {
        let mut ctx = context();
        apply_model(&mut ctx, fixture(), &ModelPlacementConfig::default());
        let before = ctx.scene.model().expect("model").local_pose.clone();
        ctx.update(0.75);
        let after = &ctx.scene.model().expect("model").local_pose;
        assert_eq!(&before, after);
        assert_eq!(ctx.mixer.as_ref().expect("mixer").actions()[0].time, 0.0);
    }

    #[test]
    fn environment_applies_with_configured_intensity() {
        let mut ctx = context();
        let revision = ctx.scene.revision();
        apply_environment(&mut ctx, EnvironmentMaps::blank(), 0.8);
        let env = ctx.scene.environment().expect("environment set");
        assert_eq!(env.intensity, 0.8);
        assert!(ctx.scene.revision() > revision);
    }
}
