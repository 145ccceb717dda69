use anyhow::{Context, Result};
use glam::Vec3;
use rig_viewer::app::{apply_model, ViewerContext};
use rig_viewer::config::{ModelPlacementConfig, ViewerConfig};
use rig_viewer::model::load_model;
use rig_viewer::playback::{IconVisibility, PlaybackState, ToggleOutcome};
use winit::dpi::PhysicalSize;

fn loaded_context() -> Result<ViewerContext> {
    let mut ctx = ViewerContext::new(&ViewerConfig::default(), PhysicalSize::new(1280, 720));
    let asset = load_model("fixtures/gltf/rig_fixture.gltf")?;
    apply_model(&mut ctx, asset, &ModelPlacementConfig::default());
    Ok(ctx)
}

fn first_action_paused(ctx: &ViewerContext) -> Option<bool> {
    ctx.mixer.as_ref().map(|mixer| mixer.actions()[0].paused)
}

#[test]
fn toggle_before_model_is_harmless() {
    let mut ctx = ViewerContext::new(&ViewerConfig::default(), PhysicalSize::new(1280, 720));
    assert_eq!(ctx.toggle_playback(), ToggleOutcome::NotReady);
    ctx.update(0.1);
    assert_eq!(ctx.playback.state(), PlaybackState::Paused);
    assert!(ctx.mixer.is_none());
}

#[test]
fn toggling_starts_and_pauses_the_first_clip() -> Result<()> {
    let mut ctx = loaded_context()?;
    assert_eq!(first_action_paused(&ctx), Some(true));

    assert_eq!(ctx.toggle_playback(), ToggleOutcome::Started);
    assert_eq!(ctx.playback.icons(), IconVisibility { play: false, pause: true });
    ctx.update(0.5);
    assert_eq!(first_action_paused(&ctx), Some(false));

    let model = ctx.scene.model().context("model")?;
    let hip = model.asset().node_index("hip").context("hip")?;
    let translation = model.local_pose[hip].translation;
    assert!((translation - Vec3::new(0.0, 1.25, 0.0)).length() < 1e-4, "hip at {translation:?}");

    assert_eq!(ctx.toggle_playback(), ToggleOutcome::Paused);
    assert_eq!(ctx.playback.icons(), IconVisibility { play: true, pause: false });
    ctx.update(0.3);
    assert_eq!(first_action_paused(&ctx), Some(true));
    let time = ctx.mixer.as_ref().context("mixer")?.actions()[0].time;
    assert!((time - 0.5).abs() < 1e-5, "paused clip kept advancing to {time}");
    Ok(())
}

#[test]
fn two_toggles_restore_paused_state() -> Result<()> {
    let mut ctx = loaded_context()?;
    for _ in 0..2 {
        ctx.toggle_playback();
        ctx.update(0.0);
        let paused = first_action_paused(&ctx).context("mixer")?;
        let icons = ctx.playback.icons();
        assert_eq!(icons.play, paused);
        assert_eq!(icons.pause, !paused);
    }
    assert_eq!(first_action_paused(&ctx), Some(true));
    Ok(())
}

#[test]
fn only_the_first_clip_is_driven() -> Result<()> {
    let mut ctx = loaded_context()?;
    ctx.toggle_playback();
    ctx.update(0.4);
    let mixer = ctx.mixer.as_ref().context("mixer")?;
    assert!(mixer.actions()[0].is_running());
    assert!(!mixer.actions()[1].is_running());
    assert_eq!(mixer.actions()[1].time, 0.0);
    Ok(())
}
