use anyhow::{ensure, Result};
use image::codecs::hdr::HdrEncoder;
use image::Rgb;
use rig_viewer::app::{Bootstrapper, ViewerContext};
use rig_viewer::config::ViewerConfig;
use rig_viewer::environment::BakeSettings;
use rig_viewer::loader::AssetKind;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use winit::dpi::PhysicalSize;

fn config_for(environment: PathBuf, model: PathBuf) -> ViewerConfig {
    let mut config = ViewerConfig::default();
    config.assets.environment = environment;
    config.assets.model = model;
    config
}

fn settle(bootstrap: &mut Bootstrapper, ctx: &mut ViewerContext) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !bootstrap.is_settled() {
        ensure!(Instant::now() < deadline, "asset loads did not settle in time");
        bootstrap.poll(ctx);
        ctx.update(1.0 / 60.0);
        std::thread::sleep(Duration::from_millis(2));
    }
    Ok(())
}

fn write_sky_hdr(path: &Path) -> Result<()> {
    let (width, height) = (16usize, 8usize);
    let pixels: Vec<Rgb<f32>> =
        (0..width * height).map(|i| if i / width < height / 2 { Rgb([3.0, 3.0, 3.0]) } else { Rgb([0.1, 0.1, 0.1]) }).collect();
    HdrEncoder::new(BufWriter::new(File::create(path)?)).encode(&pixels, width, height)?;
    Ok(())
}

#[test]
fn failed_environment_does_not_block_model() -> Result<()> {
    let config = config_for(
        PathBuf::from("fixtures/hdri/missing_environment.hdr"),
        PathBuf::from("fixtures/gltf/rig_fixture.gltf"),
    );
    let mut ctx = ViewerContext::new(&config, PhysicalSize::new(800, 600));
    let mut bootstrap = Bootstrapper::start_with(&config, BakeSettings::preview());
    settle(&mut bootstrap, &mut ctx)?;

    assert_eq!(bootstrap.errors().len(), 1);
    assert_eq!(bootstrap.errors()[0].kind(), AssetKind::Environment);
    assert!(ctx.scene.environment().is_none());
    assert!(ctx.scene.model().is_some());
    assert!(!ctx.is_loading());
    assert!(ctx.playback.is_attached());
    Ok(())
}

#[test]
fn failed_model_keeps_loading_indicator() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let hdr = dir.path().join("sky.hdr");
    write_sky_hdr(&hdr)?;
    let config = config_for(hdr, PathBuf::from("fixtures/gltf/missing_model.gltf"));
    let mut ctx = ViewerContext::new(&config, PhysicalSize::new(800, 600));
    let mut bootstrap = Bootstrapper::start_with(&config, BakeSettings::preview());
    settle(&mut bootstrap, &mut ctx)?;

    assert_eq!(bootstrap.errors().len(), 1);
    assert_eq!(bootstrap.errors()[0].kind(), AssetKind::Model);
    let env = ctx.scene.environment().expect("environment applied");
    assert_eq!(env.intensity, config.assets.environment_intensity);
    assert!(ctx.scene.model().is_none());
    assert!(ctx.is_loading());
    assert!(!ctx.playback.is_attached());
    Ok(())
}

#[test]
fn resize_tracks_window_size() {
    let mut ctx = ViewerContext::new(&ViewerConfig::default(), PhysicalSize::new(1280, 720));
    ctx.resize(PhysicalSize::new(1920, 1080));
    assert_eq!(ctx.viewport(), PhysicalSize::new(1920, 1080));
    assert!((ctx.camera.aspect - 1920.0 / 1080.0).abs() < 1e-6);
}
