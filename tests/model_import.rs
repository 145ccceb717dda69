use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use rig_viewer::model::{load_model, ModelInstance};
use std::path::Path;
use std::sync::Arc;

const RIG_FIXTURE: &str = "fixtures/gltf/rig_fixture.gltf";

#[test]
fn import_skinned_rig_fixture() -> Result<()> {
    let path = Path::new(RIG_FIXTURE);
    anyhow::ensure!(path.exists(), "Fixture missing at {}", path.display());
    let asset = load_model(path).with_context(|| format!("Failed to load {}", path.display()))?;

    assert_eq!(asset.nodes.len(), 4);
    let root = asset.node_index("rig_root").context("rig_root node")?;
    let hip = asset.node_index("hip").context("hip node")?;
    let spine = asset.node_index("spine").context("spine node")?;
    assert_eq!(asset.roots, vec![root]);
    assert_eq!(asset.nodes[hip].parent, Some(root));
    assert_eq!(asset.nodes[spine].parent, Some(hip));
    approx_vec3(asset.nodes[spine].rest.translation, Vec3::new(0.0, 1.0, 0.0));

    assert_eq!(asset.meshes.len(), 1);
    assert_eq!(asset.meshes[0].skin, Some(0));
    assert_eq!(asset.skins[0].joints, vec![hip, spine]);
    assert_eq!(asset.materials.len(), 1);
    assert!((asset.materials[0].roughness_factor - 0.7).abs() < 1e-6);

    let names: Vec<&str> = asset.clips.iter().map(|clip| &*clip.name).collect();
    assert_eq!(names, ["wave", "idle"]);
    assert!((asset.clips[0].duration - 1.0).abs() < 1e-6);
    assert!((asset.clips[1].duration - 0.5).abs() < 1e-6);
    Ok(())
}

#[test]
fn rest_pose_palette_cancels_inverse_bind() -> Result<()> {
    let asset = Arc::new(load_model(RIG_FIXTURE)?);
    let instance = ModelInstance::new(Arc::clone(&asset));
    let palette = instance.skin_palette(0).context("skin palette")?;
    assert_eq!(palette.len(), 2);
    for joint in palette {
        assert!(joint.abs_diff_eq(Mat4::IDENTITY, 1e-5), "joint matrix {joint:?}");
    }
    Ok(())
}

#[test]
fn static_model_imports_without_clips() -> Result<()> {
    let asset = load_model("fixtures/gltf/static_quad.gltf")?;
    assert!(asset.clips.is_empty());
    assert!(asset.skins.is_empty());
    assert_eq!(asset.meshes.len(), 1);
    assert!(!asset.meshes[0].geometry.indices.is_empty());
    Ok(())
}

#[test]
fn missing_model_reports_path() {
    let err = load_model("fixtures/gltf/does_not_exist.gltf").unwrap_err();
    assert!(format!("{err:#}").contains("does_not_exist.gltf"), "error: {err:#}");
}

fn approx_vec3(actual: Vec3, expected: Vec3) {
    assert!((actual - expected).length() < 1e-4, "expected {expected:?}, got {actual:?}");
}
