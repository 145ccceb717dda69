use crate::animation::{import_clips, AnimationClip};
use crate::mesh::{import_materials, ImportedMaterial, ImportedTexture, Mesh};
use anyhow::{anyhow, bail, Context, Result};
use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Local translation/rotation/scale of a node relative to its parent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl NodeTransform {
    pub const IDENTITY: Self = Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE };

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Clone, Debug)]
pub struct ModelNode {
    pub name: Arc<str>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub rest: NodeTransform,
}

/// One drawable placement of a mesh: the node it hangs off and the skin
/// deforming it, if any.
#[derive(Clone, Debug)]
pub struct ModelMesh {
    pub node: usize,
    pub skin: Option<usize>,
    pub geometry: Arc<Mesh>,
}

#[derive(Clone, Debug)]
pub struct Skin {
    pub name: Arc<str>,
    /// Node index per joint, in skin order.
    pub joints: Vec<usize>,
    pub inverse_bind: Vec<Mat4>,
}

/// Immutable result of importing a glTF scene.
#[derive(Clone, Debug)]
pub struct ModelAsset {
    pub label: String,
    pub nodes: Vec<ModelNode>,
    pub roots: Vec<usize>,
    /// Nodes ordered so every parent precedes its children.
    pub draw_order: Vec<usize>,
    pub meshes: Vec<ModelMesh>,
    pub skins: Vec<Skin>,
    pub materials: Vec<ImportedMaterial>,
    pub textures: Vec<ImportedTexture>,
    pub clips: Vec<AnimationClip>,
}

impl ModelAsset {
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| &*node.name == name)
    }
}

pub fn load_model(path: impl AsRef<Path>) -> Result<ModelAsset> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("Failed to read model {}", path.display()))?;
    load_model_from_bytes(&bytes, path.parent(), &path.display().to_string())
}

/// Parses a `.gltf` or `.glb` payload. External buffers and images resolve
/// relative to `base_dir`.
pub fn load_model_from_bytes(bytes: &[u8], base_dir: Option<&Path>, label: &str) -> Result<ModelAsset> {
    let gltf::Gltf { document, blob } =
        gltf::Gltf::from_slice(bytes).with_context(|| format!("Failed to parse glTF {label}"))?;
    let buffers = gltf::import_buffers(&document, base_dir, blob)
        .with_context(|| format!("Failed to load buffers of {label}"))?;
    let images = gltf::import_images(&document, base_dir, &buffers)
        .with_context(|| format!("Failed to decode images of {label}"))?;

    let (materials, textures) = import_materials(&document, &images, label)?;
    let (nodes, roots) = import_nodes(&document)?;
    let draw_order = topological_order(&nodes, &roots);

    let gltf_nodes: Vec<gltf::Node<'_>> = document.nodes().collect();
    let mut geometry_cache: HashMap<usize, Option<Arc<Mesh>>> = HashMap::new();
    let mut meshes = Vec::new();
    for &node_index in &draw_order {
        let Some(node) = gltf_nodes.get(node_index) else {
            continue;
        };
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let geometry = match geometry_cache.get(&mesh.index()) {
            Some(cached) => cached.clone(),
            None => {
                let imported = Mesh::from_gltf(&mesh, &buffers, label)?.map(Arc::new);
                geometry_cache.insert(mesh.index(), imported.clone());
                imported
            }
        };
        if let Some(geometry) = geometry {
            meshes.push(ModelMesh { node: node_index, skin: node.skin().map(|skin| skin.index()), geometry });
        }
    }
    if meshes.is_empty() {
        bail!("glTF {label} contains no triangle meshes");
    }

    let skins = import_skins(&document, &buffers, label)?;
    let clips = import_clips(&document, &buffers, label)?;

    log::debug!(
        "[assets] {label}: {} nodes, {} meshes, {} skins, {} clips",
        nodes.len(),
        meshes.len(),
        skins.len(),
        clips.len()
    );

    Ok(ModelAsset {
        label: label.to_string(),
        nodes,
        roots,
        draw_order,
        meshes,
        skins,
        materials,
        textures,
        clips,
    })
}

fn import_nodes(document: &gltf::Document) -> Result<(Vec<ModelNode>, Vec<usize>)> {
    let mut nodes: Vec<ModelNode> = document
        .nodes()
        .map(|node| {
            let (t, r, s) = node.transform().decomposed();
            let rotation = Quat::from_xyzw(r[0], r[1], r[2], r[3]);
            ModelNode {
                name: Arc::from(node.name().map(str::to_string).unwrap_or_else(|| format!("node_{}", node.index()))),
                parent: None,
                children: node.children().map(|child| child.index()).collect(),
                rest: NodeTransform {
                    translation: Vec3::from_array(t),
                    rotation: if rotation.length_squared() > 0.0 { rotation.normalize() } else { Quat::IDENTITY },
                    scale: Vec3::from_array(s),
                },
            }
        })
        .collect();

    for index in 0..nodes.len() {
        for child in nodes[index].children.clone() {
            let Some(child_node) = nodes.get_mut(child) else {
                bail!("Node {index} references missing child {child}");
            };
            if child_node.parent.is_some() {
                bail!("Node {child} has more than one parent");
            }
            child_node.parent = Some(index);
        }
    }

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| anyhow!("glTF document has no scene"))?;
    let roots: Vec<usize> = scene.nodes().map(|node| node.index()).collect();
    Ok((nodes, roots))
}

fn topological_order(nodes: &[ModelNode], roots: &[usize]) -> Vec<usize> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut visited = vec![false; nodes.len()];
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(index) = stack.pop() {
        if index >= nodes.len() || visited[index] {
            continue;
        }
        visited[index] = true;
        order.push(index);
        stack.extend(nodes[index].children.iter().rev().copied());
    }
    order
}

fn import_skins(document: &gltf::Document, buffers: &[gltf::buffer::Data], label: &str) -> Result<Vec<Skin>> {
    let mut skins = Vec::new();
    for skin in document.skins() {
        let joints: Vec<usize> = skin.joints().map(|joint| joint.index()).collect();
        if joints.is_empty() {
            bail!("Skin {} of {label} has no joints", skin.index());
        }
        let reader = skin.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
        let mut inverse_bind = vec![Mat4::IDENTITY; joints.len()];
        if let Some(matrices) = reader.read_inverse_bind_matrices() {
            for (slot, matrix) in inverse_bind.iter_mut().zip(matrices) {
                *slot = Mat4::from_cols_array_2d(&matrix);
            }
        }
        skins.push(Skin {
            name: Arc::from(skin.name().map(str::to_string).unwrap_or_else(|| format!("skin_{}", skin.index()))),
            joints,
            inverse_bind,
        });
    }
    Ok(skins)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShadowFlags {
    pub cast: bool,
    pub receive: bool,
}

/// A placed, posable copy of a [`ModelAsset`].
///
/// `local_pose` is written by the animation mixer; [`ModelInstance::refresh`]
/// recomputes node world matrices and skinning palettes from it.
#[derive(Clone, Debug)]
pub struct ModelInstance {
    asset: Arc<ModelAsset>,
    pub position: Vec3,
    pub scale: f32,
    pub local_pose: Vec<NodeTransform>,
    world: Vec<Mat4>,
    palettes: Vec<Vec<Mat4>>,
    shadows: Vec<ShadowFlags>,
}

impl ModelInstance {
    pub fn new(asset: Arc<ModelAsset>) -> Self {
        let local_pose = asset.nodes.iter().map(|node| node.rest).collect();
        let palettes = asset.skins.iter().map(|skin| vec![Mat4::IDENTITY; skin.joints.len()]).collect();
        let mut instance = Self {
            world: vec![Mat4::IDENTITY; asset.nodes.len()],
            shadows: vec![ShadowFlags::default(); asset.meshes.len()],
            asset,
            position: Vec3::ZERO,
            scale: 1.0,
            local_pose,
            palettes,
        };
        instance.refresh();
        instance
    }

    pub fn asset(&self) -> &Arc<ModelAsset> {
        &self.asset
    }

    pub fn root_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(Vec3::splat(self.scale), Quat::IDENTITY, self.position)
    }

    pub fn reset_pose(&mut self) {
        for (pose, node) in self.local_pose.iter_mut().zip(&self.asset.nodes) {
            *pose = node.rest;
        }
    }

    pub fn refresh(&mut self) {
        for &index in &self.asset.draw_order {
            let local = self.local_pose[index].matrix();
            self.world[index] = match self.asset.nodes[index].parent {
                Some(parent) => self.world[parent] * local,
                None => local,
            };
        }
        for (palette, skin) in self.palettes.iter_mut().zip(&self.asset.skins) {
            for ((slot, &joint), inverse_bind) in palette.iter_mut().zip(&skin.joints).zip(&skin.inverse_bind) {
                *slot = self.world.get(joint).copied().unwrap_or(Mat4::IDENTITY) * *inverse_bind;
            }
        }
    }

    /// Node transform in model space, before root placement.
    pub fn node_world(&self, node: usize) -> Option<Mat4> {
        self.world.get(node).copied()
    }

    /// Model-to-world matrix for a mesh. Skinned meshes ignore their node's
    /// transform; the joint palette already carries it.
    pub fn mesh_matrix(&self, mesh: usize) -> Mat4 {
        let root = self.root_matrix();
        match self.asset.meshes.get(mesh) {
            Some(entry) if entry.skin.is_some() => root,
            Some(entry) => root * self.world[entry.node],
            None => root,
        }
    }

    pub fn skin_palette(&self, skin: usize) -> Option<&[Mat4]> {
        self.palettes.get(skin).map(Vec::as_slice)
    }

    pub fn set_shadows(&mut self, flags: ShadowFlags) {
        self.shadows.iter_mut().for_each(|slot| *slot = flags);
    }

    pub fn shadows(&self, mesh: usize) -> ShadowFlags {
        self.shadows.get(mesh).copied().unwrap_or_default()
    }

    pub fn mesh_shadows(&self) -> &[ShadowFlags] {
        &self.shadows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_NODE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [ { "nodes": [0] } ],
        "nodes": [
            { "name": "parent", "translation": [0, 2, 0], "children": [1] },
            { "name": "child", "translation": [1, 0, 0], "scale": [2, 2, 2], "mesh": 0 }
        ],
        "meshes": [ { "primitives": [ { "attributes": { "POSITION": 0 } } ] } ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [0, 0, 0], "max": [1, 1, 0] }
        ],
        "bufferViews": [ { "buffer": 0, "byteOffset": 0, "byteLength": 36 } ],
        "buffers": [ { "byteLength": 36,
            "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAA" } ]
    }"#;

    #[test]
    fn world_matrices_compose_parent_first() {
        let asset = load_model_from_bytes(TWO_NODE_GLTF.as_bytes(), None, "two_node").expect("load");
        assert_eq!(asset.draw_order, vec![0, 1]);
        assert_eq!(asset.nodes[1].parent, Some(0));
        let instance = ModelInstance::new(Arc::new(asset));
        let world = instance.node_world(1).expect("child world");
        let origin = world.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5);
        let unit = world.transform_point3(Vec3::X);
        assert!((unit - Vec3::new(3.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn placement_scales_and_translates_unskinned_meshes() {
        let asset = load_model_from_bytes(TWO_NODE_GLTF.as_bytes(), None, "two_node").expect("load");
        let mut instance = ModelInstance::new(Arc::new(asset));
        instance.position = Vec3::new(0.0, 0.0, -1.0);
        instance.scale = 1.5;
        let point = instance.mesh_matrix(0).transform_point3(Vec3::ZERO);
        assert!((point - Vec3::new(1.5, 3.0, -1.0)).length() < 1e-5, "{point:?}");
    }

    #[test]
    fn shadow_flags_apply_to_every_mesh() {
        let asset = load_model_from_bytes(TWO_NODE_GLTF.as_bytes(), None, "two_node").expect("load");
        let mut instance = ModelInstance::new(Arc::new(asset));
        assert_eq!(instance.shadows(0), ShadowFlags::default());
        instance.set_shadows(ShadowFlags { cast: true, receive: true });
        assert!(instance.mesh_shadows().iter().all(|flags| flags.cast && flags.receive));
    }

    #[test]
    fn rejects_documents_without_meshes() {
        let json = r#"{ "asset": { "version": "2.0" }, "scenes": [ { "nodes": [0] } ], "nodes": [ {} ] }"#;
        let err = load_model_from_bytes(json.as_bytes(), None, "empty").unwrap_err();
        assert!(err.to_string().contains("no triangle meshes"), "{err}");
    }
}
