use anyhow::{anyhow, bail, Result};
use glam::{Vec2, Vec3, Vec4};
use gltf::mesh::Mode;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub uv: [f32; 2],
    pub joints: [u16; 4],
    pub weights: [f32; 4],
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, tangent: Vec4, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tangent: tangent.to_array(),
            uv: uv.to_array(),
            joints: [0; 4],
            weights: [0.0; 4],
        }
    }

    pub fn with_skin(mut self, joints: [u16; 4], weights: [f32; 4]) -> Self {
        self.joints = joints;
        self.weights = weights;
        self
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 24, shader_location: 2, format: wgpu::VertexFormat::Float32x4 },
                wgpu::VertexAttribute { offset: 40, shader_location: 3, format: wgpu::VertexFormat::Float32x2 },
                wgpu::VertexAttribute { offset: 48, shader_location: 4, format: wgpu::VertexFormat::Uint16x4 },
                wgpu::VertexAttribute { offset: 56, shader_location: 5, format: wgpu::VertexFormat::Float32x4 },
            ],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub subsets: Vec<MeshSubset>,
}

/// Index range drawn with a single material. `material` indexes the owning
/// model's material list; `None` selects the default material.
#[derive(Clone, Debug)]
pub struct MeshSubset {
    pub index_offset: u32,
    pub index_count: u32,
    pub material: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct ImportedTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MaterialTextureBinding {
    pub texture: usize,
    pub srgb: bool,
    pub scale: f32,
}

#[derive(Clone, Debug)]
pub struct ImportedMaterial {
    pub label: String,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub double_sided: bool,
    pub base_color_texture: Option<MaterialTextureBinding>,
    pub metallic_roughness_texture: Option<MaterialTextureBinding>,
    pub normal_texture: Option<MaterialTextureBinding>,
    pub emissive_texture: Option<MaterialTextureBinding>,
}

impl Default for ImportedMaterial {
    fn default() -> Self {
        Self {
            label: "Default".to_string(),
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0, 0.0, 0.0],
            double_sided: false,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
            emissive_texture: None,
        }
    }
}

impl Mesh {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        let subset = MeshSubset { index_offset: 0, index_count: indices.len() as u32, material: None };
        Self { vertices, indices, subsets: vec![subset] }
    }

    /// Square grid of `size` x `size` units lying in the XZ plane, facing +Y,
    /// centred on the origin and split into `segments` cells per side.
    pub fn plane(size: f32, segments: u32) -> Self {
        let grid = segments.max(1);
        let half = size * 0.5;
        let cell = size / grid as f32;
        let row = grid + 1;

        let mut vertices = Vec::with_capacity((row * row) as usize);
        for iz in 0..=grid {
            let z = -half + iz as f32 * cell;
            for ix in 0..=grid {
                let x = -half + ix as f32 * cell;
                let uv = Vec2::new(ix as f32 / grid as f32, 1.0 - iz as f32 / grid as f32);
                vertices.push(MeshVertex::new(Vec3::new(x, 0.0, z), Vec3::Y, Vec4::new(1.0, 0.0, 0.0, 1.0), uv));
            }
        }

        let mut indices = Vec::with_capacity((grid * grid * 6) as usize);
        for iz in 0..grid {
            for ix in 0..grid {
                let a = iz * row + ix;
                let b = a + row;
                let c = b + 1;
                let d = a + 1;
                indices.extend_from_slice(&[a, b, d, b, c, d]);
            }
        }

        compute_tangents(&mut vertices, &indices);
        Self::new(vertices, indices)
    }

    /// Flattens the triangle primitives of a glTF mesh into one vertex/index
    /// buffer with one subset per primitive. Returns `None` when the mesh has
    /// no drawable triangles.
    pub fn from_gltf(mesh: &gltf::Mesh<'_>, buffers: &[gltf::buffer::Data], label: &str) -> Result<Option<Self>> {
        let mut vertices: Vec<MeshVertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut subsets: Vec<MeshSubset> = Vec::new();

        for (primitive_index, primitive) in mesh.primitives().enumerate() {
            if primitive.mode() != Mode::Triangles {
                log::warn!(
                    "[assets] {label}: skipping primitive {primitive_index} of mesh {} with mode {:?}",
                    mesh.index(),
                    primitive.mode()
                );
                continue;
            }
            let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
            let positions: Vec<Vec3> = reader
                .read_positions()
                .ok_or_else(|| anyhow!("POSITION attribute missing in mesh {} of {label}", mesh.index()))?
                .map(Vec3::from_array)
                .collect();
            if positions.is_empty() {
                continue;
            }

            let mut normals: Vec<Vec3> = reader
                .read_normals()
                .map(|it| it.map(Vec3::from_array).collect())
                .unwrap_or_default();
            let mut tex_coords: Vec<Vec2> = reader
                .read_tex_coords(0)
                .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
                .unwrap_or_default();
            let mut joints: Vec<[u16; 4]> =
                reader.read_joints(0).map(|it| it.into_u16().collect()).unwrap_or_default();
            let mut weights: Vec<[f32; 4]> =
                reader.read_weights(0).map(|it| it.into_f32().collect()).unwrap_or_default();

            let local_indices: Vec<u32> = reader
                .read_indices()
                .map(|read| read.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());
            if local_indices.iter().any(|&idx| idx as usize >= positions.len()) {
                bail!("Mesh {} of {label} has indices past its {} vertices", mesh.index(), positions.len());
            }

            if normals.len() != positions.len() || normals.iter().all(|n| n.length_squared() == 0.0) {
                normals = compute_normals(&positions, &local_indices);
            }
            tex_coords.resize(positions.len(), Vec2::ZERO);
            joints.resize(positions.len(), [0; 4]);
            weights.resize(positions.len(), [0.0; 4]);

            let base_vertex = vertices.len() as u32;
            vertices.extend(positions.iter().enumerate().map(|(i, pos)| {
                MeshVertex::new(*pos, normals[i].normalize_or_zero(), Vec4::new(1.0, 0.0, 0.0, 1.0), tex_coords[i])
                    .with_skin(joints[i], normalize_weights(weights[i]))
            }));

            let index_offset = indices.len() as u32;
            indices.extend(local_indices.iter().map(|idx| idx + base_vertex));
            let index_count = indices.len() as u32 - index_offset;
            subsets.push(MeshSubset { index_offset, index_count, material: primitive.material().index() });
        }

        if subsets.is_empty() {
            return Ok(None);
        }
        compute_tangents(&mut vertices, &indices);
        Ok(Some(Mesh { vertices, indices, subsets }))
    }
}

/// Decodes every texture of the document to RGBA8 and maps its materials onto
/// indices into the returned texture list.
pub fn import_materials(
    document: &gltf::Document,
    images: &[gltf::image::Data],
    label: &str,
) -> Result<(Vec<ImportedMaterial>, Vec<ImportedTexture>)> {
    let mut textures = Vec::new();
    for texture in document.textures() {
        let source = texture.source();
        let image_data = images
            .get(source.index())
            .ok_or_else(|| anyhow!("Image index {} missing in {label}", source.index()))?;
        textures.push(ImportedTexture {
            label: format!("{label}::tex{}", texture.index()),
            width: image_data.width,
            height: image_data.height,
            data: convert_image_to_rgba(image_data)?,
        });
    }

    let mut materials = Vec::new();
    for (mat_index, material) in document.materials().enumerate() {
        let pbr = material.pbr_metallic_roughness();
        let material_label = material.name().map(str::to_string).unwrap_or_else(|| format!("material_{mat_index}"));
        // Only TEXCOORD_0 reaches the shaders.
        let binding = |texture: gltf::Texture<'_>, tex_coord: u32, srgb: bool, scale: f32| {
            if tex_coord != 0 {
                log::warn!(
                    "[assets] {label}: material '{material_label}' samples texture {} from TEXCOORD_{tex_coord}; dropping it",
                    texture.index()
                );
                return None;
            }
            Some(MaterialTextureBinding { texture: texture.index(), srgb, scale })
        };
        materials.push(ImportedMaterial {
            label: material_label.clone(),
            base_color_factor: pbr.base_color_factor(),
            metallic_factor: pbr.metallic_factor(),
            roughness_factor: pbr.roughness_factor(),
            emissive_factor: material.emissive_factor(),
            double_sided: material.double_sided(),
            base_color_texture: pbr
                .base_color_texture()
                .and_then(|info| binding(info.texture(), info.tex_coord(), true, 1.0)),
            metallic_roughness_texture: pbr
                .metallic_roughness_texture()
                .and_then(|info| binding(info.texture(), info.tex_coord(), false, 1.0)),
            normal_texture: material
                .normal_texture()
                .and_then(|info| binding(info.texture(), info.tex_coord(), false, info.scale())),
            emissive_texture: material
                .emissive_texture()
                .and_then(|info| binding(info.texture(), info.tex_coord(), true, 1.0)),
        });
    }
    Ok((materials, textures))
}

fn convert_image_to_rgba(image: &gltf::image::Data) -> Result<Vec<u8>> {
    match image.format {
        gltf::image::Format::R8 => {
            let mut out = Vec::with_capacity(image.pixels.len() * 4);
            for &value in &image.pixels {
                out.extend_from_slice(&[value, value, value, 255]);
            }
            Ok(out)
        }
        gltf::image::Format::R8G8 => {
            let mut out = Vec::with_capacity(image.pixels.len() / 2 * 4);
            for chunk in image.pixels.chunks_exact(2) {
                out.extend_from_slice(&[chunk[0], chunk[1], 0, 255]);
            }
            Ok(out)
        }
        gltf::image::Format::R8G8B8 => {
            let mut out = Vec::with_capacity(image.pixels.len() / 3 * 4);
            for chunk in image.pixels.chunks_exact(3) {
                out.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            Ok(out)
        }
        gltf::image::Format::R8G8B8A8 => Ok(image.pixels.clone()),
        gltf::image::Format::R16G16B16 => {
            // little-endian u16 channels; keep the high byte
            let mut out = Vec::with_capacity(image.pixels.len() / 6 * 4);
            for chunk in image.pixels.chunks_exact(6) {
                out.extend_from_slice(&[chunk[1], chunk[3], chunk[5], 255]);
            }
            Ok(out)
        }
        gltf::image::Format::R16G16B16A16 => {
            let mut out = Vec::with_capacity(image.pixels.len() / 2);
            for chunk in image.pixels.chunks_exact(8) {
                out.extend_from_slice(&[chunk[1], chunk[3], chunk[5], chunk[7]]);
            }
            Ok(out)
        }
        other => bail!("Unsupported image format {:?}", other),
    }
}

fn normalize_weights(weights: [f32; 4]) -> [f32; 4] {
    let sum: f32 = weights.iter().sum();
    if sum <= f32::EPSILON {
        return weights;
    }
    weights.map(|w| w / sum)
}

fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }
        let a = positions[i0];
        let normal = (positions[i1] - a).cross(positions[i2] - a);
        if normal.length_squared() > 0.0 {
            normals[i0] += normal;
            normals[i1] += normal;
            normals[i2] += normal;
        }
    }
    for normal in &mut normals {
        *normal = if normal.length_squared() > 0.0 { normal.normalize() } else { Vec3::Y };
    }
    normals
}

fn compute_tangents(vertices: &mut [MeshVertex], indices: &[u32]) {
    if vertices.is_empty() || indices.is_empty() {
        return;
    }
    let mut tan1 = vec![Vec3::ZERO; vertices.len()];
    let mut tan2 = vec![Vec3::ZERO; vertices.len()];

    for tri in indices.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if i0 >= vertices.len() || i1 >= vertices.len() || i2 >= vertices.len() {
            continue;
        }

        let v0 = Vec3::from_array(vertices[i0].position);
        let delta_pos1 = Vec3::from_array(vertices[i1].position) - v0;
        let delta_pos2 = Vec3::from_array(vertices[i2].position) - v0;

        let uv0 = Vec2::from_array(vertices[i0].uv);
        let delta_uv1 = Vec2::from_array(vertices[i1].uv) - uv0;
        let delta_uv2 = Vec2::from_array(vertices[i2].uv) - uv0;

        let denom = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
        if denom.abs() < 1e-8 {
            continue;
        }
        let r = 1.0 / denom;
        let sdir = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
        let tdir = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * r;

        for idx in [i0, i1, i2] {
            tan1[idx] += sdir;
            tan2[idx] += tdir;
        }
    }

    for (i, vertex) in vertices.iter_mut().enumerate() {
        let normal = Vec3::from_array(vertex.normal);
        let t1 = tan1[i];
        if t1.length_squared() > 0.0 {
            let tangent = (t1 - normal * normal.dot(t1)).normalize_or_zero();
            let w = if normal.cross(t1).dot(tan2[i]) < 0.0 { -1.0 } else { 1.0 };
            vertex.tangent = [tangent.x, tangent.y, tangent.z, w];
        } else {
            vertex.tangent = [1.0, 0.0, 0.0, 1.0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_covers_requested_extent() {
        let plane = Mesh::plane(40.0, 32);
        assert_eq!(plane.vertices.len(), 33 * 33);
        assert_eq!(plane.indices.len(), 32 * 32 * 6);
        let (min, max) = plane.vertices.iter().map(|v| Vec3::from_array(v.position)).fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(min, max), pos| (min.min(pos), max.max(pos)),
        );
        assert_eq!(min, Vec3::new(-20.0, 0.0, -20.0));
        assert_eq!(max, Vec3::new(20.0, 0.0, 20.0));
        assert!(plane.vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));
    }

    #[test]
    fn plane_triangles_face_up() {
        let plane = Mesh::plane(2.0, 2);
        for tri in plane.indices.chunks_exact(3) {
            let a = Vec3::from_array(plane.vertices[tri[0] as usize].position);
            let b = Vec3::from_array(plane.vertices[tri[1] as usize].position);
            let c = Vec3::from_array(plane.vertices[tri[2] as usize].position);
            assert!((b - a).cross(c - a).y > 0.0, "triangle {tri:?} winds downward");
        }
    }

    #[test]
    fn plane_tangents_follow_u_axis() {
        let plane = Mesh::plane(4.0, 1);
        for vertex in &plane.vertices {
            let tangent = Vec3::new(vertex.tangent[0], vertex.tangent[1], vertex.tangent[2]);
            assert!((tangent - Vec3::X).length() < 1e-5, "tangent {tangent:?}");
        }
    }

    #[test]
    fn textures_on_secondary_uv_sets_are_dropped() {
        let json = br#"{
            "asset": { "version": "2.0" },
            "images": [{ "uri": "albedo.png" }],
            "textures": [{ "source": 0 }],
            "materials": [{
                "name": "skin",
                "pbrMetallicRoughness": { "baseColorTexture": { "index": 0, "texCoord": 1 } },
                "normalTexture": { "index": 0, "scale": 0.5 }
            }]
        }"#;
        let gltf = gltf::Gltf::from_slice(json).expect("material document");
        let image = gltf::image::Data {
            pixels: vec![255, 0, 0, 255],
            format: gltf::image::Format::R8G8B8A8,
            width: 1,
            height: 1,
        };
        let (materials, textures) = import_materials(&gltf.document, &[image], "uv_sets").expect("materials");
        assert_eq!(textures.len(), 1);
        assert!(materials[0].base_color_texture.is_none());
        let normal = materials[0].normal_texture.as_ref().expect("normal map on TEXCOORD_0");
        assert_eq!(normal.texture, 0);
        assert_eq!(normal.scale, 0.5);
    }

    #[test]
    fn weights_are_normalized() {
        assert_eq!(normalize_weights([2.0, 2.0, 0.0, 0.0]), [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(normalize_weights([0.0; 4]), [0.0; 4]);
    }
}
