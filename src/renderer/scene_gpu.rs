use anyhow::{bail, Result};
use glam::Mat4;
use std::sync::Arc;
use wgpu::util::DeviceExt;

use super::MAX_SKIN_JOINTS;
use crate::mesh::{ImportedMaterial, ImportedTexture, MaterialTextureBinding, Mesh};
use crate::model::{ModelAsset, ModelInstance};
use crate::scene::{Scene, StandardMaterial};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniform {
    model: [[f32; 4]; 4],
    params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct MaterialUniform {
    base_color: [f32; 4],
    emissive: [f32; 4],
    params: [f32; 4],
}

/// Bind group layouts shared by the shadow and mesh pipelines.
pub(super) struct DrawLayouts {
    pub draw: wgpu::BindGroupLayout,
    pub material: wgpu::BindGroupLayout,
}

impl DrawLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let draw = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Draw BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        };
        let material = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        Self { draw, material }
    }
}

pub(super) struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    subsets: Vec<(std::ops::Range<u32>, Option<usize>)>,
}

impl GpuMesh {
    fn upload(device: &wgpu::Device, mesh: &Mesh, label: &str) -> Result<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            bail!("Mesh '{label}' has no geometry");
        }
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let subsets = mesh
            .subsets
            .iter()
            .map(|subset| (subset.index_offset..subset.index_offset + subset.index_count, subset.material))
            .collect();
        Ok(Self { vertex_buffer, index_buffer, subsets })
    }
}

/// Per-placement uniform plus joint palette.
struct DrawSlot {
    uniform: wgpu::Buffer,
    joints: wgpu::Buffer,
    joint_capacity: usize,
    bind_group: wgpu::BindGroup,
}

impl DrawSlot {
    fn new(device: &wgpu::Device, layouts: &DrawLayouts, joint_capacity: usize, label: &str) -> Self {
        let joint_capacity = joint_capacity.clamp(1, MAX_SKIN_JOINTS);
        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<DrawUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let identity = vec![Mat4::IDENTITY.to_cols_array(); joint_capacity];
        let joints = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&identity),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &layouts.draw,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniform.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: joints.as_entire_binding() },
            ],
        });
        Self { uniform, joints, joint_capacity, bind_group }
    }

    fn write(&self, queue: &wgpu::Queue, model: Mat4, palette: Option<&[Mat4]>, receive_shadow: bool) {
        let joint_count = palette.map(|p| p.len().min(self.joint_capacity)).unwrap_or(0);
        let uniform = DrawUniform {
            model: model.to_cols_array_2d(),
            params: [
                if joint_count > 0 { 1.0 } else { 0.0 },
                if receive_shadow { 1.0 } else { 0.0 },
                joint_count as f32,
                0.0,
            ],
        };
        queue.write_buffer(&self.uniform, 0, bytemuck::bytes_of(&uniform));
        if let Some(palette) = palette.filter(|_| joint_count > 0) {
            let cols: Vec<[f32; 16]> = palette.iter().take(joint_count).map(|m| m.to_cols_array()).collect();
            queue.write_buffer(&self.joints, 0, bytemuck::cast_slice(&cols));
        }
    }
}

struct GpuMaterial {
    bind_group: wgpu::BindGroup,
    double_sided: bool,
}

/// 1x1 fallbacks bound in place of absent material textures.
struct DefaultTextures {
    white: wgpu::TextureView,
    flat_normal: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

impl DefaultTextures {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let solid = |label: &str, rgba: [u8; 4]| {
            let texture = create_rgba_texture(device, label, 1, 1);
            write_rgba_texture(queue, &texture, 1, 1, &rgba);
            texture.create_view(&wgpu::TextureViewDescriptor::default())
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            white: solid("White Texture", [255, 255, 255, 255]),
            flat_normal: solid("Flat Normal Texture", [128, 128, 255, 255]),
            sampler,
        }
    }
}

struct MaterialInputs<'a> {
    uniform: MaterialUniform,
    double_sided: bool,
    base_color: &'a wgpu::TextureView,
    metallic_roughness: &'a wgpu::TextureView,
    normal: &'a wgpu::TextureView,
    emissive: &'a wgpu::TextureView,
}

fn create_material(
    device: &wgpu::Device,
    layouts: &DrawLayouts,
    sampler: &wgpu::Sampler,
    inputs: MaterialInputs<'_>,
    label: &str,
) -> GpuMaterial {
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(&inputs.uniform),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &layouts.material,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(inputs.base_color) },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(inputs.metallic_roughness),
            },
            wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(inputs.normal) },
            wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(inputs.emissive) },
            wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::Sampler(sampler) },
        ],
    });
    GpuMaterial { bind_group, double_sided: inputs.double_sided }
}

struct GroundGpu {
    mesh: GpuMesh,
    material: GpuMaterial,
    slot: DrawSlot,
}

struct ModelGpu {
    asset: Arc<ModelAsset>,
    meshes: Vec<GpuMesh>,
    slots: Vec<DrawSlot>,
    materials: Vec<GpuMaterial>,
    default_material: GpuMaterial,
}

impl ModelGpu {
    fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layouts: &DrawLayouts,
        defaults: &DefaultTextures,
        asset: &Arc<ModelAsset>,
    ) -> Result<Self> {
        let textures: Vec<wgpu::Texture> = asset
            .textures
            .iter()
            .map(|texture| upload_imported_texture(device, queue, texture))
            .collect::<Result<_>>()?;
        let view_for = |binding: Option<&MaterialTextureBinding>, fallback: &wgpu::TextureView| match binding
            .and_then(|binding| textures.get(binding.texture).map(|texture| (binding, texture)))
        {
            Some((binding, texture)) => texture.create_view(&wgpu::TextureViewDescriptor {
                format: Some(if binding.srgb {
                    wgpu::TextureFormat::Rgba8UnormSrgb
                } else {
                    wgpu::TextureFormat::Rgba8Unorm
                }),
                ..Default::default()
            }),
            None => fallback.clone(),
        };
        let build = |material: &ImportedMaterial| {
            let base_color = view_for(material.base_color_texture.as_ref(), &defaults.white);
            let metallic_roughness = view_for(material.metallic_roughness_texture.as_ref(), &defaults.white);
            let normal = view_for(material.normal_texture.as_ref(), &defaults.flat_normal);
            let emissive = view_for(material.emissive_texture.as_ref(), &defaults.white);
            let normal_scale = material.normal_texture.as_ref().map(|binding| binding.scale).unwrap_or(1.0);
            let emissive_factor = material.emissive_factor;
            create_material(
                device,
                layouts,
                &defaults.sampler,
                MaterialInputs {
                    uniform: MaterialUniform {
                        base_color: material.base_color_factor,
                        emissive: [emissive_factor[0], emissive_factor[1], emissive_factor[2], 0.0],
                        params: [material.metallic_factor, material.roughness_factor, normal_scale, 0.0],
                    },
                    double_sided: material.double_sided,
                    base_color: &base_color,
                    metallic_roughness: &metallic_roughness,
                    normal: &normal,
                    emissive: &emissive,
                },
                &material.label,
            )
        };
        let materials = asset.materials.iter().map(build).collect();
        let default_material = build(&ImportedMaterial::default());

        let mut meshes = Vec::with_capacity(asset.meshes.len());
        let mut slots = Vec::with_capacity(asset.meshes.len());
        for (index, entry) in asset.meshes.iter().enumerate() {
            let label = format!("{} mesh {index}", asset.label);
            meshes.push(GpuMesh::upload(device, &entry.geometry, &label)?);
            let joints = entry.skin.and_then(|skin| asset.skins.get(skin)).map(|skin| skin.joints.len()).unwrap_or(1);
            if joints > MAX_SKIN_JOINTS {
                log::warn!(
                    "[renderer] {label}: skin has {joints} joints; only the first {MAX_SKIN_JOINTS} are uploaded"
                );
            }
            slots.push(DrawSlot::new(device, layouts, joints, &label));
        }
        log::info!(
            "[renderer] Uploaded '{}' ({} meshes, {} materials, {} textures)",
            asset.label,
            meshes.len(),
            asset.materials.len(),
            textures.len()
        );
        Ok(Self { asset: Arc::clone(asset), meshes, slots, materials, default_material })
    }

    fn write(&self, queue: &wgpu::Queue, instance: &ModelInstance) {
        for (index, (slot, entry)) in self.slots.iter().zip(&self.asset.meshes).enumerate() {
            let palette = entry.skin.and_then(|skin| instance.skin_palette(skin));
            slot.write(queue, instance.mesh_matrix(index), palette, instance.shadows(index).receive);
        }
    }
}

/// Borrowed view of one indexed draw.
pub(super) struct DrawItem<'a> {
    pub vertex_buffer: &'a wgpu::Buffer,
    pub index_buffer: &'a wgpu::Buffer,
    pub indices: std::ops::Range<u32>,
    pub draw_bind_group: &'a wgpu::BindGroup,
    pub material_bind_group: &'a wgpu::BindGroup,
    pub double_sided: bool,
    pub cast_shadow: bool,
}

/// GPU mirror of a [`Scene`]. Geometry and materials upload once per asset;
/// draw uniforms and joint palettes are rewritten every frame.
pub(super) struct SceneGpu {
    defaults: DefaultTextures,
    ground: Option<GroundGpu>,
    model: Option<ModelGpu>,
    rejected_model: Option<Arc<ModelAsset>>,
    synced_revision: Option<u64>,
}

impl SceneGpu {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self {
            defaults: DefaultTextures::new(device, queue),
            ground: None,
            model: None,
            rejected_model: None,
            synced_revision: None,
        }
    }

    pub fn sync(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, layouts: &DrawLayouts, scene: &Scene) -> Result<()> {
        if self.ground.is_none() {
            let mesh = GpuMesh::upload(device, &scene.ground.mesh, "Ground")?;
            let material = self.standard_material(device, layouts, &scene.ground.material, "Ground Material");
            let slot = DrawSlot::new(device, layouts, 1, "Ground Draw");
            self.ground = Some(GroundGpu { mesh, material, slot });
        }
        if self.synced_revision == Some(scene.revision()) {
            return Ok(());
        }
        self.synced_revision = Some(scene.revision());
        let Some(instance) = scene.model() else {
            self.model = None;
            return Ok(());
        };
        let asset = instance.asset();
        let current = self.model.as_ref().is_some_and(|model| Arc::ptr_eq(&model.asset, asset));
        let rejected = self.rejected_model.as_ref().is_some_and(|failed| Arc::ptr_eq(failed, asset));
        if current || rejected {
            return Ok(());
        }
        match ModelGpu::upload(device, queue, layouts, &self.defaults, asset) {
            Ok(model) => self.model = Some(model),
            Err(err) => {
                log::error!("[renderer] Skipping model '{}': {err:#}", asset.label);
                self.model = None;
                self.rejected_model = Some(Arc::clone(asset));
            }
        }
        Ok(())
    }

    pub fn write_draws(&self, queue: &wgpu::Queue, scene: &Scene) {
        if let Some(ground) = &self.ground {
            ground.slot.write(queue, scene.ground.transform, None, scene.ground.receive_shadow);
        }
        if let (Some(model), Some(instance)) = (&self.model, scene.model()) {
            model.write(queue, instance);
        }
    }

    pub fn draws<'a>(&'a self, scene: &Scene) -> Vec<DrawItem<'a>> {
        let mut draws = Vec::new();
        if let Some(ground) = &self.ground {
            for (range, _) in &ground.mesh.subsets {
                draws.push(DrawItem {
                    vertex_buffer: &ground.mesh.vertex_buffer,
                    index_buffer: &ground.mesh.index_buffer,
                    indices: range.clone(),
                    draw_bind_group: &ground.slot.bind_group,
                    material_bind_group: &ground.material.bind_group,
                    double_sided: ground.material.double_sided,
                    cast_shadow: scene.ground.cast_shadow,
                });
            }
        }
        if let (Some(model), Some(instance)) = (&self.model, scene.model()) {
            for (index, (mesh, slot)) in model.meshes.iter().zip(&model.slots).enumerate() {
                let cast_shadow = instance.shadows(index).cast;
                for (range, material) in &mesh.subsets {
                    let material =
                        material.and_then(|idx| model.materials.get(idx)).unwrap_or(&model.default_material);
                    draws.push(DrawItem {
                        vertex_buffer: &mesh.vertex_buffer,
                        index_buffer: &mesh.index_buffer,
                        indices: range.clone(),
                        draw_bind_group: &slot.bind_group,
                        material_bind_group: &material.bind_group,
                        double_sided: material.double_sided,
                        cast_shadow,
                    });
                }
            }
        }
        draws
    }

    fn standard_material(
        &self,
        device: &wgpu::Device,
        layouts: &DrawLayouts,
        material: &StandardMaterial,
        label: &str,
    ) -> GpuMaterial {
        create_material(
            device,
            layouts,
            &self.defaults.sampler,
            MaterialInputs {
                uniform: MaterialUniform {
                    base_color: material.base_color,
                    emissive: [0.0; 4],
                    params: [material.metallic, material.roughness, 1.0, 0.0],
                },
                double_sided: material.double_sided,
                base_color: &self.defaults.white,
                metallic_roughness: &self.defaults.white,
                normal: &self.defaults.flat_normal,
                emissive: &self.defaults.white,
            },
            label,
        )
    }
}

fn create_rgba_texture(device: &wgpu::Device, label: &str, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[wgpu::TextureFormat::Rgba8UnormSrgb],
    })
}

fn write_rgba_texture(queue: &wgpu::Queue, texture: &wgpu::Texture, width: u32, height: u32, data: &[u8]) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(width * 4), rows_per_image: Some(height) },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
}

fn upload_imported_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &ImportedTexture,
) -> Result<wgpu::Texture> {
    let expected = texture.width as usize * texture.height as usize * 4;
    if texture.width == 0 || texture.height == 0 || texture.data.len() != expected {
        bail!(
            "Texture '{}' has {} bytes for {}x{} RGBA",
            texture.label,
            texture.data.len(),
            texture.width,
            texture.height
        );
    }
    let max_dim = device.limits().max_texture_dimension_2d;
    if texture.width > max_dim || texture.height > max_dim {
        bail!("Texture '{}' exceeds the {max_dim}px device limit", texture.label);
    }
    let gpu = create_rgba_texture(device, &texture.label, texture.width, texture.height);
    write_rgba_texture(queue, &gpu, texture.width, texture.height, &texture.data);
    Ok(gpu)
}
