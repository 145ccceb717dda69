use anyhow::Result;
use std::sync::Arc;

use super::scene_gpu::{DrawItem, DrawLayouts};
use super::shadow_pass::ShadowPass;
use super::DEPTH_FORMAT;
use crate::camera3d::Camera3D;
use crate::environment::{EnvironmentGpu, EnvironmentMaps};
use crate::scene::Scene;

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct MeshFrameData {
    pub view_proj: [[f32; 4]; 4],
    pub light_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub light_pos: [f32; 4],
    pub light_dir: [f32; 4],
    pub light_color: [f32; 4],
    pub light_cone: [f32; 4],
    pub ambient: [f32; 4],
    pub environment: [f32; 4],
}

impl MeshFrameData {
    pub fn new(scene: &Scene, camera: &Camera3D, shadow: &ShadowPass, specular_mips: u32) -> Self {
        let light = &scene.spot_light;
        let (outer, inner) = light.cone_cosines();
        let inner = inner.max(outer + 1.0e-4);
        let radiance = light.color * light.intensity;
        let ambient = scene.ambient.color * scene.ambient.intensity;
        let environment_intensity = scene.environment().map(|env| env.intensity).unwrap_or(0.0);
        Self {
            view_proj: camera.view_projection().to_cols_array_2d(),
            light_view_proj: shadow.light_view_proj().to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            light_pos: light.position.extend(light.range).to_array(),
            light_dir: light.direction().extend(light.decay).to_array(),
            light_color: radiance.extend(1.0).to_array(),
            light_cone: [outer, inner, light.shadow_bias, if light.cast_shadow { 1.0 } else { 0.0 }],
            ambient: ambient.extend(1.0).to_array(),
            environment: [environment_intensity, specular_mips as f32, shadow.texel_size(), light.shadow_radius],
        }
    }
}

struct BoundEnvironment {
    source: Option<Arc<EnvironmentMaps>>,
    gpu: EnvironmentGpu,
}

/// Forward PBR pass: spot light with PCF shadows, ambient term and
/// image-based lighting from the prefiltered environment.
pub struct MeshPass {
    culled_pipeline: wgpu::RenderPipeline,
    double_sided_pipeline: wgpu::RenderPipeline,
    frame_bgl: wgpu::BindGroupLayout,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    environment_sampler: Arc<wgpu::Sampler>,
    environment: BoundEnvironment,
    rejected_environment: Option<Arc<EnvironmentMaps>>,
}

impl MeshPass {
    pub(super) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layouts: &DrawLayouts,
        shadow: &ShadowPass,
        color_format: wgpu::TextureFormat,
        sample_count: u32,
    ) -> Result<Self> {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/mesh.wgsl").into()),
        });
        let frame_bgl = create_frame_layout(device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&frame_bgl, &layouts.draw, &layouts.material],
            push_constant_ranges: &[],
        });
        let build = |label: &str, cull_mode: Option<wgpu::Face>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[crate::mesh::MeshVertex::layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: color_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::LessEqual,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState { count: sample_count, ..Default::default() },
                multiview: None,
                cache: None,
            })
        };
        let culled_pipeline = build("Mesh Pipeline", Some(wgpu::Face::Back));
        let double_sided_pipeline = build("Mesh Pipeline (Double Sided)", None);

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mesh Frame Buffer"),
            size: std::mem::size_of::<MeshFrameData>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let environment_sampler = EnvironmentGpu::create_sampler(device);
        let blank = EnvironmentGpu::upload(device, queue, &EnvironmentMaps::blank(), Arc::clone(&environment_sampler))?;
        let frame_bind_group = create_frame_bind_group(device, &frame_bgl, &frame_buffer, shadow, &blank);
        Ok(Self {
            culled_pipeline,
            double_sided_pipeline,
            frame_bgl,
            frame_buffer,
            frame_bind_group,
            environment_sampler,
            environment: BoundEnvironment { source: None, gpu: blank },
            rejected_environment: None,
        })
    }

    /// Uploads the scene's environment when it differs from the bound one.
    pub(super) fn sync_environment(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &Scene,
        shadow: &ShadowPass,
    ) {
        let Some(env) = scene.environment() else {
            return;
        };
        let bound = self.environment.source.as_ref().is_some_and(|source| Arc::ptr_eq(source, &env.maps));
        let rejected = self.rejected_environment.as_ref().is_some_and(|failed| Arc::ptr_eq(failed, &env.maps));
        if bound || rejected {
            return;
        }
        match EnvironmentGpu::upload(device, queue, &env.maps, Arc::clone(&self.environment_sampler)) {
            Ok(gpu) => {
                log::info!("[renderer] Environment '{}' bound for lighting", env.maps.label);
                self.frame_bind_group =
                    create_frame_bind_group(device, &self.frame_bgl, &self.frame_buffer, shadow, &gpu);
                self.environment = BoundEnvironment { source: Some(Arc::clone(&env.maps)), gpu };
            }
            Err(err) => {
                log::error!("[renderer] Skipping environment '{}': {err:#}", env.maps.label);
                self.rejected_environment = Some(Arc::clone(&env.maps));
            }
        }
    }

    pub(super) fn write_frame(&self, queue: &wgpu::Queue, scene: &Scene, camera: &Camera3D, shadow: &ShadowPass) {
        let mut data = MeshFrameData::new(scene, camera, shadow, self.environment.gpu.specular_mip_count());
        if self.environment.source.is_none() {
            data.environment[0] = 0.0;
        }
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&data));
    }

    pub(super) fn draw(&self, pass: &mut wgpu::RenderPass<'_>, draws: &[DrawItem<'_>]) {
        pass.set_bind_group(0, &self.frame_bind_group, &[]);
        for draw in draws {
            let pipeline = if draw.double_sided { &self.double_sided_pipeline } else { &self.culled_pipeline };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, draw.draw_bind_group, &[]);
            pass.set_bind_group(2, draw.material_bind_group, &[]);
            pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
            pass.set_index_buffer(draw.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(draw.indices.clone(), 0, 0..1);
        }
    }
}

fn create_frame_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let texture = |binding: u32, view_dimension: wgpu::TextureViewDimension| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension,
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Mesh Frame BGL"),
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
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Depth,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                count: None,
            },
            texture(3, wgpu::TextureViewDimension::Cube),
            texture(4, wgpu::TextureViewDimension::Cube),
            texture(5, wgpu::TextureViewDimension::D2),
            wgpu::BindGroupLayoutEntry {
                binding: 6,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

fn create_frame_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    frame_buffer: &wgpu::Buffer,
    shadow: &ShadowPass,
    environment: &EnvironmentGpu,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Mesh Frame BG"),
        layout,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: frame_buffer.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(shadow.map_view()) },
            wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(shadow.sampler()) },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(environment.diffuse_view()),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(environment.specular_view()),
            },
            wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(environment.brdf_view()) },
            wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::Sampler(environment.sampler()) },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_data_matches_uniform_layout() {
        assert_eq!(std::mem::size_of::<MeshFrameData>(), 240);
        assert_eq!(std::mem::size_of::<MeshFrameData>() % 16, 0);
    }
}
