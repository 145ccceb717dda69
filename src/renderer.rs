use anyhow::{Context, Result};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

use egui_wgpu::ScreenDescriptor;

use crate::camera3d::Camera3D;
use crate::config::{ShadowConfig, WindowConfig};
use crate::scene::Scene;

mod mesh_pass;
mod overlay_pass;
mod scene_gpu;
mod shadow_pass;
mod window_surface;

use mesh_pass::MeshPass;
use overlay_pass::OverlayPass;
use scene_gpu::{DrawLayouts, SceneGpu};
use shadow_pass::ShadowPass;
pub use window_surface::SurfaceFrame;
use window_surface::WindowSurface;

pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub(crate) const SHADOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Upper bound on the joint palette uploaded for a single skinned mesh.
pub const MAX_SKIN_JOINTS: usize = 256;

struct GpuState {
    layouts: DrawLayouts,
    scene: SceneGpu,
    shadow: ShadowPass,
    mesh: MeshPass,
    overlay: OverlayPass,
}

pub struct Renderer {
    surface: WindowSurface,
    shadow_resolution: u32,
    gpu: Option<GpuState>,
}

impl Renderer {
    pub fn new(window_cfg: &WindowConfig, shadow_cfg: &ShadowConfig) -> Self {
        Self { surface: WindowSurface::new(window_cfg), shadow_resolution: shadow_cfg.resolution, gpu: None }
    }

    /// Creates the window, device and passes on first call; later calls are no-ops.
    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        self.surface.ensure_window(event_loop)?;
        if self.gpu.is_some() {
            return Ok(());
        }
        let device = self.surface.device()?;
        let queue = self.surface.queue()?;
        let format = self.surface.surface_format()?;
        let layouts = DrawLayouts::new(device);
        let shadow = ShadowPass::new(device, &layouts, self.shadow_resolution);
        let mesh = MeshPass::new(device, queue, &layouts, &shadow, format, self.surface.sample_count())?;
        let scene = SceneGpu::new(device, queue);
        let overlay = OverlayPass::new(device, format);
        self.gpu = Some(GpuState { layouts, scene, shadow, mesh, overlay });
        Ok(())
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.surface.size()
    }

    pub fn window(&self) -> Option<&Window> {
        self.surface.window()
    }

    pub fn pixels_per_point(&self) -> f32 {
        self.window().map(|window| window.scale_factor() as f32).unwrap_or(1.0)
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.surface.resize(new_size);
    }

    /// Renders the shadow map and the lit scene into a freshly acquired frame.
    /// The frame is returned unpresented so the overlay can be drawn on top.
    pub fn render_scene(&mut self, scene: &Scene, camera: &Camera3D) -> Result<SurfaceFrame> {
        let frame = self.surface.acquire_surface_frame()?;
        let device = self.surface.device()?;
        let queue = self.surface.queue()?;
        let depth_view = self.surface.depth_view()?;
        let GpuState { layouts, scene: scene_gpu, shadow, mesh, .. } =
            self.gpu.as_mut().context("Renderer used before the window was created")?;

        scene_gpu.sync(device, queue, layouts, scene)?;
        mesh.sync_environment(device, queue, scene, shadow);
        scene_gpu.write_draws(queue, scene);
        let draws = scene_gpu.draws(scene);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Scene Encoder") });
        shadow.encode(&mut encoder, queue, &scene.spot_light, &draws);
        mesh.write_frame(queue, scene, camera, shadow);

        let (color_view, resolve_target) = match self.surface.msaa_view() {
            Some(msaa) => (msaa, Some(frame.view())),
            None => (frame.view(), None),
        };
        let [r, g, b] = scene.clear_color;
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    depth_slice: None,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r: r as f64, g: g as f64, b: b as f64, a: 1.0 }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Discard }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            mesh.draw(&mut pass, &draws);
        }
        queue.submit(std::iter::once(encoder.finish()));
        Ok(frame)
    }

    /// Draws the overlay over a frame from [`Renderer::render_scene`] and
    /// presents it.
    pub fn render_overlay(
        &mut self,
        textures: &egui::TexturesDelta,
        primitives: &[egui::ClippedPrimitive],
        screen: &ScreenDescriptor,
        frame: SurfaceFrame,
    ) -> Result<()> {
        let device = self.surface.device()?;
        let queue = self.surface.queue()?;
        let gpu = self.gpu.as_mut().context("Overlay drawn before the window was created")?;
        gpu.overlay.paint(device, queue, textures, primitives, screen, frame)
    }
}
