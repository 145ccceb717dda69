use anyhow::Result;
use egui_wgpu::ScreenDescriptor;

use super::SurfaceFrame;

/// Paints tessellated egui output over the resolved scene. The overlay is
/// drawn single-sampled straight into the swapchain texture.
pub(super) struct OverlayPass {
    painter: egui_wgpu::Renderer,
}

impl OverlayPass {
    pub(super) fn new(device: &wgpu::Device, color_format: wgpu::TextureFormat) -> Self {
        Self { painter: egui_wgpu::Renderer::new(device, color_format, egui_wgpu::RendererOptions::default()) }
    }

    /// Uploads texture changes, draws `primitives` with `LoadOp::Load` so the
    /// scene stays underneath, then presents `frame`. Textures freed by egui
    /// are released after the submit.
    pub(super) fn paint(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        textures: &egui::TexturesDelta,
        primitives: &[egui::ClippedPrimitive],
        screen: &ScreenDescriptor,
        frame: SurfaceFrame,
    ) -> Result<()> {
        for (id, delta) in &textures.set {
            self.painter.update_texture(device, queue, *id, delta);
        }
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Overlay Encoder") });
        let mut commands = self.painter.update_buffers(device, queue, &mut encoder, primitives, screen);
        {
            let mut pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Overlay Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: frame.view(),
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                    })],
                    depth_stencil_attachment: None,
                    occlusion_query_set: None,
                    timestamp_writes: None,
                })
                .forget_lifetime();
            self.painter.render(&mut pass, primitives, screen);
        }
        commands.push(encoder.finish());
        queue.submit(commands);
        frame.present();
        for id in &textures.free {
            self.painter.free_texture(id);
        }
        Ok(())
    }
}
