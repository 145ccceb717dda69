use crate::config::WindowConfig;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

use super::DEPTH_FORMAT;

#[derive(Debug)]
pub struct SurfaceFrame {
    view: wgpu::TextureView,
    surface: wgpu::SurfaceTexture,
}

impl SurfaceFrame {
    fn new(surface: wgpu::SurfaceTexture) -> Self {
        let view = surface.texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { view, surface }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn present(self) {
        self.surface.present();
    }
}

struct SurfaceGpu {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
}

/// Size-dependent render targets. `msaa` is only present when more than one
/// sample is in use; the swapchain texture is then its resolve target.
struct Attachments {
    depth: wgpu::TextureView,
    msaa: Option<wgpu::TextureView>,
}

impl Attachments {
    fn new(device: &wgpu::Device, size: PhysicalSize<u32>, format: wgpu::TextureFormat, samples: u32) -> Self {
        let depth = create_target(device, "Depth Texture", size, DEPTH_FORMAT, samples);
        let msaa = (samples > 1).then(|| create_target(device, "MSAA Color Texture", size, format, samples));
        Self { depth, msaa }
    }
}

/// Owns the viewer window, the device bound to it and the attachments that
/// follow its size.
pub struct WindowSurface {
    window: Option<Arc<Window>>,
    gpu: Option<SurfaceGpu>,
    attachments: Option<Attachments>,
    size: PhysicalSize<u32>,
    title: String,
    vsync: bool,
    maximized: bool,
    requested_samples: u32,
    sample_count: u32,
}

impl WindowSurface {
    pub fn new(window_cfg: &WindowConfig) -> Self {
        Self {
            window: None,
            gpu: None,
            attachments: None,
            size: PhysicalSize::new(window_cfg.width.max(1), window_cfg.height.max(1)),
            title: window_cfg.title.clone(),
            vsync: window_cfg.vsync,
            maximized: window_cfg.maximized,
            requested_samples: window_cfg.msaa_samples.max(1),
            sample_count: 1,
        }
    }

    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }
        let attrs = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(self.size)
            .with_maximized(self.maximized);
        let window = Arc::new(event_loop.create_window(attrs).context("Failed to create window")?);
        let gpu = pollster::block_on(self.create_gpu(Arc::clone(&window)))?;
        self.attachments = Some(Attachments::new(&gpu.device, self.size, gpu.config.format, self.sample_count));
        self.gpu = Some(gpu);
        self.window = Some(window);
        Ok(())
    }

    pub fn device(&self) -> Result<&wgpu::Device> {
        Ok(&self.gpu()?.device)
    }

    pub fn queue(&self) -> Result<&wgpu::Queue> {
        Ok(&self.gpu()?.queue)
    }

    pub fn surface_format(&self) -> Result<wgpu::TextureFormat> {
        Ok(self.gpu()?.config.format)
    }

    pub fn depth_view(&self) -> Result<&wgpu::TextureView> {
        Ok(&self.attachments.as_ref().context("Depth texture missing")?.depth)
    }

    pub fn msaa_view(&self) -> Option<&wgpu::TextureView> {
        self.attachments.as_ref().and_then(|targets| targets.msaa.as_ref())
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    /// Zero-area sizes are recorded but leave the surface untouched until the
    /// window becomes visible again.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };
        gpu.config.width = new_size.width;
        gpu.config.height = new_size.height;
        gpu.surface.configure(&gpu.device, &gpu.config);
        self.attachments = Some(Attachments::new(&gpu.device, new_size, gpu.config.format, self.sample_count));
    }

    pub fn acquire_surface_frame(&mut self) -> Result<SurfaceFrame> {
        let acquired = self.gpu()?.surface.get_current_texture();
        acquired.map(SurfaceFrame::new).map_err(|err| self.recover(err))
    }

    /// Reconfigures after a lost or outdated surface. Every error still skips
    /// the current frame.
    fn recover(&mut self, error: wgpu::SurfaceError) -> anyhow::Error {
        if needs_reconfigure(&error) {
            self.resize(self.size);
            return anyhow!("Surface {error}; reconfigured for {}x{}", self.size.width, self.size.height);
        }
        anyhow!("Surface unavailable: {error}")
    }

    fn gpu(&self) -> Result<&SurfaceGpu> {
        self.gpu.as_ref().context("GPU surface not initialized")
    }

    async fn create_gpu(&mut self, window: Arc<Window>) -> Result<SurfaceGpu> {
        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(Arc::clone(&window)).context("Failed to create WGPU surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to request WGPU adapter")?;
        let info = adapter.get_info();
        log::info!("[renderer] Using adapter '{}' ({:?})", info.name, info.backend);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Viewer Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
            })
            .await
            .context("Failed to request WGPU device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = choose_surface_format(&caps.formats).context("Surface reports no formats")?;
        let color_features = adapter.get_texture_format_features(format);
        let depth_features = adapter.get_texture_format_features(DEPTH_FORMAT);
        self.sample_count = select_sample_count(self.requested_samples, |count| {
            color_features.flags.sample_count_supported(count) && depth_features.flags.sample_count_supported(count)
        });
        if self.sample_count != self.requested_samples {
            log::warn!(
                "[renderer] {}x MSAA unavailable for {format:?}; using {}x",
                self.requested_samples,
                self.sample_count
            );
        }

        let inner = window.inner_size();
        self.size = PhysicalSize::new(inner.width.max(1), inner.height.max(1));
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: self.size.width,
            height: self.size.height,
            present_mode: select_present_mode(self.vsync, &caps.present_modes),
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        Ok(SurfaceGpu { surface, device, queue, config })
    }
}

fn needs_reconfigure(error: &wgpu::SurfaceError) -> bool {
    matches!(error, wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)
}

fn select_present_mode(vsync: bool, modes: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    if vsync {
        return wgpu::PresentMode::Fifo;
    }
    [wgpu::PresentMode::Mailbox, wgpu::PresentMode::Immediate]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(wgpu::PresentMode::Fifo)
}

fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats.iter().copied().find(|f| f.is_srgb()).or_else(|| formats.first().copied())
}

/// Largest sample count not above the request that both the colour and
/// depth formats support.
fn select_sample_count(requested: u32, supported: impl Fn(u32) -> bool) -> u32 {
    [16, 8, 4, 2].into_iter().find(|&count| count <= requested && supported(count)).unwrap_or(1)
}

fn create_target(
    device: &wgpu::Device,
    label: &str,
    size: PhysicalSize<u32>,
    format: wgpu::TextureFormat,
    sample_count: u32,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width: size.width.max(1), height: size.height.max(1), depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_forces_fifo_and_otherwise_prefers_mailbox() {
        let modes = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate, wgpu::PresentMode::Mailbox];
        assert_eq!(select_present_mode(true, &modes), wgpu::PresentMode::Fifo);
        assert_eq!(select_present_mode(false, &modes), wgpu::PresentMode::Mailbox);
        assert_eq!(select_present_mode(false, &modes[..2]), wgpu::PresentMode::Immediate);
        assert_eq!(select_present_mode(false, &modes[..1]), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn only_lost_or_outdated_surfaces_reconfigure() {
        assert!(needs_reconfigure(&wgpu::SurfaceError::Lost));
        assert!(needs_reconfigure(&wgpu::SurfaceError::Outdated));
        assert!(!needs_reconfigure(&wgpu::SurfaceError::Timeout));
        assert!(!needs_reconfigure(&wgpu::SurfaceError::OutOfMemory));
        assert!(!needs_reconfigure(&wgpu::SurfaceError::Other));
    }

    #[test]
    fn recovering_without_a_device_keeps_the_size() {
        let mut surface = WindowSurface::new(&WindowConfig::default());
        let err = surface.recover(wgpu::SurfaceError::Lost);
        assert!(err.to_string().contains("reconfigured for 1280x720"), "{err}");
        assert_eq!(surface.size(), PhysicalSize::new(1280, 720));
    }

    #[test]
    fn resize_before_the_window_only_records_size() {
        let mut surface = WindowSurface::new(&WindowConfig::default());
        surface.resize(PhysicalSize::new(1600, 400));
        assert_eq!(surface.size(), PhysicalSize::new(1600, 400));
        assert!(surface.depth_view().is_err());
        assert!(surface.msaa_view().is_none());
    }

    #[test]
    fn sample_count_falls_back_to_supported_value() {
        assert_eq!(select_sample_count(4, |count| count <= 4), 4);
        assert_eq!(select_sample_count(4, |count| count == 2), 2);
        assert_eq!(select_sample_count(8, |_| false), 1);
        assert_eq!(select_sample_count(1, |_| true), 1);
    }
}
