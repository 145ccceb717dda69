use crate::config::{ViewerConfig, ViewerConfigOverrides, DEFAULT_CONFIG_PATH};
use crate::input::{Input, InputEvent};
use crate::renderer::Renderer;
use crate::time::FrameClock;

pub mod bootstrap;
pub mod context;
mod overlay;

pub use bootstrap::{apply_environment, apply_model, Bootstrapper};
pub use context::ViewerContext;

use anyhow::{Context, Result};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};

// egui
use egui::Context as EguiCtx;
use egui_wgpu::ScreenDescriptor;
use egui_winit::State as EguiWinit;

pub fn run() -> Result<()> {
    run_with_overrides(ViewerConfigOverrides::default())
}

pub fn run_with_overrides(overrides: ViewerConfigOverrides) -> Result<()> {
    let mut config = ViewerConfig::load_or_default(DEFAULT_CONFIG_PATH);
    if !overrides.is_empty() {
        log::info!("[config] Command line overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    match app.fatal_error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

pub struct App {
    renderer: Renderer,
    viewer: ViewerContext,
    bootstrap: Option<Bootstrapper>,
    input: Input,
    clock: FrameClock,
    should_close: bool,
    fatal_error: Option<anyhow::Error>,

    // egui
    egui_ctx: EguiCtx,
    egui_winit: Option<EguiWinit>,
    egui_screen: Option<ScreenDescriptor>,
}

impl App {
    /// Builds the scene synchronously and starts both asset loads. The window
    /// and GPU come up later, in `resumed`.
    pub fn new(config: ViewerConfig) -> Self {
        let viewport = PhysicalSize::new(config.window.width.max(1), config.window.height.max(1));
        let renderer = Renderer::new(&config.window, &config.shadow);
        let viewer = ViewerContext::new(&config, viewport);
        let bootstrap = Bootstrapper::start(&config);
        Self {
            renderer,
            viewer,
            bootstrap: Some(bootstrap),
            input: Input::new(),
            clock: FrameClock::new(),
            should_close: false,
            fatal_error: None,
            egui_ctx: EguiCtx::default(),
            egui_winit: None,
            egui_screen: None,
        }
    }

    fn fail(&mut self, err: anyhow::Error) {
        log::error!("[viewer] {err:#}");
        self.fatal_error = Some(err);
        self.should_close = true;
    }

    fn init_overlay(&mut self) {
        if self.egui_winit.is_none() {
            if let Some(window) = self.renderer.window() {
                let state = EguiWinit::new(
                    self.egui_ctx.clone(),
                    egui::ViewportId::ROOT,
                    window,
                    Some(self.renderer.pixels_per_point()),
                    window.theme(),
                    None,
                );
                self.egui_winit = Some(state);
            }
        }
        let size = self.renderer.size();
        self.egui_screen = Some(ScreenDescriptor {
            size_in_pixels: [size.width, size.height],
            pixels_per_point: self.renderer.pixels_per_point(),
        });
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.renderer.resize(size);
        self.viewer.resize(size);
        if let Some(screen) = &mut self.egui_screen {
            screen.size_in_pixels = [size.width, size.height];
            screen.pixels_per_point = self.renderer.pixels_per_point();
        }
    }

    fn redraw(&mut self) {
        if let Some(bootstrap) = self.bootstrap.as_mut() {
            bootstrap.poll(&mut self.viewer);
            if bootstrap.is_settled() {
                self.bootstrap = None;
            }
        }

        self.clock.tick();
        let dt = self.clock.delta_seconds();
        if self.input.take_quit_pressed() {
            self.should_close = true;
            return;
        }
        self.viewer.apply_input(&mut self.input);
        self.viewer.update(dt);

        let size = self.renderer.size();
        if size.width == 0 || size.height == 0 {
            return;
        }
        let frame = match self.renderer.render_scene(&self.viewer.scene, &self.viewer.camera) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("[renderer] Frame skipped: {err:#}");
                return;
            }
        };

        let raw_input = match (self.renderer.window(), self.egui_winit.as_mut()) {
            (Some(window), Some(state)) => state.take_egui_input(window),
            _ => {
                frame.present();
                return;
            }
        };
        let viewer = &self.viewer;
        let mut actions = overlay::OverlayActions::default();
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            actions = overlay::draw(ctx, viewer);
        });
        if actions.toggle_playback {
            self.viewer.toggle_playback();
        }

        let egui::FullOutput { platform_output, textures_delta, shapes, pixels_per_point, .. } = full_output;
        if let (Some(window), Some(state)) = (self.renderer.window(), self.egui_winit.as_mut()) {
            state.handle_platform_output(window, platform_output);
        }
        let Some(screen) = self.egui_screen.as_mut() else {
            frame.present();
            return;
        };
        screen.pixels_per_point = pixels_per_point;
        let meshes = self.egui_ctx.tessellate(shapes, pixels_per_point);
        if let Err(err) = self.renderer.render_overlay(&textures_delta, &meshes, screen, frame) {
            log::error!("[renderer] Overlay render error: {err:#}");
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.renderer.ensure_window(event_loop) {
            self.fail(err.context("Renderer initialization failed"));
            return;
        }
        self.init_overlay();
        let size = self.renderer.size();
        self.viewer.resize(size);
        log::info!("[viewer] Window ready at {}x{}", size.width, size.height);
    }

    fn window_event(&mut self, _el: &ActiveEventLoop, id: winit::window::WindowId, event: WindowEvent) {
        // egui wants the events too
        let mut consumed = false;
        let input_event = InputEvent::from_window_event(&event);
        let is_cursor_event = matches!(&input_event, InputEvent::CursorPos { .. } | InputEvent::CursorLeft);
        if let (Some(window), Some(state)) = (self.renderer.window(), self.egui_winit.as_mut()) {
            if id == window.id() {
                let resp = state.on_window_event(window, &event);
                if resp.consumed {
                    consumed = true;
                }
            }
        }
        if !consumed || is_cursor_event {
            self.input.push(input_event);
        }

        match event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => self.resize(size),
            WindowEvent::Focused(false) => self.input.release_all(),
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            event_loop.exit();
            return;
        }
        if let Some(window) = self.renderer.window() {
            window.request_redraw();
        }
    }
}
