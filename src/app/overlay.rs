use super::context::ViewerContext;

const PLAY_GLYPH: &str = "▶";
const PAUSE_GLYPH: &str = "⏸";
const BUTTON_SIZE: f32 = 48.0;

/// What the user did with the overlay this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlayActions {
    pub toggle_playback: bool,
}

/// Glyph shown on the play/pause button for the current icon visibility.
pub fn button_glyph(viewer: &ViewerContext) -> &'static str {
    let icons = viewer.playback.icons();
    if icons.pause {
        PAUSE_GLYPH
    } else {
        PLAY_GLYPH
    }
}

pub fn draw(ctx: &egui::Context, viewer: &ViewerContext) -> OverlayActions {
    let mut actions = OverlayActions::default();
    if viewer.is_loading() {
        draw_loading(ctx);
    }

    egui::Area::new(egui::Id::new("playback_button"))
        .order(egui::Order::Foreground)
        .movable(false)
        .anchor(egui::Align2::CENTER_BOTTOM, egui::vec2(0.0, -24.0))
        .show(ctx, |ui| {
            let label = egui::RichText::new(button_glyph(viewer)).size(22.0);
            let button = egui::Button::new(label)
                .min_size(egui::vec2(BUTTON_SIZE, BUTTON_SIZE))
                .corner_radius(BUTTON_SIZE * 0.5);
            if ui.add(button).on_hover_text("Play / pause (Space)").clicked() {
                actions.toggle_playback = true;
            }
        });
    actions
}

fn draw_loading(ctx: &egui::Context) {
    egui::Area::new(egui::Id::new("loading_overlay"))
        .order(egui::Order::Foreground)
        .interactable(false)
        .movable(false)
        .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
        .show(ctx, |ui| {
            let frame = egui::Frame::new()
                .fill(ui.visuals().extreme_bg_color.gamma_multiply(0.9))
                .stroke(egui::Stroke::new(1.0, ui.visuals().widgets.noninteractive.bg_stroke.color))
                .corner_radius(6.0)
                .inner_margin(egui::Margin::symmetric(16, 12));
            frame.show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.add(egui::Spinner::new().size(20.0));
                    ui.label(egui::RichText::new("Loading").strong());
                });
            });
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bootstrap::apply_model;
    use crate::config::{ModelPlacementConfig, ViewerConfig};
    use crate::model::load_model;
    use winit::dpi::PhysicalSize;

    fn viewer() -> ViewerContext {
        ViewerContext::new(&ViewerConfig::default(), PhysicalSize::new(640, 480))
    }

    fn frame(ctx: &egui::Context, viewer: &ViewerContext, events: Vec<egui::Event>) -> OverlayActions {
        let input = egui::RawInput {
            screen_rect: Some(egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(640.0, 480.0))),
            events,
            ..Default::default()
        };
        let mut actions = OverlayActions::default();
        let _ = ctx.run(input, |ctx| {
            actions = draw(ctx, viewer);
        });
        actions
    }

    fn primary(pos: egui::Pos2, pressed: bool) -> egui::Event {
        egui::Event::PointerButton {
            pos,
            button: egui::PointerButton::Primary,
            pressed,
            modifiers: egui::Modifiers::default(),
        }
    }

    #[test]
    fn button_shows_play_glyph_until_playing() {
        let viewer = viewer();
        assert_eq!(button_glyph(&viewer), PLAY_GLYPH);
    }

    #[test]
    fn button_shows_pause_glyph_while_playing() {
        let mut viewer = viewer();
        let asset = load_model("fixtures/gltf/rig_fixture.gltf").expect("rig fixture");
        apply_model(&mut viewer, asset, &ModelPlacementConfig::default());
        assert_eq!(button_glyph(&viewer), PLAY_GLYPH);

        viewer.toggle_playback();
        assert_eq!(button_glyph(&viewer), PAUSE_GLYPH);
        viewer.toggle_playback();
        assert_eq!(button_glyph(&viewer), PLAY_GLYPH);
    }

    #[test]
    fn overlay_draws_without_a_gpu() {
        let viewer = viewer();
        let ctx = egui::Context::default();
        assert!(!frame(&ctx, &viewer, Vec::new()).toggle_playback);
    }

    #[test]
    fn clicking_the_button_requests_a_toggle() {
        let viewer = viewer();
        let ctx = egui::Context::default();
        assert!(!frame(&ctx, &viewer, Vec::new()).toggle_playback);

        let centre = ctx
            .memory(|mem| mem.area_rect(egui::Id::new("playback_button")))
            .expect("button area laid out")
            .center();
        assert!(!frame(&ctx, &viewer, vec![egui::Event::PointerMoved(centre)]).toggle_playback);
        assert!(!frame(&ctx, &viewer, vec![primary(centre, true)]).toggle_playback);
        assert!(frame(&ctx, &viewer, vec![primary(centre, false)]).toggle_playback);
    }
}
