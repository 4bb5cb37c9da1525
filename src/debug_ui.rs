//! egui overlay: the tuning panel, the hover tooltip and the loading screen.

use egui::{Align2, Color32, FontId, Id, LayerId, Order, TextStyle};
use egui_wgpu::ScreenDescriptor;
use glam::Vec3;

use crate::clips::{ClipParams, LoopMode};
use crate::config::{FocusParams, LoaderConfig, ZoomParams};
use crate::effects::{TestKind, TestParams};
use crate::lighting::LightRig;
use crate::scene::{NodeId, Scene};
use crate::tween::{Channel, Ease, TweenSpec, Tweener};

/// egui context, platform state and wgpu painter for one window.
pub struct UiManager {
    context: egui::Context,
    renderer: egui_wgpu::Renderer,
    state: egui_winit::State,
}

impl UiManager {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        window: &winit::window::Window,
    ) -> Self {
        let context = egui::Context::default();
        let viewport_id = context.viewport_id();
        let state = egui_winit::State::new(context.clone(), viewport_id, window, None, None);
        let renderer = egui_wgpu::Renderer::new(device, surface_format, None, 1);
        Self {
            context,
            renderer,
            state,
        }
    }

    /// Feed a window event to egui. Returns true when egui consumed it.
    pub fn handle_event(&mut self, window: &winit::window::Window, event: &winit::event::WindowEvent) -> bool {
        self.state.on_window_event(window, event).consumed
    }

    /// Whether the pointer is over an egui area, so scene picking should
    /// ignore it.
    pub fn wants_pointer(&self) -> bool {
        self.context.wants_pointer_input() || self.context.is_pointer_over_area()
    }

    pub fn pixels_per_point(&self) -> f32 {
        self.context.pixels_per_point()
    }

    /// Run `ui_fn` and paint its output over `view` without clearing it.
    #[allow(clippy::too_many_arguments)]
    pub fn render<F>(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        screen_descriptor: ScreenDescriptor,
        window: &winit::window::Window,
        ui_fn: F,
    ) where
        F: FnOnce(&egui::Context),
    {
        let raw_input = self.state.take_egui_input(window);
        let full_output = self.context.run(raw_input, ui_fn);
        self.state
            .handle_platform_output(window, full_output.platform_output);

        let paint_jobs = self
            .context
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.renderer.update_texture(device, queue, *id, image_delta);
        }
        self.renderer
            .update_buffers(device, queue, encoder, &paint_jobs, &screen_descriptor);

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            });
            self.renderer
                .render(&mut render_pass, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.renderer.free_texture(id);
        }
    }
}

/// Something the panel asks the app to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelAction {
    ToggleLighting,
    ResetView,
    LockNamesChanged,
    PlayClip,
    StopClip,
    ApplyTest,
    StopTest,
    TestSpeedChanged(f32),
}

/// Values the panel edits in place.
pub struct PanelState<'a> {
    pub lights: &'a mut LightRig,
    pub is_night: bool,
    pub zoom: &'a mut ZoomParams,
    pub focus: &'a mut FocusParams,
    pub clips: &'a mut ClipParams,
    pub clip_names: &'a [String],
    pub clip_playing: bool,
    pub test: &'a mut TestParams,
    pub tests_running: usize,
}

/// Layout settings of the panel itself (the "GUI" folder).
#[derive(Debug, Clone, PartialEq)]
pub struct DebugPanel {
    pub visible: bool,
    pub width: f32,
    pub font_size: f32,
    pub row_height: f32,
    applied: Option<(f32, f32)>,
    /// Test-animation target labels, `"000 | name"`.
    test_targets: Vec<(String, NodeId)>,
}

impl Default for DebugPanel {
    fn default() -> Self {
        Self {
            visible: true,
            width: 280.0,
            font_size: 13.0,
            row_height: 20.0,
            applied: None,
            test_targets: Vec::new(),
        }
    }
}

fn vec3_sliders(ui: &mut egui::Ui, v: &mut Vec3, range: std::ops::RangeInclusive<f32>) {
    ui.add(egui::Slider::new(&mut v.x, range.clone()).text("x"));
    ui.add(egui::Slider::new(&mut v.y, range.clone()).text("y"));
    ui.add(egui::Slider::new(&mut v.z, range).text("z"));
}

fn color_row(ui: &mut egui::Ui, label: &str, color: &mut Vec3) {
    ui.horizontal(|ui| {
        let mut rgb = color.to_array();
        if ui.color_edit_button_rgb(&mut rgb).changed() {
            *color = Vec3::from(rgb);
        }
        ui.label(label);
    });
}

impl DebugPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the target list after a model loads.
    pub fn set_test_targets(&mut self, scene: &Scene) {
        self.test_targets = test_target_labels(scene);
    }

    fn apply_style(&mut self, ctx: &egui::Context) {
        if self.applied == Some((self.font_size, self.row_height)) {
            return;
        }
        let mut style = (*ctx.style()).clone();
        let size = self.font_size;
        style.text_styles.insert(TextStyle::Body, FontId::proportional(size));
        style.text_styles.insert(TextStyle::Button, FontId::proportional(size));
        style.text_styles.insert(TextStyle::Monospace, FontId::monospace(size));
        style.text_styles.insert(TextStyle::Small, FontId::proportional(size * 0.8));
        style.text_styles.insert(TextStyle::Heading, FontId::proportional(size * 1.3));
        style.spacing.interact_size.y = self.row_height;
        ctx.set_style(style);
        self.applied = Some((self.font_size, self.row_height));
    }

    pub fn show(&mut self, ctx: &egui::Context, state: PanelState<'_>) -> Vec<PanelAction> {
        self.apply_style(ctx);
        let mut actions = Vec::new();
        if !self.visible {
            return actions;
        }

        let PanelState {
            lights,
            is_night,
            zoom,
            focus,
            clips,
            clip_names,
            clip_playing,
            test,
            tests_running,
        } = state;

        egui::SidePanel::right("controls")
            .exact_width(self.width)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    egui::CollapsingHeader::new("GUI").show(ui, |ui| {
                        ui.add(egui::Slider::new(&mut self.width, 200.0..=600.0).text("width"));
                        ui.add(egui::Slider::new(&mut self.font_size, 9.0..=24.0).text("font size"));
                        ui.add(egui::Slider::new(&mut self.row_height, 14.0..=40.0).text("row height"));
                    });

                    egui::CollapsingHeader::new("Directional Light").show(ui, |ui| {
                        ui.add(egui::Slider::new(&mut lights.sun.intensity, 0.0..=10.0).text("intensity"));
                        color_row(ui, "color", &mut lights.sun.color);
                        vec3_sliders(ui, &mut lights.sun.position, -10.0..=10.0);
                    });

                    egui::CollapsingHeader::new("Ambient Light").show(ui, |ui| {
                        ui.add(egui::Slider::new(&mut lights.ambient.intensity, 0.0..=5.0).text("intensity"));
                        color_row(ui, "color", &mut lights.ambient.color);
                    });

                    egui::CollapsingHeader::new("Switch Modes")
                        .default_open(true)
                        .show(ui, |ui| {
                            ui.label(if is_night { "Mode: night" } else { "Mode: day" });
                            let label = if is_night { "Switch to day" } else { "Switch to night" };
                            if ui.button(label).clicked() {
                                actions.push(PanelAction::ToggleLighting);
                            }
                            color_row(ui, "window light", &mut lights.window.color);
                            ui.add(egui::Slider::new(&mut lights.window.intensity, 0.0..=5.0).text("window intensity"));
                            color_row(ui, "background", &mut lights.background);
                        });

                    egui::CollapsingHeader::new("Smooth Zoom").show(ui, |ui| {
                        ui.checkbox(&mut zoom.enabled, "enabled");
                        ui.add(egui::Slider::new(&mut zoom.duration, 0.05..=2.0).text("duration"));
                        ui.add(
                            egui::Slider::new(&mut zoom.speed, 0.0005..=0.01)
                                .logarithmic(true)
                                .text("speed"),
                        );
                        ui.add(egui::Slider::new(&mut zoom.min_distance, 0.5..=20.0).text("min distance"));
                        ui.add(egui::Slider::new(&mut zoom.max_distance, 5.0..=100.0).text("max distance"));
                        if zoom.max_distance < zoom.min_distance {
                            zoom.max_distance = zoom.min_distance;
                        }
                    });

                    egui::CollapsingHeader::new("Camera Focus").show(ui, |ui| {
                        ui.add(egui::Slider::new(&mut focus.duration, 0.1..=3.0).text("duration"));
                        ui.add(egui::Slider::new(&mut focus.fit_offset, 0.5..=3.0).text("fit offset"));
                        ui.label("lock names (comma separated)");
                        if ui.text_edit_singleline(&mut focus.lock_names).changed() {
                            actions.push(PanelAction::LockNamesChanged);
                        }
                        if ui.button("Reset view").clicked() {
                            actions.push(PanelAction::ResetView);
                        }
                    });

                    egui::CollapsingHeader::new("GLTF Animations").show(ui, |ui| {
                        if clip_names.is_empty() {
                            ui.label("No clips in model");
                            return;
                        }
                        let selected = clips
                            .clip
                            .and_then(|i| clip_names.get(i))
                            .map_or("-", String::as_str);
                        egui::ComboBox::from_label("clip")
                            .selected_text(selected)
                            .show_ui(ui, |ui| {
                                for (i, name) in clip_names.iter().enumerate() {
                                    ui.selectable_value(&mut clips.clip, Some(i), name.as_str());
                                }
                            });
                        ui.add(egui::Slider::new(&mut clips.time_scale, 0.1..=3.0).text("speed"));
                        ui.add(egui::Slider::new(&mut clips.cross_fade, 0.0..=1.5).text("crossfade"));
                        egui::ComboBox::from_label("loop mode")
                            .selected_text(clips.loop_mode.label())
                            .show_ui(ui, |ui| {
                                for mode in LoopMode::ALL {
                                    ui.selectable_value(&mut clips.loop_mode, mode, mode.label());
                                }
                            });
                        ui.add(egui::Slider::new(&mut clips.repetitions, -1..=20).text("repetitions"));
                        ui.checkbox(&mut clips.clamp_when_finished, "clamp when finished");
                        ui.horizontal(|ui| {
                            if ui.button("Play").clicked() {
                                actions.push(PanelAction::PlayClip);
                            }
                            if ui.button("Stop").clicked() {
                                actions.push(PanelAction::StopClip);
                            }
                            ui.label(if clip_playing { "playing" } else { "stopped" });
                        });
                    });

                    egui::CollapsingHeader::new("Test Animations").show(ui, |ui| {
                        let selected = test
                            .target
                            .and_then(|t| self.test_targets.iter().find(|(_, id)| *id == t))
                            .map_or("All Children", |(label, _)| label.as_str());
                        egui::ComboBox::from_label("target")
                            .selected_text(selected)
                            .show_ui(ui, |ui| {
                                ui.selectable_value(&mut test.target, None, "All Children");
                                for (label, id) in &self.test_targets {
                                    ui.selectable_value(&mut test.target, Some(*id), label.as_str());
                                }
                            });
                        egui::ComboBox::from_label("type")
                            .selected_text(test.kind.label())
                            .show_ui(ui, |ui| {
                                for kind in TestKind::ALL {
                                    ui.selectable_value(&mut test.kind, kind, kind.label());
                                }
                            });
                        ui.add(egui::Slider::new(&mut test.duration, 0.1..=5.0).text("duration"));
                        ui.add(egui::Slider::new(&mut test.repeat, -1..=20).text("repeat"));
                        egui::ComboBox::from_label("ease")
                            .selected_text(test.ease.name())
                            .show_ui(ui, |ui| {
                                for ease in Ease::ALL {
                                    ui.selectable_value(&mut test.ease, ease, ease.name());
                                }
                            });
                        let mut speed = test.speed;
                        if ui
                            .add(egui::Slider::new(&mut speed, 0.1..=3.0).text("speed"))
                            .changed()
                        {
                            actions.push(PanelAction::TestSpeedChanged(speed));
                        }
                        ui.horizontal(|ui| {
                            if ui.button("Apply").clicked() {
                                actions.push(PanelAction::ApplyTest);
                            }
                            if ui.button("Stop").clicked() {
                                actions.push(PanelAction::StopTest);
                            }
                            ui.label(format!("{tests_running} running"));
                        });
                    });
                });
            });

        actions
    }
}

/// Labels for every mesh node, numbered in traversal order.
pub fn test_target_labels(scene: &Scene) -> Vec<(String, NodeId)> {
    scene
        .mesh_nodes()
        .into_iter()
        .enumerate()
        .filter_map(|(i, id)| {
            let node = scene.node(id)?;
            let name = if node.name.is_empty() { "Mesh" } else { &node.name };
            Some((format!("{i:03} | {name}"), id))
        })
        .collect()
}

/// Draw the hover info box next to the pointer. `pos` is in egui points.
pub fn show_tooltip(ctx: &egui::Context, pos: egui::Pos2, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    egui::Area::new(Id::new("hover-info"))
        .order(Order::Tooltip)
        .interactable(false)
        .fixed_pos(pos + egui::vec2(12.0, 12.0))
        .show(ctx, |ui| {
            egui::Frame::popup(ui.style()).show(ui, |ui| {
                for line in lines {
                    ui.label(egui::RichText::new(line).monospace());
                }
            });
        });
}

/// Full-screen loading cover. Stays for a minimum time, then fades out on the
/// [`Channel::Overlay`] tween.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingOverlay {
    pub progress: f32,
    pub opacity: f32,
    config: LoaderConfig,
    started_at: f32,
    finished: bool,
    fading: bool,
}

impl LoadingOverlay {
    pub fn new(config: LoaderConfig, now: f32) -> Self {
        Self {
            progress: 0.0,
            opacity: 1.0,
            config,
            started_at: now,
            finished: false,
            fading: false,
        }
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.progress = progress.clamp(0.0, 1.0).max(self.progress);
    }

    /// Loading ended, successfully or not.
    pub fn finish(&mut self) {
        self.finished = true;
        self.progress = 1.0;
    }

    /// Once loading is done, schedule the fade for when the minimum display
    /// time runs out.
    pub fn update<E>(&mut self, now: f32, tweener: &mut Tweener<E>) {
        if !self.finished || self.fading {
            return;
        }
        self.fading = true;
        let remaining = (self.config.min_visible_secs - (now - self.started_at)).max(0.0);
        tweener.to(
            Channel::Overlay,
            TweenSpec::scalar(self.opacity, 0.0, self.config.fade_secs, Ease::Power1InOut)
                .with_delay(remaining),
        );
    }

    pub fn is_visible(&self) -> bool {
        !self.fading || self.opacity > 1e-3
    }

    pub fn show(&self, ctx: &egui::Context) {
        if !self.is_visible() {
            return;
        }
        let alpha = (self.opacity.clamp(0.0, 1.0) * 255.0) as u8;
        let screen = ctx.screen_rect();
        ctx.layer_painter(LayerId::new(Order::Foreground, Id::new("loader-cover")))
            .rect_filled(screen, 0.0, Color32::from_rgba_unmultiplied(12, 12, 16, alpha));

        egui::Area::new(Id::new("loader"))
            .order(Order::Foreground)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .interactable(false)
            .show(ctx, |ui| {
                ui.label(
                    egui::RichText::new("Loading…")
                        .heading()
                        .color(Color32::from_white_alpha(alpha)),
                );
                ui.add(
                    egui::ProgressBar::new(self.progress)
                        .desired_width(240.0)
                        .show_percentage(),
                );
            });
    }
}

pub fn screen_descriptor(size: winit::dpi::PhysicalSize<u32>, pixels_per_point: f32) -> ScreenDescriptor {
    ScreenDescriptor {
        size_in_pixels: [size.width, size.height],
        pixels_per_point,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::scene::tests::add_cube;

    fn run_overlay(overlay: &mut LoadingOverlay, tweener: &mut Tweener, from: f32, to: f32) {
        let mut now = from;
        while now < to {
            overlay.update(now, tweener);
            for (channel, value) in tweener.advance(0.05).updates {
                if channel == Channel::Overlay {
                    overlay.opacity = value.x;
                }
            }
            now += 0.05;
        }
    }

    #[test]
    fn overlay_waits_minimum_time_then_fades() {
        let mut tweener: Tweener = Tweener::new();
        let mut overlay = LoadingOverlay::new(LoaderConfig::default(), 0.0);
        overlay.set_progress(0.4);
        overlay.finish();

        run_overlay(&mut overlay, &mut tweener, 0.0, 1.9);
        assert!(overlay.is_visible());
        assert_eq!(overlay.opacity, 1.0);

        run_overlay(&mut overlay, &mut tweener, 1.9, 3.0);
        assert!(!overlay.is_visible());
    }

    #[test]
    fn overlay_stays_until_load_finishes() {
        let mut tweener: Tweener = Tweener::new();
        let mut overlay = LoadingOverlay::new(LoaderConfig::default(), 0.0);
        run_overlay(&mut overlay, &mut tweener, 0.0, 5.0);
        assert!(overlay.is_visible());
        assert!(tweener.is_empty());
    }

    #[test]
    fn progress_never_goes_backwards() {
        let mut overlay = LoadingOverlay::new(LoaderConfig::default(), 0.0);
        overlay.set_progress(0.6);
        overlay.set_progress(0.2);
        assert_eq!(overlay.progress, 0.6);
        overlay.set_progress(7.0);
        assert_eq!(overlay.progress, 1.0);
    }

    #[test]
    fn target_labels_are_numbered() {
        let mut scene = Scene::new();
        let root = scene.add_node("Room", Transform::identity(), None);
        add_cube(&mut scene, "Desk", Vec3::ZERO, Some(root));
        add_cube(&mut scene, "", Vec3::X, Some(root));
        let labels: Vec<String> = test_target_labels(&scene).into_iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["000 | Desk", "001 | Mesh"]);
    }
}
