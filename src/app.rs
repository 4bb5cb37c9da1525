//! Window event loop: routes input to picking, interaction and the camera rig,
//! advances tweens and draws each frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec2;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use winit::dpi::PhysicalSize;
use winit::error::EventLoopError;
use winit::event::{ElementState, Event, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::CursorIcon;

use crate::assets::{spawn_load, LoadEvent, LoadedModel};
use crate::camera::CameraRig;
use crate::clips::ClipMixer;
use crate::config::{HoverParams, SceneConfig, ScreenConfig, TargetEntry};
use crate::debug_ui::{
    screen_descriptor, show_tooltip, DebugPanel, LoadingOverlay, PanelAction, PanelState, UiManager,
};
use crate::effects::{apply_hover_group, apply_to_scene, play_tracker_bounce, TestAnimator};
use crate::interaction::{tooltip_lines, ClickAction, Cursor, HoverEvent, InteractionState};
use crate::lamp::Lamp;
use crate::lighting::{LightRig, LightingModes};
use crate::links::{open_link, LinkOpener, SystemOpener};
use crate::picking::{normalize_wheel, pointer_to_ndc, CanvasRect, Hit, Raycaster, WheelDelta};
use crate::registry::{Purpose, TargetRegistry};
use crate::renderer::{FrameView, Renderer, RendererError};
use crate::scene::{NodeId, Scene};
use crate::screen::check_screen;
use crate::tween::{Channel, Tweener};

const DOUBLE_CLICK_TIME: Duration = Duration::from_millis(300);
const DOUBLE_CLICK_DISTANCE: f32 = 6.0;
/// Keyboard orbit speed in radians per second.
const NUDGE_SPEED: f32 = 1.5;
/// Frames longer than this are treated as a stall, not animation time.
const MAX_FRAME_SECS: f32 = 0.1;
/// Delay before the lamp follows the room into night.
const NIGHT_LAMP_DELAY: f32 = 0.25;

/// Events scheduled on the tween clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    LampGlow(bool),
}

#[derive(Debug, Default)]
struct KeyboardState {
    w: bool,
    a: bool,
    s: bool,
    d: bool,
}

impl KeyboardState {
    /// Orbit angles for the held keys over `dt` seconds.
    fn orbit_delta(&self, dt: f32) -> (f32, f32) {
        let step = NUDGE_SPEED * dt;
        let mut theta = 0.0;
        let mut phi = 0.0;
        if self.a {
            theta += step;
        }
        if self.d {
            theta -= step;
        }
        if self.w {
            phi += step;
        }
        if self.s {
            phi -= step;
        }
        (theta, phi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Drag {
    #[default]
    None,
    Rotate,
    Pan,
}

/// Detects two primary presses close together in time and space.
#[derive(Debug, Default)]
struct ClickTracker {
    last: Option<(Instant, Vec2)>,
}

impl ClickTracker {
    /// Register a press. Returns true when it completes a double click.
    fn press(&mut self, at: Instant, position: Vec2) -> bool {
        let double = self.last.is_some_and(|(time, pos)| {
            at.saturating_duration_since(time) <= DOUBLE_CLICK_TIME
                && pos.distance(position) <= DOUBLE_CLICK_DISTANCE
        });
        self.last = if double { None } else { Some((at, position)) };
        double
    }
}

pub struct App {
    renderer: Renderer,
    ui: UiManager,
    panel: DebugPanel,
    overlay: LoadingOverlay,
    scene: Scene,
    targets: Vec<TargetEntry>,
    registry: TargetRegistry,
    interaction: InteractionState,
    rig: CameraRig,
    tweener: Tweener<Deferred>,
    lights: LightRig,
    modes: LightingModes,
    lamp: Lamp,
    tests: TestAnimator,
    mixer: ClipMixer,
    hover: HoverParams,
    screen: ScreenConfig,
    opener: Box<dyn LinkOpener>,
    loader: Option<UnboundedReceiver<LoadEvent>>,
    started: Instant,
    last_frame: Instant,
    cursor: Option<Vec2>,
    inspected: Option<NodeId>,
    cursor_state: Cursor,
    applied_cursor: Option<Cursor>,
    drag: Drag,
    clicks: ClickTracker,
    keys: KeyboardState,
}

impl App {
    /// Open the window and start loading the model in the background.
    pub async fn new(event_loop: &EventLoop<()>, config: SceneConfig) -> Result<Self, RendererError> {
        let renderer = Renderer::new(event_loop, &config.window).await?;
        let ui = UiManager::new(renderer.device(), renderer.surface_format(), renderer.window());

        let size = renderer.size();
        let aspect = size.width as f32 / size.height.max(1) as f32;
        let rig = CameraRig::new(&config.camera, config.zoom, config.focus.clone(), aspect);

        let modes = LightingModes::new(&config.lighting);
        let lights = LightRig::from_preset(modes.preset(modes.is_night), &config.lighting.window_light);

        info!("Loading {}", config.model_path.display());
        let loader = spawn_load(&Handle::current(), config.model_path.clone());
        let now = Instant::now();

        Ok(Self {
            renderer,
            ui,
            panel: DebugPanel::new(),
            overlay: LoadingOverlay::new(config.loader, 0.0),
            scene: Scene::new(),
            targets: config.targets,
            registry: TargetRegistry::default(),
            interaction: InteractionState::default(),
            rig,
            tweener: Tweener::new(),
            lights,
            modes,
            lamp: Lamp::new(config.lamp),
            tests: TestAnimator::new(),
            mixer: ClipMixer::new(Vec::new()),
            hover: config.hover,
            screen: config.screen,
            opener: Box::new(SystemOpener::new(Handle::current())),
            loader: Some(loader),
            started: now,
            last_frame: now,
            cursor: None,
            inspected: None,
            cursor_state: Cursor::Default,
            applied_cursor: None,
            drag: Drag::None,
            clicks: ClickTracker::default(),
            keys: KeyboardState::default(),
        })
    }

    pub fn run(mut self, event_loop: EventLoop<()>) -> Result<(), EventLoopError> {
        event_loop.run(move |event, target| {
            target.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { window_id, event } if window_id == self.renderer.window().id() => {
                    self.handle_window_event(event, target);
                }
                Event::AboutToWait => {
                    self.renderer.window().request_redraw();
                }
                _ => {}
            }
        })
    }

    fn handle_window_event(&mut self, event: WindowEvent, target: &EventLoopWindowTarget<()>) {
        let window = Arc::clone(self.renderer.window());
        let consumed = self.ui.handle_event(&window, &event);

        match event {
            WindowEvent::CloseRequested => target.exit(),
            WindowEvent::Resized(physical_size) => self.resize(physical_size),
            WindowEvent::RedrawRequested => self.update_and_render(),
            WindowEvent::CursorMoved { position, .. } => {
                self.on_cursor_moved(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                self.inspected = None;
                self.drag = Drag::None;
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if state == ElementState::Released {
                    self.drag = Drag::None;
                } else if !consumed && !self.ui.wants_pointer() {
                    self.on_mouse_press(button);
                }
            }
            WindowEvent::MouseWheel { delta, .. } if !consumed => self.on_wheel(delta),
            WindowEvent::KeyboardInput { event, .. } if !consumed => {
                self.handle_keyboard_input(event, target);
            }
            _ => {}
        }
    }

    fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.renderer.resize(new_size);
        self.rig.set_aspect(new_size.width, new_size.height);
    }

    fn handle_keyboard_input(&mut self, event: KeyEvent, target: &EventLoopWindowTarget<()>) {
        if let PhysicalKey::Code(keycode) = event.physical_key {
            let is_pressed = event.state == ElementState::Pressed;
            let first_press = is_pressed && !event.repeat;
            match keycode {
                KeyCode::KeyW => self.keys.w = is_pressed,
                KeyCode::KeyA => self.keys.a = is_pressed,
                KeyCode::KeyS => self.keys.s = is_pressed,
                KeyCode::KeyD => self.keys.d = is_pressed,
                KeyCode::KeyN if first_press => self.toggle_lighting(),
                KeyCode::F1 if first_press => self.panel.visible = !self.panel.visible,
                KeyCode::Escape if first_press => target.exit(),
                _ => {}
            }
        }
    }

    fn canvas(&self) -> CanvasRect {
        let size = self.renderer.size();
        CanvasRect::from_size(size.width, size.height)
    }

    /// Hits under `cursor` for one purpose, nearest first.
    fn pick(&self, cursor: Vec2, purpose: Purpose) -> Vec<Hit> {
        let ndc = pointer_to_ndc(cursor, &self.canvas());
        let ray = Raycaster::camera_ray(&self.rig.camera, self.rig.target(), ndc);
        Raycaster::new(&self.scene).intersect(&ray, self.registry.candidates(purpose))
    }

    fn on_cursor_moved(&mut self, position: Vec2) {
        if let Some(previous) = self.cursor.replace(position) {
            let delta = position - previous;
            let height = self.renderer.size().height as f32;
            match self.drag {
                Drag::Rotate => self.rig.controls.rotate_by_pixels(delta, height),
                Drag::Pan => self.rig.controls.pan_by_pixels(delta, &self.rig.camera, height),
                Drag::None => {}
            }
        }

        if self.ui.wants_pointer() {
            self.inspected = None;
            return;
        }

        let selectable = self.pick(position, Purpose::Selectable);
        let raycast = self.pick(position, Purpose::Raycast);
        let update = self
            .interaction
            .on_hover(&self.scene, &self.registry, &selectable, &raycast);
        self.inspected = update.inspected;
        self.cursor_state = update.cursor;

        for event in update.events {
            match event {
                HoverEvent::GroupEntered(index) | HoverEvent::GroupLeft(index) => {
                    let active = matches!(event, HoverEvent::GroupEntered(_));
                    if let Some(group) = self.registry.hover_groups.get(index) {
                        debug!("Hover group {} {}", group.id, if active { "entered" } else { "left" });
                        apply_hover_group(&self.scene, &mut self.tweener, &group.nodes, active, &self.hover);
                    }
                }
                HoverEvent::TrackerLeft(node) => {
                    play_tracker_bounce(&self.scene, &mut self.tweener, node, false, &self.hover);
                }
                HoverEvent::TrackerEntered(node) => {
                    play_tracker_bounce(&self.scene, &mut self.tweener, node, true, &self.hover);
                }
            }
        }
    }

    fn on_mouse_press(&mut self, button: MouseButton) {
        match button {
            MouseButton::Left => {
                self.drag = Drag::Rotate;
                if let Some(position) = self.cursor {
                    self.on_primary_press(position);
                }
            }
            MouseButton::Right => self.drag = Drag::Pan,
            _ => {}
        }
    }

    fn on_primary_press(&mut self, position: Vec2) {
        let hits = self.pick(position, Purpose::Selectable);
        if let Some(hit) = hits.first() {
            let name = self.scene.node(hit.node).map_or("", |n| n.name.as_str());
            debug!("Pressed {name:?} at {}", hit.point);
        }

        match self.interaction.on_click(&self.scene, &self.registry, &hits) {
            ClickAction::OpenLink { id, url } => {
                info!("Opening {id} link");
                open_link(self.opener.as_mut(), &url);
            }
            ClickAction::ToggleLamp => {
                self.tweener.kill(Channel::LampSwitch);
                let on = self.lamp.toggle(&mut self.scene, &mut self.tweener);
                info!("Lamp switched {}", if on { "on" } else { "off" });
            }
            ClickAction::None => {}
        }

        if self.clicks.press(Instant::now(), position) {
            if let Some(hit) = hits.first() {
                self.rig.focus_on(&self.scene, hit.node, &mut self.tweener);
            }
        }
    }

    fn on_wheel(&mut self, delta: MouseScrollDelta) {
        let height = self.renderer.size().height as f32;
        let delta = normalize_wheel(WheelDelta::from(delta), height);
        self.rig.smooth_zoom(delta, &mut self.tweener);
    }

    fn toggle_lighting(&mut self) {
        let night = self.modes.toggle();
        self.modes.apply(night, &self.lights, &mut self.tweener);
        if self.lamp.target.is_none() {
            return;
        }
        // The switch state changes now; only the glow waits.
        self.lamp.on = night;
        let delay = if night { NIGHT_LAMP_DELAY } else { 0.0 };
        self.tweener
            .delayed_call(Channel::LampSwitch, delay, Deferred::LampGlow(night));
    }

    fn poll_loader(&mut self) {
        let Some(receiver) = self.loader.as_mut() else {
            return;
        };

        let mut events = Vec::new();
        let mut closed = false;
        loop {
            match receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        for event in events {
            match event {
                LoadEvent::Progress(fraction) => self.overlay.set_progress(fraction),
                LoadEvent::Loaded(model) => {
                    self.install_model(*model);
                    closed = true;
                }
                LoadEvent::Failed(err) => {
                    error!("Failed to load model: {err}");
                    closed = true;
                }
            }
        }

        if closed {
            self.loader = None;
            self.overlay.finish();
        }
    }

    fn install_model(&mut self, model: LoadedModel) {
        let LoadedModel { scene, clips } = model;
        if scene.is_empty() {
            warn!("Model contains no nodes");
        }
        self.scene = scene;
        self.registry = TargetRegistry::resolve(&self.scene, &self.targets);
        self.interaction = InteractionState::new(&self.registry);
        self.lamp.attach(&mut self.scene, self.registry.lamp);
        self.rig.update_lock_set();
        self.mixer = ClipMixer::new(clips);
        self.panel.set_test_targets(&self.scene);
        self.renderer.upload_scene(&self.scene);

        if self.modes.is_night {
            self.lamp.switch(&mut self.scene, &mut self.tweener, true);
        }
        check_screen(&self.scene, &self.screen.node);
        info!(
            "Model ready: {} nodes, {} clips",
            self.scene.nodes.len(),
            self.mixer.clips.len()
        );
    }

    fn apply_channel(&mut self, channel: Channel, value: glam::Vec4) {
        if apply_to_scene(&mut self.scene, channel, value) || self.rig.apply(channel, value) {
            return;
        }
        match channel {
            Channel::Lighting(light) => self.lights.apply(light, value),
            Channel::Overlay => self.overlay.opacity = value.x,
            _ => {}
        }
    }

    fn handle_panel_action(&mut self, action: PanelAction) {
        match action {
            PanelAction::ToggleLighting => self.toggle_lighting(),
            PanelAction::ResetView => self.rig.reset_view(&mut self.tweener),
            PanelAction::LockNamesChanged => self.rig.update_lock_set(),
            PanelAction::PlayClip => self.mixer.play(&mut self.scene),
            PanelAction::StopClip => self.mixer.stop(&mut self.scene),
            PanelAction::ApplyTest => self.tests.apply(&self.scene, &mut self.tweener),
            PanelAction::StopTest => self.tests.stop(&mut self.scene, &mut self.tweener),
            PanelAction::TestSpeedChanged(speed) => self.tests.set_speed(&mut self.tweener, speed),
        }
    }

    fn update_cursor_icon(&mut self) {
        if self.ui.wants_pointer() {
            // egui owns the cursor while over the panel.
            self.applied_cursor = None;
            return;
        }
        if self.applied_cursor == Some(self.cursor_state) {
            return;
        }
        let icon = match self.cursor_state {
            Cursor::Clickable => CursorIcon::Pointer,
            Cursor::Default => CursorIcon::Default,
        };
        self.renderer.window().set_cursor_icon(icon);
        self.applied_cursor = Some(self.cursor_state);
    }

    fn update_and_render(&mut self) {
        let now = Instant::now();
        let dt = now
            .duration_since(self.last_frame)
            .as_secs_f32()
            .min(MAX_FRAME_SECS);
        self.last_frame = now;

        self.poll_loader();

        let (theta, phi) = self.keys.orbit_delta(dt);
        if theta != 0.0 || phi != 0.0 {
            self.rig.controls.rotate_by_angles(theta, phi);
        }

        self.overlay
            .update(now.duration_since(self.started).as_secs_f32(), &mut self.tweener);
        let frame = self.tweener.advance(dt);
        for (channel, value) in frame.updates {
            self.apply_channel(channel, value);
        }
        for event in frame.fired {
            match event {
                Deferred::LampGlow(on) => self.lamp.set_glow(&mut self.scene, &mut self.tweener, on),
            }
        }

        self.rig.update();
        self.mixer.update(&mut self.scene, dt);
        self.update_cursor_icon();
        self.render();
    }

    fn render(&mut self) {
        let window = Arc::clone(self.renderer.window());
        let pixels_per_point = self.ui.pixels_per_point();
        let descriptor = screen_descriptor(self.renderer.size(), pixels_per_point);

        let tooltip = match (self.inspected, self.cursor) {
            (Some(node), Some(cursor)) => {
                let pos = cursor / pixels_per_point;
                Some((egui::pos2(pos.x, pos.y), tooltip_lines(&self.scene, node)))
            }
            _ => None,
        };
        let clip_names: Vec<String> = self.mixer.clip_names().map(str::to_owned).collect();
        let lights = self.lights.clone();
        let view = FrameView {
            view_proj: self.rig.view_proj(),
            camera_pos: self.rig.camera.position,
            lights: &lights,
            lamp: self.lamp.light(&self.scene),
        };

        let mut actions = Vec::new();
        let is_night = self.modes.is_night;
        let clip_playing = self.mixer.is_playing();
        let ui = &mut self.ui;
        let panel = &mut self.panel;
        let overlay = &self.overlay;
        let state = PanelState {
            lights: &mut self.lights,
            is_night,
            zoom: &mut self.rig.zoom,
            focus: &mut self.rig.focus,
            clips: &mut self.mixer.params,
            clip_names: &clip_names,
            clip_playing,
            tests_running: self.tests.running(),
            test: &mut self.tests.params,
        };

        self.renderer.render(&self.scene, &view, |device, queue, encoder, target| {
            ui.render(device, queue, encoder, target, descriptor, &window, |ctx| {
                actions = panel.show(ctx, state);
                if let Some((pos, lines)) = &tooltip {
                    show_tooltip(ctx, *pos, lines);
                }
                overlay.show(ctx);
            });
        });

        for action in actions {
            self.handle_panel_action(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn double_click_needs_close_presses() {
        let start = Instant::now();
        let mut clicks = ClickTracker::default();
        assert!(!clicks.press(start, Vec2::new(100.0, 100.0)));
        assert!(clicks.press(start + Duration::from_millis(200), Vec2::new(103.0, 102.0)));
    }

    #[test]
    fn slow_or_distant_presses_are_single() {
        let start = Instant::now();
        let mut clicks = ClickTracker::default();
        clicks.press(start, Vec2::ZERO);
        assert!(!clicks.press(start + Duration::from_millis(450), Vec2::ZERO));
        assert!(!clicks.press(start + Duration::from_millis(500), Vec2::new(20.0, 0.0)));
    }

    #[test]
    fn third_press_starts_a_new_pair() {
        let start = Instant::now();
        let mut clicks = ClickTracker::default();
        clicks.press(start, Vec2::ZERO);
        assert!(clicks.press(start + Duration::from_millis(100), Vec2::ZERO));
        assert!(!clicks.press(start + Duration::from_millis(200), Vec2::ZERO));
    }

    #[test]
    fn held_keys_nudge_orbit() {
        let keys = KeyboardState {
            w: true,
            d: true,
            ..KeyboardState::default()
        };
        let (theta, phi) = keys.orbit_delta(0.5);
        assert_relative_eq!(theta, -0.75);
        assert_relative_eq!(phi, 0.75);

        let (theta, phi) = KeyboardState::default().orbit_delta(1.0);
        assert_eq!((theta, phi), (0.0, 0.0));
    }
}
