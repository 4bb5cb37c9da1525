//! Camera rig.
//!
//! A perspective camera orbiting a target point, with damped drag controls, an
//! exponential wheel zoom and a "fit this object" focus move. Zoom and focus are
//! expressed as tweens on the [`Channel::CameraPosition`],
//! [`Channel::OrbitTarget`] and [`Channel::ZoomDistance`] channels; the rig
//! applies their values in [`CameraRig::apply`].

use std::collections::HashSet;
use std::f32::consts::{PI, TAU};

use glam::{Mat4, Vec2, Vec3, Vec4};
use log::debug;

use crate::config::{CameraConfig, FocusParams, ZoomParams, parse_lock_names};
use crate::math::Ray;
use crate::scene::{NodeId, Scene};
use crate::tween::{Channel, Ease, TweenSpec, Tweener};

const RIG_CHANNELS: [Channel; 3] = [
    Channel::CameraPosition,
    Channel::OrbitTarget,
    Channel::ZoomDistance,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveCamera {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
}

impl PerspectiveCamera {
    pub fn view(&self, target: Vec3) -> Mat4 {
        Mat4::look_at_rh(self.position, target, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self, target: Vec3) -> Mat4 {
        self.projection() * self.view(target)
    }

    /// Ray from the eye through a point given in normalized device coordinates.
    pub fn ray_through(&self, target: Vec3, ndc: Vec2) -> Ray {
        let inverse = self.view_proj(target).inverse();
        let far = inverse.project_point3(Vec3::new(ndc.x, ndc.y, 1.0));
        Ray::new(self.position, far - self.position)
    }
}

/// Damped orbit/pan around `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitControls {
    pub target: Vec3,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub pan_speed: f32,
    theta_delta: f32,
    phi_delta: f32,
    pan_offset: Vec3,
}

impl OrbitControls {
    const EPS: f32 = 1e-4;

    pub fn new(target: Vec3, config: &CameraConfig) -> Self {
        Self {
            target,
            enable_damping: true,
            damping_factor: config.damping_factor,
            rotate_speed: config.rotate_speed,
            pan_speed: config.pan_speed,
            theta_delta: 0.0,
            phi_delta: 0.0,
            pan_offset: Vec3::ZERO,
        }
    }

    /// Rotate by a pointer drag measured in pixels.
    pub fn rotate_by_pixels(&mut self, delta: Vec2, viewport_height: f32) {
        let h = viewport_height.max(1.0);
        self.theta_delta -= TAU * delta.x / h * self.rotate_speed;
        self.phi_delta -= TAU * delta.y / h * self.rotate_speed;
    }

    pub fn rotate_by_angles(&mut self, theta: f32, phi: f32) {
        self.theta_delta += theta;
        self.phi_delta += phi;
    }

    /// Pan by a pointer drag so that the target tracks the cursor.
    pub fn pan_by_pixels(&mut self, delta: Vec2, camera: &PerspectiveCamera, viewport_height: f32) {
        let offset = camera.position - self.target;
        let distance = offset.length() * (camera.fov.to_radians() / 2.0).tan();
        let h = viewport_height.max(1.0);
        let forward = -offset.normalize_or_zero();
        let right = forward.cross(Vec3::Y).normalize_or_zero();
        let up = right.cross(forward);
        let scale = 2.0 * distance / h * self.pan_speed;
        self.pan_offset += -right * delta.x * scale + up * delta.y * scale;
    }

    /// Apply pending rotation and pan to the camera.
    pub fn update(&mut self, camera: &mut PerspectiveCamera) {
        let offset = camera.position - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }

        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        let factor = if self.enable_damping {
            self.damping_factor
        } else {
            1.0
        };
        theta += self.theta_delta * factor;
        phi = (phi + self.phi_delta * factor).clamp(Self::EPS, PI - Self::EPS);
        self.target += self.pan_offset * factor;

        let sin_phi = phi.sin();
        let new_offset = Vec3::new(
            radius * sin_phi * theta.sin(),
            radius * phi.cos(),
            radius * sin_phi * theta.cos(),
        );
        camera.position = self.target + new_offset;

        if self.enable_damping {
            self.theta_delta *= 1.0 - self.damping_factor;
            self.phi_delta *= 1.0 - self.damping_factor;
            self.pan_offset *= 1.0 - self.damping_factor;
        } else {
            self.theta_delta = 0.0;
            self.phi_delta = 0.0;
            self.pan_offset = Vec3::ZERO;
        }
    }
}

/// Camera distance that fits a sphere of `radius` in the vertical field of
/// view. Degenerate radii fall back to 1 so the result stays finite and positive.
pub fn fit_distance(radius: f32, fov_degrees: f32, fit_offset: f32) -> f32 {
    let radius = if radius.is_finite() && radius > 0.0 {
        radius
    } else {
        1.0
    };
    let half_fov = (fov_degrees * 0.5).to_radians();
    radius * fit_offset / half_fov.tan()
}

/// Distance after one wheel step: exponential in the delta so zoom speed feels
/// the same near and far, clamped to the configured range. Crossed limits are
/// reordered.
pub fn zoomed_distance(current: f32, delta: f32, params: &ZoomParams) -> f32 {
    let scale = (delta * params.speed).exp();
    let lo = params.min_distance.min(params.max_distance);
    let hi = params.min_distance.max(params.max_distance);
    if lo.is_nan() {
        return current;
    }
    (current * scale).clamp(lo, hi)
}

/// The camera, its orbit controls and the zoom/focus state machine.
#[derive(Debug, Clone)]
pub struct CameraRig {
    pub camera: PerspectiveCamera,
    pub controls: OrbitControls,
    pub zoom: ZoomParams,
    pub focus: FocusParams,
    lock_set: HashSet<String>,
    initial_position: Vec3,
    initial_target: Vec3,
}

impl CameraRig {
    pub fn new(config: &CameraConfig, zoom: ZoomParams, focus: FocusParams, aspect: f32) -> Self {
        let position = Vec3::from(config.position);
        let target = Vec3::from(config.target);
        let mut rig = Self {
            camera: PerspectiveCamera {
                fov: config.fov_degrees,
                aspect,
                near: config.near,
                far: config.far,
                position,
            },
            controls: OrbitControls::new(target, config),
            zoom,
            focus,
            lock_set: HashSet::new(),
            initial_position: position,
            initial_target: target,
        };
        rig.update_lock_set();
        rig
    }

    pub fn target(&self) -> Vec3 {
        self.controls.target
    }

    pub fn distance(&self) -> f32 {
        (self.camera.position - self.controls.target).length()
    }

    pub fn view_proj(&self) -> Mat4 {
        self.camera.view_proj(self.controls.target)
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.camera.aspect = width as f32 / height as f32;
        }
    }

    /// Re-read `focus.lock_names`.
    pub fn update_lock_set(&mut self) {
        self.lock_set = parse_lock_names(&self.focus.lock_names).into_iter().collect();
    }

    /// Whether `node` or one of its ancestors is named in the lock set.
    pub fn is_locked(&self, scene: &Scene, node: NodeId) -> bool {
        scene
            .ancestors(node)
            .filter_map(|n| scene.node(n))
            .any(|n| self.lock_set.contains(&n.name))
    }

    /// Move the camera so that `node` fills the view, keeping the current
    /// viewing direction. Returns false when skipped.
    pub fn focus_on<E>(&mut self, scene: &Scene, node: NodeId, tweener: &mut Tweener<E>) -> bool {
        if scene.node(node).is_none() || self.is_locked(scene, node) {
            return false;
        }

        let bounds = scene.world_bounds(node);
        let center = if bounds.is_empty() {
            scene.world_position(node)
        } else {
            bounds.center()
        };
        let radius = bounds.size().max_element() * 0.5;
        let distance = fit_distance(radius, self.camera.fov, self.focus.fit_offset);

        let mut direction = (self.camera.position - self.controls.target).normalize_or_zero();
        if direction == Vec3::ZERO {
            direction = Vec3::Z;
        }
        let new_position = center + direction * distance;
        debug!(
            "Focusing node {} at {center:?}, distance {distance:.2}",
            node.0
        );

        tweener.kill(Channel::ZoomDistance);
        tweener.to(
            Channel::CameraPosition,
            TweenSpec::new(
                self.camera.position.extend(0.0),
                new_position.extend(0.0),
                self.focus.duration,
                Ease::Power2Out,
            ),
        );
        tweener.to(
            Channel::OrbitTarget,
            TweenSpec::new(
                self.controls.target.extend(0.0),
                center.extend(0.0),
                self.focus.duration,
                Ease::Power2Out,
            ),
        );
        true
    }

    /// Start a smooth zoom for a wheel delta in pixels (positive zooms out).
    pub fn smooth_zoom<E>(&mut self, delta: f32, tweener: &mut Tweener<E>) -> bool {
        if !self.zoom.enabled || delta == 0.0 {
            return false;
        }
        for channel in RIG_CHANNELS {
            tweener.kill(channel);
        }

        let distance = self.distance();
        let target_distance = zoomed_distance(distance, delta, &self.zoom);
        tweener.to(
            Channel::ZoomDistance,
            TweenSpec::scalar(distance, target_distance, self.zoom.duration, Ease::ExpoOut),
        );
        true
    }

    /// Tween back to the configured start view.
    pub fn reset_view<E>(&mut self, tweener: &mut Tweener<E>) {
        for channel in RIG_CHANNELS {
            tweener.kill(channel);
        }
        tweener.to(
            Channel::CameraPosition,
            TweenSpec::new(
                self.camera.position.extend(0.0),
                self.initial_position.extend(0.0),
                0.8,
                Ease::Power2Out,
            ),
        );
        tweener.to(
            Channel::OrbitTarget,
            TweenSpec::new(
                self.controls.target.extend(0.0),
                self.initial_target.extend(0.0),
                0.8,
                Ease::Power2Out,
            ),
        );
    }

    /// Apply a tween value on one of the rig's channels. Returns false for
    /// channels the rig doesn't own.
    pub fn apply(&mut self, channel: Channel, value: Vec4) -> bool {
        match channel {
            Channel::CameraPosition => self.camera.position = value.truncate(),
            Channel::OrbitTarget => self.controls.target = value.truncate(),
            Channel::ZoomDistance => {
                // The orbit may have turned since the zoom began, so follow the
                // current direction instead of a straight line.
                let direction = (self.camera.position - self.controls.target).normalize_or_zero();
                if direction != Vec3::ZERO {
                    self.camera.position = self.controls.target + direction * value.x;
                }
            }
            _ => return false,
        }
        true
    }

    /// Per-frame orbit update.
    pub fn update(&mut self) {
        self.controls.update(&mut self.camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::tests::add_cube;
    use crate::scene::Scene;
    use approx::assert_relative_eq;

    fn rig() -> CameraRig {
        CameraRig::new(
            &CameraConfig::default(),
            ZoomParams::default(),
            FocusParams::default(),
            16.0 / 10.0,
        )
    }

    fn settle(rig: &mut CameraRig, tweener: &mut Tweener) {
        for _ in 0..200 {
            for (channel, value) in tweener.advance(0.01).updates {
                rig.apply(channel, value);
            }
        }
    }

    #[test]
    fn zero_wheel_delta_keeps_distance() {
        let mut rig = rig();
        let mut tweener: Tweener = Tweener::new();
        let before = rig.distance();
        assert_relative_eq!(zoomed_distance(before, 0.0, &rig.zoom), before);
        assert!(!rig.smooth_zoom(0.0, &mut tweener));
        settle(&mut rig, &mut tweener);
        assert_relative_eq!(rig.distance(), before, epsilon = 1e-4);
    }

    #[test]
    fn zoom_stays_within_limits_for_any_sequence() {
        let mut rig = rig();
        let mut tweener: Tweener = Tweener::new();
        let deltas = [
            1.0e6, -3.0, 250.0, -1.0e6, -1.0e9, 40.0, 1.0e9, -120.0, 0.5, f32::MAX,
        ];
        for (i, delta) in deltas.into_iter().enumerate() {
            rig.smooth_zoom(delta, &mut tweener);
            // Interrupt some zooms halfway, let others finish.
            let steps = if i % 2 == 0 { 30 } else { 200 };
            for _ in 0..steps {
                for (channel, value) in tweener.advance(0.01).updates {
                    rig.apply(channel, value);
                }
                let d = rig.distance();
                assert!(
                    d >= rig.zoom.min_distance - 1e-3 && d <= rig.zoom.max_distance + 1e-3,
                    "distance {d} escaped the zoom range"
                );
            }
        }
    }

    #[test]
    fn inverted_limits_do_not_panic() {
        let params = ZoomParams {
            min_distance: 50.0,
            max_distance: 5.0,
            ..ZoomParams::default()
        };
        assert_relative_eq!(zoomed_distance(10.0, 1.0e4, &params), 50.0);
        assert_relative_eq!(zoomed_distance(10.0, -1.0e4, &params), 5.0);

        let nan = ZoomParams {
            min_distance: f32::NAN,
            max_distance: f32::NAN,
            ..ZoomParams::default()
        };
        assert_relative_eq!(zoomed_distance(10.0, 100.0, &nan), 10.0);
    }

    #[test]
    fn loaded_inverted_zoom_section_zooms_within_range() {
        let cfg = crate::config::SceneConfig::from_toml("[zoom]\nmin_distance = 50.0\nmax_distance = 5.0")
            .unwrap();
        let mut rig = CameraRig::new(&cfg.camera, cfg.zoom, cfg.focus.clone(), 1.6);
        let mut tweener: Tweener = Tweener::new();
        assert!(rig.smooth_zoom(100.0, &mut tweener));
        settle(&mut rig, &mut tweener);
        assert!(rig.distance() <= 5.0 + 1e-3);
    }

    #[test]
    fn zoom_is_exponential() {
        let params = ZoomParams {
            min_distance: 0.0,
            max_distance: f32::MAX,
            ..ZoomParams::default()
        };
        let a = zoomed_distance(10.0, 100.0, &params);
        let b = zoomed_distance(a, 100.0, &params);
        assert_relative_eq!(a / 10.0, b / a, epsilon = 1e-5);
    }

    #[test]
    fn zoom_follows_current_direction() {
        let mut rig = rig();
        let mut tweener: Tweener = Tweener::new();
        rig.smooth_zoom(-200.0, &mut tweener);
        for (channel, value) in tweener.advance(0.1).updates {
            rig.apply(channel, value);
        }
        // Turn the camera mid-zoom; the zoom keeps the new direction.
        rig.controls.rotate_by_angles(1.0, 0.0);
        rig.controls.enable_damping = false;
        rig.update();
        let turned = (rig.camera.position - rig.target()).normalize();
        settle(&mut rig, &mut tweener);
        let after = (rig.camera.position - rig.target()).normalize();
        assert_relative_eq!(turned.dot(after), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn focus_on_zero_size_target_gives_finite_distance() {
        let mut scene = Scene::new();
        let empty = scene.add_node("marker", crate::math::Transform::identity(), None);
        let mut rig = rig();
        let mut tweener: Tweener = Tweener::new();

        assert!(rig.focus_on(&scene, empty, &mut tweener));
        settle(&mut rig, &mut tweener);
        let d = rig.distance();
        assert!(d.is_finite() && d > 0.0);
        assert_relative_eq!(d, fit_distance(0.0, 22.0, 1.0), epsilon = 1e-3);
        assert_relative_eq!(fit_distance(f32::NAN, 22.0, 1.0), fit_distance(1.0, 22.0, 1.0));
    }

    #[test]
    fn focus_centres_on_box_and_keeps_direction() {
        let mut scene = Scene::new();
        let cube = add_cube(&mut scene, "Monitor", Vec3::new(1.0, 2.0, 3.0), None);
        let mut rig = rig();
        let mut tweener: Tweener = Tweener::new();
        let direction = (rig.camera.position - rig.target()).normalize();

        assert!(rig.focus_on(&scene, cube, &mut tweener));
        settle(&mut rig, &mut tweener);

        assert_relative_eq!(rig.target().x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(rig.target().z, 3.0, epsilon = 1e-4);
        let expected = fit_distance(0.5, 22.0, 1.0);
        assert_relative_eq!(rig.distance(), expected, epsilon = 1e-3);
        let after = (rig.camera.position - rig.target()).normalize();
        assert_relative_eq!(after.dot(direction), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn locked_ancestors_block_focus() {
        let mut scene = Scene::new();
        let desk = scene.add_node("Desk", crate::math::Transform::identity(), None);
        let drawer = add_cube(&mut scene, "Drawer", Vec3::ZERO, Some(desk));
        let mut rig = rig();
        rig.focus.lock_names = "Shelf, Desk".to_string();
        rig.update_lock_set();
        let mut tweener: Tweener = Tweener::new();

        assert!(rig.is_locked(&scene, drawer));
        assert!(!rig.focus_on(&scene, drawer, &mut tweener));
        assert!(tweener.is_empty());
    }

    #[test]
    fn new_focus_replaces_in_flight_one() {
        let mut scene = Scene::new();
        let a = add_cube(&mut scene, "a", Vec3::new(-3.0, 0.0, 0.0), None);
        let b = add_cube(&mut scene, "b", Vec3::new(3.0, 0.0, 0.0), None);
        let mut rig = rig();
        let mut tweener: Tweener = Tweener::new();

        rig.focus_on(&scene, a, &mut tweener);
        tweener.advance(0.1);
        rig.focus_on(&scene, b, &mut tweener);
        assert_eq!(tweener.len(), 2);
        settle(&mut rig, &mut tweener);
        assert_relative_eq!(rig.target().x, 3.0, epsilon = 1e-4);
    }

    #[test]
    fn ray_through_centre_points_at_target() {
        let rig = rig();
        let ray = rig.camera.ray_through(rig.target(), Vec2::ZERO);
        let expected = (rig.target() - rig.camera.position).normalize();
        assert_relative_eq!(ray.direction.dot(expected), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn orbit_keeps_radius() {
        let mut rig = rig();
        let before = rig.distance();
        rig.controls.rotate_by_pixels(Vec2::new(120.0, -40.0), 800.0);
        for _ in 0..120 {
            rig.update();
        }
        assert_relative_eq!(rig.distance(), before, epsilon = 1e-3);
    }
}
