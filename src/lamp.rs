// Desk lamp: a clickable mesh that glows and lights the room when switched on.

use glam::Vec3;
use log::debug;

use crate::config::LampParams;
use crate::math::color_from_hex;
use crate::scene::{LightId, NodeId, PointLight, Scene};
use crate::tween::{Channel, Ease, TweenSpec, Tweener};

#[derive(Debug, Clone)]
pub struct Lamp {
    pub params: LampParams,
    pub target: Option<NodeId>,
    pub light: Option<LightId>,
    pub on: bool,
}

impl Lamp {
    pub fn new(params: LampParams) -> Self {
        Self {
            params,
            target: None,
            light: None,
            on: false,
        }
    }

    /// Bind to the resolved lamp node and parent a point light to it. The
    /// light starts at the "off" intensity.
    pub fn attach(&mut self, scene: &mut Scene, target: Option<NodeId>) {
        self.target = target.filter(|&t| scene.node(t).is_some());
        let Some(node) = self.target else {
            debug!("No lamp target in scene");
            return;
        };
        let materials: Vec<&str> = scene
            .subtree_materials(node)
            .into_iter()
            .filter_map(|m| scene.material(m))
            .map(|m| m.name.as_str())
            .collect();
        debug!("Lamp drives materials {materials:?}");
        if self.light.is_none() {
            self.light = Some(scene.add_point_light(PointLight {
                node,
                color: color_from_hex(self.params.color_on),
                intensity: self.params.light_intensity_off,
                distance: self.params.light_distance,
                decay: self.params.light_decay,
            }));
        }
    }

    /// Flip the switch and start the glow transition. Returns the new state.
    pub fn toggle<E>(&mut self, scene: &mut Scene, tweener: &mut Tweener<E>) -> bool {
        self.switch(scene, tweener, !self.on);
        self.on
    }

    /// Force the lamp on or off, e.g. when the room switches to night.
    pub fn switch<E>(&mut self, scene: &mut Scene, tweener: &mut Tweener<E>, on: bool) {
        self.on = on;
        self.set_glow(scene, tweener, on);
    }

    /// Tween every material under the lamp and its light toward `on`.
    pub fn set_glow<E>(&self, scene: &mut Scene, tweener: &mut Tweener<E>, on: bool) {
        let Some(target) = self.target else {
            return;
        };
        let duration = self.params.tween_duration;

        for id in scene.subtree_materials(target) {
            let Some(material) = scene.material_mut(id) else {
                continue;
            };
            let (original_color, original_intensity) = material.capture_original_emissive();
            let to = if on {
                color_from_hex(self.params.color_on).extend(self.params.emissive_on)
            } else {
                original_color.extend(original_intensity)
            };
            let from = material.emissive.extend(material.emissive_intensity);
            tweener.to(
                Channel::Emissive(id),
                TweenSpec::new(from, to, duration, Ease::Power2Out),
            );
        }

        if let Some(light) = self.light.and_then(|l| scene.light(l).map(|p| (l, p.intensity))) {
            let (id, current) = light;
            let target_intensity = if on {
                self.params.light_intensity_on
            } else {
                self.params.light_intensity_off
            };
            tweener.to(
                Channel::LampLight(id),
                TweenSpec::scalar(current, target_intensity, duration, Ease::Power2Out),
            );
        }
    }

    /// The lamp light and its world position, once attached.
    pub fn light<'a>(&self, scene: &'a Scene) -> Option<(Vec3, &'a PointLight)> {
        let light = scene.light(self.light?)?;
        Some((scene.world_position(light.node), light))
    }
}
