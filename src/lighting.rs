// Scene lights and the day/night presets.

use glam::{Vec3, Vec4};
use log::info;

use crate::config::{LightingConfig, LightingPreset, WindowLightConfig};
use crate::math::color_from_hex;
use crate::tween::{Channel, Ease, TweenSpec, Tweener};

/// Animatable lighting properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightingChannel {
    AmbientIntensity,
    AmbientColor,
    SunIntensity,
    SunColor,
    SunPosition,
    WindowIntensity,
    WindowColor,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub color: Vec3,
    pub intensity: f32,
    /// Shines from `position` toward the origin.
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
    pub target: Vec3,
    /// Half-angle of the cone, radians.
    pub angle: f32,
    pub penumbra: f32,
    pub distance: f32,
    pub decay: f32,
}

/// Everything that lights the room besides the lamp.
#[derive(Debug, Clone, PartialEq)]
pub struct LightRig {
    pub ambient: AmbientLight,
    pub sun: DirectionalLight,
    pub window: SpotLight,
    pub background: Vec3,
}

impl LightRig {
    /// Rig in the given preset's resting state.
    pub fn from_preset(preset: &LightingPreset, window: &WindowLightConfig) -> Self {
        Self {
            ambient: AmbientLight {
                color: color_from_hex(preset.ambient.color),
                intensity: preset.ambient.intensity,
            },
            sun: DirectionalLight {
                color: color_from_hex(preset.sun.color),
                intensity: preset.sun.intensity,
                position: Vec3::from(preset.sun.position),
            },
            window: SpotLight {
                color: color_from_hex(preset.window.color),
                intensity: preset.window.intensity,
                position: Vec3::from(window.position),
                target: Vec3::from(window.target),
                angle: window.angle_degrees.to_radians(),
                penumbra: window.penumbra,
                distance: window.distance,
                decay: window.decay,
            },
            background: color_from_hex(preset.background),
        }
    }

    pub fn value(&self, channel: LightingChannel) -> Vec4 {
        match channel {
            LightingChannel::AmbientIntensity => Vec4::new(self.ambient.intensity, 0.0, 0.0, 0.0),
            LightingChannel::AmbientColor => self.ambient.color.extend(0.0),
            LightingChannel::SunIntensity => Vec4::new(self.sun.intensity, 0.0, 0.0, 0.0),
            LightingChannel::SunColor => self.sun.color.extend(0.0),
            LightingChannel::SunPosition => self.sun.position.extend(0.0),
            LightingChannel::WindowIntensity => Vec4::new(self.window.intensity, 0.0, 0.0, 0.0),
            LightingChannel::WindowColor => self.window.color.extend(0.0),
            LightingChannel::Background => self.background.extend(0.0),
        }
    }

    pub fn apply(&mut self, channel: LightingChannel, value: Vec4) {
        match channel {
            LightingChannel::AmbientIntensity => self.ambient.intensity = value.x,
            LightingChannel::AmbientColor => self.ambient.color = value.truncate(),
            LightingChannel::SunIntensity => self.sun.intensity = value.x,
            LightingChannel::SunColor => self.sun.color = value.truncate(),
            LightingChannel::SunPosition => self.sun.position = value.truncate(),
            LightingChannel::WindowIntensity => self.window.intensity = value.x,
            LightingChannel::WindowColor => self.window.color = value.truncate(),
            LightingChannel::Background => self.background = value.truncate(),
        }
    }
}

/// Day/night switch.
#[derive(Debug, Clone)]
pub struct LightingModes {
    pub is_night: bool,
    pub day: LightingPreset,
    pub night: LightingPreset,
}

impl LightingModes {
    pub fn new(config: &LightingConfig) -> Self {
        Self {
            is_night: config.start_at_night,
            day: config.day,
            night: config.night,
        }
    }

    pub fn preset(&self, night: bool) -> &LightingPreset {
        if night {
            &self.night
        } else {
            &self.day
        }
    }

    pub fn toggle(&mut self) -> bool {
        self.is_night = !self.is_night;
        self.is_night
    }

    /// Tween every light toward the preset for `night`.
    pub fn apply<E>(&self, night: bool, rig: &LightRig, tweener: &mut Tweener<E>) {
        info!("Switching to {} lighting", if night { "night" } else { "day" });
        let p = self.preset(night);
        let scalar = |v: f32| Vec4::new(v, 0.0, 0.0, 0.0);
        let color = |hex: u32| color_from_hex(hex).extend(0.0);

        let targets = [
            (LightingChannel::AmbientIntensity, scalar(p.ambient.intensity), 0.8),
            (LightingChannel::AmbientColor, color(p.ambient.color), 0.8),
            (LightingChannel::SunIntensity, scalar(p.sun.intensity), 0.9),
            (LightingChannel::SunColor, color(p.sun.color), 0.9),
            (LightingChannel::SunPosition, Vec3::from(p.sun.position).extend(0.0), 1.0),
            (LightingChannel::WindowIntensity, scalar(p.window.intensity), 0.8),
            (LightingChannel::WindowColor, color(p.window.color), 0.8),
            (LightingChannel::Background, color(p.background), 1.2),
        ];
        for (channel, to, duration) in targets {
            tweener.to(
                Channel::Lighting(channel),
                TweenSpec::new(rig.value(channel), to, duration, Ease::Power2InOut),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn night_preset_is_reached_after_longest_tween() {
        let config = LightingConfig::default();
        let modes = LightingModes::new(&config);
        let mut rig = LightRig::from_preset(&config.day, &config.window_light);
        let mut tweener: Tweener = Tweener::new();

        modes.apply(true, &rig, &mut tweener);
        for _ in 0..100 {
            let frame = tweener.advance(0.02);
            for (channel, value) in frame.updates {
                if let Channel::Lighting(c) = channel {
                    rig.apply(c, value);
                }
            }
        }

        let night = LightRig::from_preset(&config.night, &config.window_light);
        assert_relative_eq!(rig.window.intensity, 0.9, epsilon = 1e-5);
        assert_relative_eq!(rig.background.x, night.background.x, epsilon = 1e-5);
        assert_relative_eq!(rig.sun.color.z, night.sun.color.z, epsilon = 1e-5);
        assert!(tweener.is_empty());
    }

    #[test]
    fn toggle_flips_mode() {
        let mut modes = LightingModes::new(&LightingConfig::default());
        assert!(!modes.is_night);
        assert!(modes.toggle());
        assert!(!modes.toggle());
    }
}
