//! Property tweening.
//!
//! Every animated property is addressed by a [`Channel`]. A channel carries at
//! most one live tween: starting a new one kills the old one and bumps the
//! channel generation, so a stale run can never report completion over a newer
//! one. Values are four lanes wide; scalars use `x`, vectors `xyz`.

use std::collections::HashMap;
use std::str::FromStr;

use glam::Vec4;
use thiserror::Error;

use crate::lighting::LightingChannel;
use crate::scene::{LightId, MaterialId, NodeId};

/// Something that can be animated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    NodePosition(NodeId),
    /// Intrinsic XYZ Euler angles.
    NodeRotation(NodeId),
    NodeScale(NodeId),
    /// Emissive color in `xyz`, intensity in `w`.
    Emissive(MaterialId),
    LampLight(LightId),
    CameraPosition,
    OrbitTarget,
    ZoomDistance,
    Lighting(LightingChannel),
    /// Loading overlay opacity.
    Overlay,
    /// Delayed lamp switch; only ever carries delayed calls.
    LampSwitch,
}

/// Easing curves. Parsed from dotted names such as `power2.out`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ease {
    #[default]
    Linear,
    Power1InOut,
    Power2Out,
    Power2InOut,
    Power3InOut,
    SineInOut,
    ExpoOut,
    ExpoInOut,
    BackInOut,
    BounceOut,
}

impl Ease {
    pub const ALL: [Ease; 10] = [
        Ease::Linear,
        Ease::Power1InOut,
        Ease::Power2Out,
        Ease::Power2InOut,
        Ease::Power3InOut,
        Ease::SineInOut,
        Ease::ExpoOut,
        Ease::ExpoInOut,
        Ease::BackInOut,
        Ease::BounceOut,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Ease::Linear => "none",
            Ease::Power1InOut => "power1.inOut",
            Ease::Power2Out => "power2.out",
            Ease::Power2InOut => "power2.inOut",
            Ease::Power3InOut => "power3.inOut",
            Ease::SineInOut => "sine.inOut",
            Ease::ExpoOut => "expo.out",
            Ease::ExpoInOut => "expo.inOut",
            Ease::BackInOut => "back.inOut",
            Ease::BounceOut => "bounce.out",
        }
    }

    /// Map linear progress in `[0, 1]` to eased progress.
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Ease::Linear => t,
            Ease::Power1InOut => in_out(t, 2),
            Ease::Power2Out => 1.0 - (1.0 - t).powi(3),
            Ease::Power2InOut => in_out(t, 3),
            Ease::Power3InOut => in_out(t, 4),
            Ease::SineInOut => -((std::f32::consts::PI * t).cos() - 1.0) / 2.0,
            Ease::ExpoOut => {
                if t >= 1.0 {
                    1.0
                } else {
                    1.0 - 2f32.powf(-10.0 * t)
                }
            }
            Ease::ExpoInOut => {
                if t <= 0.0 || t >= 1.0 {
                    t
                } else if t < 0.5 {
                    2f32.powf(20.0 * t - 10.0) / 2.0
                } else {
                    (2.0 - 2f32.powf(-20.0 * t + 10.0)) / 2.0
                }
            }
            Ease::BackInOut => {
                let c1 = 1.70158;
                let c2 = c1 * 1.525;
                if t < 0.5 {
                    ((2.0 * t).powi(2) * ((c2 + 1.0) * 2.0 * t - c2)) / 2.0
                } else {
                    ((2.0 * t - 2.0).powi(2) * ((c2 + 1.0) * (t * 2.0 - 2.0) + c2) + 2.0) / 2.0
                }
            }
            Ease::BounceOut => bounce_out(t),
        }
    }
}

fn in_out(t: f32, power: i32) -> f32 {
    if t < 0.5 {
        2f32.powi(power - 1) * t.powi(power)
    } else {
        1.0 - (-2.0 * t + 2.0).powi(power) / 2.0
    }
}

fn bounce_out(t: f32) -> f32 {
    let n1 = 7.5625;
    let d1 = 2.75;
    if t < 1.0 / d1 {
        n1 * t * t
    } else if t < 2.0 / d1 {
        let t = t - 1.5 / d1;
        n1 * t * t + 0.75
    } else if t < 2.5 / d1 {
        let t = t - 2.25 / d1;
        n1 * t * t + 0.9375
    } else {
        let t = t - 2.625 / d1;
        n1 * t * t + 0.984375
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown ease `{0}`")]
pub struct UnknownEase(pub String);

impl FromStr for Ease {
    type Err = UnknownEase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // "bounce.out(5)" style parameters are accepted and ignored.
        let base = s.split('(').next().unwrap_or(s);
        Ease::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(base))
            .or_else(|| base.eq_ignore_ascii_case("linear").then_some(Ease::Linear))
            .ok_or_else(|| UnknownEase(s.to_string()))
    }
}

/// How many extra cycles a tween runs after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Repeat {
    #[default]
    Once,
    Count(u32),
    Forever,
}

impl Repeat {
    /// `-1` means forever.
    pub fn from_i32(n: i32) -> Self {
        match n {
            n if n < 0 => Repeat::Forever,
            0 => Repeat::Once,
            n => Repeat::Count(n as u32),
        }
    }
}

/// Description of one tween run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TweenSpec {
    pub from: Vec4,
    pub to: Vec4,
    pub duration: f32,
    pub ease: Ease,
    pub delay: f32,
    pub repeat: Repeat,
    pub yoyo: bool,
}

impl TweenSpec {
    pub fn new(from: Vec4, to: Vec4, duration: f32, ease: Ease) -> Self {
        Self {
            from,
            to,
            duration,
            ease,
            delay: 0.0,
            repeat: Repeat::Once,
            yoyo: false,
        }
    }

    pub fn scalar(from: f32, to: f32, duration: f32, ease: Ease) -> Self {
        Self::new(Vec4::new(from, 0.0, 0.0, 0.0), Vec4::new(to, 0.0, 0.0, 0.0), duration, ease)
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_yoyo(mut self, yoyo: bool) -> Self {
        self.yoyo = yoyo;
        self
    }

    pub fn with_delay(mut self, delay: f32) -> Self {
        self.delay = delay;
        self
    }

    /// Value at `elapsed` seconds past the delay, and whether the run is over.
    fn sample(&self, elapsed: f32) -> (Vec4, bool) {
        if self.duration <= 0.0 {
            let end = match self.repeat {
                Repeat::Count(n) if self.yoyo && n % 2 == 1 => self.from,
                _ => self.to,
            };
            return (end, self.repeat != Repeat::Forever);
        }

        let cycles = match self.repeat {
            Repeat::Once => Some(1),
            Repeat::Count(n) => Some(n + 1),
            Repeat::Forever => None,
        };
        let raw_cycle = (elapsed / self.duration).floor();
        let (cycle, local, done) = match cycles {
            Some(total) if raw_cycle >= total as f32 => (total - 1, 1.0, true),
            _ => {
                let cycle = raw_cycle as u32;
                (cycle, (elapsed - cycle as f32 * self.duration) / self.duration, false)
            }
        };
        let forward = !(self.yoyo && cycle % 2 == 1);
        let progress = if forward { local } else { 1.0 - local };
        let eased = self.ease.apply(progress);
        (self.from.lerp(self.to, eased), done)
    }
}

/// Identifies one run on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TweenToken {
    pub channel: Channel,
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct ActiveTween {
    token: TweenToken,
    spec: TweenSpec,
    elapsed: f32,
    time_scale: f32,
}

#[derive(Debug, Clone)]
struct DelayedCall<E> {
    token: TweenToken,
    remaining: f32,
    event: E,
}

/// Output of one [`Tweener::advance`] step.
#[derive(Debug)]
pub struct TweenFrame<E> {
    pub updates: Vec<(Channel, Vec4)>,
    pub completed: Vec<TweenToken>,
    pub fired: Vec<E>,
}

impl<E> Default for TweenFrame<E> {
    fn default() -> Self {
        Self {
            updates: Vec::new(),
            completed: Vec::new(),
            fired: Vec::new(),
        }
    }
}

/// Frame-driven tween engine. `E` is the payload of delayed calls.
#[derive(Debug)]
pub struct Tweener<E = ()> {
    tweens: Vec<ActiveTween>,
    calls: Vec<DelayedCall<E>>,
    generations: HashMap<Channel, u64>,
}

impl<E> Default for Tweener<E> {
    fn default() -> Self {
        Self {
            tweens: Vec::new(),
            calls: Vec::new(),
            generations: HashMap::new(),
        }
    }
}

impl<E> Tweener<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self, channel: Channel) -> TweenToken {
        let generation = self.generations.entry(channel).or_insert(0);
        *generation += 1;
        TweenToken {
            channel,
            generation: *generation,
        }
    }

    /// Start animating `channel`, replacing whatever ran on it before.
    pub fn to(&mut self, channel: Channel, spec: TweenSpec) -> TweenToken {
        self.kill(channel);
        let token = self.bump(channel);
        self.tweens.push(ActiveTween {
            token,
            spec,
            elapsed: -spec.delay.max(0.0),
            time_scale: 1.0,
        });
        token
    }

    /// Schedule `event` after `delay` seconds, replacing pending work on `channel`.
    pub fn delayed_call(&mut self, channel: Channel, delay: f32, event: E) -> TweenToken {
        self.kill(channel);
        let token = self.bump(channel);
        self.calls.push(DelayedCall {
            token,
            remaining: delay.max(0.0),
            event,
        });
        token
    }

    /// Stop the tween and delayed calls on `channel`. Killing an idle channel
    /// does nothing. Returns whether anything was running.
    pub fn kill(&mut self, channel: Channel) -> bool {
        let before = self.tweens.len() + self.calls.len();
        self.tweens.retain(|t| t.token.channel != channel);
        self.calls.retain(|c| c.token.channel != channel);
        before != self.tweens.len() + self.calls.len()
    }

    /// Whether `token` is still the latest run on its channel.
    pub fn is_current(&self, token: TweenToken) -> bool {
        self.generations.get(&token.channel) == Some(&token.generation)
    }

    /// Playback speed of one run; ignored when the run is gone.
    pub fn set_time_scale(&mut self, token: TweenToken, scale: f32) {
        if let Some(t) = self.tweens.iter_mut().find(|t| t.token == token) {
            t.time_scale = scale.max(0.0);
        }
    }

    pub fn len(&self) -> usize {
        self.tweens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tweens.is_empty() && self.calls.is_empty()
    }

    /// Move every tween and delayed call forward by `dt` seconds.
    pub fn advance(&mut self, dt: f32) -> TweenFrame<E> {
        let mut frame = TweenFrame::default();

        let mut finished = Vec::new();
        for tween in &mut self.tweens {
            tween.elapsed += dt * tween.time_scale;
            if tween.elapsed < 0.0 {
                continue;
            }
            let (value, done) = tween.spec.sample(tween.elapsed);
            frame.updates.push((tween.token.channel, value));
            if done {
                finished.push(tween.token);
            }
        }
        self.tweens.retain(|t| !finished.contains(&t.token));
        frame
            .completed
            .extend(finished.into_iter().filter(|token| self.is_current(*token)));

        let mut pending = Vec::with_capacity(self.calls.len());
        for mut call in self.calls.drain(..) {
            call.remaining -= dt;
            if call.remaining <= 0.0 {
                if self.generations.get(&call.token.channel) == Some(&call.token.generation) {
                    frame.fired.push(call.event);
                }
            } else {
                pending.push(call);
            }
        }
        self.calls = pending;

        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn last_value(frame: &TweenFrame<()>, channel: Channel) -> Option<f32> {
        frame
            .updates
            .iter()
            .rev()
            .find(|(c, _)| *c == channel)
            .map(|(_, v)| v.x)
    }

    #[test]
    fn eases_start_at_zero_and_end_at_one() {
        for ease in Ease::ALL {
            assert_relative_eq!(ease.apply(0.0), 0.0, epsilon = 1e-4);
            assert_relative_eq!(ease.apply(1.0), 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn ease_names_parse() {
        assert_eq!("power2.out".parse::<Ease>().unwrap(), Ease::Power2Out);
        assert_eq!("bounce.out(1.8)".parse::<Ease>().unwrap(), Ease::BounceOut);
        assert_eq!("none".parse::<Ease>().unwrap(), Ease::Linear);
        let err = "wobble.in".parse::<Ease>().unwrap_err();
        assert_eq!(err.to_string(), "unknown ease `wobble.in`");
    }

    #[test]
    fn tween_reaches_target_and_completes() {
        let mut tweener: Tweener = Tweener::new();
        let token = tweener.to(Channel::ZoomDistance, TweenSpec::scalar(0.0, 10.0, 1.0, Ease::Linear));

        let frame = tweener.advance(0.5);
        assert_relative_eq!(last_value(&frame, Channel::ZoomDistance).unwrap(), 5.0);
        assert!(frame.completed.is_empty());

        let frame = tweener.advance(0.6);
        assert_relative_eq!(last_value(&frame, Channel::ZoomDistance).unwrap(), 10.0);
        assert_eq!(frame.completed, vec![token]);
        assert!(tweener.is_empty());
    }

    #[test]
    fn new_tween_on_channel_replaces_old() {
        let mut tweener: Tweener = Tweener::new();
        let first = tweener.to(Channel::CameraPosition, TweenSpec::scalar(0.0, 1.0, 1.0, Ease::Linear));
        let second = tweener.to(Channel::CameraPosition, TweenSpec::scalar(5.0, 6.0, 1.0, Ease::Linear));
        assert_eq!(tweener.len(), 1);
        assert!(!tweener.is_current(first));
        assert!(tweener.is_current(second));

        let frame = tweener.advance(2.0);
        assert_eq!(frame.updates.len(), 1);
        assert_relative_eq!(last_value(&frame, Channel::CameraPosition).unwrap(), 6.0);
        assert_eq!(frame.completed, vec![second]);
    }

    #[test]
    fn kill_is_idempotent() {
        let mut tweener: Tweener = Tweener::new();
        assert!(!tweener.kill(Channel::OrbitTarget));
        tweener.to(Channel::OrbitTarget, TweenSpec::scalar(0.0, 1.0, 1.0, Ease::Linear));
        assert!(tweener.kill(Channel::OrbitTarget));
        assert!(!tweener.kill(Channel::OrbitTarget));
        assert!(tweener.advance(1.0).updates.is_empty());
    }

    #[test]
    fn yoyo_repeat_returns_to_start() {
        let mut tweener: Tweener = Tweener::new();
        let spec = TweenSpec::scalar(0.0, 1.0, 1.0, Ease::Linear)
            .with_repeat(Repeat::Count(1))
            .with_yoyo(true);
        tweener.to(Channel::Overlay, spec);

        let frame = tweener.advance(1.5);
        assert_relative_eq!(last_value(&frame, Channel::Overlay).unwrap(), 0.5);
        let frame = tweener.advance(1.0);
        assert_relative_eq!(last_value(&frame, Channel::Overlay).unwrap(), 0.0);
        assert_eq!(frame.completed.len(), 1);
    }

    #[test]
    fn forever_never_completes() {
        let mut tweener: Tweener = Tweener::new();
        tweener.to(
            Channel::Overlay,
            TweenSpec::scalar(0.0, 1.0, 0.5, Ease::Linear).with_repeat(Repeat::Forever),
        );
        for _ in 0..100 {
            assert!(tweener.advance(0.37).completed.is_empty());
        }
        assert_eq!(tweener.len(), 1);
    }

    #[test]
    fn delay_holds_value_until_start() {
        let mut tweener: Tweener = Tweener::new();
        tweener.to(
            Channel::Overlay,
            TweenSpec::scalar(0.0, 1.0, 1.0, Ease::Linear).with_delay(0.5),
        );
        assert!(tweener.advance(0.25).updates.is_empty());
        let frame = tweener.advance(0.75);
        assert_relative_eq!(last_value(&frame, Channel::Overlay).unwrap(), 0.5);
    }

    #[test]
    fn time_scale_speeds_up_run() {
        let mut tweener: Tweener = Tweener::new();
        let token = tweener.to(Channel::Overlay, TweenSpec::scalar(0.0, 1.0, 1.0, Ease::Linear));
        tweener.set_time_scale(token, 2.0);
        let frame = tweener.advance(0.25);
        assert_relative_eq!(last_value(&frame, Channel::Overlay).unwrap(), 0.5);
    }

    #[test]
    fn stale_delayed_call_never_fires() {
        let mut tweener: Tweener<&'static str> = Tweener::new();
        tweener.delayed_call(Channel::LampSwitch, 0.25, "first");
        tweener.delayed_call(Channel::LampSwitch, 0.0, "second");
        let frame = tweener.advance(0.5);
        assert_eq!(frame.fired, vec!["second"]);
    }

    #[test]
    fn zero_duration_jumps_to_end() {
        let mut tweener: Tweener = Tweener::new();
        tweener.to(Channel::Overlay, TweenSpec::scalar(3.0, 7.0, 0.0, Ease::ExpoOut));
        let frame = tweener.advance(0.0);
        assert_relative_eq!(last_value(&frame, Channel::Overlay).unwrap(), 7.0);
        assert_eq!(frame.completed.len(), 1);
    }
}
