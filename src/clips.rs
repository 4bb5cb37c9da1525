//! Keyframe clips from the model file and a small mixer to play them.
//!
//! Tracks animate node translation, rotation or scale. The mixer runs at most
//! one clip at full weight plus, during a cross-fade, the clip it is fading
//! out of. Nodes fall back to their load-time transform when no action drives
//! them.

use std::collections::HashMap;

use glam::{Quat, Vec3, Vec4};
use log::debug;

use crate::scene::{NodeId, Scene};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Translation,
    Rotation,
    Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
    /// Three outputs per key: in-tangent, value, out-tangent.
    CubicSpline,
}

/// One animated property of one node. Vectors are stored with `w = 0`,
/// rotations as `xyzw`.
#[derive(Debug, Clone)]
pub struct Track {
    pub node: NodeId,
    pub property: Property,
    pub interpolation: Interpolation,
    pub times: Vec<f32>,
    pub values: Vec<Vec4>,
}

impl Track {
    fn key_value(&self, i: usize) -> Vec4 {
        match self.interpolation {
            Interpolation::CubicSpline => self.values[i * 3 + 1],
            _ => self.values[i],
        }
    }

    fn key_count(&self) -> usize {
        let per_key = match self.interpolation {
            Interpolation::CubicSpline => 3,
            _ => 1,
        };
        self.times.len().min(self.values.len() / per_key)
    }

    /// Value at clip time `t`, clamped to the first and last keys.
    pub fn sample(&self, t: f32) -> Option<Vec4> {
        let keys = self.key_count();
        if keys == 0 {
            return None;
        }
        if keys == 1 || t <= self.times[0] {
            return Some(self.key_value(0));
        }
        if t >= self.times[keys - 1] {
            return Some(self.key_value(keys - 1));
        }

        let i = self.times[..keys].partition_point(|&k| k <= t) - 1;
        let (t0, t1) = (self.times[i], self.times[i + 1]);
        let span = t1 - t0;
        let f = if span > 0.0 { (t - t0) / span } else { 0.0 };

        let value = match self.interpolation {
            Interpolation::Step => self.key_value(i),
            Interpolation::Linear => {
                let (a, b) = (self.values[i], self.values[i + 1]);
                if self.property == Property::Rotation {
                    Vec4::from(Quat::from_vec4(a).slerp(Quat::from_vec4(b), f))
                } else {
                    a.lerp(b, f)
                }
            }
            Interpolation::CubicSpline => {
                let v0 = self.values[i * 3 + 1];
                let out0 = self.values[i * 3 + 2];
                let in1 = self.values[(i + 1) * 3];
                let v1 = self.values[(i + 1) * 3 + 1];
                let (f2, f3) = (f * f, f * f * f);
                let v = v0 * (2.0 * f3 - 3.0 * f2 + 1.0)
                    + out0 * span * (f3 - 2.0 * f2 + f)
                    + v1 * (-2.0 * f3 + 3.0 * f2)
                    + in1 * span * (f3 - f2);
                if self.property == Property::Rotation {
                    v.normalize_or_zero()
                } else {
                    v
                }
            }
        };
        Some(value)
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<Track>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        let duration = tracks
            .iter()
            .filter_map(|t| t.times.last().copied())
            .fold(0.0f32, f32::max);
        Self {
            name: name.into(),
            duration,
            tracks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Repeat,
    Once,
    PingPong,
}

impl LoopMode {
    pub const ALL: [LoopMode; 3] = [LoopMode::Repeat, LoopMode::Once, LoopMode::PingPong];

    pub fn label(self) -> &'static str {
        match self {
            LoopMode::Repeat => "Repeat",
            LoopMode::Once => "Once",
            LoopMode::PingPong => "PingPong",
        }
    }
}

/// Playback settings edited from the debug panel.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipParams {
    pub clip: Option<usize>,
    pub time_scale: f32,
    pub loop_mode: LoopMode,
    /// Number of plays; -1 repeats forever.
    pub repetitions: i32,
    pub clamp_when_finished: bool,
    pub cross_fade: f32,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            clip: None,
            time_scale: 1.0,
            loop_mode: LoopMode::Repeat,
            repetitions: -1,
            clamp_when_finished: false,
            cross_fade: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    from: f32,
    to: f32,
    duration: f32,
    elapsed: f32,
}

impl Fade {
    fn weight(&self) -> f32 {
        if self.duration <= 0.0 {
            return self.to;
        }
        let f = (self.elapsed / self.duration).clamp(0.0, 1.0);
        self.from + (self.to - self.from) * f
    }

    fn done(&self) -> bool {
        self.elapsed >= self.duration
    }
}

#[derive(Debug, Clone)]
struct Action {
    clip: usize,
    elapsed: f32,
    loop_mode: LoopMode,
    plays: Option<u32>,
    clamp_when_finished: bool,
    fade: Option<Fade>,
    finished: bool,
}

impl Action {
    fn new(clip: usize, params: &ClipParams) -> Self {
        let plays = match params.loop_mode {
            LoopMode::Once => Some(1),
            _ if params.repetitions < 0 => None,
            _ => Some(params.repetitions.max(1) as u32),
        };
        Self {
            clip,
            elapsed: 0.0,
            loop_mode: params.loop_mode,
            plays,
            // Only a single play can hold its last pose.
            clamp_when_finished: params.loop_mode == LoopMode::Once && params.clamp_when_finished,
            fade: None,
            finished: false,
        }
    }

    fn weight(&self) -> f32 {
        self.fade.map_or(1.0, |f| f.weight())
    }

    /// Clip-local time for the current elapsed time.
    fn local_time(&self, duration: f32) -> f32 {
        if duration <= 0.0 {
            return 0.0;
        }
        if let Some(plays) = self.plays {
            if self.elapsed >= plays as f32 * duration {
                let ends_reversed = self.loop_mode == LoopMode::PingPong && plays % 2 == 0;
                return if ends_reversed { 0.0 } else { duration };
            }
        }
        let loops = (self.elapsed / duration).floor();
        let local = self.elapsed - loops * duration;
        if self.loop_mode == LoopMode::PingPong && loops as u64 % 2 == 1 {
            duration - local
        } else {
            local
        }
    }

    fn is_complete(&self, duration: f32) -> bool {
        match self.plays {
            Some(plays) => self.elapsed >= plays as f32 * duration.max(0.0),
            None => false,
        }
    }
}

/// Mix a weighted sum with the rest pose; weights past one are normalized.
fn blend(rest: Vec3, weighted_sum: Vec3, weight: f32) -> Vec3 {
    if weight >= 1.0 {
        weighted_sum / weight
    } else {
        rest * (1.0 - weight) + weighted_sum
    }
}

#[derive(Debug, Default)]
struct PoseAccum {
    translation: Vec3,
    translation_weight: f32,
    rotation: Quat,
    rotation_weight: f32,
    scale: Vec3,
    scale_weight: f32,
}

/// Plays clips on the scene.
#[derive(Debug, Default)]
pub struct ClipMixer {
    pub clips: Vec<AnimationClip>,
    pub params: ClipParams,
    actions: Vec<Action>,
}

impl ClipMixer {
    pub fn new(clips: Vec<AnimationClip>) -> Self {
        let params = ClipParams {
            clip: if clips.is_empty() { None } else { Some(0) },
            ..ClipParams::default()
        };
        Self {
            clips,
            params,
            actions: Vec::new(),
        }
    }

    pub fn clip_names(&self) -> impl Iterator<Item = &str> {
        self.clips.iter().map(|c| c.name.as_str())
    }

    pub fn is_playing(&self) -> bool {
        self.actions.iter().any(|a| !a.finished)
    }

    /// Start the selected clip, cross-fading from whatever is playing.
    pub fn play(&mut self, scene: &mut Scene) {
        let Some(index) = self.params.clip.filter(|&i| i < self.clips.len()) else {
            return;
        };
        let mut next = Action::new(index, &self.params);

        let current = self.actions.iter().position(|a| a.fade.map_or(true, |f| f.to > 0.0));
        match current {
            Some(i) if self.actions[i].clip != index && self.params.cross_fade > 0.0 => {
                let fade = self.params.cross_fade;
                // Drop anything already fading out; it would fight the new fade.
                self.actions.retain(|a| a.fade.map_or(true, |f| f.to > 0.0));
                if let Some(previous) = self.actions.first_mut() {
                    previous.fade = Some(Fade {
                        from: previous.weight(),
                        to: 0.0,
                        duration: fade,
                        elapsed: 0.0,
                    });
                }
                next.fade = Some(Fade {
                    from: 0.0,
                    to: 1.0,
                    duration: fade,
                    elapsed: 0.0,
                });
            }
            _ => {
                self.restore_all(scene);
                self.actions.clear();
            }
        }

        debug!("Playing clip {}", self.clips[index].name);
        self.actions.push(next);
        self.apply(scene);
    }

    /// Halt playback and put animated nodes back to their load-time pose.
    pub fn stop(&mut self, scene: &mut Scene) {
        self.restore_all(scene);
        self.actions.clear();
    }

    pub fn update(&mut self, scene: &mut Scene, dt: f32) {
        if self.actions.is_empty() {
            return;
        }
        let step = dt * self.params.time_scale.max(0.0);
        for action in &mut self.actions {
            let duration = self.clips[action.clip].duration;
            if !action.finished {
                action.elapsed += step;
                action.finished = action.is_complete(duration);
            }
            if let Some(fade) = &mut action.fade {
                fade.elapsed += step;
            }
        }

        let mut expired = Vec::new();
        self.actions.retain(|a| {
            let faded_out = a.fade.is_some_and(|f| f.done() && f.to <= 0.0);
            let released = a.finished && !a.clamp_when_finished;
            if faded_out || released {
                expired.push(a.clip);
                false
            } else {
                true
            }
        });
        for action in &mut self.actions {
            if action.fade.is_some_and(|f| f.done() && f.to >= 1.0) {
                action.fade = None;
            }
        }

        for clip in expired {
            self.restore_clip(scene, clip);
        }
        self.apply(scene);
    }

    fn apply(&self, scene: &mut Scene) {
        let mut poses: HashMap<NodeId, PoseAccum> = HashMap::new();
        for action in &self.actions {
            let clip = &self.clips[action.clip];
            let weight = action.weight();
            if weight <= 0.0 {
                continue;
            }
            let t = action.local_time(clip.duration);
            for track in &clip.tracks {
                let Some(value) = track.sample(t) else {
                    continue;
                };
                let pose = poses.entry(track.node).or_default();
                match track.property {
                    Property::Translation => {
                        pose.translation += value.truncate() * weight;
                        pose.translation_weight += weight;
                    }
                    Property::Scale => {
                        pose.scale += value.truncate() * weight;
                        pose.scale_weight += weight;
                    }
                    Property::Rotation => {
                        let q = Quat::from_vec4(value);
                        let total = pose.rotation_weight + weight;
                        pose.rotation = if pose.rotation_weight == 0.0 {
                            q
                        } else {
                            pose.rotation.slerp(q, weight / total)
                        };
                        pose.rotation_weight = total;
                    }
                }
            }
        }

        for (id, pose) in poses {
            let Some(node) = scene.node_mut(id) else {
                continue;
            };
            let rest = node.initial;
            if pose.translation_weight > 0.0 {
                node.transform.position =
                    blend(rest.position, pose.translation, pose.translation_weight);
            }
            if pose.rotation_weight > 0.0 {
                let w = pose.rotation_weight.min(1.0);
                node.transform.rotation = rest.rotation.slerp(pose.rotation, w);
            }
            if pose.scale_weight > 0.0 {
                node.transform.scale = blend(rest.scale, pose.scale, pose.scale_weight);
            }
        }
    }

    fn restore_clip(&self, scene: &mut Scene, clip: usize) {
        for track in &self.clips[clip].tracks {
            if let Some(node) = scene.node_mut(track.node) {
                match track.property {
                    Property::Translation => node.transform.position = node.initial.position,
                    Property::Rotation => node.transform.rotation = node.initial.rotation,
                    Property::Scale => node.transform.scale = node.initial.scale,
                }
            }
        }
    }

    fn restore_all(&self, scene: &mut Scene) {
        for action in &self.actions {
            self.restore_clip(scene, action.clip);
        }
    }
}
