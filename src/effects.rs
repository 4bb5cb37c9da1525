// Visual reactions on scene nodes: hover scaling, the tracker bounce and the
// debug-panel test animations. Also the glue that writes tween values back into
// the scene.

use std::collections::HashMap;
use std::f32::consts::TAU;

use glam::{Vec3, Vec4};

use crate::config::HoverParams;
use crate::scene::{NodeId, Scene};
use crate::tween::{Channel, Ease, Repeat, TweenSpec, TweenToken, Tweener};

/// Write a tweened value into the scene. Returns false when the channel
/// isn't scene-owned.
pub fn apply_to_scene(scene: &mut Scene, channel: Channel, value: Vec4) -> bool {
    match channel {
        Channel::NodePosition(id) => {
            if let Some(n) = scene.node_mut(id) {
                n.transform.position = value.truncate();
            }
        }
        Channel::NodeRotation(id) => {
            if let Some(n) = scene.node_mut(id) {
                n.transform.set_euler(value.truncate());
            }
        }
        Channel::NodeScale(id) => {
            if let Some(n) = scene.node_mut(id) {
                n.transform.scale = value.truncate();
            }
        }
        Channel::Emissive(id) => {
            if let Some(m) = scene.material_mut(id) {
                m.emissive = value.truncate();
                m.emissive_intensity = value.w;
            }
        }
        Channel::LampLight(id) => {
            if let Some(l) = scene.light_mut(id) {
                l.intensity = value.x;
            }
        }
        _ => return false,
    }
    true
}

fn node_channels(id: NodeId) -> [Channel; 3] {
    [
        Channel::NodeScale(id),
        Channel::NodeRotation(id),
        Channel::NodePosition(id),
    ]
}

/// Scale `node` to `factor` times its initial scale.
pub fn tween_scale_to<E>(
    scene: &Scene,
    tweener: &mut Tweener<E>,
    node: NodeId,
    factor: f32,
    duration: f32,
    ease: Ease,
) -> Option<TweenToken> {
    let n = scene.node(node)?;
    let spec = TweenSpec::new(
        n.transform.scale.extend(0.0),
        (n.initial.scale * factor).extend(0.0),
        duration,
        ease,
    );
    Some(tweener.to(Channel::NodeScale(node), spec))
}

/// Grow or shrink every member of a hover group.
pub fn apply_hover_group<E>(
    scene: &Scene,
    tweener: &mut Tweener<E>,
    targets: &[NodeId],
    active: bool,
    params: &HoverParams,
) {
    let factor = if active { params.scale } else { 1.0 };
    for &t in targets {
        tween_scale_to(scene, tweener, t, factor, params.tween_duration, Ease::Power2Out);
    }
}

/// Bounce a tracked mesh up when the pointer enters and settle it back when
/// it leaves.
pub fn play_tracker_bounce<E>(
    scene: &Scene,
    tweener: &mut Tweener<E>,
    node: NodeId,
    hovering: bool,
    params: &HoverParams,
) {
    let Some(n) = scene.node(node) else {
        return;
    };
    for channel in node_channels(node) {
        tweener.kill(channel);
    }
    if hovering {
        tween_scale_to(scene, tweener, node, params.tracker_scale, 0.5, Ease::BounceOut);
    } else {
        tween_scale_to(scene, tweener, node, 1.0, 0.3, Ease::BounceOut);
        let current = n.transform.euler();
        let restored = Vec3::new(n.initial.euler().x, current.y, current.z);
        tweener.to(
            Channel::NodeRotation(node),
            TweenSpec::new(current.extend(0.0), restored.extend(0.0), 0.3, Ease::BounceOut),
        );
    }
}

/// Kinds of looping test animation offered by the debug panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestKind {
    #[default]
    Spin,
    Bounce,
    Pulse,
    None,
}

impl TestKind {
    pub const ALL: [TestKind; 4] = [TestKind::Spin, TestKind::Bounce, TestKind::Pulse, TestKind::None];

    pub fn label(self) -> &'static str {
        match self {
            TestKind::Spin => "Spin",
            TestKind::Bounce => "Bounce",
            TestKind::Pulse => "Pulse",
            TestKind::None => "None",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestParams {
    /// `None` targets every mesh.
    pub target: Option<NodeId>,
    pub kind: TestKind,
    pub duration: f32,
    /// -1 repeats forever.
    pub repeat: i32,
    pub ease: Ease,
    pub speed: f32,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            target: None,
            kind: TestKind::Spin,
            duration: 1.5,
            repeat: -1,
            ease: Ease::Power1InOut,
            speed: 1.0,
        }
    }
}

/// Runs and undoes test animations, remembering which tweens it started so
/// the speed slider can retime them.
#[derive(Debug, Default)]
pub struct TestAnimator {
    pub params: TestParams,
    tweens: HashMap<NodeId, Vec<TweenToken>>,
}

impl TestAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    fn targets(&self, scene: &Scene) -> Vec<NodeId> {
        match self.params.target {
            None => scene.mesh_nodes(),
            Some(id) => scene
                .node(id)
                .filter(|n| n.mesh.is_some())
                .map(|_| vec![id])
                .unwrap_or_default(),
        }
    }

    fn kill_for<E>(&mut self, tweener: &mut Tweener<E>, node: NodeId) {
        if let Some(tokens) = self.tweens.remove(&node) {
            for token in tokens {
                if tweener.is_current(token) {
                    tweener.kill(token.channel);
                }
            }
        }
    }

    pub fn apply<E>(&mut self, scene: &Scene, tweener: &mut Tweener<E>) {
        let targets = self.targets(scene);
        for &node in &targets {
            self.kill_for(tweener, node);
        }

        let p = self.params.clone();
        if p.kind == TestKind::None {
            return;
        }
        let repeat = Repeat::from_i32(p.repeat);

        for node in targets {
            let Some(n) = scene.node(node) else {
                continue;
            };
            let (channel, spec) = match p.kind {
                TestKind::Spin => {
                    let from = n.transform.euler();
                    let to = from + Vec3::new(0.0, TAU, 0.0);
                    (
                        Channel::NodeRotation(node),
                        TweenSpec::new(from.extend(0.0), to.extend(0.0), p.duration, Ease::Linear)
                            .with_repeat(repeat),
                    )
                }
                TestKind::Bounce => {
                    let from = n.transform.position;
                    let to = Vec3::new(from.x, n.initial.position.y + 0.2, from.z);
                    (
                        Channel::NodePosition(node),
                        TweenSpec::new(from.extend(0.0), to.extend(0.0), p.duration, p.ease)
                            .with_repeat(repeat)
                            .with_yoyo(true),
                    )
                }
                TestKind::Pulse => (
                    Channel::NodeScale(node),
                    TweenSpec::new(
                        n.transform.scale.extend(0.0),
                        (n.initial.scale * 1.2).extend(0.0),
                        p.duration,
                        p.ease,
                    )
                    .with_repeat(repeat)
                    .with_yoyo(true),
                ),
                TestKind::None => continue,
            };
            let token = tweener.to(channel, spec);
            tweener.set_time_scale(token, p.speed);
            self.tweens.entry(node).or_default().push(token);
        }
    }

    /// Kill test tweens on the targets and snap them back to their initial
    /// transforms.
    pub fn stop<E>(&mut self, scene: &mut Scene, tweener: &mut Tweener<E>) {
        for node in self.targets(scene) {
            self.kill_for(tweener, node);
            if let Some(n) = scene.node_mut(node) {
                n.transform = n.initial;
            }
        }
    }

    pub fn set_speed<E>(&mut self, tweener: &mut Tweener<E>, speed: f32) {
        self.params.speed = speed;
        for token in self.tweens.values().flatten() {
            tweener.set_time_scale(*token, speed);
        }
    }

    pub fn running(&self) -> usize {
        self.tweens.values().map(Vec::len).sum()
    }
}
