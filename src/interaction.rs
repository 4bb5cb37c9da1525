//! Interaction dispatch.
//!
//! Turns picking results into behavior: which link a click opens, whether it
//! toggles the lamp, which hover groups became active or inactive, which
//! raycast target the tracker follows and what the cursor should look like.
//! The dispatcher only decides; callers run the resulting actions.

use crate::picking::Hit;
use crate::registry::{Purpose, TargetRegistry};
use crate::scene::{NodeId, Scene};

/// Maximum number of child names listed in the hover tooltip.
pub const TOOLTIP_MAX_CHILDREN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    OpenLink { id: String, url: String },
    ToggleLamp,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverEvent {
    /// Index into [`TargetRegistry::hover_groups`].
    GroupEntered(usize),
    GroupLeft(usize),
    TrackerLeft(NodeId),
    TrackerEntered(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cursor {
    #[default]
    Default,
    Clickable,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HoverUpdate {
    pub events: Vec<HoverEvent>,
    pub cursor: Cursor,
    /// Nearest selectable hit, for the tooltip.
    pub inspected: Option<NodeId>,
}

/// Hover state carried between pointer moves.
#[derive(Debug, Clone, Default)]
pub struct InteractionState {
    group_active: Vec<bool>,
    tracked: Option<NodeId>,
}

/// Whether `node` or any of its ancestors satisfies `pred`.
fn chain_any(scene: &Scene, node: NodeId, mut pred: impl FnMut(NodeId) -> bool) -> bool {
    scene.ancestors(node).any(|n| pred(n))
}

/// Nearest ancestor (or the node itself) that satisfies `pred`.
fn classify(scene: &Scene, node: NodeId, mut pred: impl FnMut(NodeId) -> bool) -> Option<NodeId> {
    scene.ancestors(node).find(|&n| pred(n))
}

impl InteractionState {
    pub fn new(registry: &TargetRegistry) -> Self {
        Self {
            group_active: vec![false; registry.hover_groups.len()],
            tracked: None,
        }
    }

    /// Decide what a primary press on `hits` (nearest first) does.
    pub fn on_click(&self, scene: &Scene, registry: &TargetRegistry, hits: &[Hit]) -> ClickAction {
        for hit in hits {
            for level in scene.ancestors(hit.node) {
                for link in &registry.links {
                    let Some(url) = &link.url else { continue };
                    if link.nodes.contains(&level) {
                        return ClickAction::OpenLink {
                            id: link.id.clone(),
                            url: url.clone(),
                        };
                    }
                }
            }
        }

        if let Some(lamp) = registry.lamp {
            if hits.iter().any(|h| chain_any(scene, h.node, |n| n == lamp)) {
                return ClickAction::ToggleLamp;
            }
        }

        ClickAction::None
    }

    /// Update hover state for a pointer move.
    ///
    /// `selectable` are hits against [`Purpose::Selectable`], `raycast` hits
    /// against [`Purpose::Raycast`], both nearest first. Group leave/enter
    /// events come in group order; a tracker change always emits the leave
    /// for the previous node before the enter for the new one.
    pub fn on_hover(
        &mut self,
        scene: &Scene,
        registry: &TargetRegistry,
        selectable: &[Hit],
        raycast: &[Hit],
    ) -> HoverUpdate {
        let mut update = HoverUpdate::default();
        if registry.candidates(Purpose::Selectable).is_empty() {
            return update;
        }

        update.inspected = selectable.first().map(|h| h.node);

        let clickable = selectable.iter().any(|h| {
            chain_any(scene, h.node, |n| {
                registry
                    .links
                    .iter()
                    .any(|l| l.url.is_some() && l.nodes.contains(&n))
            })
        });
        update.cursor = if clickable {
            Cursor::Clickable
        } else {
            Cursor::Default
        };

        self.group_active.resize(registry.hover_groups.len(), false);
        for (index, group) in registry.hover_groups.iter().enumerate() {
            let hovering = selectable
                .iter()
                .any(|h| chain_any(scene, h.node, |n| group.nodes.contains(&n)));
            if hovering != self.group_active[index] {
                self.group_active[index] = hovering;
                update.events.push(if hovering {
                    HoverEvent::GroupEntered(index)
                } else {
                    HoverEvent::GroupLeft(index)
                });
            }
        }

        let next = raycast
            .iter()
            .find_map(|h| classify(scene, h.node, |n| registry.is_raycast_target(n)));
        if next != self.tracked {
            if let Some(previous) = self.tracked {
                update.events.push(HoverEvent::TrackerLeft(previous));
            }
            if let Some(node) = next {
                update.events.push(HoverEvent::TrackerEntered(node));
            }
            self.tracked = next;
        }

        update
    }
}

/// Tooltip text for a hovered node: its name and up to
/// [`TOOLTIP_MAX_CHILDREN`] child names.
pub fn tooltip_lines(scene: &Scene, node: NodeId) -> Vec<String> {
    let Some(n) = scene.node(node) else {
        return Vec::new();
    };
    let display = |name: &str| {
        if name.is_empty() {
            "Object3D".to_string()
        } else {
            name.to_string()
        }
    };

    let mut lines = vec![format!("Object: {}", display(&n.name))];
    let names: Vec<String> = n
        .children
        .iter()
        .filter_map(|&c| scene.node(c))
        .map(|c| display(&c.name))
        .collect();

    if names.is_empty() {
        lines.push("Children: (none)".to_string());
    } else {
        lines.push(format!("Children ({}):", names.len()));
        lines.extend(
            names
                .iter()
                .take(TOOLTIP_MAX_CHILDREN)
                .map(|name| format!("- {name}")),
        );
        if names.len() > TOOLTIP_MAX_CHILDREN {
            lines.push(format!("… and {} more", names.len() - TOOLTIP_MAX_CHILDREN));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_targets;
    use crate::links::{open_link, RecordingOpener};
    use crate::math::{Ray, Transform};
    use crate::picking::Raycaster;
    use crate::scene::tests::add_cube;
    use glam::Vec3;

    /// A telegram badge (group `Cylinder005` with part `Cylinder005_1`), a lamp
    /// and a headset, lined up along -Z from the origin.
    struct Room {
        scene: Scene,
        registry: TargetRegistry,
        telegram_part: NodeId,
        lamp_part: NodeId,
        headset: NodeId,
        desk: NodeId,
    }

    fn room() -> Room {
        let mut scene = Scene::new();
        let badge = scene.add_node("Cylinder005", Transform::identity(), None);
        let telegram_part = add_cube(&mut scene, "Cylinder005_1", Vec3::new(0.0, 0.0, -3.0), Some(badge));
        let lamp_group = scene.add_node("Cylinder003", Transform::identity(), None);
        let lamp_part = add_cube(&mut scene, "Cylinder003_2", Vec3::new(4.0, 0.0, -3.0), Some(lamp_group));
        let headset = add_cube(&mut scene, "headset", Vec3::new(-4.0, 0.0, -3.0), None);
        let desk = add_cube(&mut scene, "Desk", Vec3::new(0.0, 4.0, -3.0), None);
        let registry = TargetRegistry::resolve(&scene, &default_targets());
        Room {
            scene,
            registry,
            telegram_part,
            lamp_part,
            headset,
            desk,
        }
    }

    fn hits_towards(room: &Room, point: Vec3, purpose: Purpose) -> Vec<Hit> {
        let ray = Ray::new(Vec3::ZERO, point);
        Raycaster::new(&room.scene).intersect(&ray, room.registry.candidates(purpose))
    }

    fn hover(room: &Room, state: &mut InteractionState, point: Vec3) -> HoverUpdate {
        let selectable = hits_towards(room, point, Purpose::Selectable);
        let raycast = hits_towards(room, point, Purpose::Raycast);
        state.on_hover(&room.scene, &room.registry, &selectable, &raycast)
    }

    #[test]
    fn clicking_telegram_part_opens_telegram_only() {
        let room = room();
        let state = InteractionState::new(&room.registry);
        let hits = hits_towards(&room, Vec3::new(0.0, 0.0, -3.0), Purpose::Selectable);
        assert_eq!(hits[0].node, room.telegram_part);

        let action = state.on_click(&room.scene, &room.registry, &hits);
        assert_eq!(
            action,
            ClickAction::OpenLink {
                id: "social-link:telegram".to_string(),
                url: "https://t.me/nomadicaddict".to_string(),
            }
        );

        let mut opener = RecordingOpener::default();
        if let ClickAction::OpenLink { url, .. } = &action {
            open_link(&mut opener, url);
        }
        assert_eq!(opener.opened, vec!["https://t.me/nomadicaddict"]);
    }

    #[test]
    fn clicking_lamp_toggles_it() {
        let room = room();
        let state = InteractionState::new(&room.registry);
        let hits = hits_towards(&room, Vec3::new(4.0, 0.0, -3.0), Purpose::Selectable);
        assert_eq!(hits[0].node, room.lamp_part);
        assert_eq!(
            state.on_click(&room.scene, &room.registry, &hits),
            ClickAction::ToggleLamp
        );
    }

    #[test]
    fn clicking_nothing_or_plain_mesh_does_nothing() {
        let room = room();
        let state = InteractionState::new(&room.registry);
        assert_eq!(state.on_click(&room.scene, &room.registry, &[]), ClickAction::None);
        let hits = hits_towards(&room, Vec3::new(0.0, 4.0, -3.0), Purpose::Selectable);
        assert_eq!(hits[0].node, room.desk);
        assert_eq!(state.on_click(&room.scene, &room.registry, &hits), ClickAction::None);
    }

    #[test]
    fn hovering_outside_groups_keeps_default_cursor() {
        let room = room();
        let mut state = InteractionState::new(&room.registry);
        let update = hover(&room, &mut state, Vec3::new(0.0, 4.0, -3.0));
        assert_eq!(update.cursor, Cursor::Default);
        assert!(update.events.is_empty());
        assert_eq!(update.inspected, Some(room.desk));

        let update = hover(&room, &mut state, Vec3::new(0.0, -4.0, -3.0));
        assert_eq!(update.inspected, None);
        assert!(update.events.is_empty());
    }

    #[test]
    fn hovering_link_shows_clickable_and_enters_group_once() {
        let room = room();
        let mut state = InteractionState::new(&room.registry);
        let telegram_group = room
            .registry
            .hover_groups
            .iter()
            .position(|g| g.nodes.contains(&room.telegram_part))
            .unwrap();

        let update = hover(&room, &mut state, Vec3::new(0.0, 0.0, -3.0));
        assert_eq!(update.cursor, Cursor::Clickable);
        assert_eq!(update.events, vec![HoverEvent::GroupEntered(telegram_group)]);
        assert!(state.group_active[telegram_group]);

        // Moving within the group does not re-enter.
        let update = hover(&room, &mut state, Vec3::new(0.1, 0.0, -3.0));
        assert!(update.events.is_empty());

        let update = hover(&room, &mut state, Vec3::new(0.0, 4.0, -3.0));
        assert_eq!(update.events, vec![HoverEvent::GroupLeft(telegram_group)]);
        assert_eq!(update.cursor, Cursor::Default);
    }

    #[test]
    fn tracker_leaves_before_entering() {
        let mut room = room();
        let plushie = add_cube(&mut room.scene, "plushie_1", Vec3::new(-4.0, 4.0, -3.0), None);
        room.registry = TargetRegistry::resolve(&room.scene, &default_targets());
        let mut state = InteractionState::new(&room.registry);

        let update = hover(&room, &mut state, Vec3::new(-4.0, 0.0, -3.0));
        assert_eq!(update.events, vec![HoverEvent::TrackerEntered(room.headset)]);

        let update = hover(&room, &mut state, Vec3::new(-4.0, 4.0, -3.0));
        assert_eq!(
            update.events,
            vec![
                HoverEvent::TrackerLeft(room.headset),
                HoverEvent::TrackerEntered(plushie)
            ]
        );

        let update = hover(&room, &mut state, Vec3::new(0.0, 4.0, -3.0));
        assert_eq!(update.events, vec![HoverEvent::TrackerLeft(plushie)]);
        assert_eq!(state.tracked, None);
    }

    #[test]
    fn no_model_means_no_hover_work() {
        let scene = Scene::new();
        let registry = TargetRegistry::resolve(&scene, &default_targets());
        let mut state = InteractionState::new(&registry);
        let update = state.on_hover(&scene, &registry, &[], &[]);
        assert_eq!(update, HoverUpdate::default());
    }

    #[test]
    fn tooltip_lists_at_most_twenty_children() {
        let mut scene = Scene::new();
        let shelf = scene.add_node("Shelf", Transform::identity(), None);
        for i in 0..23 {
            scene.add_node(format!("Book{i}"), Transform::identity(), Some(shelf));
        }
        let lines = tooltip_lines(&scene, shelf);
        assert_eq!(lines[0], "Object: Shelf");
        assert_eq!(lines[1], "Children (23):");
        assert_eq!(lines[2], "- Book0");
        assert_eq!(lines.len(), 2 + 20 + 1);
        assert_eq!(lines.last().unwrap(), "… and 3 more");

        let leaf = scene.add_node("Leaf", Transform::identity(), None);
        assert_eq!(tooltip_lines(&scene, leaf), vec!["Object: Leaf", "Children: (none)"]);
    }
}
