// Named interaction targets resolved against the loaded scene.

use std::collections::HashSet;

use log::{debug, warn};

use crate::config::{TargetEntry, TargetKind};
use crate::links::is_openable;
use crate::scene::{NodeId, Scene};

/// Which candidate set a raycast runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Every mesh in the model: clicks, hover groups, cursor, tooltip, focus.
    Selectable,
    /// Nodes tagged as raycast targets: the hover tracker.
    Raycast,
}

#[derive(Debug, Clone)]
pub struct SocialLink {
    pub id: String,
    /// `None` when the manifest had no usable URL; such links never match.
    pub url: Option<String>,
    pub nodes: HashSet<NodeId>,
}

#[derive(Debug, Clone)]
pub struct HoverGroup {
    pub id: String,
    pub nodes: Vec<NodeId>,
}

/// Resolved targets, grouped by behavior.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    pub links: Vec<SocialLink>,
    pub hover_groups: Vec<HoverGroup>,
    pub lamp: Option<NodeId>,
    raycast: Vec<NodeId>,
    selectable: Vec<NodeId>,
}

fn resolve_names(scene: &Scene, names: &[String]) -> Vec<NodeId> {
    let mut out = Vec::new();
    for name in names {
        match scene.find_by_name(name) {
            Some(id) if !out.contains(&id) => out.push(id),
            Some(_) => {}
            None => debug!("Target node {name:?} not in scene"),
        }
    }
    out
}

impl TargetRegistry {
    /// Resolve every manifest entry by exact node name. Missing names are
    /// skipped, so an entry may end up empty.
    pub fn resolve(scene: &Scene, entries: &[TargetEntry]) -> Self {
        let mut registry = TargetRegistry {
            selectable: scene.mesh_nodes(),
            ..Default::default()
        };

        for entry in entries {
            let nodes = resolve_names(scene, &entry.names);
            match &entry.kind {
                TargetKind::SocialLink { url } => {
                    let url = url.clone().filter(|u| {
                        let ok = is_openable(u);
                        if !ok {
                            warn!("Link target {} has malformed url {u:?}; disabled", entry.id);
                        }
                        ok
                    });
                    registry.links.push(SocialLink {
                        id: entry.id.clone(),
                        url,
                        nodes: nodes.into_iter().collect(),
                    });
                }
                TargetKind::HoverGroup => registry.hover_groups.push(HoverGroup {
                    id: entry.id.clone(),
                    nodes,
                }),
                TargetKind::Lamp => match (registry.lamp, nodes.first()) {
                    (None, Some(&first)) => registry.lamp = Some(first),
                    (Some(_), Some(_)) => debug!("Extra lamp target {} ignored", entry.id),
                    _ => {}
                },
                TargetKind::RaycastTarget => {
                    for n in nodes {
                        if !registry.raycast.contains(&n) {
                            registry.raycast.push(n);
                        }
                    }
                }
            }
        }

        debug!(
            "Resolved {} links, {} hover groups, lamp: {}, {} raycast targets",
            registry.links.len(),
            registry.hover_groups.len(),
            registry.lamp.is_some(),
            registry.raycast.len()
        );
        registry
    }

    pub fn candidates(&self, purpose: Purpose) -> &[NodeId] {
        match purpose {
            Purpose::Selectable => &self.selectable,
            Purpose::Raycast => &self.raycast,
        }
    }

    pub fn is_raycast_target(&self, node: NodeId) -> bool {
        self.raycast.contains(&node)
    }
}
