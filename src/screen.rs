// The monitor mesh that would carry the intro video. Frames are never
// decoded; the mesh is only located so a model that cannot take a video
// texture is reported when it loads.

use log::{info, warn};
use thiserror::Error;

use crate::scene::{MeshId, NodeId, Scene};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScreenError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("no mesh under object: {0}")]
    NoMesh(String),
    #[error("mesh has no UVs: {0}")]
    NoUvs(String),
}

/// The first mesh at or below the node called `name`, if it has texture
/// coordinates.
pub fn find_screen_mesh(scene: &Scene, name: &str) -> Result<(NodeId, MeshId), ScreenError> {
    let root = scene
        .find_by_name(name)
        .ok_or_else(|| ScreenError::NotFound(name.to_string()))?;
    let (node, mesh_id) = scene
        .descendants(root)
        .into_iter()
        .find_map(|id| Some((id, scene.node(id)?.mesh?)))
        .ok_or_else(|| ScreenError::NoMesh(name.to_string()))?;

    let has_uvs = scene.mesh(mesh_id).is_some_and(|m| m.has_uvs);
    if !has_uvs {
        let mesh_name = scene.node(node).map_or(name, |n| n.name.as_str());
        return Err(ScreenError::NoUvs(mesh_name.to_string()));
    }
    Ok((node, mesh_id))
}

/// Log whether the screen mesh could show a video.
pub fn check_screen(scene: &Scene, name: &str) -> Option<NodeId> {
    match find_screen_mesh(scene, name) {
        Ok((node, _)) => {
            info!("Screen mesh {name} found; video playback is not supported");
            Some(node)
        }
        Err(err) => {
            warn!("Screen video unavailable: {err}");
            None
        }
    }
}
