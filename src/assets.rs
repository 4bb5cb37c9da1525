//! Model loading.
//!
//! Reads a glTF/GLB file into a [`Scene`] plus its animation clips. Node
//! names are normalized so they stay stable handles for parts of the model:
//! names are sanitized, duplicates get a
//! `_N` suffix, and a mesh with several primitives becomes a group node with
//! one child node per primitive.
//!
//! [`spawn_load`] does the work on a blocking tokio task and reports progress
//! over a channel.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use glam::{Quat, Vec3, Vec4};
use gltf::animation::util::ReadOutputs;
use gltf::mesh::util::ReadIndices;
use log::{debug, error, info};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::clips::{AnimationClip, Interpolation, Property, Track};
use crate::math::Transform;
use crate::scene::{Material, MaterialId, Mesh, NodeId, Scene};

const READ_CHUNK: usize = 64 * 1024;

/// Mesh compression extensions the loader has no decoder for.
const UNSUPPORTED_COMPRESSION: &[&str] = &["KHR_draco_mesh_compression", "EXT_meshopt_compression"];

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid glTF: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("glTF document has no scenes")]
    NoScene,
    #[error("model requires `{0}`, which this build cannot decode; re-export it without mesh compression")]
    UnsupportedCompression(String),
    #[error("loader task failed: {0}")]
    Task(String),
}

/// A parsed model ready to display.
#[derive(Debug)]
pub struct LoadedModel {
    pub scene: Scene,
    pub clips: Vec<AnimationClip>,
}

#[derive(Debug)]
pub enum LoadEvent {
    /// Fraction of the file read so far, in [0, 1].
    Progress(f32),
    Loaded(Box<LoadedModel>),
    Failed(String),
}

/// Sanitized, de-duplicated node names.
#[derive(Debug, Default)]
struct NameRegistry {
    used: HashMap<String, usize>,
}

impl NameRegistry {
    fn sanitize(name: &str) -> String {
        name.chars()
            .filter(|c| !matches!(c, '[' | ']' | '.' | ':' | '/'))
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect()
    }

    fn unique(&mut self, name: &str) -> String {
        let base = Self::sanitize(name);
        match self.used.get_mut(&base) {
            Some(count) => {
                *count += 1;
                format!("{base}_{count}")
            }
            None => {
                self.used.insert(base.clone(), 0);
                base
            }
        }
    }
}

struct Builder<'a> {
    buffers: &'a [gltf::buffer::Data],
    scene: Scene,
    names: NameRegistry,
    materials: HashMap<Option<usize>, MaterialId>,
    node_map: HashMap<usize, NodeId>,
}

impl<'a> Builder<'a> {
    fn new(buffers: &'a [gltf::buffer::Data]) -> Self {
        Self {
            buffers,
            scene: Scene::new(),
            names: NameRegistry::default(),
            materials: HashMap::new(),
            node_map: HashMap::new(),
        }
    }

    fn material(&mut self, material: gltf::Material<'_>) -> MaterialId {
        let key = material.index();
        if let Some(&id) = self.materials.get(&key) {
            return id;
        }
        let pbr = material.pbr_metallic_roughness();
        let id = self.scene.add_material(Material {
            name: material.name().unwrap_or_default().to_string(),
            base_color: Vec4::from(pbr.base_color_factor()),
            emissive: Vec3::from(material.emissive_factor()),
            emissive_intensity: 1.0,
            double_sided: material.double_sided(),
            original_emissive: None,
        });
        self.materials.insert(key, id);
        id
    }

    fn primitive_mesh(&mut self, primitive: &gltf::Primitive<'_>) -> Option<Mesh> {
        let buffers = self.buffers;
        let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
        let positions: Vec<Vec3> = reader.read_positions()?.map(Vec3::from).collect();
        let indices: Vec<u32> = match reader.read_indices() {
            Some(ReadIndices::U8(it)) => it.map(u32::from).collect(),
            Some(ReadIndices::U16(it)) => it.map(u32::from).collect(),
            Some(ReadIndices::U32(it)) => it.collect(),
            None => (0..positions.len() as u32).collect(),
        };
        let normals: Vec<Vec3> = match reader.read_normals() {
            Some(it) => it.map(Vec3::from).collect(),
            None => vertex_normals(&positions, &indices),
        };
        let material = self.material(primitive.material());
        let mut mesh = Mesh::new(positions, normals, indices, material);
        mesh.has_uvs = reader.read_tex_coords(0).is_some();
        Some(mesh)
    }

    fn add_node(&mut self, node: gltf::Node<'_>, parent: Option<NodeId>) {
        let (t, r, s) = node.transform().decomposed();
        let transform = Transform::new(Vec3::from(t), Quat::from_array(r), Vec3::from(s));
        let raw_name = node.name().unwrap_or_default();
        let name = if raw_name.is_empty() {
            String::new()
        } else {
            self.names.unique(raw_name)
        };
        let id = self.scene.add_node(name, transform, parent);
        self.node_map.insert(node.index(), id);

        if let Some(mesh) = node.mesh() {
            let primitives: Vec<_> = mesh.primitives().collect();
            if primitives.len() == 1 {
                if let Some(m) = self.primitive_mesh(&primitives[0]) {
                    let mesh_id = self.scene.add_mesh(m);
                    self.scene.attach_mesh(id, mesh_id);
                }
            } else {
                let base = mesh
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
                for primitive in &primitives {
                    let Some(m) = self.primitive_mesh(primitive) else {
                        continue;
                    };
                    let child_name = self.names.unique(&base);
                    let child = self.scene.add_node(child_name, Transform::identity(), Some(id));
                    let mesh_id = self.scene.add_mesh(m);
                    self.scene.attach_mesh(child, mesh_id);
                }
            }
        }

        for child in node.children() {
            self.add_node(child, Some(id));
        }
    }

    fn clips(&self, document: &gltf::Document) -> Vec<AnimationClip> {
        let buffers = self.buffers;
        let mut clips = Vec::new();
        for (index, animation) in document.animations().enumerate() {
            let mut tracks = Vec::new();
            for channel in animation.channels() {
                let Some(&node) = self.node_map.get(&channel.target().node().index()) else {
                    continue;
                };
                let reader = channel.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
                let Some(inputs) = reader.read_inputs() else {
                    continue;
                };
                let times: Vec<f32> = inputs.collect();
                let Some(outputs) = reader.read_outputs() else {
                    continue;
                };
                let (property, values): (Property, Vec<Vec4>) = match outputs {
                    ReadOutputs::Translations(it) => (
                        Property::Translation,
                        it.map(|v| Vec3::from(v).extend(0.0)).collect(),
                    ),
                    ReadOutputs::Rotations(it) => (
                        Property::Rotation,
                        it.into_f32().map(Vec4::from).collect(),
                    ),
                    ReadOutputs::Scales(it) => (
                        Property::Scale,
                        it.map(|v| Vec3::from(v).extend(0.0)).collect(),
                    ),
                    ReadOutputs::MorphTargetWeights(_) => continue,
                };
                let interpolation = match channel.sampler().interpolation() {
                    gltf::animation::Interpolation::Linear => Interpolation::Linear,
                    gltf::animation::Interpolation::Step => Interpolation::Step,
                    gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
                };
                tracks.push(Track {
                    node,
                    property,
                    interpolation,
                    times,
                    values,
                });
            }
            let name = animation
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("animation_{index}"));
            clips.push(AnimationClip::new(name, tracks));
        }
        clips
    }
}

/// Area-weighted vertex normals for meshes that don't carry their own.
fn vertex_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

fn build(document: &gltf::Document, buffers: &[gltf::buffer::Data]) -> Result<LoadedModel, AssetError> {
    let gltf_scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or(AssetError::NoScene)?;

    let mut builder = Builder::new(buffers);
    for node in gltf_scene.nodes() {
        builder.add_node(node, None);
    }
    let clips = builder.clips(document);

    // Capture the load-time pose for every "restore" behavior.
    for node in &mut builder.scene.nodes {
        node.initial = node.transform;
    }

    info!(
        "Model has {} nodes, {} meshes, {} materials, {} clips",
        builder.scene.nodes.len(),
        builder.scene.meshes.len(),
        builder.scene.materials.len(),
        clips.len()
    );
    Ok(LoadedModel {
        scene: builder.scene,
        clips,
    })
}

/// Parse a GLB or self-contained glTF held in memory.
pub fn load_from_bytes(bytes: &[u8]) -> Result<LoadedModel, AssetError> {
    reject_compressed(bytes)?;
    let (document, buffers, _images) = gltf::import_slice(bytes)?;
    build(&document, &buffers)
}

/// Load from disk. `.gltf` files may reference buffers next to them.
pub fn load_from_path(path: &Path) -> Result<LoadedModel, AssetError> {
    let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    reject_compressed(&bytes)?;
    let (document, buffers, _images) = gltf::import(path)?;
    build(&document, &buffers)
}

/// The gltf crate refuses unknown required extensions with a generic
/// validation error; name the compression extension instead.
fn reject_compressed(bytes: &[u8]) -> Result<(), AssetError> {
    let Ok(gltf) = gltf::Gltf::from_slice_without_validation(bytes) else {
        // Let the full import report the parse error.
        return Ok(());
    };
    let required = gltf
        .extensions_required()
        .find(|ext| UNSUPPORTED_COMPRESSION.contains(ext));
    match required {
        Some(ext) => {
            error!("Model uses {ext} mesh compression, which is not supported");
            Err(AssetError::UnsupportedCompression(ext.to_string()))
        }
        None => Ok(()),
    }
}

fn read_with_progress(
    path: &Path,
    mut progress: impl FnMut(f32),
) -> Result<Vec<u8>, AssetError> {
    let io_err = |source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let total = file.metadata().map(|m| m.len() as usize).unwrap_or(0);

    let mut bytes = Vec::with_capacity(total);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut chunk).map_err(io_err)?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
        if total > 0 {
            progress((bytes.len() as f32 / total as f32).min(1.0));
        }
    }
    progress(1.0);
    Ok(bytes)
}

fn load_blocking(path: &Path, tx: &UnboundedSender<LoadEvent>) -> Result<LoadedModel, AssetError> {
    let is_gltf_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gltf"));
    if is_gltf_json {
        // External buffers are resolved relative to the file.
        let model = load_from_path(path)?;
        let _ = tx.send(LoadEvent::Progress(1.0));
        return Ok(model);
    }
    let bytes = read_with_progress(path, |p| {
        let _ = tx.send(LoadEvent::Progress(p));
    })?;
    load_from_bytes(&bytes)
}

/// Load `path` on the runtime's blocking pool. The receiver yields progress
/// updates followed by exactly one `Loaded` or `Failed`.
pub fn spawn_load(handle: &Handle, path: PathBuf) -> UnboundedReceiver<LoadEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = handle.spawn_blocking({
        let tx = tx.clone();
        move || {
            debug!("Loading model from {}", path.display());
            load_blocking(&path, &tx)
        }
    });
    handle.spawn(async move {
        let event = match task.await {
            Ok(Ok(model)) => LoadEvent::Loaded(Box::new(model)),
            Ok(Err(err)) => {
                error!("Model load failed: {err}");
                LoadEvent::Failed(err.to_string())
            }
            Err(join) => {
                let err = AssetError::Task(join.to_string());
                error!("Model load failed: {err}");
                LoadEvent::Failed(err.to_string())
            }
        };
        let _ = tx.send(event);
    });
    rx
}
