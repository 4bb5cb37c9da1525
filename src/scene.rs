// Scene module for the portfolio viewer

use glam::{Mat4, Vec3, Vec4};

use crate::math::{Aabb, Transform};

/// Index of a node in the scene arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightId(pub usize);

/// Represents an object within the 3D scene.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub transform: Transform,
    /// Transform captured when the node was created; "restore" targets this.
    pub initial: Transform,
    pub mesh: Option<MeshId>,
}

/// Triangle geometry in node-local space.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub material: MaterialId,
    pub bounds: Aabb,
    /// Whether the primitive carried `TEXCOORD_0`.
    pub has_uvs: bool,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, normals: Vec<Vec3>, indices: Vec<u32>, material: MaterialId) -> Self {
        let bounds = Aabb::from_points(positions.iter().copied());
        Self {
            positions,
            normals,
            indices,
            material,
            bounds,
            has_uvs: false,
        }
    }

    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            let a = *self.positions.get(tri[0] as usize)?;
            let b = *self.positions.get(tri[1] as usize)?;
            let c = *self.positions.get(tri[2] as usize)?;
            Some([a, b, c])
        })
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub double_sided: bool,
    /// Emissive color and intensity before anything tweened them.
    pub original_emissive: Option<(Vec3, f32)>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            double_sided: false,
            original_emissive: None,
        }
    }
}

impl Material {
    /// Remember the current emissive state unless it was already captured.
    pub fn capture_original_emissive(&mut self) -> (Vec3, f32) {
        *self
            .original_emissive
            .get_or_insert((self.emissive, self.emissive_intensity))
    }
}

/// A point light parented to a scene node.
#[derive(Debug, Clone)]
pub struct PointLight {
    pub node: NodeId,
    pub color: Vec3,
    pub intensity: f32,
    pub distance: f32,
    pub decay: f32,
}

/// Represents the entire 3D scene.
#[derive(Debug, Default, Clone)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub lights: Vec<PointLight>,
    pub roots: Vec<NodeId>,
}

impl Scene {
    /// Creates a new, empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node under `parent` (or as a root) and returns its id.
    pub fn add_node(&mut self, name: impl Into<String>, transform: Transform, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SceneNode {
            name: name.into(),
            parent,
            children: Vec::new(),
            transform,
            initial: transform,
            mesh: None,
        });
        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn attach_mesh(&mut self, node: NodeId, mesh: MeshId) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.mesh = Some(mesh);
        }
    }

    pub fn add_point_light(&mut self, light: PointLight) -> LightId {
        self.lights.push(light);
        LightId(self.lights.len() - 1)
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0)
    }

    pub fn light(&self, id: LightId) -> Option<&PointLight> {
        self.lights.get(id.0)
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut PointLight> {
        self.lights.get_mut(id.0)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First node with this exact name in depth-first order from the roots.
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.roots
            .iter()
            .flat_map(|&root| self.descendants(root))
            .find(|&id| self.nodes[id.0].name == name)
    }

    /// The node itself followed by its ancestors up to the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            scene: self,
            next: self.node(id).map(|_| id),
        }
    }

    /// Depth-first pre-order walk of `id` and everything below it.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.node(id).is_none() {
            return out;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let children = &self.nodes[current.0].children;
            stack.extend(children.iter().rev().copied());
        }
        out
    }

    /// Every node that carries a mesh, in depth-first order.
    pub fn mesh_nodes(&self) -> Vec<NodeId> {
        self.roots
            .iter()
            .flat_map(|&root| self.descendants(root))
            .filter(|&id| self.nodes[id.0].mesh.is_some())
            .collect()
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        self.ancestors(id)
            .fold(Mat4::IDENTITY, |acc, n| self.nodes[n.0].transform.matrix() * acc)
    }

    pub fn world_position(&self, id: NodeId) -> Vec3 {
        self.world_matrix(id).transform_point3(Vec3::ZERO)
    }

    /// World-space box around every mesh in the subtree rooted at `id`.
    pub fn world_bounds(&self, id: NodeId) -> Aabb {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| {
                let mesh = self.nodes[n.0].mesh.and_then(|m| self.mesh(m))?;
                Some(mesh.bounds.transformed(&self.world_matrix(n)))
            })
            .fold(Aabb::EMPTY, |acc, b| acc.union(&b))
    }

    /// Materials used by meshes in the subtree, without duplicates.
    pub fn subtree_materials(&self, id: NodeId) -> Vec<MaterialId> {
        let mut out: Vec<MaterialId> = Vec::new();
        for n in self.descendants(id) {
            let material = self.nodes[n.0]
                .mesh
                .and_then(|m| self.mesh(m))
                .map(|m| m.material);
            if let Some(material) = material {
                if !out.contains(&material) {
                    out.push(material);
                }
            }
        }
        out
    }
}

/// Iterator over a node and its ancestors.
pub struct Ancestors<'a> {
    scene: &'a Scene,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.scene.node(current).and_then(|n| n.parent);
        Some(current)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;

    /// A unit cube centred on the origin, counter-clockwise faces pointing out.
    pub(crate) fn cube_mesh(material: MaterialId) -> Mesh {
        let p = [
            Vec3::new(-0.5, -0.5, -0.5),
            Vec3::new(0.5, -0.5, -0.5),
            Vec3::new(0.5, 0.5, -0.5),
            Vec3::new(-0.5, 0.5, -0.5),
            Vec3::new(-0.5, -0.5, 0.5),
            Vec3::new(0.5, -0.5, 0.5),
            Vec3::new(0.5, 0.5, 0.5),
            Vec3::new(-0.5, 0.5, 0.5),
        ];
        #[rustfmt::skip]
        let indices = vec![
            4, 5, 6, 6, 7, 4, // +z
            1, 0, 3, 3, 2, 1, // -z
            5, 1, 2, 2, 6, 5, // +x
            0, 4, 7, 7, 3, 0, // -x
            7, 6, 2, 2, 3, 7, // +y
            0, 1, 5, 5, 4, 0, // -y
        ];
        let normals = p.iter().map(|v| v.normalize()).collect();
        Mesh::new(p.to_vec(), normals, indices, material)
    }

    /// Adds a named cube node at `position` under `parent`.
    pub(crate) fn add_cube(scene: &mut Scene, name: &str, position: Vec3, parent: Option<NodeId>) -> NodeId {
        let material = scene.add_material(Material {
            name: format!("{name}-mat"),
            ..Material::default()
        });
        let mesh = scene.add_mesh(cube_mesh(material));
        let node = scene.add_node(
            name,
            Transform::new(position, Quat::IDENTITY, Vec3::ONE),
            parent,
        );
        scene.attach_mesh(node, mesh);
        node
    }

    #[test]
    fn find_by_name_returns_first_depth_first_match() {
        let mut scene = Scene::new();
        let root = scene.add_node("root", Transform::identity(), None);
        let a = scene.add_node("dup", Transform::identity(), Some(root));
        let _b = scene.add_node("dup", Transform::identity(), Some(root));
        assert_eq!(scene.find_by_name("dup"), Some(a));
        assert_eq!(scene.find_by_name("missing"), None);
    }

    #[test]
    fn ancestors_walk_to_root() {
        let mut scene = Scene::new();
        let root = scene.add_node("root", Transform::identity(), None);
        let mid = scene.add_node("mid", Transform::identity(), Some(root));
        let leaf = scene.add_node("leaf", Transform::identity(), Some(mid));
        let chain: Vec<_> = scene.ancestors(leaf).collect();
        assert_eq!(chain, vec![leaf, mid, root]);
    }

    #[test]
    fn world_bounds_include_parent_transform() {
        let mut scene = Scene::new();
        let root = scene.add_node(
            "root",
            Transform::new(Vec3::new(10.0, 0.0, 0.0), Quat::IDENTITY, Vec3::splat(2.0)),
            None,
        );
        add_cube(&mut scene, "cube", Vec3::new(1.0, 0.0, 0.0), Some(root));
        let bounds = scene.world_bounds(root);
        assert_relative_eq!(bounds.center().x, 12.0);
        assert_relative_eq!(bounds.size().x, 2.0);
    }

    #[test]
    fn node_without_meshes_has_empty_bounds() {
        let mut scene = Scene::new();
        let root = scene.add_node("empty", Transform::identity(), None);
        assert!(scene.world_bounds(root).is_empty());
    }

    #[test]
    fn original_emissive_is_captured_once() {
        let mut material = Material {
            emissive: Vec3::new(0.1, 0.2, 0.3),
            emissive_intensity: 0.5,
            ..Material::default()
        };
        material.capture_original_emissive();
        material.emissive = Vec3::ONE;
        material.emissive_intensity = 3.0;
        let (color, intensity) = material.capture_original_emissive();
        assert_eq!(color, Vec3::new(0.1, 0.2, 0.3));
        assert_relative_eq!(intensity, 0.5);
    }
}
