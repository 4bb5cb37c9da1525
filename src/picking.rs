// Pointer mapping and ray picking against the scene.

use std::collections::HashSet;

use glam::{Vec2, Vec3};
use winit::event::MouseScrollDelta;

use crate::camera::PerspectiveCamera;
use crate::math::Ray;
use crate::scene::{NodeId, Scene};

/// Pixels per wheel "line".
pub const LINE_HEIGHT: f32 = 16.0;

/// Drawable area of the window, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl CanvasRect {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }
}

/// Map a cursor position to normalized device coordinates, Y up. Positions
/// outside the canvas map outside [-1, 1].
pub fn pointer_to_ndc(cursor: Vec2, rect: &CanvasRect) -> Vec2 {
    let width = rect.width.max(1.0);
    let height = rect.height.max(1.0);
    Vec2::new(
        (cursor.x - rect.x) / width * 2.0 - 1.0,
        -((cursor.y - rect.y) / height) * 2.0 + 1.0,
    )
}

/// Wheel input in the unit it was reported in. Positive values scroll down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WheelDelta {
    Pixels(f32),
    Lines(f32),
    Pages(f32),
}

impl From<MouseScrollDelta> for WheelDelta {
    fn from(delta: MouseScrollDelta) -> Self {
        // winit reports scrolling up (away from the user) as positive.
        match delta {
            MouseScrollDelta::LineDelta(_, y) => WheelDelta::Lines(-y),
            MouseScrollDelta::PixelDelta(pos) => WheelDelta::Pixels(-pos.y as f32),
        }
    }
}

/// Wheel delta in pixels; positive zooms out.
pub fn normalize_wheel(delta: WheelDelta, canvas_height: f32) -> f32 {
    match delta {
        WheelDelta::Pixels(px) => px,
        WheelDelta::Lines(lines) => lines * LINE_HEIGHT,
        WheelDelta::Pages(pages) => pages * canvas_height,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub node: NodeId,
    pub distance: f32,
    pub point: Vec3,
}

/// Casts rays against a candidate set, descending into each candidate's subtree.
pub struct Raycaster<'a> {
    scene: &'a Scene,
}

impl<'a> Raycaster<'a> {
    pub fn new(scene: &'a Scene) -> Self {
        Self { scene }
    }

    /// Ray from the camera through `ndc`.
    pub fn camera_ray(camera: &PerspectiveCamera, target: Vec3, ndc: Vec2) -> Ray {
        camera.ray_through(target, ndc)
    }

    /// All hits on `candidates` and their descendants, nearest first.
    pub fn intersect(&self, ray: &Ray, candidates: &[NodeId]) -> Vec<Hit> {
        let mut visited = HashSet::new();
        let mut hits = Vec::new();

        for &candidate in candidates {
            for node in self.scene.descendants(candidate) {
                if !visited.insert(node) {
                    continue;
                }
                if let Some(hit) = self.intersect_node(ray, node) {
                    hits.push(hit);
                }
            }
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn intersect_node(&self, ray: &Ray, node: NodeId) -> Option<Hit> {
        let mesh = self
            .scene
            .node(node)
            .and_then(|n| n.mesh)
            .and_then(|m| self.scene.mesh(m))?;
        let world = self.scene.world_matrix(node);

        ray.intersect_aabb(&mesh.bounds.transformed(&world))?;

        let cull_back = !self
            .scene
            .material(mesh.material)
            .map(|m| m.double_sided)
            .unwrap_or(false);

        let mut nearest: Option<f32> = None;
        for [a, b, c] in mesh.triangles() {
            let (a, b, c) = (
                world.transform_point3(a),
                world.transform_point3(b),
                world.transform_point3(c),
            );
            if let Some(t) = ray.intersect_triangle(a, b, c, cull_back) {
                if nearest.map_or(true, |n| t < n) {
                    nearest = Some(t);
                }
            }
        }

        nearest.map(|distance| Hit {
            node,
            distance,
            point: ray.at(distance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::scene::tests::add_cube;
    use crate::scene::Material;
    use approx::assert_relative_eq;
    use winit::dpi::PhysicalPosition;

    fn rect() -> CanvasRect {
        CanvasRect::from_size(800, 600)
    }

    #[test]
    fn corners_map_to_ndc_corners() {
        let r = rect();
        assert_eq!(pointer_to_ndc(Vec2::new(0.0, 0.0), &r), Vec2::new(-1.0, 1.0));
        assert_eq!(pointer_to_ndc(Vec2::new(800.0, 600.0), &r), Vec2::new(1.0, -1.0));
        assert_eq!(pointer_to_ndc(Vec2::new(400.0, 300.0), &r), Vec2::ZERO);
    }

    #[test]
    fn outside_canvas_leaves_range() {
        let ndc = pointer_to_ndc(Vec2::new(-100.0, 700.0), &rect());
        assert!(ndc.x < -1.0);
        assert!(ndc.y < -1.0);
    }

    #[test]
    fn offset_canvas_is_respected() {
        let r = CanvasRect {
            x: 100.0,
            y: 50.0,
            width: 200.0,
            height: 100.0,
        };
        assert_eq!(pointer_to_ndc(Vec2::new(200.0, 100.0), &r), Vec2::ZERO);
    }

    #[test]
    fn wheel_units_become_pixels() {
        assert_relative_eq!(normalize_wheel(WheelDelta::Pixels(-12.0), 600.0), -12.0);
        assert_relative_eq!(normalize_wheel(WheelDelta::Lines(3.0), 600.0), 48.0);
        assert_relative_eq!(normalize_wheel(WheelDelta::Pages(1.0), 600.0), 600.0);
    }

    #[test]
    fn scrolling_down_zooms_out() {
        let down = WheelDelta::from(MouseScrollDelta::LineDelta(0.0, -1.0));
        assert!(normalize_wheel(down, 600.0) > 0.0);
        let up = WheelDelta::from(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 30.0)));
        assert!(normalize_wheel(up, 600.0) < 0.0);
    }

    #[test]
    fn hits_are_sorted_nearest_first() {
        let mut scene = Scene::new();
        let far = add_cube(&mut scene, "far", Vec3::new(0.0, 0.0, -10.0), None);
        let near = add_cube(&mut scene, "near", Vec3::new(0.0, 0.0, -5.0), None);
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);

        let hits = Raycaster::new(&scene).intersect(&ray, &[far, near]);
        assert_eq!(hits.iter().map(|h| h.node).collect::<Vec<_>>(), vec![near, far]);
        assert_relative_eq!(hits[0].distance, 4.5, epsilon = 1e-4);
        assert_relative_eq!(hits[0].point.z, -4.5, epsilon = 1e-4);
    }

    #[test]
    fn descendants_are_tested_once() {
        let mut scene = Scene::new();
        let group = scene.add_node("Cylinder005", Transform::identity(), None);
        let part = add_cube(&mut scene, "Cylinder005_1", Vec3::new(0.0, 0.0, -3.0), Some(group));
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);

        // The child appears both directly and through its parent.
        let hits = Raycaster::new(&scene).intersect(&ray, &[group, part]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node, part);
    }

    #[test]
    fn miss_returns_empty() {
        let mut scene = Scene::new();
        let cube = add_cube(&mut scene, "cube", Vec3::new(5.0, 0.0, -3.0), None);
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        assert!(Raycaster::new(&scene).intersect(&ray, &[cube]).is_empty());
        assert!(Raycaster::new(&scene).intersect(&ray, &[]).is_empty());
    }

    #[test]
    fn back_faces_only_hit_when_double_sided() {
        let mut scene = Scene::new();
        let cube = add_cube(&mut scene, "room", Vec3::ZERO, None);
        // From inside the cube every face points away from the ray.
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        assert!(Raycaster::new(&scene).intersect(&ray, &[cube]).is_empty());

        let material = scene.meshes[0].material;
        *scene.material_mut(material).unwrap() = Material {
            double_sided: true,
            ..Material::default()
        };
        let hits = Raycaster::new(&scene).intersect(&ray, &[cube]);
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0].distance, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn camera_ray_hits_object_at_target() {
        let mut scene = Scene::new();
        let target = Vec3::new(0.7, 1.9, -1.0);
        let cube = add_cube(&mut scene, "desk", target, None);
        let camera = PerspectiveCamera {
            fov: 22.0,
            aspect: 1.6,
            near: 0.1,
            far: 100.0,
            position: Vec3::new(7.0, 10.0, 9.0),
        };
        let ray = Raycaster::camera_ray(&camera, target, Vec2::ZERO);
        let hits = Raycaster::new(&scene).intersect(&ray, &[cube]);
        assert_eq!(hits.first().map(|h| h.node), Some(cube));
    }
}
