//! Ray picking against the CPU-side scene.
//!
//! A tap becomes a ray from the camera. The loaded model's triangles are
//! tested first; until a model is installed the placeholder is the only
//! pickable thing. A hit on any mesh resolves to the top-level node that owns
//! it, so selection always highlights a whole unit of the model.

use crate::scene::{Aabb, ModelAsset, Placeholder, Scene, SelectionTarget};
use glam::{Mat4, Vec2, Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self { origin, dir }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.dir * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    pub target: SelectionTarget,
    /// Node whose mesh was actually hit; None for the placeholder.
    pub mesh_node: Option<usize>,
    pub distance: f32,
    pub point: Vec3,
}

/// Viewport pixel to normalized device coordinates, +Y up.
pub fn screen_to_ndc(x: f32, y: f32, width: f32, height: f32) -> Option<Vec2> {
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    Some(Vec2::new(x / width * 2.0 - 1.0, -(y / height) * 2.0 + 1.0))
}

/// Möller-Trumbore, both faces. Returns the ray parameter of the hit.
pub fn ray_triangle(ray: &Ray, triangle: &[Vec3; 3]) -> Option<f32> {
    const EPSILON: f32 = 1e-7;
    let [a, b, c] = *triangle;
    let edge1 = b - a;
    let edge2 = c - a;
    let p = ray.dir.cross(edge2);
    let det = edge1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = ray.dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    (t > EPSILON).then_some(t)
}

fn nearest_in_mesh(
    ray: &Ray,
    world: &Mat4,
    local_bounds: &Aabb,
    triangles: impl Iterator<Item = [Vec3; 3]>,
) -> Option<f32> {
    let bounds = local_bounds.transformed(world);
    bounds.ray_intersection(ray.origin, ray.dir)?;
    triangles
        .filter_map(|tri| {
            let world_tri = tri.map(|v| world.transform_point3(v));
            ray_triangle(ray, &world_tri)
        })
        .min_by(|a, b| a.total_cmp(b))
}

fn pick_model(model: &ModelAsset, ray: &Ray) -> Option<PickHit> {
    let worlds = model.world_matrices();
    let mut best: Option<(usize, f32)> = None;
    for (index, node) in model.nodes.iter().enumerate() {
        let world = &worlds[index];
        for primitive in &node.primitives {
            let Some(geometry) = model.geometries.get(primitive.geometry) else {
                continue;
            };
            if let Some(t) = nearest_in_mesh(ray, world, &geometry.bounds, geometry.triangles()) {
                if best.map_or(true, |(_, best_t)| t < best_t) {
                    best = Some((index, t));
                }
            }
        }
    }
    best.map(|(node, t)| PickHit {
        target: SelectionTarget::ModelNode(model.top_level_ancestor(node)),
        mesh_node: Some(node),
        distance: t,
        point: ray.at(t),
    })
}

fn pick_placeholder(placeholder: &Placeholder, ray: &Ray) -> Option<PickHit> {
    let world = placeholder.transform.matrix();
    let geometry = &placeholder.geometry;
    let t = nearest_in_mesh(ray, &world, &geometry.bounds, geometry.triangles())?;
    Some(PickHit {
        target: SelectionTarget::Placeholder,
        mesh_node: None,
        distance: t,
        point: ray.at(t),
    })
}

/// Nearest hit along `ray`. The model takes precedence once installed.
pub fn pick(scene: &Scene, ray: &Ray) -> Option<PickHit> {
    if let Some(model) = &scene.model {
        return pick_model(model, ray);
    }
    scene
        .placeholder
        .as_ref()
        .filter(|placeholder| placeholder.visible)
        .and_then(|placeholder| pick_placeholder(placeholder, ray))
}
