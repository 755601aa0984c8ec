mod bounds;

pub use bounds::Aabb;

use glam::{Mat4, Quat, Vec2, Vec3};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique id for a GPU-side resource.
pub fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A GPU-side resource the renderer may hold and must be told to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Geometry(u64),
    Texture(u64),
    Material(u64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_trs(translation: [f32; 3], rotation: [f32; 4], scale: [f32; 3]) -> Self {
        Self {
            translation: Vec3::from(translation),
            rotation: Quat::from_array(rotation),
            scale: Vec3::from(scale),
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Triangle geometry. Non-indexed input is stored with a generated index list.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub id: u64,
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// First texture coordinate set, one per position when present.
    pub uvs: Option<Vec<Vec2>>,
    pub bounds: Aabb,
}

impl Geometry {
    pub fn new(positions: Vec<Vec3>, indices: Option<Vec<u32>>) -> Self {
        let indices = indices.unwrap_or_else(|| (0..positions.len() as u32).collect());
        let bounds = Aabb::from_points(positions.iter().copied());
        Self {
            id: next_resource_id(),
            positions,
            indices,
            uvs: None,
            bounds,
        }
    }

    /// Attach texture coordinates. A set whose length does not match the
    /// positions is dropped.
    pub fn with_uvs(mut self, uvs: Option<Vec<Vec2>>) -> Self {
        self.uvs = uvs.filter(|uvs| uvs.len() == self.positions.len());
        self
    }

    pub fn unit_cube() -> Self {
        let h = 0.5;
        let positions = vec![
            Vec3::new(-h, -h, -h),
            Vec3::new(h, -h, -h),
            Vec3::new(h, h, -h),
            Vec3::new(-h, h, -h),
            Vec3::new(-h, -h, h),
            Vec3::new(h, -h, h),
            Vec3::new(h, h, h),
            Vec3::new(-h, h, h),
        ];
        let indices = vec![
            0, 2, 1, 0, 3, 2, // back
            4, 5, 6, 4, 6, 7, // front
            0, 1, 5, 0, 5, 4, // bottom
            3, 6, 2, 3, 7, 6, // top
            0, 4, 7, 0, 7, 3, // left
            1, 2, 6, 1, 6, 5, // right
        ];
        Self::new(positions, Some(indices))
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Triangles in local space. Out-of-range indices are skipped.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            Some([
                *self.positions.get(tri[0] as usize)?,
                *self.positions.get(tri[1] as usize)?,
                *self.positions.get(tri[2] as usize)?,
            ])
        })
    }
}

/// Material texture slots a glTF material can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    BaseColor,
    Normal,
    Occlusion,
    Emissive,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 4] = [
        TextureSlot::BaseColor,
        TextureSlot::Normal,
        TextureSlot::Occlusion,
        TextureSlot::Emissive,
    ];

    /// Slots carrying color data are sampled as sRGB.
    pub fn is_color(self) -> bool {
        matches!(self, TextureSlot::BaseColor | TextureSlot::Emissive)
    }
}

#[derive(Debug, Clone)]
pub struct Material {
    pub id: u64,
    pub name: String,
    pub base_color: [f32; 4],
    pub base_color_map: Option<usize>,
    pub normal_map: Option<usize>,
    pub occlusion_map: Option<usize>,
    pub emissive_map: Option<usize>,
}

impl Material {
    pub fn new(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self {
            id: next_resource_id(),
            name: name.into(),
            base_color,
            base_color_map: None,
            normal_map: None,
            occlusion_map: None,
            emissive_map: None,
        }
    }

    pub fn slot(&self, slot: TextureSlot) -> Option<usize> {
        match slot {
            TextureSlot::BaseColor => self.base_color_map,
            TextureSlot::Normal => self.normal_map,
            TextureSlot::Occlusion => self.occlusion_map,
            TextureSlot::Emissive => self.emissive_map,
        }
    }

    pub fn set_slot(&mut self, slot: TextureSlot, texture: Option<usize>) {
        match slot {
            TextureSlot::BaseColor => self.base_color_map = texture,
            TextureSlot::Normal => self.normal_map = texture,
            TextureSlot::Occlusion => self.occlusion_map = texture,
            TextureSlot::Emissive => self.emissive_map = texture,
        }
    }
}

/// Decoded RGBA8 texture.
#[derive(Debug, Clone)]
pub struct Texture {
    pub id: u64,
    pub image_index: usize,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub flip_y: bool,
    pub srgb: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshPrimitive {
    pub geometry: usize,
    pub material: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub transform: Transform,
    pub primitives: Vec<MeshPrimitive>,
}

/// A decoded model: node hierarchy plus the arenas its meshes point into.
/// `transform` is the model root's transform in the scene and carries the
/// view rotation. `pivot` sits between the root and the glTF root nodes and
/// holds the normalization offset, so rotation turns about the normalized
/// center.
#[derive(Debug, Clone, Default)]
pub struct ModelAsset {
    pub name: String,
    pub nodes: Vec<Node>,
    pub roots: Vec<usize>,
    pub geometries: Vec<Geometry>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub transform: Transform,
    pub pivot: Transform,
}

impl ModelAsset {
    pub fn add_node(&mut self, node: Node) -> usize {
        let index = self.nodes.len();
        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.push(index);
            }
        } else {
            self.roots.push(index);
        }
        self.nodes.push(node);
        index
    }

    /// World matrix of every node, indexed like `nodes`.
    pub fn world_matrices(&self) -> Vec<Mat4> {
        let mut worlds = vec![Mat4::IDENTITY; self.nodes.len()];
        let root_world = self.transform.matrix() * self.pivot.matrix();
        let mut stack: Vec<(usize, Mat4)> =
            self.roots.iter().map(|&root| (root, root_world)).collect();
        while let Some((index, parent_world)) = stack.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            let world = parent_world * node.transform.matrix();
            worlds[index] = world;
            stack.extend(node.children.iter().map(|&child| (child, world)));
        }
        worlds
    }

    /// World-space bounds of the subtree rooted at `node`.
    pub fn node_bounds(&self, node: usize, worlds: &[Mat4]) -> Aabb {
        let mut bounds = Aabb::empty();
        let mut stack = vec![node];
        while let Some(index) = stack.pop() {
            let Some(current) = self.nodes.get(index) else {
                continue;
            };
            let world = worlds.get(index).copied().unwrap_or(Mat4::IDENTITY);
            for primitive in &current.primitives {
                if let Some(geometry) = self.geometries.get(primitive.geometry) {
                    bounds = bounds.union(&geometry.bounds.transformed(&world));
                }
            }
            stack.extend(current.children.iter().copied());
        }
        bounds
    }

    pub fn bounds(&self) -> Aabb {
        let worlds = self.world_matrices();
        self.roots
            .iter()
            .fold(Aabb::empty(), |acc, &root| acc.union(&self.node_bounds(root, &worlds)))
    }

    /// Walk up the parent chain to the node directly under the model root.
    pub fn top_level_ancestor(&self, mut node: usize) -> usize {
        while let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) {
            node = parent;
        }
        node
    }

    pub fn mesh_count(&self) -> usize {
        self.nodes.iter().map(|node| node.primitives.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Ambient { color: [f32; 3], intensity: f32 },
    Directional { color: [f32; 3], intensity: f32, direction: [f32; 3] },
}

/// Stand-in cube shown until a model is installed (or forever, if loading fails).
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub transform: Transform,
    pub geometry: Geometry,
    pub material: Material,
    pub visible: bool,
}

impl Placeholder {
    pub fn cube() -> Self {
        Self {
            transform: Transform::default(),
            geometry: Geometry::unit_cube(),
            material: Material::new("placeholder", [0.6, 0.6, 0.65, 1.0]),
            visible: true,
        }
    }

    pub fn bounds(&self) -> Aabb {
        self.geometry.bounds.transformed(&self.transform.matrix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTarget {
    Placeholder,
    ModelNode(usize),
}

/// Box outline drawn around the selected unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionOutline {
    pub id: u64,
    pub target: SelectionTarget,
    pub bounds: Aabb,
}

#[derive(Debug, Clone)]
pub struct Scene {
    pub lights: Vec<Light>,
    pub placeholder: Option<Placeholder>,
    pub model: Option<ModelAsset>,
    outline: Option<SelectionOutline>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Lights plus the placeholder cube.
    pub fn new() -> Self {
        Self {
            lights: vec![
                Light::Ambient {
                    color: [1.0, 1.0, 1.0],
                    intensity: 0.6,
                },
                Light::Directional {
                    color: [1.0, 1.0, 1.0],
                    intensity: 1.0,
                    direction: [-0.5, -1.0, -0.5],
                },
            ],
            placeholder: Some(Placeholder::cube()),
            model: None,
            outline: None,
        }
    }

    /// Swap the model in and hide the placeholder.
    pub fn install_model(&mut self, model: ModelAsset) {
        if let Some(placeholder) = &mut self.placeholder {
            placeholder.visible = false;
        }
        self.model = Some(model);
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn outline(&self) -> Option<&SelectionOutline> {
        self.outline.as_ref()
    }

    pub fn target_bounds(&self, target: SelectionTarget) -> Option<Aabb> {
        match target {
            SelectionTarget::Placeholder => self.placeholder.as_ref().map(Placeholder::bounds),
            SelectionTarget::ModelNode(node) => {
                let model = self.model.as_ref()?;
                if node >= model.nodes.len() {
                    return None;
                }
                let worlds = model.world_matrices();
                Some(model.node_bounds(node, &worlds))
            }
        }
    }

    /// Replace the outline. The previous outline, if any, is handed back so its
    /// resources can be released.
    pub fn set_outline(&mut self, outline: Option<SelectionOutline>) -> Option<SelectionOutline> {
        std::mem::replace(&mut self.outline, outline)
    }

    /// Re-measure the outline around its target. Drops the outline if the
    /// target no longer exists.
    pub fn refresh_outline(&mut self) -> Option<SelectionOutline> {
        let target = self.outline.as_ref()?.target;
        match self.target_bounds(target) {
            Some(bounds) => {
                if let Some(outline) = &mut self.outline {
                    outline.bounds = bounds;
                }
                None
            }
            None => self.outline.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_model() -> ModelAsset {
        let mut model = ModelAsset::default();
        model.geometries.push(Geometry::unit_cube());
        model.materials.push(Material::new("Body", [1.0; 4]));
        let root = model.add_node(Node {
            name: "Root".to_string(),
            transform: Transform {
                translation: Vec3::new(2.0, 0.0, 0.0),
                ..Transform::default()
            },
            ..Node::default()
        });
        model.add_node(Node {
            name: "Child".to_string(),
            parent: Some(root),
            transform: Transform {
                translation: Vec3::new(0.0, 3.0, 0.0),
                ..Transform::default()
            },
            primitives: vec![MeshPrimitive {
                geometry: 0,
                material: 0,
            }],
            ..Node::default()
        });
        model
    }

    #[test]
    fn world_matrices_chain_parent_transforms() {
        let model = two_level_model();
        let worlds = model.world_matrices();
        let origin = worlds[1].transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(2.0, 3.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn bounds_include_child_meshes() {
        let model = two_level_model();
        let bounds = model.bounds();
        assert!((bounds.center() - Vec3::new(2.0, 3.0, 0.0)).length() < 1e-5);
        assert!((bounds.size() - Vec3::ONE).length() < 1e-5);
    }

    #[test]
    fn pivot_sits_between_root_transform_and_nodes() {
        let mut model = two_level_model();
        model.pivot.translation = Vec3::new(-2.0, -3.0, 0.0);
        model.transform.rotation = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        // The pivot moved the mesh onto the origin, so turning leaves it there.
        assert!(model.bounds().center().length() < 1e-5);
    }

    #[test]
    fn mismatched_uvs_are_dropped() {
        let cube = Geometry::unit_cube().with_uvs(Some(vec![Vec2::ZERO; 3]));
        assert!(cube.uvs.is_none());
        let cube = Geometry::unit_cube().with_uvs(Some(vec![Vec2::ONE; 8]));
        assert_eq!(cube.uvs.map(|uvs| uvs.len()), Some(8));
    }

    #[test]
    fn top_level_ancestor_walks_to_root() {
        let model = two_level_model();
        assert_eq!(model.top_level_ancestor(1), 0);
        assert_eq!(model.top_level_ancestor(0), 0);
    }

    #[test]
    fn install_model_hides_placeholder() {
        let mut scene = Scene::new();
        assert!(scene.placeholder.as_ref().unwrap().visible);
        scene.install_model(two_level_model());
        assert!(!scene.placeholder.as_ref().unwrap().visible);
        assert!(scene.has_model());
    }

    #[test]
    fn set_outline_returns_previous() {
        let mut scene = Scene::new();
        let first = SelectionOutline {
            id: next_resource_id(),
            target: SelectionTarget::Placeholder,
            bounds: Aabb::empty(),
        };
        assert!(scene.set_outline(Some(first)).is_none());
        let replaced = scene.set_outline(None);
        assert_eq!(replaced.map(|o| o.id), Some(first.id));
    }

    #[test]
    fn refresh_outline_drops_missing_target() {
        let mut scene = Scene::new();
        scene.set_outline(Some(SelectionOutline {
            id: next_resource_id(),
            target: SelectionTarget::ModelNode(7),
            bounds: Aabb::empty(),
        }));
        let dropped = scene.refresh_outline();
        assert!(dropped.is_some());
        assert!(scene.outline().is_none());
    }

    #[test]
    fn cube_triangles_are_complete() {
        let cube = Geometry::unit_cube();
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.triangles().count(), 12);
    }
}
