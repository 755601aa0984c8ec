use crate::render::SceneRenderer;
use crate::scene::{ModelAsset, ResourceHandle, Scene, TextureSlot};
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisposalReport {
    pub released: usize,
    pub failed: usize,
}

/// Sends each handle to the renderer at most once and keeps going on error.
struct Disposer<'a, R: SceneRenderer + ?Sized> {
    renderer: &'a mut R,
    seen: HashSet<ResourceHandle>,
    report: DisposalReport,
}

impl<'a, R: SceneRenderer + ?Sized> Disposer<'a, R> {
    fn new(renderer: &'a mut R) -> Self {
        Self {
            renderer,
            seen: HashSet::new(),
            report: DisposalReport::default(),
        }
    }

    fn release(&mut self, handle: ResourceHandle) {
        if !self.seen.insert(handle) {
            return;
        }
        match self.renderer.release(handle) {
            Ok(()) => self.report.released += 1,
            Err(err) => {
                self.report.failed += 1;
                log::debug!("Ignoring release failure for {:?}: {}", handle, err);
            }
        }
    }

    fn release_model(&mut self, model: &ModelAsset) {
        for primitive in model.nodes.iter().flat_map(|node| &node.primitives) {
            if let Some(geometry) = model.geometries.get(primitive.geometry) {
                self.release(ResourceHandle::Geometry(geometry.id));
            }
            if let Some(material) = model.materials.get(primitive.material) {
                for slot in TextureSlot::ALL {
                    if let Some(texture) = material.slot(slot).and_then(|i| model.textures.get(i)) {
                        self.release(ResourceHandle::Texture(texture.id));
                    }
                }
                self.release(ResourceHandle::Material(material.id));
            }
        }

        // Whatever no mesh reached.
        for geometry in &model.geometries {
            self.release(ResourceHandle::Geometry(geometry.id));
        }
        for texture in &model.textures {
            self.release(ResourceHandle::Texture(texture.id));
        }
        for material in &model.materials {
            self.release(ResourceHandle::Material(material.id));
        }
    }

    fn finish(self) -> DisposalReport {
        self.report
    }
}

/// Release a model that has already been taken out of the scene.
pub fn dispose_model<R: SceneRenderer + ?Sized>(
    model: &ModelAsset,
    renderer: &mut R,
) -> DisposalReport {
    let mut disposer = Disposer::new(renderer);
    disposer.release_model(model);
    disposer.finish()
}

/// Empty the scene and release everything it held.
pub fn dispose_scene<R: SceneRenderer + ?Sized>(
    scene: &mut Scene,
    renderer: &mut R,
) -> DisposalReport {
    let mut disposer = Disposer::new(renderer);
    if let Some(model) = scene.model.take() {
        disposer.release_model(&model);
    }
    if let Some(placeholder) = scene.placeholder.take() {
        disposer.release(ResourceHandle::Geometry(placeholder.geometry.id));
        disposer.release(ResourceHandle::Material(placeholder.material.id));
    }
    if let Some(outline) = scene.set_outline(None) {
        disposer.release(ResourceHandle::Geometry(outline.id));
    }
    disposer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessRenderer;
    use crate::scene::{Geometry, Material, MeshPrimitive, Node, Texture};

    fn textured_model() -> ModelAsset {
        let mut model = ModelAsset::default();
        model.geometries.push(Geometry::unit_cube());
        // Not referenced by any mesh.
        model.geometries.push(Geometry::unit_cube());
        let texture = || Texture {
            id: crate::scene::next_resource_id(),
            image_index: 0,
            width: 1,
            height: 1,
            pixels: vec![0; 4],
            flip_y: false,
            srgb: true,
        };
        model.textures.push(texture());
        model.textures.push(texture());
        let mut material = Material::new("Body", [1.0; 4]);
        material.base_color_map = Some(0);
        material.normal_map = Some(1);
        material.emissive_map = Some(0);
        model.materials.push(material);
        for _ in 0..2 {
            model.add_node(Node {
                primitives: vec![MeshPrimitive {
                    geometry: 0,
                    material: 0,
                }],
                ..Node::default()
            });
        }
        model
    }

    #[test]
    fn releases_every_resource_once() {
        let mut scene = Scene::new();
        scene.install_model(textured_model());
        let mut renderer = HeadlessRenderer::default();

        let report = dispose_scene(&mut scene, &mut renderer);
        // 2 geometries, 2 textures, 1 material, placeholder geometry and material.
        assert_eq!(report, DisposalReport { released: 7, failed: 0 });
        let log = renderer.release_log();
        let unique: HashSet<_> = log.iter().collect();
        assert_eq!(unique.len(), log.len());
        assert!(scene.model.is_none());
        assert!(scene.placeholder.is_none());
    }

    #[test]
    fn already_released_resources_do_not_stop_disposal() {
        let mut scene = Scene::new();
        let model = textured_model();
        let shared = ResourceHandle::Geometry(model.geometries[0].id);
        scene.install_model(model);
        let mut renderer = HeadlessRenderer::default();
        renderer.release(shared).unwrap();

        let report = dispose_scene(&mut scene, &mut renderer);
        assert_eq!(report, DisposalReport { released: 6, failed: 1 });
        assert_eq!(dispose_scene(&mut scene, &mut renderer), DisposalReport::default());
    }
}
