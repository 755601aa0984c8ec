//! Renderer without a GPU.
//!
//! Walks the scene the way a real backend would and records what it would
//! have drawn. Released handles are tracked so a frame that still references
//! one, or a second release of the same handle, is reported.

use super::{Camera, GraphicsSurface, ReleaseError, RenderError, SceneRenderer};
use crate::scene::{ResourceHandle, Scene};
use std::collections::HashSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub meshes: usize,
    pub triangles: usize,
    pub textured_meshes: usize,
    pub placeholder_drawn: bool,
    pub outline_drawn: bool,
}

#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    size: (u32, u32),
    frames: u64,
    last_frame: FrameStats,
    released: HashSet<ResourceHandle>,
    release_log: Vec<ResourceHandle>,
}

impl HeadlessRenderer {
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_frame(&self) -> FrameStats {
        self.last_frame
    }

    /// Every successful release, in order.
    pub fn release_log(&self) -> &[ResourceHandle] {
        &self.release_log
    }

    fn check(&self, handle: ResourceHandle) -> Result<(), RenderError> {
        if self.released.contains(&handle) {
            return Err(RenderError::ReleasedResource(handle));
        }
        Ok(())
    }
}

impl SceneRenderer for HeadlessRenderer {
    fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn render(&mut self, scene: &Scene, _camera: &Camera) -> Result<(), RenderError> {
        let mut stats = FrameStats::default();

        if let Some(placeholder) = scene.placeholder.as_ref().filter(|p| p.visible) {
            self.check(ResourceHandle::Geometry(placeholder.geometry.id))?;
            self.check(ResourceHandle::Material(placeholder.material.id))?;
            stats.placeholder_drawn = true;
            stats.meshes += 1;
            stats.triangles += placeholder.geometry.triangle_count();
        }

        if let Some(model) = &scene.model {
            for primitive in model.nodes.iter().flat_map(|node| &node.primitives) {
                let Some(geometry) = model.geometries.get(primitive.geometry) else {
                    continue;
                };
                self.check(ResourceHandle::Geometry(geometry.id))?;
                stats.meshes += 1;
                stats.triangles += geometry.triangle_count();
                if let Some(material) = model.materials.get(primitive.material) {
                    self.check(ResourceHandle::Material(material.id))?;
                    if let Some(texture) =
                        material.base_color_map.and_then(|i| model.textures.get(i))
                    {
                        self.check(ResourceHandle::Texture(texture.id))?;
                        stats.textured_meshes += 1;
                    }
                }
            }
        }

        if let Some(outline) = scene.outline() {
            self.check(ResourceHandle::Geometry(outline.id))?;
            stats.outline_drawn = true;
        }

        self.last_frame = stats;
        self.frames += 1;
        Ok(())
    }

    fn release(&mut self, handle: ResourceHandle) -> Result<(), ReleaseError> {
        if !self.released.insert(handle) {
            return Err(ReleaseError::AlreadyReleased(handle));
        }
        self.release_log.push(handle);
        Ok(())
    }
}

#[derive(Debug)]
pub struct HeadlessSurface {
    width: u32,
    height: u32,
    presented: u64,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            presented: 0,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl GraphicsSurface for HeadlessSurface {
    type Renderer = HeadlessRenderer;

    fn create_renderer(&mut self) -> Result<HeadlessRenderer, RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::SurfaceUnavailable(format!(
                "zero-sized surface {}x{}",
                self.width, self.height
            )));
        }
        Ok(HeadlessRenderer::default())
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn end_frame(&mut self) {
        self.presented += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_placeholder_until_hidden() {
        let mut renderer = HeadlessRenderer::default();
        let camera = Camera::new(75.0, 5.0);
        let mut scene = Scene::new();
        renderer.render(&scene, &camera).unwrap();
        assert!(renderer.last_frame().placeholder_drawn);
        assert_eq!(renderer.last_frame().triangles, 12);

        if let Some(placeholder) = &mut scene.placeholder {
            placeholder.visible = false;
        }
        renderer.render(&scene, &camera).unwrap();
        assert_eq!(renderer.last_frame(), FrameStats::default());
        assert_eq!(renderer.frames(), 2);
    }

    #[test]
    fn double_release_is_reported() {
        let mut renderer = HeadlessRenderer::default();
        let handle = ResourceHandle::Geometry(42);
        assert_eq!(renderer.release(handle), Ok(()));
        assert_eq!(
            renderer.release(handle),
            Err(ReleaseError::AlreadyReleased(handle))
        );
        assert_eq!(renderer.release_log(), &[handle]);
    }

    #[test]
    fn rendering_a_released_resource_fails() {
        let mut renderer = HeadlessRenderer::default();
        let scene = Scene::new();
        let id = scene.placeholder.as_ref().unwrap().geometry.id;
        renderer.release(ResourceHandle::Geometry(id)).unwrap();
        assert!(matches!(
            renderer.render(&scene, &Camera::new(75.0, 5.0)),
            Err(RenderError::ReleasedResource(_))
        ));
    }

    #[test]
    fn zero_sized_surface_has_no_renderer() {
        assert!(HeadlessSurface::new(0, 100).create_renderer().is_err());
        let mut surface = HeadlessSurface::new(320, 240);
        assert!(surface.create_renderer().is_ok());
        assert_eq!(surface.drawing_buffer_size(), (320, 240));
    }
}
