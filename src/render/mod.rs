mod camera;
mod gpu;
mod headless;
pub mod pick;
mod timing;

pub use camera::Camera;
pub use gpu::{GpuRenderer, GpuSurface};
pub use headless::{FrameStats, HeadlessRenderer, HeadlessSurface};
pub use pick::{pick, screen_to_ndc, PickHit, Ray};
pub use timing::{FpsReport, FrameTiming};

use crate::scene::{ResourceHandle, Scene};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("graphics surface unavailable: {0}")]
    SurfaceUnavailable(String),
    #[error("failed to create renderer: {0}")]
    RendererCreateFailed(String),
    #[error("scene references released resource {0:?}")]
    ReleasedResource(ResourceHandle),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("resource {0:?} was already released")]
    AlreadyReleased(ResourceHandle),
}

/// A drawable surface supplied by the host. The viewer creates one renderer
/// on it and presents through it once per frame.
pub trait GraphicsSurface {
    type Renderer: SceneRenderer;

    fn create_renderer(&mut self) -> Result<Self::Renderer, RenderError>;

    /// Drawing buffer size in physical pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);

    /// Present the frame just rendered.
    fn end_frame(&mut self);
}

pub trait SceneRenderer {
    fn set_size(&mut self, width: u32, height: u32);

    fn render(&mut self, scene: &Scene, camera: &Camera) -> Result<(), RenderError>;

    /// Free the GPU side of a resource. Releasing twice is an error the caller
    /// may ignore.
    fn release(&mut self, handle: ResourceHandle) -> Result<(), ReleaseError>;
}
