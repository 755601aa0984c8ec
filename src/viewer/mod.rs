//! The model viewer component.
//!
//! Owns the scene, the camera, the gesture interpreter and one renderer on a
//! host surface. Loading runs on a [`LoadWorker`]; every other operation
//! happens on the host's thread, in the order the host calls them.

mod dispose;

pub use dispose::{dispose_model, dispose_scene, DisposalReport};

use crate::assets::{AssetLoader, LoadOutcome, LoadStats, LoadWorker};
use crate::config::{ConfigError, ViewerConfig};
use crate::gesture::{GestureInterpreter, GestureOutcome, GestureSettings, TouchPoint, ViewState};
use crate::render::{
    pick, screen_to_ndc, Camera, GraphicsSurface, RenderError, SceneRenderer,
};
use crate::scene::{next_resource_id, ResourceHandle, Scene, SelectionOutline, SelectionTarget};
use glam::{EulerRot, Quat};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapEvent {
    pub x: f32,
    pub y: f32,
    /// Selected unit, None on a miss.
    pub selection: Option<SelectionTarget>,
}

pub type TapCallback = Box<dyn FnMut(TapEvent)>;
pub type LoadingListener = Box<dyn FnMut(bool)>;

pub struct ModelViewer<S: GraphicsSurface> {
    config: ViewerConfig,
    surface: S,
    renderer: S::Renderer,
    scene: Scene,
    camera: Camera,
    view: ViewState,
    gestures: GestureInterpreter,
    layout: (f32, f32),
    loading: bool,
    loading_listener: Option<LoadingListener>,
    tap_callback: Option<TapCallback>,
    worker: Option<LoadWorker>,
    epoch: u64,
    running: bool,
    disposal: Option<DisposalReport>,
    raycasts: u64,
    frames: u64,
    last_load: Option<LoadStats>,
}

impl<S: GraphicsSurface> ModelViewer<S> {
    /// Scene with lights and the placeholder, renderer sized to the surface.
    /// Nothing is loading yet.
    pub fn new(mut surface: S, config: ViewerConfig) -> Result<Self, ViewerError> {
        config.validate()?;
        let mut renderer = surface.create_renderer()?;
        let (buffer_width, buffer_height) = surface.drawing_buffer_size();
        renderer.set_size(buffer_width, buffer_height);

        let distance = config.clamped_initial_distance();
        let mut camera = Camera::new(config.fov_y_deg, distance);
        camera.set_viewport(config.width, config.height);

        Ok(Self {
            gestures: GestureInterpreter::new(GestureSettings::from(&config)),
            layout: (config.width, config.height),
            view: ViewState {
                yaw: 0.0,
                pitch: 0.0,
                camera_distance: distance,
            },
            config,
            surface,
            renderer,
            scene: Scene::new(),
            camera,
            loading: false,
            loading_listener: None,
            tap_callback: None,
            worker: None,
            epoch: 0,
            running: true,
            disposal: None,
            raycasts: 0,
            frames: 0,
            last_load: None,
        })
    }

    /// [`ModelViewer::new`] followed by [`ModelViewer::load`].
    pub fn mount(
        surface: S,
        config: ViewerConfig,
        loader: AssetLoader,
        url: &str,
    ) -> Result<Self, ViewerError> {
        let mut viewer = Self::new(surface, config)?;
        viewer.load(loader, url);
        Ok(viewer)
    }

    /// Start loading `url` in the background. A load already in flight is
    /// abandoned and its result will be ignored.
    pub fn load(&mut self, loader: AssetLoader, url: &str) {
        if !self.running {
            log::warn!("Ignoring load of {} after unmount", url);
            return;
        }
        if let Some(previous) = self.worker.take() {
            previous.detach();
        }
        self.epoch += 1;
        let worker = LoadWorker::spawn(loader);
        if !worker.request(url, self.epoch) {
            log::warn!("Failed to queue load of {}", url);
            return;
        }
        self.worker = Some(worker);
        self.set_loading(true);
    }

    pub fn set_tap_callback(&mut self, callback: impl FnMut(TapEvent) + 'static) {
        self.tap_callback = Some(Box::new(callback));
    }

    /// Called on every change of the loading flag.
    pub fn set_loading_listener(&mut self, listener: impl FnMut(bool) + 'static) {
        self.loading_listener = Some(Box::new(listener));
    }

    fn set_loading(&mut self, loading: bool) {
        if self.loading == loading {
            return;
        }
        self.loading = loading;
        if let Some(listener) = &mut self.loading_listener {
            listener(loading);
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn view_state(&self) -> ViewState {
        self.view
    }

    pub fn renderer(&self) -> &S::Renderer {
        &self.renderer
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn selection(&self) -> Option<SelectionTarget> {
        self.scene.outline().map(|outline| outline.target)
    }

    pub fn raycast_count(&self) -> u64 {
        self.raycasts
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn last_load(&self) -> Option<LoadStats> {
        self.last_load
    }

    /// Measured size of the view, in the same units as touch coordinates.
    pub fn on_layout(&mut self, width: f32, height: f32) {
        if !(width > 0.0 && height > 0.0) {
            log::debug!("Ignoring degenerate layout {}x{}", width, height);
            return;
        }
        self.layout = (width, height);
        self.camera.set_viewport(width, height);
        let (buffer_width, buffer_height) = self.surface.drawing_buffer_size();
        self.renderer.set_size(buffer_width, buffer_height);
    }

    pub fn touch_start(&mut self, touches: &[TouchPoint], now: Instant) {
        if !self.running {
            return;
        }
        let outcome = self.gestures.touch_start(touches, &self.view, now);
        self.handle_gesture(outcome);
    }

    pub fn touch_move(&mut self, touches: &[TouchPoint], now: Instant) {
        if !self.running {
            return;
        }
        let outcome = self.gestures.touch_move(touches, &mut self.view, now);
        self.handle_gesture(outcome);
    }

    pub fn touch_end(&mut self, release: TouchPoint, remaining: usize, now: Instant) {
        if !self.running {
            return;
        }
        let outcome = self.gestures.touch_end(release, remaining, now);
        self.handle_gesture(outcome);
    }

    pub fn touch_terminate(&mut self) {
        self.gestures.terminate();
    }

    fn handle_gesture(&mut self, outcome: GestureOutcome) {
        match outcome {
            GestureOutcome::Tap { x, y } => {
                let selection = self.select_at(x, y);
                if let Some(callback) = &mut self.tap_callback {
                    callback(TapEvent { x, y, selection });
                }
            }
            GestureOutcome::Zoomed => self.camera.distance = self.view.camera_distance,
            GestureOutcome::Rotated | GestureOutcome::None => {}
        }
    }

    fn apply_view_state(&mut self) {
        if let Some(model) = &mut self.scene.model {
            model.transform.rotation =
                Quat::from_euler(EulerRot::YXZ, self.view.yaw, self.view.pitch, 0.0);
        }
        self.camera.distance = self.view.camera_distance;
    }

    fn release_outline(&mut self, outline: SelectionOutline) {
        let handle = ResourceHandle::Geometry(outline.id);
        if let Err(err) = self.renderer.release(handle) {
            log::debug!("Ignoring release failure for outline {:?}: {}", handle, err);
        }
    }

    /// Raycast from a view-relative point and replace the selection outline.
    /// A miss clears the selection. Does nothing once unmounted.
    pub fn select_at(&mut self, x: f32, y: f32) -> Option<SelectionTarget> {
        if !self.running {
            return None;
        }
        self.apply_view_state();
        self.raycasts += 1;
        let (width, height) = self.layout;
        let hit = screen_to_ndc(x, y, width, height)
            .map(|ndc| self.camera.ray_from_ndc(ndc))
            .and_then(|ray| pick(&self.scene, &ray));

        if let Some(previous) = self.scene.set_outline(None) {
            self.release_outline(previous);
        }
        let hit = hit?;
        let bounds = self.scene.target_bounds(hit.target)?;
        self.scene.set_outline(Some(SelectionOutline {
            id: next_resource_id(),
            target: hit.target,
            bounds,
        }));
        log::debug!("Selected {:?} at distance {:.3}", hit.target, hit.distance);
        Some(hit.target)
    }

    fn poll_load(&mut self) {
        let outcome = self.worker.as_ref().and_then(LoadWorker::try_recv);
        if let Some(outcome) = outcome {
            self.finish_load(outcome);
        }
    }

    /// Block until the current load finishes or `timeout` passes. Returns true
    /// when nothing is loading any more.
    pub fn wait_for_load(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.loading {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(outcome) = self.worker.as_ref().and_then(|w| w.recv_timeout(remaining))
            else {
                break;
            };
            self.finish_load(outcome);
        }
        !self.loading
    }

    fn finish_load(&mut self, outcome: LoadOutcome) {
        if !self.running || outcome.epoch != self.epoch {
            log::debug!(
                "Discarding stale load of {} (epoch {}, current {})",
                outcome.url,
                outcome.epoch,
                self.epoch
            );
            return;
        }
        if let Some(worker) = self.worker.take() {
            worker.detach();
        }
        match outcome.result {
            Ok(loaded) => {
                if let Some(outline) = self.scene.set_outline(None) {
                    self.release_outline(outline);
                }
                self.camera.height = loaded.half_height;
                self.last_load = Some(loaded.stats);
                if let Some(previous) = self.scene.model.take() {
                    dispose_model(&previous, &mut self.renderer);
                }
                self.scene.install_model(loaded.model);
                self.apply_view_state();
                log::info!("Installed model from {}", outcome.url);
            }
            Err(err) => {
                log::error!("Failed to load {}: {}", outcome.url, err);
            }
        }
        self.set_loading(false);
    }

    /// One animation frame. Returns false once unmounted.
    pub fn frame(&mut self, now: Instant) -> Result<bool, RenderError> {
        if !self.running {
            return Ok(false);
        }
        self.poll_load();
        self.gestures.poll(now);
        self.apply_view_state();
        if let Some(dropped) = self.scene.refresh_outline() {
            self.release_outline(dropped);
        }
        self.renderer.render(&self.scene, &self.camera)?;
        self.surface.end_frame();
        self.frames += 1;
        Ok(true)
    }

    /// Stop the frame loop, drop gesture state, abandon any load and release
    /// every scene resource. Later calls do nothing and return the first report.
    pub fn unmount(&mut self) -> DisposalReport {
        if let Some(report) = self.disposal {
            return report;
        }
        self.running = false;
        self.gestures.terminate();
        if let Some(worker) = self.worker.take() {
            worker.detach();
        }
        let report = dispose_scene(&mut self.scene, &mut self.renderer);
        log::info!(
            "Viewer unmounted: released {} resources ({} failed)",
            report.released,
            report.failed
        );
        self.disposal = Some(report);
        report
    }
}

impl<S: GraphicsSurface> Drop for ModelViewer<S> {
    fn drop(&mut self) {
        self.unmount();
    }
}
