mod input;
mod script;

use glbview::assets::AssetLoader;
use glbview::config::{load_config, ViewerConfig};
use glbview::gesture::TouchPoint;
use glbview::render::{FrameTiming, GpuSurface, GraphicsSurface, HeadlessSurface};
use glbview::scene::SelectionTarget;
use glbview::viewer::{DisposalReport, ModelViewer, TapEvent};
use input::{TouchEvent, TouchTracker};
use script::{load_script, points, ScriptEvent};

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const FRAME_STEP: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(name = "glbview")]
#[command(about = "Touch-driven GLB/glTF model viewer")]
pub struct Cli {
    /// Model URL or local path
    pub url: String,

    /// Viewer configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Frames to render after the script in headless mode
    #[arg(long, default_value_t = 60)]
    pub frames: u32,

    /// Gesture script to replay in headless mode
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Open a window instead of running headless
    #[arg(long)]
    pub window: bool,

    /// Seconds to wait for the model in headless mode
    #[arg(long, default_value_t = 60)]
    pub load_timeout: u64,
}

#[derive(Debug)]
pub struct RunSummary {
    pub model_loaded: bool,
    pub frames: u64,
    pub raycasts: u64,
    pub taps: Vec<TapEvent>,
    pub selection: Option<SelectionTarget>,
    pub yaw: f32,
    pub pitch: f32,
    pub camera_distance: f32,
    pub disposal: DisposalReport,
}

fn describe_selection(selection: Option<SelectionTarget>) -> String {
    match selection {
        Some(SelectionTarget::Placeholder) => "placeholder".to_string(),
        Some(SelectionTarget::ModelNode(node)) => format!("node {}", node),
        None => "none".to_string(),
    }
}

fn apply_touch_event<S: GraphicsSurface>(viewer: &mut ModelViewer<S>, event: TouchEvent, now: Instant) {
    match event {
        TouchEvent::Start(touches) => viewer.touch_start(&touches, now),
        TouchEvent::Move(touches) => viewer.touch_move(&touches, now),
        TouchEvent::End { release, remaining } => viewer.touch_end(release, remaining, now),
        TouchEvent::Cancel => viewer.touch_terminate(),
    }
}

/// Mount on a headless surface, replay the script on a simulated clock, then
/// render `frames` more frames and unmount.
pub fn run_headless(
    config: ViewerConfig,
    loader: AssetLoader,
    url: &str,
    events: &[ScriptEvent],
    frames: u32,
    load_timeout: Duration,
) -> anyhow::Result<RunSummary> {
    let surface = HeadlessSurface::new(config.width.round() as u32, config.height.round() as u32);
    let mut viewer = ModelViewer::mount(surface, config, loader, url)?;

    let taps = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&taps);
    viewer.set_tap_callback(move |event: TapEvent| {
        log::info!(
            "Tap at ({:.0}, {:.0}) selected {}",
            event.x,
            event.y,
            describe_selection(event.selection)
        );
        sink.borrow_mut().push(event);
    });

    if !viewer.wait_for_load(load_timeout) {
        log::warn!("Model still loading after {:?}; continuing with placeholder", load_timeout);
    }

    let start = Instant::now();
    let mut clock = start;
    for event in events {
        let at = start + Duration::from_millis(event.at_ms());
        while clock + FRAME_STEP <= at {
            clock += FRAME_STEP;
            viewer.frame(clock)?;
        }
        match event {
            ScriptEvent::Layout { width, height, .. } => viewer.on_layout(*width, *height),
            ScriptEvent::Start { touches, .. } => viewer.touch_start(&points(touches), at),
            ScriptEvent::Move { touches, .. } => viewer.touch_move(&points(touches), at),
            ScriptEvent::End {
                release,
                remaining,
                ..
            } => viewer.touch_end(TouchPoint::new(release[0], release[1]), *remaining, at),
            ScriptEvent::Terminate { .. } => viewer.touch_terminate(),
        }
    }
    for _ in 0..frames {
        clock += FRAME_STEP;
        viewer.frame(clock)?;
    }

    let view = viewer.view_state();
    let model_loaded = viewer.scene().has_model();
    let frames = viewer.frame_count();
    let raycasts = viewer.raycast_count();
    let selection = viewer.selection();
    let disposal = viewer.unmount();
    let taps = taps.borrow().clone();
    Ok(RunSummary {
        model_loaded,
        frames,
        raycasts,
        taps,
        selection,
        yaw: view.yaw,
        pitch: view.pitch,
        camera_distance: view.camera_distance,
        disposal,
    })
}

/// Frame interval matching the window's monitor, when it reports a rate.
fn monitor_frame_duration(window: &Window) -> Option<Duration> {
    window
        .current_monitor()
        .and_then(|monitor| monitor.refresh_rate_millihertz())
        .filter(|mhz| *mhz > 0)
        .map(|mhz| Duration::from_secs_f64(1000.0 / mhz as f64))
}

struct WindowApp {
    config: ViewerConfig,
    url: String,
    loader: Option<AssetLoader>,
    viewer: Option<ModelViewer<GpuSurface>>,
    tracker: TouchTracker,
    timing: FrameTiming,
    target_frame_duration: Duration,
    next_frame_time: Instant,
}

impl WindowApp {
    fn new(config: ViewerConfig, loader: AssetLoader, url: String) -> Self {
        let now = Instant::now();
        Self {
            config,
            url,
            loader: Some(loader),
            viewer: None,
            tracker: TouchTracker::default(),
            timing: FrameTiming::new(now),
            target_frame_duration: FRAME_STEP,
            next_frame_time: now,
        }
    }

    fn update_target_frame_duration(&mut self, window: &Window) {
        if let Some(duration) = monitor_frame_duration(window) {
            self.target_frame_duration = duration;
        }
    }

    fn mount(&mut self, window: Arc<Window>) -> anyhow::Result<()> {
        let loader = self.loader.take().context("viewer already mounted")?;
        let size = window.inner_size();
        let surface = GpuSurface::new(window).context("failed to set up GPU surface")?;
        let mut viewer = ModelViewer::mount(surface, self.config.clone(), loader, &self.url)?;
        viewer.on_layout(size.width as f32, size.height as f32);
        viewer.set_loading_listener(|loading| {
            if loading {
                log::info!("Loading model...");
            } else {
                log::info!("Loading finished");
            }
        });
        viewer.set_tap_callback(|event| {
            log::info!(
                "Tap at ({:.0}, {:.0}) selected {}",
                event.x,
                event.y,
                describe_selection(event.selection)
            );
        });
        self.viewer = Some(viewer);
        Ok(())
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if let Some(viewer) = &mut self.viewer {
            viewer.on_layout(new_size.width as f32, new_size.height as f32);
        }
    }

    fn dispatch(&mut self, event: Option<TouchEvent>) {
        if let (Some(event), Some(viewer)) = (event, &mut self.viewer) {
            apply_touch_event(viewer, event, Instant::now());
        }
    }

    fn render(&mut self) {
        let now = Instant::now();
        let Some(viewer) = &mut self.viewer else {
            return;
        };
        let started = Instant::now();
        if let Err(err) = viewer.frame(now) {
            log::error!("Frame failed: {}", err);
            return;
        }
        self.timing
            .set_render_ms(started.elapsed().as_secs_f32() * 1000.0);
        if let Some(report) = self.timing.update(now) {
            let view = viewer.view_state();
            viewer.surface().window().set_title(&format!(
                "glbview - {:.1} fps | yaw {:.2} pitch {:.2} zoom {:.2} | {}{}",
                report.fps,
                view.yaw,
                view.pitch,
                view.camera_distance,
                describe_selection(viewer.selection()),
                if viewer.is_loading() { " | loading" } else { "" }
            ));
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(viewer) = &mut self.viewer {
            viewer.unmount();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for WindowApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title("glbview")
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height))
            .with_resizable(true);

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        self.update_target_frame_duration(&window);
        if let Err(err) = self.mount(window) {
            log::error!("Failed to mount viewer: {:#}", err);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::Focused(false) | WindowEvent::CursorLeft { .. } => {
                let event = self.tracker.cancel();
                self.dispatch(event);
            }
            WindowEvent::Resized(new_size) => {
                self.handle_resize(new_size);
                let duration = self
                    .viewer
                    .as_ref()
                    .and_then(|viewer| monitor_frame_duration(viewer.surface().window()));
                if let Some(duration) = duration {
                    self.target_frame_duration = duration;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let event = self
                    .tracker
                    .cursor_moved(position.x as f32, position.y as f32);
                self.dispatch(event);
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let event = self.tracker.left_button(state == ElementState::Pressed);
                self.dispatch(event);
            }
            WindowEvent::Touch(touch) => {
                let event = self.tracker.handle_touch(
                    touch.phase,
                    touch.id,
                    touch.location.x as f32,
                    touch.location.y as f32,
                );
                self.dispatch(event);
            }
            WindowEvent::RedrawRequested => self.render(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        if now >= self.next_frame_time {
            if let Some(viewer) = &self.viewer {
                viewer.surface().window().request_redraw();
            }
            self.next_frame_time = now + self.target_frame_duration;
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame_time));
    }
}

fn run_window(config: ViewerConfig, loader: AssetLoader, url: String) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);
    let mut app = WindowApp::new(config, loader, url);
    event_loop.run_app(&mut app).context("event loop error")?;
    Ok(())
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    let loader = AssetLoader::from_config(&config)?;

    if cli.window {
        log::info!("Opening viewer window for {}", cli.url);
        return run_window(config, loader, cli.url);
    }

    let events = match &cli.script {
        Some(path) => load_script(path)
            .with_context(|| format!("failed to load gesture script {}", path.display()))?,
        None => Vec::new(),
    };
    let summary = run_headless(
        config,
        loader,
        &cli.url,
        &events,
        cli.frames,
        Duration::from_secs(cli.load_timeout),
    )?;

    println!("model loaded:    {}", summary.model_loaded);
    println!("frames rendered: {}", summary.frames);
    println!("taps:            {}", summary.taps.len());
    println!("raycasts:        {}", summary.raycasts);
    println!("selection:       {}", describe_selection(summary.selection));
    println!(
        "view:            yaw {:.3} pitch {:.3} distance {:.3}",
        summary.yaw, summary.pitch, summary.camera_distance
    );
    println!(
        "released:        {} ({} failed)",
        summary.disposal.released, summary.disposal.failed
    );
    Ok(())
}
