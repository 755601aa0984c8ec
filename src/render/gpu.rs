//! wgpu backend drawing into a winit window.
//!
//! Geometry and textures are uploaded the first time a frame needs them and
//! dropped when the viewer releases their handle. Meshes are shaded with the
//! scene's ambient and first directional light; the selection outline is a
//! line box. Both pipelines draw both faces, matching what picking can hit.

use super::{Camera, GraphicsSurface, ReleaseError, RenderError, SceneRenderer};
use crate::scene::{Aabb, Geometry, Light, ModelAsset, ResourceHandle, Scene, Texture};
use glam::{Mat4, Vec3};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::window::Window;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.12,
    g: 0.12,
    b: 0.14,
    a: 1.0,
};
const OUTLINE_COLOR: [f32; 4] = [1.0, 0.6, 0.1, 1.0];
const OUTLINE_VERTICES: usize = 24;

/// glam projections are GL-style; wgpu clip space has z in [0, 1].
const OPENGL_TO_WGPU_MATRIX: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.5, 0.0, //
    0.0, 0.0, 0.5, 1.0,
]);

const SHADER: &str = r#"
struct Frame {
    view_proj: mat4x4<f32>,
    light_dir: vec4<f32>,
    light_color: vec4<f32>,
    ambient: vec4<f32>,
};

struct Draw {
    model: mat4x4<f32>,
    base_color: vec4<f32>,
    // x: flip texture v
    params: vec4<f32>,
};

@group(0) @binding(0) var<uniform> frame: Frame;
@group(1) @binding(0) var<uniform> draw: Draw;
@group(2) @binding(0) var base_map: texture_2d<f32>;
@group(2) @binding(1) var base_sampler: sampler;

struct VertexIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.clip = frame.view_proj * draw.model * vec4<f32>(in.position, 1.0);
    out.normal = (draw.model * vec4<f32>(in.normal, 0.0)).xyz;
    out.uv = select(in.uv, vec2<f32>(in.uv.x, 1.0 - in.uv.y), draw.params.x > 0.5);
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let albedo = draw.base_color * textureSample(base_map, base_sampler, in.uv);
    var normal = in.normal;
    if (dot(normal, normal) < 1e-12) {
        normal = vec3<f32>(0.0, 1.0, 0.0);
    }
    let lambert = abs(dot(normalize(normal), normalize(-frame.light_dir.xyz)));
    let light = frame.ambient.rgb + frame.light_color.rgb * lambert;
    return vec4<f32>(albedo.rgb * light, albedo.a);
}

@fragment
fn fs_line(in: VertexOut) -> @location(0) vec4<f32> {
    return draw.base_color;
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    normal: [f32; 3],
    uv: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }

    fn at(position: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: [0.0; 3],
            uv: [0.0; 2],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniform {
    view_proj: [[f32; 4]; 4],
    light_dir: [f32; 4],
    light_color: [f32; 4],
    ambient: [f32; 4],
}

impl FrameUniform {
    /// Ambient lights add up; the first directional light shades.
    fn new(scene: &Scene, camera: &Camera) -> Self {
        let mut ambient = Vec3::ZERO;
        let mut directional: Option<(Vec3, Vec3)> = None;
        for light in &scene.lights {
            match *light {
                Light::Ambient { color, intensity } => ambient += Vec3::from(color) * intensity,
                Light::Directional {
                    color,
                    intensity,
                    direction,
                } => {
                    if directional.is_none() {
                        directional = Some((Vec3::from(direction), Vec3::from(color) * intensity));
                    }
                }
            }
        }
        let (light_dir, light_color) = directional.unwrap_or((Vec3::NEG_Y, Vec3::ZERO));
        Self {
            view_proj: (OPENGL_TO_WGPU_MATRIX * camera.view_projection()).to_cols_array_2d(),
            light_dir: light_dir.extend(0.0).to_array(),
            light_color: light_color.extend(1.0).to_array(),
            ambient: ambient.extend(1.0).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniform {
    model: [[f32; 4]; 4],
    base_color: [f32; 4],
    params: [f32; 4],
}

const DRAW_UNIFORM_SIZE: u64 = std::mem::size_of::<DrawUniform>() as u64;

impl DrawUniform {
    fn new(model: Mat4, base_color: [f32; 4], flip_y: bool) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            base_color,
            params: [if flip_y { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        }
    }
}

/// Smooth normals: area-weighted face normals summed per vertex.
fn vertex_normals(positions: &[Vec3], triangles: &[[u32; 3]]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for &[a, b, c] in triangles {
        let (a, b, c) = (a as usize, b as usize, c as usize);
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|normal| {
            let normal = normal.normalize_or_zero();
            if normal == Vec3::ZERO {
                Vec3::Y
            } else {
                normal
            }
        })
        .collect()
}

/// Triangles whose indices all address a vertex.
fn valid_triangles(geometry: &Geometry) -> Vec<[u32; 3]> {
    let count = geometry.positions.len();
    geometry
        .indices
        .chunks_exact(3)
        .map(|tri| [tri[0], tri[1], tri[2]])
        .filter(|tri| tri.iter().all(|&index| (index as usize) < count))
        .collect()
}

/// The twelve edges of `bounds` as a line list.
fn outline_vertices(bounds: &Aabb) -> [Vertex; OUTLINE_VERTICES] {
    let (min, max) = (bounds.min, bounds.max);
    let corner = |i: usize| {
        Vec3::new(
            if i & 1 == 0 { min.x } else { max.x },
            if i & 2 == 0 { min.y } else { max.y },
            if i & 4 == 0 { min.z } else { max.z },
        )
    };
    const EDGES: [(usize, usize); 12] = [
        (0, 1), (2, 3), (4, 5), (6, 7), // along x
        (0, 2), (1, 3), (4, 6), (5, 7), // along y
        (0, 4), (1, 5), (2, 6), (3, 7), // along z
    ];
    let mut vertices = [Vertex::at(Vec3::ZERO); OUTLINE_VERTICES];
    for (i, &(a, b)) in EDGES.iter().enumerate() {
        vertices[2 * i] = Vertex::at(corner(a));
        vertices[2 * i + 1] = Vertex::at(corner(b));
    }
    vertices
}

fn align_to(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

/// Swapchain state shared by the surface (which presents) and the renderer
/// (which acquires and draws).
struct Target {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    pending: Option<wgpu::SurfaceTexture>,
}

/// A winit window with a configured wgpu surface.
pub struct GpuSurface {
    window: Arc<Window>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    target: Rc<RefCell<Target>>,
    presented: u64,
}

impl GpuSurface {
    pub fn new(window: Arc<Window>) -> Result<Self, RenderError> {
        pollster::block_on(Self::init(window))
    }

    async fn init(window: Arc<Window>) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|err| RenderError::SurfaceUnavailable(err.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::SurfaceUnavailable("no compatible GPU adapter".into()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("glbview device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|err| RenderError::RendererCreateFailed(err.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::SurfaceUnavailable("surface reports no formats".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!(
            "GPU surface ready: {} ({:?}, {:?})",
            adapter.get_info().name,
            adapter.get_info().backend,
            format
        );

        Ok(Self {
            window,
            device: Arc::new(device),
            queue: Arc::new(queue),
            target: Rc::new(RefCell::new(Target {
                surface,
                config,
                pending: None,
            })),
            presented: 0,
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl GraphicsSurface for GpuSurface {
    type Renderer = GpuRenderer;

    fn create_renderer(&mut self) -> Result<GpuRenderer, RenderError> {
        let format = self.target.borrow().config.format;
        Ok(GpuRenderer::new(
            Arc::clone(&self.device),
            Arc::clone(&self.queue),
            Rc::clone(&self.target),
            format,
        ))
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn end_frame(&mut self) {
        let Some(frame) = self.target.borrow_mut().pending.take() else {
            return;
        };
        self.window.pre_present_notify();
        frame.present();
        self.presented += 1;
    }
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct DepthTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

/// Per-draw uniforms in one buffer, addressed with dynamic offsets.
struct DrawUniforms {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: usize,
}

impl DrawUniforms {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        capacity: usize,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("draw_uniforms"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw_bind_group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(DRAW_UNIFORM_SIZE),
                }),
            }],
        });
        Self {
            buffer,
            bind_group,
            stride,
            capacity,
        }
    }

    fn offset(&self, index: usize) -> u32 {
        (self.stride * index as u64) as u32
    }
}

enum DrawKind {
    Mesh { geometry: u64, texture: Option<u64> },
    Outline(u64),
}

struct DrawItem {
    uniform: DrawUniform,
    kind: DrawKind,
}

pub struct GpuRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    target: Rc<RefCell<Target>>,
    mesh_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    draw_layout: wgpu::BindGroupLayout,
    draws: DrawUniforms,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    white: wgpu::BindGroup,
    depth: Option<DepthTexture>,
    meshes: HashMap<u64, GpuMesh>,
    textures: HashMap<u64, wgpu::BindGroup>,
    outlines: HashMap<u64, wgpu::Buffer>,
    released: HashSet<ResourceHandle>,
}

impl GpuRenderer {
    fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        target: Rc<RefCell<Target>>,
        format: wgpu::TextureFormat,
    ) -> Self {
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("draw_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(DRAW_UNIFORM_SIZE),
                },
                count: None,
            }],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("glbview_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("glbview_pipeline_layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let mesh_pipeline = create_pipeline(
            &device,
            &pipeline_layout,
            &shader,
            format,
            wgpu::PrimitiveTopology::TriangleList,
            "fs_main",
        );
        let line_pipeline = create_pipeline(
            &device,
            &pipeline_layout,
            &shader,
            format,
            wgpu::PrimitiveTopology::LineList,
            "fs_line",
        );

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame_uniform"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_bind_group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let stride = align_to(
            DRAW_UNIFORM_SIZE,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let draws = DrawUniforms::new(&device, &draw_layout, stride, 64);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texture_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let white_texture = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("white_texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255; 4],
        );
        let white = texture_bind_group(&device, &texture_layout, &sampler, &white_texture);

        Self {
            device,
            queue,
            target,
            mesh_pipeline,
            line_pipeline,
            frame_buffer,
            frame_bind_group,
            draw_layout,
            draws,
            texture_layout,
            sampler,
            white,
            depth: None,
            meshes: HashMap::new(),
            textures: HashMap::new(),
            outlines: HashMap::new(),
            released: HashSet::new(),
        }
    }

    fn check(&self, handle: ResourceHandle) -> Result<(), RenderError> {
        if self.released.contains(&handle) {
            return Err(RenderError::ReleasedResource(handle));
        }
        Ok(())
    }

    /// Upload on first use. Returns false for geometry with nothing to draw.
    fn ensure_mesh(&mut self, geometry: &Geometry) -> bool {
        if self.meshes.contains_key(&geometry.id) {
            return true;
        }
        let triangles = valid_triangles(geometry);
        if triangles.is_empty() {
            return false;
        }
        let normals = vertex_normals(&geometry.positions, &triangles);
        let vertices: Vec<Vertex> = geometry
            .positions
            .iter()
            .zip(&normals)
            .enumerate()
            .map(|(i, (position, normal))| Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv: geometry
                    .uvs
                    .as_ref()
                    .and_then(|uvs| uvs.get(i))
                    .map_or([0.0; 2], |uv| uv.to_array()),
            })
            .collect();
        let indices: Vec<u32> = triangles.into_iter().flatten().collect();

        let mesh = GpuMesh {
            vertices: self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("mesh_vertices"),
                    contents: bytemuck::cast_slice(&vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
            indices: self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("mesh_indices"),
                    contents: bytemuck::cast_slice(&indices),
                    usage: wgpu::BufferUsages::INDEX,
                }),
            index_count: indices.len() as u32,
        };
        self.meshes.insert(geometry.id, mesh);
        true
    }

    /// Upload on first use. Returns false when the texture cannot be sampled.
    fn ensure_texture(&mut self, texture: &Texture) -> bool {
        if self.textures.contains_key(&texture.id) {
            return true;
        }
        let max = self.device.limits().max_texture_dimension_2d;
        let expected = texture.width as usize * texture.height as usize * 4;
        if texture.width == 0
            || texture.height == 0
            || texture.width > max
            || texture.height > max
            || texture.pixels.len() != expected
        {
            log::warn!(
                "Skipping texture {} ({}x{}, {} bytes)",
                texture.image_index,
                texture.width,
                texture.height,
                texture.pixels.len()
            );
            return false;
        }
        let format = if texture.srgb {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let gpu_texture = self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some("model_texture"),
                size: wgpu::Extent3d {
                    width: texture.width,
                    height: texture.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &texture.pixels,
        );
        let bind_group = texture_bind_group(
            &self.device,
            &self.texture_layout,
            &self.sampler,
            &gpu_texture,
        );
        self.textures.insert(texture.id, bind_group);
        true
    }

    fn push_model(&mut self, model: &ModelAsset, items: &mut Vec<DrawItem>) -> Result<(), RenderError> {
        let worlds = model.world_matrices();
        for (node, world) in model.nodes.iter().zip(&worlds) {
            for primitive in &node.primitives {
                let Some(geometry) = model.geometries.get(primitive.geometry) else {
                    continue;
                };
                self.check(ResourceHandle::Geometry(geometry.id))?;
                let material = model.materials.get(primitive.material);
                if let Some(material) = material {
                    self.check(ResourceHandle::Material(material.id))?;
                }
                let texture = material
                    .and_then(|material| material.base_color_map)
                    .and_then(|index| model.textures.get(index));
                if let Some(texture) = texture {
                    self.check(ResourceHandle::Texture(texture.id))?;
                }
                if !self.ensure_mesh(geometry) {
                    continue;
                }
                let texture = texture.filter(|texture| self.ensure_texture(texture));
                items.push(DrawItem {
                    uniform: DrawUniform::new(
                        *world,
                        material.map_or([1.0; 4], |material| material.base_color),
                        texture.is_some_and(|texture| texture.flip_y),
                    ),
                    kind: DrawKind::Mesh {
                        geometry: geometry.id,
                        texture: texture.map(|texture| texture.id),
                    },
                });
            }
        }
        Ok(())
    }

    /// Everything the scene draws this frame, uploading what is new.
    fn collect_draws(&mut self, scene: &Scene) -> Result<Vec<DrawItem>, RenderError> {
        let mut items = Vec::new();

        if let Some(placeholder) = scene.placeholder.as_ref().filter(|p| p.visible) {
            self.check(ResourceHandle::Geometry(placeholder.geometry.id))?;
            self.check(ResourceHandle::Material(placeholder.material.id))?;
            if self.ensure_mesh(&placeholder.geometry) {
                items.push(DrawItem {
                    uniform: DrawUniform::new(
                        placeholder.transform.matrix(),
                        placeholder.material.base_color,
                        false,
                    ),
                    kind: DrawKind::Mesh {
                        geometry: placeholder.geometry.id,
                        texture: None,
                    },
                });
            }
        }

        if let Some(model) = &scene.model {
            self.push_model(model, &mut items)?;
        }

        if let Some(outline) = scene.outline() {
            self.check(ResourceHandle::Geometry(outline.id))?;
            if !outline.bounds.is_empty() {
                let vertices = outline_vertices(&outline.bounds);
                let buffer = self.outlines.entry(outline.id).or_insert_with(|| {
                    self.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("outline_vertices"),
                        size: std::mem::size_of_val(&vertices) as u64,
                        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    })
                });
                self.queue
                    .write_buffer(buffer, 0, bytemuck::cast_slice(&vertices));
                items.push(DrawItem {
                    uniform: DrawUniform::new(Mat4::IDENTITY, OUTLINE_COLOR, false),
                    kind: DrawKind::Outline(outline.id),
                });
            }
        }

        Ok(items)
    }

    fn ensure_depth(&mut self, width: u32, height: u32) {
        if self.depth.as_ref().is_some_and(|depth| depth.size == (width, height)) {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.depth = Some(DepthTexture {
            _texture: texture,
            view,
            size: (width, height),
        });
    }

    fn ensure_draw_capacity(&mut self, count: usize) {
        if count <= self.draws.capacity {
            return;
        }
        let capacity = count.next_power_of_two();
        log::debug!("Growing draw uniforms to {} slots", capacity);
        self.draws = DrawUniforms::new(&self.device, &self.draw_layout, self.draws.stride, capacity);
    }
}

impl SceneRenderer for GpuRenderer {
    fn set_size(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let mut target = self.target.borrow_mut();
        if (target.config.width, target.config.height) == (width, height) {
            return;
        }
        target.config.width = width;
        target.config.height = height;
        target.surface.configure(&self.device, &target.config);
    }

    fn render(&mut self, scene: &Scene, camera: &Camera) -> Result<(), RenderError> {
        let items = self.collect_draws(scene)?;

        let (frame, width, height) = {
            let mut target = self.target.borrow_mut();
            let frame = match target.surface.get_current_texture() {
                Ok(frame) => frame,
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    target.surface.configure(&self.device, &target.config);
                    return Ok(());
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    log::debug!("Surface timed out, skipping frame");
                    return Ok(());
                }
                Err(err) => return Err(RenderError::SurfaceUnavailable(err.to_string())),
            };
            (frame, target.config.width, target.config.height)
        };
        self.ensure_depth(width, height);
        self.ensure_draw_capacity(items.len());

        self.queue.write_buffer(
            &self.frame_buffer,
            0,
            bytemuck::bytes_of(&FrameUniform::new(scene, camera)),
        );
        let stride = self.draws.stride as usize;
        let mut uniforms = vec![0u8; stride * items.len()];
        for (i, item) in items.iter().enumerate() {
            uniforms[i * stride..i * stride + DRAW_UNIFORM_SIZE as usize]
                .copy_from_slice(bytemuck::bytes_of(&item.uniform));
        }
        if !uniforms.is_empty() {
            self.queue.write_buffer(&self.draws.buffer, 0, &uniforms);
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });
        {
            let Some(depth) = &self.depth else {
                return Ok(());
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_bind_group(0, &self.frame_bind_group, &[]);

            for (i, item) in items.iter().enumerate() {
                pass.set_bind_group(1, &self.draws.bind_group, &[self.draws.offset(i)]);
                match item.kind {
                    DrawKind::Mesh { geometry, texture } => {
                        let Some(mesh) = self.meshes.get(&geometry) else {
                            continue;
                        };
                        let textures = texture.and_then(|id| self.textures.get(&id));
                        pass.set_pipeline(&self.mesh_pipeline);
                        pass.set_bind_group(2, textures.unwrap_or(&self.white), &[]);
                        pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                        pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                    }
                    DrawKind::Outline(id) => {
                        let Some(buffer) = self.outlines.get(&id) else {
                            continue;
                        };
                        pass.set_pipeline(&self.line_pipeline);
                        pass.set_bind_group(2, &self.white, &[]);
                        pass.set_vertex_buffer(0, buffer.slice(..));
                        pass.draw(0..OUTLINE_VERTICES as u32, 0..1);
                    }
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.target.borrow_mut().pending = Some(frame);
        Ok(())
    }

    fn release(&mut self, handle: ResourceHandle) -> Result<(), ReleaseError> {
        if !self.released.insert(handle) {
            return Err(ReleaseError::AlreadyReleased(handle));
        }
        match handle {
            ResourceHandle::Geometry(id) => {
                self.meshes.remove(&id);
                self.outlines.remove(&id);
            }
            ResourceHandle::Texture(id) => {
                self.textures.remove(&id);
            }
            // Materials live in the per-draw uniforms.
            ResourceHandle::Material(_) => {}
        }
        Ok(())
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    format: wgpu::TextureFormat,
    topology: wgpu::PrimitiveTopology,
    fragment_entry: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(fragment_entry),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[Vertex::layout()],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    texture: &wgpu::Texture,
) -> wgpu::BindGroup {
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("texture_bind_group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}
