//! In-memory GLB fixtures for tests.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};

pub(crate) fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[derive(Default)]
pub(crate) struct GlbBuilder {
    bin: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
    meshes: Vec<Value>,
    nodes: Vec<Value>,
    scene_nodes: Vec<usize>,
    images: Vec<Value>,
    textures: Vec<Value>,
    materials: Vec<Value>,
}

impl GlbBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// One root node "Body" holding a single triangle, no material.
    pub(crate) fn triangle() -> Self {
        let mut builder = Self::new();
        let mesh = builder.add_mesh(&[[-0.5, 0.0, 0.0], [0.5, 0.0, 0.0], [0.0, 1.0, 0.0]], &[0, 1, 2]);
        let node = builder.add_node("Body", Some(mesh), &[], [0.0, 0.0, 0.0]);
        builder.add_root(node);
        builder
    }

    fn push_view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        let mut view = json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.buffer_views.push(view);
        self.buffer_views.len() - 1
    }

    pub(crate) fn add_mesh(&mut self, positions: &[[f32; 3]], indices: &[u16]) -> usize {
        let position_bytes: Vec<u8> = positions
            .iter()
            .flat_map(|p| p.iter().flat_map(|v| v.to_le_bytes()))
            .collect();
        let index_bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();

        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for p in positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }

        let position_view = self.push_view(&position_bytes, Some(34962));
        self.accessors.push(json!({
            "bufferView": position_view,
            "componentType": 5126,
            "count": positions.len(),
            "type": "VEC3",
            "min": min,
            "max": max,
        }));
        let position_accessor = self.accessors.len() - 1;

        let index_view = self.push_view(&index_bytes, Some(34963));
        self.accessors.push(json!({
            "bufferView": index_view,
            "componentType": 5123,
            "count": indices.len(),
            "type": "SCALAR",
        }));
        let index_accessor = self.accessors.len() - 1;

        self.meshes.push(json!({
            "primitives": [{
                "attributes": { "POSITION": position_accessor },
                "indices": index_accessor,
            }]
        }));
        self.meshes.len() - 1
    }

    pub(crate) fn add_node(
        &mut self,
        name: &str,
        mesh: Option<usize>,
        children: &[usize],
        translation: [f32; 3],
    ) -> usize {
        let mut node = json!({ "name": name, "translation": translation });
        if let Some(mesh) = mesh {
            node["mesh"] = json!(mesh);
        }
        if !children.is_empty() {
            node["children"] = json!(children);
        }
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub(crate) fn add_root(&mut self, node: usize) {
        self.scene_nodes.push(node);
    }

    pub(crate) fn add_inline_image(&mut self, bytes: &[u8]) -> usize {
        self.images.push(json!({
            "uri": format!("data:image/png;base64,{}", BASE64_STANDARD.encode(bytes)),
        }));
        self.images.len() - 1
    }

    pub(crate) fn add_view_image(&mut self, bytes: &[u8]) -> usize {
        let view = self.push_view(bytes, None);
        self.images.push(json!({ "bufferView": view, "mimeType": "image/png" }));
        self.images.len() - 1
    }

    pub(crate) fn add_texture(&mut self, image: usize) -> usize {
        self.textures.push(json!({ "source": image }));
        self.textures.len() - 1
    }

    /// Declare a material with optional base color and normal textures.
    pub(crate) fn add_material(
        &mut self,
        name: Option<&str>,
        base_color: Option<usize>,
        normal: Option<usize>,
    ) -> usize {
        let mut material = json!({ "pbrMetallicRoughness": {} });
        if let Some(name) = name {
            material["name"] = json!(name);
        }
        if let Some(texture) = base_color {
            material["pbrMetallicRoughness"]["baseColorTexture"] = json!({ "index": texture });
        }
        if let Some(texture) = normal {
            material["normalTexture"] = json!({ "index": texture });
        }
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub(crate) fn assign_material(&mut self, mesh: usize, material: usize) {
        self.meshes[mesh]["primitives"][0]["material"] = json!(material);
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut root = Map::new();
        root.insert("asset".to_string(), json!({ "version": "2.0" }));
        root.insert("scene".to_string(), json!(0));
        root.insert("scenes".to_string(), json!([{ "nodes": self.scene_nodes }]));
        let arrays = [
            ("nodes", &self.nodes),
            ("meshes", &self.meshes),
            ("accessors", &self.accessors),
            ("bufferViews", &self.buffer_views),
            ("images", &self.images),
            ("textures", &self.textures),
            ("materials", &self.materials),
        ];
        for (key, values) in arrays {
            if !values.is_empty() {
                root.insert(key.to_string(), Value::Array(values.clone()));
            }
        }
        if !self.bin.is_empty() {
            root.insert("buffers".to_string(), json!([{ "byteLength": self.bin.len() }]));
        }

        let mut json_chunk = serde_json::to_vec(&Value::Object(root)).unwrap();
        while json_chunk.len() % 4 != 0 {
            json_chunk.push(b' ');
        }
        let mut bin_chunk = self.bin.clone();
        while bin_chunk.len() % 4 != 0 {
            bin_chunk.push(0);
        }

        let mut total = 12 + 8 + json_chunk.len();
        if !bin_chunk.is_empty() {
            total += 8 + bin_chunk.len();
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
        out.extend_from_slice(&json_chunk);
        if !bin_chunk.is_empty() {
            out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
            out.extend_from_slice(&0x004E_4942u32.to_le_bytes());
            out.extend_from_slice(&bin_chunk);
        }
        out
    }

    /// Parse the built GLB back into a document and its resolved buffers.
    pub(crate) fn parse(&self) -> (gltf::Document, Vec<Vec<u8>>) {
        let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(&self.build()).unwrap();
        let buffers = super::document::resolve_buffers(&document, blob).unwrap();
        (document, buffers)
    }
}
