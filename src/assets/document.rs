use super::textures::parse_data_uri;
use super::AssetError;
use crate::scene::{Geometry, Material, MeshPrimitive, ModelAsset, Node, Transform};
use glam::{Vec2, Vec3};

/// A parsed document with its buffers resolved and its scene graph built.
/// Materials come out untextured; textures are bound in a later step.
pub struct DecodedDocument {
    pub document: gltf::Document,
    pub buffers: Vec<Vec<u8>>,
    pub model: ModelAsset,
}

pub fn decode_document(bytes: &[u8], name: &str) -> Result<DecodedDocument, AssetError> {
    let gltf::Gltf { document, blob } =
        gltf::Gltf::from_slice(bytes).map_err(|err| AssetError::Decode {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
    let buffers = resolve_buffers(&document, blob).map_err(|reason| AssetError::Decode {
        name: name.to_string(),
        reason,
    })?;
    let model = build_model(&document, &buffers, name).map_err(|reason| AssetError::Decode {
        name: name.to_string(),
        reason,
    })?;
    Ok(DecodedDocument {
        document,
        buffers,
        model,
    })
}

/// GLB binary chunk and base64 `data:` buffers only.
pub(crate) fn resolve_buffers(
    document: &gltf::Document,
    mut blob: Option<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, String> {
    let mut buffers = Vec::new();
    for buffer in document.buffers() {
        let data = match buffer.source() {
            gltf::buffer::Source::Bin => blob
                .take()
                .ok_or_else(|| format!("buffer {} expects a missing GLB binary chunk", buffer.index()))?,
            gltf::buffer::Source::Uri(uri) => parse_data_uri(uri)
                .map(|data| data.bytes)
                .map_err(|err| format!("buffer {}: {}", buffer.index(), err))?,
        };
        if data.len() < buffer.length() {
            return Err(format!(
                "buffer {} holds {} bytes, {} declared",
                buffer.index(),
                data.len(),
                buffer.length()
            ));
        }
        buffers.push(data);
    }
    Ok(buffers)
}

fn build_model(
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    name: &str,
) -> Result<ModelAsset, String> {
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| "document has no scene".to_string())?;

    let mut model = ModelAsset {
        name: name.to_string(),
        ..ModelAsset::default()
    };
    for material in document.materials() {
        model.materials.push(Material::new(
            material.name().unwrap_or_default(),
            material.pbr_metallic_roughness().base_color_factor(),
        ));
    }
    let mut default_material: Option<usize> = None;

    let mut stack: Vec<(gltf::Node<'_>, Option<usize>)> =
        scene.nodes().map(|node| (node, None)).collect();
    stack.reverse();
    while let Some((node, parent)) = stack.pop() {
        let (translation, rotation, scale) = node.transform().decomposed();
        let mut primitives = Vec::new();
        if let Some(mesh) = node.mesh() {
            for primitive in mesh.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    log::debug!(
                        "Skipping non-triangle primitive {} of mesh {}",
                        primitive.index(),
                        mesh.index()
                    );
                    continue;
                }
                let reader =
                    primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
                let Some(positions) = reader.read_positions() else {
                    log::debug!("Skipping primitive without positions in mesh {}", mesh.index());
                    continue;
                };
                let positions: Vec<Vec3> = positions.map(Vec3::from).collect();
                let indices = reader
                    .read_indices()
                    .map(|indices| indices.into_u32().collect());
                let uvs = reader
                    .read_tex_coords(0)
                    .map(|coords| coords.into_f32().map(Vec2::from).collect());
                model
                    .geometries
                    .push(Geometry::new(positions, indices).with_uvs(uvs));

                let material = match primitive.material().index() {
                    Some(index) => index,
                    None => *default_material.get_or_insert_with(|| {
                        model.materials.push(Material::new("", [1.0, 1.0, 1.0, 1.0]));
                        model.materials.len() - 1
                    }),
                };
                primitives.push(MeshPrimitive {
                    geometry: model.geometries.len() - 1,
                    material,
                });
            }
        }

        let index = model.add_node(Node {
            name: node.name().unwrap_or_default().to_string(),
            parent,
            children: Vec::new(),
            transform: Transform::from_trs(translation, rotation, scale),
            primitives,
        });
        let mut children: Vec<_> = node.children().map(|child| (child, Some(index))).collect();
        children.reverse();
        stack.extend(children);
    }

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::testing::GlbBuilder;

    #[test]
    fn decodes_triangle_glb() {
        let decoded = decode_document(&GlbBuilder::triangle().build(), "tri.glb").unwrap();
        let model = decoded.model;
        assert_eq!(model.nodes.len(), 1);
        assert_eq!(model.roots, vec![0]);
        assert_eq!(model.nodes[0].name, "Body");
        assert_eq!(model.geometries.len(), 1);
        assert_eq!(model.geometries[0].triangle_count(), 1);
        // No declared material, so a default one is created.
        assert_eq!(model.materials.len(), 1);
        assert_eq!(model.nodes[0].primitives[0].material, 0);
    }

    #[test]
    fn keeps_hierarchy_and_material_names() {
        let mut builder = GlbBuilder::new();
        let mesh = builder.add_mesh(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], &[0, 1, 2]);
        let material = builder.add_material(Some("Paint"), None, None);
        builder.assign_material(mesh, material);
        let wheel = builder.add_node("Wheel", Some(mesh), &[], [1.0, 0.0, 0.0]);
        let car = builder.add_node("Car", None, &[wheel], [0.0, 0.0, 0.0]);
        builder.add_root(car);

        let model = decode_document(&builder.build(), "car.glb").unwrap().model;
        assert_eq!(model.nodes.len(), 2);
        assert_eq!(model.nodes[0].name, "Car");
        assert_eq!(model.nodes[1].parent, Some(0));
        assert_eq!(model.nodes[0].children, vec![1]);
        assert_eq!(model.materials.len(), 1);
        assert_eq!(model.materials[0].name, "Paint");
        assert_eq!(model.nodes[1].transform.translation, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_document(b"not a model", "junk.glb").err().unwrap();
        assert!(matches!(err, AssetError::Decode { .. }));
    }
}
