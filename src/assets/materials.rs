use crate::scene::{next_resource_id, ModelAsset, TextureSlot};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BindingReport {
    pub bound_slots: usize,
    pub unmatched_materials: usize,
    pub fallback_materials: usize,
}

/// Texture index referenced by a declared material for `slot`.
fn declared_texture(material: &gltf::Material<'_>, slot: TextureSlot) -> Option<usize> {
    match slot {
        TextureSlot::BaseColor => material
            .pbr_metallic_roughness()
            .base_color_texture()
            .map(|info| info.texture().index()),
        TextureSlot::Normal => material.normal_texture().map(|t| t.texture().index()),
        TextureSlot::Occlusion => material.occlusion_texture().map(|t| t.texture().index()),
        TextureSlot::Emissive => material.emissive_texture().map(|info| info.texture().index()),
    }
}

/// Runtime materials reachable from the model's meshes, each visited once.
fn runtime_materials(model: &ModelAsset) -> BTreeSet<usize> {
    model
        .nodes
        .iter()
        .flat_map(|node| node.primitives.iter().map(|primitive| primitive.material))
        .filter(|&index| index < model.materials.len())
        .collect()
}

/// Index of the texture to bind for `source` sampled as sRGB or linear. The
/// first binding claims the decoded texture. A binding in the other color
/// space gets its own copy.
fn texture_in_space(
    model: &mut ModelAsset,
    variants: &mut HashMap<(usize, bool), usize>,
    source: usize,
    srgb: bool,
) -> Option<usize> {
    if let Some(&index) = variants.get(&(source, srgb)) {
        return Some(index);
    }
    let claimed = variants.keys().any(|&(bound, _)| bound == source);
    let decoded = model.textures.get(source)?;
    let index = if claimed {
        log::debug!(
            "Texture {} is bound as both color and data, copying it for {} sampling",
            source,
            if srgb { "sRGB" } else { "linear" }
        );
        let mut copy = decoded.clone();
        copy.id = next_resource_id();
        model.textures.push(copy);
        model.textures.len() - 1
    } else {
        source
    };
    let texture = &mut model.textures[index];
    texture.flip_y = false;
    texture.srgb = srgb;
    variants.insert((source, srgb), index);
    Some(index)
}

/// Bind decoded textures onto the model's runtime materials by material name,
/// then apply the base-color fallback when no material received one.
///
/// `textures_by_index` maps glTF texture indices into `model.textures`.
pub fn bind_materials(
    document: &gltf::Document,
    model: &mut ModelAsset,
    textures_by_index: &HashMap<usize, usize>,
) -> BindingReport {
    let mut report = BindingReport::default();
    let mut variants: HashMap<(usize, bool), usize> = HashMap::new();
    let reachable = runtime_materials(model);

    let mut by_name: HashMap<String, usize> = HashMap::new();
    for &index in &reachable {
        let name = &model.materials[index].name;
        if !name.is_empty() {
            by_name.entry(name.clone()).or_insert(index);
        }
    }

    for declared in document.materials() {
        let Some(&runtime) = declared.name().and_then(|name| by_name.get(name)) else {
            report.unmatched_materials += 1;
            continue;
        };
        for slot in TextureSlot::ALL {
            let Some(texture) = declared_texture(&declared, slot)
                .and_then(|index| textures_by_index.get(&index).copied())
                .and_then(|source| {
                    texture_in_space(model, &mut variants, source, slot.is_color())
                })
            else {
                continue;
            };
            model.materials[runtime].set_slot(slot, Some(texture));
            report.bound_slots += 1;
        }
    }

    let any_base_color = reachable
        .iter()
        .any(|&index| model.materials[index].base_color_map.is_some());
    if !model.textures.is_empty() && !any_base_color && !reachable.is_empty() {
        let Some(fallback) = texture_in_space(model, &mut variants, 0, true) else {
            return report;
        };
        for &index in &reachable {
            let material = &mut model.materials[index];
            if material.base_color_map.is_none() {
                material.base_color_map = Some(fallback);
                report.fallback_materials += 1;
            }
        }
        if report.fallback_materials > 0 {
            log::debug!(
                "Applied fallback base color texture to {} materials",
                report.fallback_materials
            );
        }
    }

    report
}
