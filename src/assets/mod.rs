mod document;
mod fetch;
mod materials;
mod normalize;
mod scratch;
mod textures;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use document::{decode_document, DecodedDocument};
pub use fetch::{asset_name, AssetCache};
pub use materials::{bind_materials, BindingReport};
pub use normalize::normalize_model;
pub use scratch::{extension_for_mime, FsScratch, ScratchArea};
pub use textures::{
    parse_data_uri, resolve_textures, DataUri, DecodedImage, ImageDecoder, ResolvedTextures,
    TextureDecoder, TextureError,
};
pub use worker::{LoadOutcome, LoadWorker};

use crate::config::ViewerConfig;
use crate::scene::ModelAsset;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read asset at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("failed to decode scene document {name}: {reason}")]
    Decode { name: String, reason: String },
    #[error("failed to create scratch area at {path}: {source}")]
    Scratch {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub images_declared: usize,
    pub images_decoded: usize,
    pub images_failed: usize,
    pub bindings: BindingReport,
}

/// A model ready to be swapped into the scene.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model: ModelAsset,
    /// Camera vertical offset for the normalized model.
    pub half_height: f32,
    pub stats: LoadStats,
}

/// Fetch, decode, texture and normalize a model.
pub struct AssetLoader {
    cache: AssetCache,
    decoder: Box<dyn TextureDecoder>,
    scratch: Box<dyn ScratchArea>,
    target_size: f32,
}

impl AssetLoader {
    pub fn new(
        cache: AssetCache,
        decoder: Box<dyn TextureDecoder>,
        scratch: Box<dyn ScratchArea>,
        target_size: f32,
    ) -> Self {
        Self {
            cache,
            decoder,
            scratch,
            target_size,
        }
    }

    /// Disk cache and scratch area under `config.cache_dir`, `image` decoding.
    pub fn from_config(config: &ViewerConfig) -> Result<Self, AssetError> {
        let scratch_dir = config.cache_dir.join("scratch");
        let scratch = FsScratch::new(&scratch_dir).map_err(|source| AssetError::Scratch {
            path: scratch_dir.display().to_string(),
            source,
        })?;
        Ok(Self::new(
            AssetCache::new(&config.cache_dir),
            Box::new(ImageDecoder),
            Box::new(scratch),
            config.target_size,
        ))
    }

    pub fn load(&self, url: &str) -> Result<LoadedModel, AssetError> {
        let bytes = self.cache.fetch(url)?;
        self.load_bytes(&asset_name(url), &bytes)
    }

    pub fn load_bytes(&self, name: &str, bytes: &[u8]) -> Result<LoadedModel, AssetError> {
        let DecodedDocument {
            document,
            buffers,
            mut model,
        } = decode_document(bytes, name)?;

        let resolved = resolve_textures(
            &document,
            &buffers,
            self.decoder.as_ref(),
            self.scratch.as_ref(),
        );
        let mut stats = LoadStats {
            images_declared: resolved.images_declared,
            images_decoded: resolved.textures.len(),
            images_failed: resolved.images_failed,
            ..LoadStats::default()
        };
        model.textures = resolved.textures;
        stats.bindings = bind_materials(&document, &mut model, &resolved.by_texture_index);
        let half_height = normalize_model(&mut model, self.target_size);

        log::info!(
            "Loaded {}: {} nodes, {} meshes, {}/{} images decoded",
            name,
            model.nodes.len(),
            model.mesh_count(),
            stats.images_decoded,
            stats.images_declared
        );
        Ok(LoadedModel {
            model,
            half_height,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use super::testing::{png_bytes, GlbBuilder};

    struct FailingDecoder;

    impl TextureDecoder for FailingDecoder {
        fn decode_bytes(&self, _bytes: &[u8]) -> Result<DecodedImage, TextureError> {
            Err(TextureError::InvalidDataUri("simulated".to_string()))
        }

        fn decode_file(&self, path: &Path) -> Result<DecodedImage, TextureError> {
            assert!(path.exists(), "staged file must exist while decoding");
            Err(TextureError::InvalidDataUri("simulated".to_string()))
        }
    }

    fn loader_in(dir: &Path, decoder: Box<dyn TextureDecoder>) -> AssetLoader {
        let scratch = FsScratch::new(dir.join("scratch")).unwrap();
        AssetLoader::new(AssetCache::new(dir.join("cache")), decoder, Box::new(scratch), 2.0)
    }

    fn scratch_count(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("scratch")).unwrap().count()
    }

    #[test]
    fn inline_and_view_textures_bind_to_single_material() {
        let mut builder = GlbBuilder::triangle();
        let inline = builder.add_inline_image(&png_bytes(2, 2, [255, 255, 255, 255]));
        let viewed = builder.add_view_image(&png_bytes(2, 2, [128, 128, 255, 255]));
        let base = builder.add_texture(inline);
        let normal = builder.add_texture(viewed);
        let material = builder.add_material(Some("Body"), Some(base), Some(normal));
        builder.assign_material(0, material);

        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path(), Box::new(ImageDecoder));
        let loaded = loader.load_bytes("two-images.glb", &builder.build()).unwrap();

        assert_eq!(loaded.stats.images_decoded, 2);
        assert_eq!(loaded.stats.bindings.bound_slots, 2);
        assert_eq!(loaded.stats.bindings.fallback_materials, 0);
        assert_eq!(loaded.model.materials.len(), 1);
        assert_eq!(loaded.model.materials[0].base_color_map, Some(0));
        assert_eq!(loaded.model.materials[0].normal_map, Some(1));
        assert_eq!(scratch_count(dir.path()), 0);
    }

    #[test]
    fn failing_decodes_do_not_abort_and_leave_no_scratch_files() {
        let mut builder = GlbBuilder::triangle();
        let a = builder.add_view_image(&png_bytes(1, 1, [0, 0, 0, 255]));
        let b = builder.add_inline_image(&png_bytes(1, 1, [0, 0, 0, 255]));
        let c = builder.add_view_image(&png_bytes(1, 1, [0, 0, 0, 255]));
        for image in [a, b, c] {
            builder.add_texture(image);
        }

        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path(), Box::new(FailingDecoder));
        let before = scratch_count(dir.path());
        let loaded = loader.load_bytes("broken.glb", &builder.build()).unwrap();

        assert_eq!(loaded.stats.images_failed, 3);
        assert!(loaded.model.textures.is_empty());
        assert_eq!(scratch_count(dir.path()), before);
    }

    #[test]
    fn single_failed_image_without_materials_still_loads() {
        let mut builder = GlbBuilder::triangle();
        let bad = builder.add_view_image(b"not an image");
        builder.add_texture(bad);

        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path(), Box::new(ImageDecoder));
        let loaded = loader.load_bytes("untextured.glb", &builder.build()).unwrap();

        assert_eq!(loaded.stats.images_failed, 1);
        assert_eq!(loaded.model.mesh_count(), 1);
        assert!(loaded.model.materials.iter().all(|m| m.base_color_map.is_none()));
        assert!(loaded.half_height > 0.0);
    }

    #[test]
    fn load_reads_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.glb");
        std::fs::write(&path, GlbBuilder::triangle().build()).unwrap();
        let loader = loader_in(dir.path(), Box::new(ImageDecoder));
        let loaded = loader.load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.model.name, "tri.glb");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path(), Box::new(ImageDecoder));
        assert!(matches!(
            loader.load("/no/such/model.glb"),
            Err(AssetError::Read { .. })
        ));
    }
}
