//! Image resolution for glTF documents.
//!
//! Every declared image is decoded at most once. Inline `data:` URIs are decoded
//! straight from memory; images stored in a buffer view are sliced out, staged
//! into a scratch file and decoded from that file, and the file is removed
//! afterwards whether or not decoding worked. A failing image is logged and
//! skipped, it never aborts the load.

use super::scratch::{ScratchArea, StagedFile};
use crate::scene::{next_resource_id, Texture};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("unsupported image uri: {0}")]
    UnsupportedUri(String),
    #[error("invalid data uri: {0}")]
    InvalidDataUri(String),
    #[error("buffer view {view} is out of range of buffer {buffer}")]
    ViewOutOfRange { view: usize, buffer: usize },
    #[error("failed to stage image: {0}")]
    Stage(#[source] std::io::Error),
    #[error("failed to read staged image {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Turns encoded image bytes into RGBA8 pixels.
pub trait TextureDecoder: Send {
    fn decode_bytes(&self, bytes: &[u8]) -> Result<DecodedImage, TextureError>;
    fn decode_file(&self, path: &Path) -> Result<DecodedImage, TextureError>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl TextureDecoder for ImageDecoder {
    fn decode_bytes(&self, bytes: &[u8]) -> Result<DecodedImage, TextureError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        Ok(DecodedImage {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }

    fn decode_file(&self, path: &Path) -> Result<DecodedImage, TextureError> {
        let bytes = std::fs::read(path).map_err(|source| TextureError::Read {
            path: path.display().to_string(),
            source,
        })?;
        self.decode_bytes(&bytes)
    }
}

/// A parsed base64 `data:` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUri {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Parse `data:[<mime>][;base64],<payload>`. Only base64 payloads are accepted.
pub fn parse_data_uri(uri: &str) -> Result<DataUri, TextureError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| TextureError::UnsupportedUri(truncate(uri)))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| TextureError::InvalidDataUri(truncate(uri)))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| TextureError::InvalidDataUri(truncate(uri)))?;
    let bytes = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|err| TextureError::InvalidDataUri(err.to_string()))?;
    Ok(DataUri {
        mime_type: mime_type.to_string(),
        bytes,
    })
}

fn truncate(uri: &str) -> String {
    uri.chars().take(48).collect()
}

/// Decoded textures for one document.
#[derive(Debug, Default)]
pub struct ResolvedTextures {
    /// One entry per successfully decoded image, in image order.
    pub textures: Vec<Texture>,
    /// glTF texture index -> index into `textures`.
    pub by_texture_index: HashMap<usize, usize>,
    pub images_declared: usize,
    pub images_failed: usize,
}

pub fn resolve_textures(
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    decoder: &dyn TextureDecoder,
    scratch: &dyn ScratchArea,
) -> ResolvedTextures {
    let mut resolved = ResolvedTextures::default();
    let mut by_image: HashMap<usize, usize> = HashMap::new();

    for image in document.images() {
        resolved.images_declared += 1;
        let index = image.index();
        match decode_image(&image, buffers, decoder, scratch) {
            Ok(decoded) => {
                by_image.insert(index, resolved.textures.len());
                resolved.textures.push(Texture {
                    id: next_resource_id(),
                    image_index: index,
                    width: decoded.width,
                    height: decoded.height,
                    pixels: decoded.pixels,
                    flip_y: false,
                    srgb: false,
                });
            }
            Err(err) => {
                resolved.images_failed += 1;
                log::warn!("Skipping image {}: {}", index, err);
            }
        }
    }

    for texture in document.textures() {
        if let Some(&slot) = by_image.get(&texture.source().index()) {
            resolved.by_texture_index.insert(texture.index(), slot);
        }
    }

    resolved
}

fn decode_image(
    image: &gltf::Image<'_>,
    buffers: &[Vec<u8>],
    decoder: &dyn TextureDecoder,
    scratch: &dyn ScratchArea,
) -> Result<DecodedImage, TextureError> {
    match image.source() {
        gltf::image::Source::Uri { uri, .. } => {
            let data = parse_data_uri(uri)?;
            decoder.decode_bytes(&data.bytes)
        }
        gltf::image::Source::View { view, mime_type } => {
            let buffer_index = view.buffer().index();
            let bytes = buffers
                .get(buffer_index)
                .and_then(|buffer| buffer.get(view.offset()..view.offset() + view.length()))
                .ok_or(TextureError::ViewOutOfRange {
                    view: view.index(),
                    buffer: buffer_index,
                })?;
            let path = scratch
                .stage(&format!("image-{}", image.index()), mime_type, bytes)
                .map_err(TextureError::Stage)?;
            let staged = StagedFile::new(scratch, path);
            decoder.decode_file(staged.path())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::scratch::FsScratch;
    use crate::assets::testing::{png_bytes, GlbBuilder};

    #[test]
    fn data_uri_roundtrip() {
        let uri = format!("data:image/png;base64,{}", BASE64_STANDARD.encode(b"hello"));
        let data = parse_data_uri(&uri).unwrap();
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(data.bytes, b"hello");
    }

    #[test]
    fn non_data_uri_is_unsupported() {
        assert!(matches!(
            parse_data_uri("textures/albedo.png"),
            Err(TextureError::UnsupportedUri(_))
        ));
        assert!(matches!(
            parse_data_uri("data:image/png,raw"),
            Err(TextureError::InvalidDataUri(_))
        ));
    }

    #[test]
    fn image_decoder_reads_png() {
        let decoded = ImageDecoder.decode_bytes(&png_bytes(3, 2, [255, 0, 0, 255])).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.pixels.len(), 3 * 2 * 4);
        assert_eq!(&decoded.pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn inline_and_view_images_both_decode_and_scratch_is_clean() {
        let mut builder = GlbBuilder::triangle();
        let inline = builder.add_inline_image(&png_bytes(2, 2, [0, 255, 0, 255]));
        let viewed = builder.add_view_image(&png_bytes(4, 4, [0, 0, 255, 255]));
        builder.add_texture(inline);
        builder.add_texture(viewed);
        let (document, buffers) = builder.parse();

        let dir = tempfile::tempdir().unwrap();
        let scratch = FsScratch::new(dir.path()).unwrap();
        let resolved = resolve_textures(&document, &buffers, &ImageDecoder, &scratch);

        assert_eq!(resolved.images_declared, 2);
        assert_eq!(resolved.images_failed, 0);
        assert_eq!(resolved.textures.len(), 2);
        assert_eq!(resolved.by_texture_index.get(&1), Some(&1));
        assert_eq!(resolved.textures[1].width, 4);
        assert!(resolved.textures.iter().all(|t| !t.flip_y));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_view_image_is_skipped_and_scratch_is_clean() {
        let mut builder = GlbBuilder::triangle();
        let bad = builder.add_view_image(b"definitely not a png");
        builder.add_texture(bad);
        let (document, buffers) = builder.parse();

        let dir = tempfile::tempdir().unwrap();
        let scratch = FsScratch::new(dir.path()).unwrap();
        let resolved = resolve_textures(&document, &buffers, &ImageDecoder, &scratch);

        assert_eq!(resolved.images_failed, 1);
        assert!(resolved.textures.is_empty());
        assert!(resolved.by_texture_index.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn shared_image_is_decoded_once() {
        struct Counting(std::sync::atomic::AtomicUsize);
        impl TextureDecoder for Counting {
            fn decode_bytes(&self, bytes: &[u8]) -> Result<DecodedImage, TextureError> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                ImageDecoder.decode_bytes(bytes)
            }
            fn decode_file(&self, path: &Path) -> Result<DecodedImage, TextureError> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                ImageDecoder.decode_file(path)
            }
        }

        let mut builder = GlbBuilder::triangle();
        let image = builder.add_inline_image(&png_bytes(1, 1, [9, 9, 9, 255]));
        builder.add_texture(image);
        builder.add_texture(image);
        let (document, buffers) = builder.parse();

        let dir = tempfile::tempdir().unwrap();
        let scratch = FsScratch::new(dir.path()).unwrap();
        let decoder = Counting(std::sync::atomic::AtomicUsize::new(0));
        let resolved = resolve_textures(&document, &buffers, &decoder, &scratch);

        assert_eq!(decoder.0.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(resolved.textures.len(), 1);
        assert_eq!(resolved.by_texture_index.get(&0), Some(&0));
        assert_eq!(resolved.by_texture_index.get(&1), Some(&0));
    }
}
