//! Lookup textures declared in the preset's `textures` list.

use log::warn;

use super::backend::{GpuBackend, TextureDesc, TextureId};
use crate::error::ChainResult;
use crate::preset::{FramebufferFormat, LookupTextureConfig};
use crate::source_store::SourceFetcher;

/// Decoded RGBA8 pixels, bottom row first.
#[derive(Clone, Debug, PartialEq)]
pub struct LutImage {
    pub name: String,
    pub size: [u32; 2],
    pub pixels: Vec<u8>,
}

impl LutImage {
    /// 1x1 opaque black, used when the file is missing or unreadable.
    pub fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: [1, 1],
            pixels: vec![0, 0, 0, 255],
        }
    }

    pub fn decode(name: &str, bytes: &[u8]) -> Result<Self, image::ImageError> {
        let mut rgba = image::load_from_memory(bytes)?.to_rgba8();
        // Sampling uses a bottom-left origin.
        image::imageops::flip_vertical_in_place(&mut rgba);
        Ok(Self {
            name: name.to_string(),
            size: [rgba.width(), rgba.height()],
            pixels: rgba.into_raw(),
        })
    }
}

/// Fetch and decode one lookup texture. Never fails; problems are logged and
/// the placeholder is returned.
pub fn load_lut(config: &LookupTextureConfig, fetcher: &dyn SourceFetcher) -> LutImage {
    let bytes = match fetcher.fetch_bytes(&config.path) {
        Ok(b) => b,
        Err(e) => {
            warn!("[lut] {}: {e}; using black", config.name);
            return LutImage::placeholder(&config.name);
        }
    };
    match LutImage::decode(&config.name, &bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!(
                "[lut] {}: cannot decode {}: {e}; using black",
                config.name,
                config.path.display()
            );
            LutImage::placeholder(&config.name)
        }
    }
}

/// Upload a decoded image, generating mipmaps when the preset asks for them.
pub fn upload_lut(
    gpu: &mut dyn GpuBackend,
    image: &LutImage,
    mipmap: bool,
) -> ChainResult<TextureId> {
    let mut desc = TextureDesc::new(image.name.clone(), image.size, FramebufferFormat::Rgba8);
    desc.mipmap = mipmap;
    let texture = gpu.create_texture(&desc)?;
    if let Err(e) = gpu
        .upload_rgba8(texture, image.size, &image.pixels)
        .and_then(|_| if mipmap { gpu.generate_mipmaps(texture) } else { Ok(()) })
    {
        gpu.delete_texture(texture);
        return Err(e);
    }
    Ok(texture)
}
