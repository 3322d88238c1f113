//! Interfaces of the external collaborators and their reference implementations
//!
//! The layer never talks to a GPU, a network or a file system directly. It goes through
//! [`GraphicsBackend`], [`Retriever`], [`FileStore`] and [`TileDecoder`].

use crate::{
    CurtainError, Result, SegmentGeometry, TexCoordTransform, TextureData, TextureFormat, TileKey,
};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque identifier of a texture owned by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub use_mipmaps: bool,
    /// Keep the texture resident regardless of the backend's eviction policy
    pub pinned: bool,
}

/// One draw call of a curtain patch
#[derive(Debug)]
pub struct TileDraw<'a> {
    /// Tile being drawn
    pub key: &'a TileKey,
    /// Texture bound for the draw: the tile's own or its fallback ancestor's
    pub texture: &'a TileKey,
    pub tex_transform: TexCoordTransform,
    pub geometry: &'a SegmentGeometry,
}

impl TileDraw<'_> {
    pub fn uses_fallback(&self) -> bool {
        self.key != self.texture
    }
}

/// GPU side of the renderer, used from the render thread only
pub trait GraphicsBackend {
    fn is_resident(&self, key: &TileKey) -> bool;

    fn upload(&mut self, key: &TileKey, data: TextureData, options: UploadOptions) -> TextureHandle;

    /// Bind the texture of `key`, false when it is not resident
    fn bind(&mut self, key: &TileKey) -> bool;

    fn draw(&mut self, draw: &TileDraw<'_>);
}

/// Disk cache of tile files, addressed by relative cache paths
pub trait FileStore: Send + Sync {
    /// Existing file for a cache path
    fn find_file(&self, path: &str) -> Option<PathBuf>;

    /// Destination for a new file, creating its parent directories
    fn new_file(&self, path: &str) -> io::Result<PathBuf>;

    fn remove_file(&self, path: &str) -> io::Result<()>;
}

/// [`FileStore`] rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl FileStore for LocalFileStore {
    fn find_file(&self, path: &str) -> Option<PathBuf> {
        let file = self.resolve(path);
        file.is_file().then_some(file)
    }

    fn new_file(&self, path: &str) -> io::Result<PathBuf> {
        let file = self.resolve(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(file)
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        match std::fs::remove_file(self.resolve(path)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Host unavailable: {0}")]
    HostUnavailable(String),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Timed out fetching {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Network access for tile bytes
pub trait Retriever: Send + Sync {
    /// Whether the host of `url` is currently reachable
    fn is_available(&self, url: &str) -> bool;

    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Vec<u8>, RetrievalError>>;
}

/// Retriever for offline use, every host is unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRetriever;

impl Retriever for OfflineRetriever {
    fn is_available(&self, _url: &str) -> bool {
        false
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Vec<u8>, RetrievalError>> {
        Box::pin(async move { Err(RetrievalError::HostUnavailable(url.to_string())) })
    }
}

/// Turns stored or downloaded bytes into texture data
pub trait TileDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<TextureData>;
}

/// Validates a DDS header and keeps the container for the backend
#[derive(Debug, Clone, Copy, Default)]
pub struct DdsDecoder;

impl DdsDecoder {
    const MAGIC: &'static [u8; 4] = b"DDS ";
    const HEADER_LEN: usize = 128;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }
}

impl TileDecoder for DdsDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<TextureData> {
        if bytes.len() < Self::HEADER_LEN || &bytes[..4] != Self::MAGIC {
            return Err(CurtainError::Decode("not a DDS file".to_string()));
        }
        let height = Self::read_u32(bytes, 12);
        let width = Self::read_u32(bytes, 16);
        if width == 0 || height == 0 {
            return Err(CurtainError::Decode(format!(
                "DDS has invalid size {width}x{height}"
            )));
        }
        Ok(TextureData {
            width,
            height,
            format: TextureFormat::Dds,
            bytes: bytes.to_vec(),
        })
    }
}

/// PNG and JPEG through the `image` crate, converted to RGBA
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl TileDecoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<TextureData> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = image.dimensions();
        Ok(TextureData {
            width,
            height,
            format: TextureFormat::Rgba8,
            bytes: image.into_raw(),
        })
    }
}

/// Decoder for a cache file suffix such as `.dds` or `.png`
pub fn decoder_for_format(format_suffix: &str) -> Arc<dyn TileDecoder> {
    if format_suffix.eq_ignore_ascii_case(".dds") {
        Arc::new(DdsDecoder)
    } else {
        Arc::new(ImageDecoder)
    }
}
