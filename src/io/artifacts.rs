//! Upload artifact store
//!
//! Full images and plate crops are written as JPEG files under one flat
//! directory and served back by name. A raw upload that cannot be decoded is
//! kept as-is under an extension sniffed from its bytes. Names carry a microsecond timestamp
//! plus a random suffix, so concurrent uploads never collide.

use anyhow::Context;
use chrono::Utc;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Kind of stored artifact, used as the filename prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Full,
    Crop,
}

impl ArtifactKind {
    fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Full => "full",
            ArtifactKind::Crop => "crop",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store, making the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create upload dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh unique artifact name, e.g. `full_20260301081502123456_4f1c9a2b.jpg`
    pub fn new_name(&self, kind: ArtifactKind) -> String {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%6f");
        // Tail of a v7 UUID is random; the head is already covered by the timestamp
        let id = Uuid::now_v7().simple().to_string();
        let tail = &id[id.len() - 8..];
        format!("{}_{stamp}_{tail}.jpg", kind.prefix())
    }

    /// Write bytes under `name` (overwrites)
    pub async fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.path_for(name).with_context(|| format!("invalid artifact name {name}"))?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Delete an artifact; a missing file is not an error
    pub async fn remove(&self, name: &str) {
        let Some(path) = self.path_for(name) else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "artifact_remove_failed");
            }
        }
    }

    /// Resolve a served name to a path inside the store. Rejects anything
    /// that could escape the directory.
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0'])
            && !name.starts_with('.');
        valid.then(|| self.dir.join(name))
    }

    /// Read a stored artifact; `Ok(None)` if the name is invalid or absent
    pub async fn read(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

/// Encode an image as JPEG. Alpha is dropped since JPEG has no alpha channel.
pub fn encode_jpeg(image: &DynamicImage) -> anyhow::Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg).context("jpeg encode failed")?;
    Ok(out.into_inner())
}

/// File extension for raw upload bytes, from their magic number
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::Gif) => "gif",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Bmp) => "bmp",
        _ => "bin",
    }
}

/// Same artifact name with a different extension
pub fn swap_extension(name: &str, ext: &str) -> String {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    format!("{stem}.{ext}")
}

/// Content type for a served artifact name
pub fn content_type_for(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
