//! Thumbnail generation and dimension probing. Both decode images, so they
//! run on the blocking pool.

use cm_core::{MediaError, Result, ThumbnailSpec};
use image::codecs::jpeg::JpegEncoder;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::task;

use crate::TempFile;

/// Pixel dimensions of an image file, `(0, 0)` when they cannot be read.
pub async fn probe_dimensions(path: &Path) -> (u32, u32) {
    let path = path.to_path_buf();
    task::spawn_blocking(move || image::image_dimensions(&path).ok())
        .await
        .ok()
        .flatten()
        .unwrap_or((0, 0))
}

/// Writes a JPEG thumbnail of `source` to `target`, no side longer than
/// `spec.max_dimension`. The write goes through `staging` and is renamed
/// into place so a half-written thumbnail is never visible.
pub(crate) async fn render(
    source: &Path,
    staging: TempFile,
    target: PathBuf,
    spec: ThumbnailSpec,
) -> Result<PathBuf> {
    let source = source.to_path_buf();
    task::spawn_blocking(move || -> Result<PathBuf> {
        let img = image::open(&source)
            .map_err(|e| MediaError::Read(format!("decode {}: {}", source.display(), e)))?;

        let rgb = img.thumbnail(spec.max_dimension, spec.max_dimension).to_rgb8();

        let file = File::create(staging.path())
            .map_err(|e| MediaError::Write(format!("{}: {}", staging.path().display(), e)))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, spec.quality)
            .encode_image(&rgb)
            .map_err(|e| MediaError::Write(format!("encode thumbnail: {e}")))?;
        writer
            .flush()
            .map_err(|e| MediaError::Write(format!("{}: {}", staging.path().display(), e)))?;
        drop(writer);

        std::fs::rename(staging.path(), &target)
            .map_err(|e| MediaError::Write(format!("{}: {}", target.display(), e)))?;
        staging.promoted();
        Ok(target)
    })
    .await
    .map_err(|e| MediaError::Write(format!("thumbnail worker failed: {e}")))?
}
