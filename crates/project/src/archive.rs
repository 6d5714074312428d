use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use xsheet::{Cel, Extent, Frame, Sheet, SparseTimeline};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_NAME: &str = "info.json";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("malformed archive: {0}")]
    Malformed(String),
}

/// One explicit timeline entry as written to `info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManifestEntry {
    Cel { path: String, extent: Extent },
    Clear,
}

/// Layer-indexed list of frame → entry maps.
pub type Manifest = Vec<BTreeMap<Frame, ManifestEntry>>;

pub fn cel_path(layer: usize, frame: Frame) -> String {
    format!("cels/{layer:03}-{frame:06}.png")
}

fn encode_png(pixels: &RgbaImage) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = Cursor::new(Vec::new());
    if pixels.width() == 0 || pixels.height() == 0 {
        // PNG cannot hold an empty image; the manifest extent wins on load.
        RgbaImage::new(1, 1).write_to(&mut buf, ImageFormat::Png)?;
    } else {
        pixels.write_to(&mut buf, ImageFormat::Png)?;
    }
    Ok(buf.into_inner())
}

/// Writes every explicit entry of `sheet` to a zip archive at `path`.
///
/// The archive is assembled in a temporary file next to `path` and renamed
/// over it once complete, so a failed save never leaves a partial archive.
pub fn save_sheet(sheet: &Sheet, path: &Path) -> Result<(), ArchiveError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;

    let mut manifest: Manifest = Vec::with_capacity(sheet.layers_length());
    let mut cels = 0usize;
    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);

        for (layer_idx, layer) in sheet.layers().iter().enumerate() {
            let mut entries = BTreeMap::new();
            for (frame, cel) in layer.entries() {
                let entry = match cel {
                    Some(cel) => {
                        let path = cel_path(layer_idx, frame);
                        let png = encode_png(&cel.surface().read_pixels())?;
                        zip.start_file(path.as_str(), options)?;
                        zip.write_all(&png)?;
                        cels += 1;
                        ManifestEntry::Cel {
                            path,
                            extent: cel.extent(),
                        }
                    }
                    None => ManifestEntry::Clear,
                };
                entries.insert(frame, entry);
            }
            manifest.push(entries);
        }

        zip.start_file(MANIFEST_NAME, options)?;
        zip.write_all(&serde_json::to_vec(&manifest)?)?;
        zip.finish()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    info!(?path, layers = manifest.len(), cels, "sheet saved");
    Ok(())
}

fn read_entry<R: io::Read + io::Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, ArchiveError> {
    let mut file = zip.by_name(name)?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Reads an archive into fresh layers whose cels come from `sheet`'s surface
/// factory. `sheet` itself is left untouched.
pub fn load_layers(path: &Path, sheet: &Sheet) -> Result<Vec<SparseTimeline<Cel>>, ArchiveError> {
    let mut zip = ZipArchive::new(File::open(path)?)?;
    let manifest: Manifest = serde_json::from_slice(&read_entry(&mut zip, MANIFEST_NAME)?)?;
    if manifest.is_empty() {
        return Err(ArchiveError::Malformed("manifest lists no layers".into()));
    }

    let mut layers = Vec::with_capacity(manifest.len());
    for (layer_idx, entries) in manifest.into_iter().enumerate() {
        let mut layer = SparseTimeline::new();
        for (frame, entry) in entries {
            match entry {
                ManifestEntry::Cel { path, extent } => {
                    let bytes = read_entry(&mut zip, &path)?;
                    let pixels =
                        image::load_from_memory_with_format(&bytes, ImageFormat::Png)?.to_rgba8();
                    if !extent.is_empty()
                        && (pixels.width(), pixels.height()) != (extent.width, extent.height)
                    {
                        return Err(ArchiveError::Malformed(format!(
                            "{path}: image is {}x{} but extent is {}x{}",
                            pixels.width(),
                            pixels.height(),
                            extent.width,
                            extent.height
                        )));
                    }
                    let cel = sheet.create_cel();
                    cel.begin_atomic().write_pixels(extent, &pixels);
                    debug!(layer = layer_idx, frame, cel = %cel.id(), "cel loaded");
                    layer.set(frame, cel);
                }
                ManifestEntry::Clear => {
                    layer.clear(frame);
                }
            }
        }
        layers.push(layer);
    }
    info!(?path, layers = layers.len(), "archive read");
    Ok(layers)
}
