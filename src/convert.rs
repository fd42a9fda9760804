//! Image normalization: convert downloaded `.png` / `.jpeg` files to JPEG.
//!
//! Alpha channels are flattened onto a white background before encoding,
//! matching how the photos render on the guide's white card background.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::{debug, warn};

/// JPEG quality for normalized images.
const JPEG_QUALITY: u8 = 95;

/// Extensions rewritten to `.jpg`.
const CONVERTIBLE_EXTENSIONS: &[&str] = &["jpeg", "png"];

/// Outcome counters for one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertReport {
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ConvertReport {
    pub fn total(&self) -> usize {
        self.converted + self.skipped + self.failed
    }
}

/// Convert every `.jpeg` / `.png` file in `dir` to a `.jpg` sibling.
///
/// Files whose `.jpg` twin already exists are skipped. With `backup` set,
/// originals are copied into `<dir>_backup` before conversion. Originals
/// are deleted only after a successful re-encode.
pub fn normalize_images(dir: &Path, backup: bool) -> Result<ConvertReport> {
    if !dir.is_dir() {
        anyhow::bail!("image directory not found: {}", dir.display());
    }

    let backup_dir = backup_dir_for(dir);
    if backup {
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("creating {}", backup_dir.display()))?;
    }

    let mut report = ConvertReport::default();

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| CONVERTIBLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    for path in candidates {
        let target = path.with_extension("jpg");
        if target.exists() {
            debug!("skipping {}: jpg twin exists", path.display());
            report.skipped += 1;
            continue;
        }

        match convert_one(&path, &target, backup.then_some(backup_dir.as_path())) {
            Ok(()) => {
                debug!("converted {} -> {}", path.display(), target.display());
                report.converted += 1;
            }
            Err(e) => {
                warn!("failed to convert {}: {e:#}", path.display());
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Sibling directory originals are copied into when backup is requested.
pub fn backup_dir_for(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("images");
    dir.with_file_name(format!("{name}_backup"))
}

fn convert_one(path: &Path, target: &Path, backup_dir: Option<&Path>) -> Result<()> {
    if let Some(backup_dir) = backup_dir {
        if let Some(file_name) = path.file_name() {
            fs::copy(path, backup_dir.join(file_name))
                .with_context(|| format!("backing up {}", path.display()))?;
        }
    }

    let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    let rgb = flatten_to_white(img);

    let file = fs::File::create(target)
        .with_context(|| format!("creating {}", target.display()))?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .with_context(|| format!("encoding {}", target.display()))?;

    fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
    Ok(())
}

/// Flatten any alpha channel onto a white background.
fn flatten_to_white(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            let rgba = other.to_rgba8();
            let (width, height) = rgba.dimensions();
            let mut out = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let alpha = pixel[3] as u32;
                let blend =
                    |c: u8| -> u8 { ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8 };
                out.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
            }
            out
        }
    }
}
