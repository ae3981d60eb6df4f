//! Image transform: decode, resize per profile, re-encode to the output
//! directory. Runs on blocking threads; the coordinator wraps calls in
//! `spawn_blocking`.

use anyhow::Context;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// An output rendition: dimension limits plus encoding settings.
#[derive(Debug, Clone)]
pub struct OutputProfile {
    pub name: &'static str,
    /// Longest-edge cap, preserving aspect ratio. None keeps original size.
    pub max_dimension: Option<u32>,
    /// Exact width and height, center-cropped to fill.
    pub exact: Option<(u32, u32)>,
    pub format: OutputFormat,
    pub jpeg_quality: u8,
    /// Suffix appended to the source stem in the output filename.
    pub suffix: &'static str,
}

impl OutputProfile {
    pub fn by_name(name: &str) -> Option<Self> {
        let profile = match name {
            "editorial_web" => Self {
                name: "editorial_web",
                max_dimension: Some(2560),
                exact: None,
                format: OutputFormat::Jpeg,
                jpeg_quality: 85,
                suffix: "_web",
            },
            "email" => Self {
                name: "email",
                max_dimension: Some(600),
                exact: None,
                format: OutputFormat::Jpeg,
                jpeg_quality: 80,
                suffix: "_email",
            },
            "social" => Self {
                name: "social",
                max_dimension: None,
                exact: Some((1080, 1080)),
                format: OutputFormat::Jpeg,
                jpeg_quality: 85,
                suffix: "_social",
            },
            "archive" => Self {
                name: "archive",
                max_dimension: None,
                exact: None,
                format: OutputFormat::Png,
                jpeg_quality: 100,
                suffix: "_archive",
            },
            _ => return None,
        };
        Some(profile)
    }

    pub fn names() -> &'static [&'static str] {
        &["editorial_web", "email", "social", "archive"]
    }

    /// Output path for a source image under `output_dir`.
    pub fn output_path(&self, source: &Path, output_dir: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        output_dir.join(format!("{stem}{}.{}", self.suffix, self.format.extension()))
    }
}

/// Apply a profile to one image and write the result. Returns the output
/// byte size.
pub fn transform_and_save(
    source: &Path,
    dest: &Path,
    profile: &OutputProfile,
) -> anyhow::Result<u64> {
    let img = image::open(source)
        .with_context(|| format!("failed to decode {}", source.display()))?;

    let img = apply_resize(img, profile);

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    match profile.format {
        OutputFormat::Jpeg => {
            // Alpha is flattened onto white before JPEG encoding.
            let rgb = img.to_rgb8();
            let file = fs::File::create(dest)
                .with_context(|| format!("failed to create {}", dest.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut writer,
                profile.jpeg_quality,
            );
            encoder
                .encode_image(&rgb)
                .with_context(|| format!("failed to encode {}", dest.display()))?;
        }
        OutputFormat::Png => {
            img.save_with_format(dest, ImageFormat::Png)
                .with_context(|| format!("failed to encode {}", dest.display()))?;
        }
    }

    let size = fs::metadata(dest)
        .with_context(|| format!("failed to stat {}", dest.display()))?
        .len();
    tracing::debug!(
        source = %source.display(),
        dest = %dest.display(),
        profile = profile.name,
        bytes = size,
        "Image transformed"
    );
    Ok(size)
}

fn apply_resize(img: DynamicImage, profile: &OutputProfile) -> DynamicImage {
    if let Some((width, height)) = profile.exact {
        return img.resize_to_fill(width, height, FilterType::Lanczos3);
    }
    if let Some(max) = profile.max_dimension {
        if img.width() > max || img.height() > max {
            return img.resize(max, max, FilterType::Lanczos3);
        }
    }
    img
}
