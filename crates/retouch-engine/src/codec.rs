use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, RgbaImage};
use retouch_contracts::history::ImageVersion;

/// Image bytes plus the mime type they were produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_version(version: &ImageVersion) -> Self {
        Self::new(version.mime_type.clone(), version.bytes.clone())
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        to_data_url(&self.mime_type, &self.bytes)
    }
}

pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

pub fn parse_data_url(url: &str) -> Result<InlineImage> {
    let Some(rest) = url.trim().strip_prefix("data:") else {
        bail!("not a data URL");
    };
    let Some((header, payload)) = rest.split_once(',') else {
        bail!("data URL has no payload separator");
    };
    let Some(mime_type) = header.strip_suffix(";base64") else {
        bail!("data URL is not base64 encoded");
    };
    if mime_type.is_empty() {
        bail!("data URL has no mime type");
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .context("data URL base64 decode failed")?;
    Ok(InlineImage::new(mime_type, bytes))
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Mime type from the bytes' magic number, falling back to the file extension.
pub fn sniff_mime(bytes: &[u8], path: Option<&Path>) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
        .or_else(|| path.and_then(mime_for_path))
        .unwrap_or("image/png")
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

/// Reads an image file into a version named after the file.
pub fn load_image(path: &Path) -> Result<ImageVersion> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    if image::guess_format(&bytes).is_err() {
        bail!("{} is not a recognized image", path.display());
    }
    let mime = sniff_mime(&bytes, Some(path));
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("upload")
        .to_string();
    Ok(ImageVersion::new(name, mime, bytes))
}

pub fn save_image(version: &ImageVersion, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &version.bytes).with_context(|| format!("failed to write {}", path.display()))
}

pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage> {
    let decoded = image::load_from_memory(bytes).context("image decode failed")?;
    Ok(decoded.to_rgba8())
}

pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("image format detection failed")?;
    reader
        .into_dimensions()
        .context("image header decode failed")
}

pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut out, ImageFormat::Png)
        .context("png encode failed")?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) fn png_for_test(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    encode_png(image).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_roundtrip_preserves_mime_and_bytes() -> Result<()> {
        let url = to_data_url("image/jpeg", b"\xff\xd8hello");
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let parsed = parse_data_url(&url)?;
        assert_eq!(parsed.mime_type, "image/jpeg");
        assert_eq!(parsed.bytes, b"\xff\xd8hello");
        Ok(())
    }

    #[test]
    fn parse_data_url_rejects_malformed_input() {
        assert!(parse_data_url("image/png;base64,AAAA").is_err());
        assert!(parse_data_url("data:image/png;base64").is_err());
        assert!(parse_data_url("data:image/png,AAAA").is_err());
        assert!(parse_data_url("data:;base64,AAAA").is_err());
        assert!(parse_data_url("data:image/png;base64,***").is_err());
    }

    #[test]
    fn sniff_prefers_magic_number_over_extension() {
        let png = png_for_test(2, 2, [0, 0, 0, 255]);
        assert_eq!(sniff_mime(&png, Some(Path::new("photo.jpg"))), "image/png");
        assert_eq!(
            sniff_mime(b"not an image", Some(Path::new("photo.webp"))),
            "image/webp"
        );
        assert_eq!(sniff_mime(b"???", None), "image/png");
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("application/octet-stream"), "png");
    }

    #[test]
    fn load_image_names_version_after_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("portrait.png");
        fs::write(&path, png_for_test(4, 3, [10, 20, 30, 255]))?;

        let version = load_image(&path)?;
        assert_eq!(version.name, "portrait.png");
        assert_eq!(version.mime_type, "image/png");
        assert_eq!(image_dimensions(&version.bytes)?, (4, 3));

        let junk = temp.path().join("junk.png");
        fs::write(&junk, b"plain text")?;
        assert!(load_image(&junk).is_err());
        Ok(())
    }
}
