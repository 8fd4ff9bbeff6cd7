use image::{imageops, RgbaImage};
use retouch_contracts::requests::{CropRect, ExpandDirection, InvalidInput, EXPAND_FACTOR};

use crate::codec::{decode_rgba, encode_png, InlineImage};

/// Where the original lands on an enlarged canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandGeometry {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Grows the canvas by `EXPAND_FACTOR` of the matching dimension on one side.
///
/// The original sits flush against the edge opposite `direction`, so the
/// transparent margin is where new content goes.
pub fn expand_geometry(width: u32, height: u32, direction: ExpandDirection) -> ExpandGeometry {
    let basis = if direction.is_horizontal() { width } else { height };
    let margin = (f64::from(basis) * EXPAND_FACTOR).round() as u32;
    let (canvas_width, canvas_height) = if direction.is_horizontal() {
        (width + margin, height)
    } else {
        (width, height + margin)
    };
    let (offset_x, offset_y) = match direction {
        ExpandDirection::Left => (margin, 0),
        ExpandDirection::Top => (0, margin),
        ExpandDirection::Right | ExpandDirection::Bottom => (0, 0),
    };
    ExpandGeometry {
        canvas_width,
        canvas_height,
        offset_x,
        offset_y,
    }
}

/// Draws the image onto a transparent canvas grown toward `direction` and
/// returns it as PNG.
pub fn compose_expand_canvas(bytes: &[u8], direction: ExpandDirection) -> anyhow::Result<InlineImage> {
    let source = decode_rgba(bytes)?;
    let geometry = expand_geometry(source.width(), source.height(), direction);
    let mut canvas = RgbaImage::new(geometry.canvas_width, geometry.canvas_height);
    imageops::overlay(
        &mut canvas,
        &source,
        i64::from(geometry.offset_x),
        i64::from(geometry.offset_y),
    );
    Ok(InlineImage::new("image/png", encode_png(canvas)?))
}

/// Local crop; the rectangle must be non-empty and inside the image.
pub fn crop_image(bytes: &[u8], rect: CropRect) -> anyhow::Result<InlineImage> {
    let source = decode_rgba(bytes)?;
    let (width, height) = source.dimensions();
    let fits_x = rect.x.checked_add(rect.width).is_some_and(|end| end <= width);
    let fits_y = rect.y.checked_add(rect.height).is_some_and(|end| end <= height);
    if rect.width == 0 || rect.height == 0 {
        return Err(InvalidInput::MissingCropSelection.into());
    }
    if !fits_x || !fits_y {
        return Err(InvalidInput::CropOutOfBounds {
            x: rect.x,
            y: rect.y,
            width,
            height,
        }
        .into());
    }
    let cropped = imageops::crop_imm(&source, rect.x, rect.y, rect.width, rect.height).to_image();
    Ok(InlineImage::new("image/png", encode_png(cropped)?))
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::codec::{image_dimensions, png_for_test};

    #[test]
    fn left_expand_grows_width_and_shifts_original_right() {
        let geometry = expand_geometry(200, 100, ExpandDirection::Left);
        assert_eq!(
            geometry,
            ExpandGeometry {
                canvas_width: 300,
                canvas_height: 100,
                offset_x: 100,
                offset_y: 0,
            }
        );
    }

    #[test]
    fn each_direction_places_original_against_opposite_edge() {
        let right = expand_geometry(200, 100, ExpandDirection::Right);
        assert_eq!((right.canvas_width, right.offset_x), (300, 0));

        let top = expand_geometry(200, 100, ExpandDirection::Top);
        assert_eq!((top.canvas_width, top.canvas_height), (200, 150));
        assert_eq!((top.offset_x, top.offset_y), (0, 50));

        let bottom = expand_geometry(200, 101, ExpandDirection::Bottom);
        assert_eq!((bottom.canvas_height, bottom.offset_y), (152, 0));
    }

    #[test]
    fn composed_canvas_is_transparent_in_the_margin() -> anyhow::Result<()> {
        let source = png_for_test(4, 2, [200, 10, 10, 255]);
        let canvas = compose_expand_canvas(&source, ExpandDirection::Left)?;
        assert_eq!(canvas.mime_type, "image/png");
        let decoded = decode_rgba(&canvas.bytes)?;
        assert_eq!(decoded.dimensions(), (6, 2));
        assert_eq!(*decoded.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*decoded.get_pixel(1, 1), Rgba([0, 0, 0, 0]));
        assert_eq!(*decoded.get_pixel(2, 0), Rgba([200, 10, 10, 255]));
        assert_eq!(*decoded.get_pixel(5, 1), Rgba([200, 10, 10, 255]));
        Ok(())
    }

    #[test]
    fn crop_checks_bounds() -> anyhow::Result<()> {
        let source = png_for_test(10, 8, [1, 2, 3, 255]);
        let cropped = crop_image(&source, CropRect::new(2, 2, 5, 6))?;
        assert_eq!(image_dimensions(&cropped.bytes)?, (5, 6));

        let err = crop_image(&source, CropRect::new(6, 0, 5, 1)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InvalidInput>(),
            Some(&InvalidInput::CropOutOfBounds {
                x: 6,
                y: 0,
                width: 10,
                height: 8,
            })
        );
        let empty = crop_image(&source, CropRect::new(0, 0, 0, 3)).unwrap_err();
        assert_eq!(
            empty.downcast_ref::<InvalidInput>(),
            Some(&InvalidInput::MissingCropSelection)
        );
        Ok(())
    }
}
