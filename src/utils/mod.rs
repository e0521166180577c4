use log::warn;

use crate::model::constants::CHANNELS;

/// Convert one CHW float plane stack into an RGB image, optionally mapping
/// [-1, 1] back to display range.
pub fn chw_vec_to_image(
    data: &[f32],
    height: usize,
    width: usize,
    denormalize: bool,
) -> Option<image::RgbImage> {
    let plane = height * width;
    let expected_len = CHANNELS * plane;
    if data.len() != expected_len {
        warn!(
            "mismatched pixel data length: expected {}, got {}",
            expected_len,
            data.len()
        );
        return None;
    }

    let mut raw_pixels = Vec::with_capacity(expected_len);
    for idx in 0..plane {
        for c in 0..CHANNELS {
            let mut val = data[c * plane + idx];
            if denormalize {
                // Reversing the normalization: (val + 1.0) * 127.5
                val = (val + 1.0) * 127.5;
            }
            raw_pixels.push(val.clamp(0.0, 255.0) as u8);
        }
    }

    image::RgbImage::from_raw(width as u32, height as u32, raw_pixels)
}

/// Lay same-sized tiles out on a grid with a uniform padding border.
pub fn tile_images(
    images: &[image::RgbImage],
    columns: usize,
    padding: u32,
) -> Option<image::RgbImage> {
    let first = images.first()?;
    let (w, h) = first.dimensions();
    let columns = columns.clamp(1, images.len());
    let rows = images.len().div_ceil(columns);

    let out_w = columns as u32 * (w + padding) + padding;
    let out_h = rows as u32 * (h + padding) + padding;
    let mut canvas = image::RgbImage::new(out_w, out_h);

    for (i, img) in images.iter().enumerate() {
        if img.dimensions() != (w, h) {
            return None;
        }
        let x = (i % columns) as u32 * (w + padding) + padding;
        let y = (i / columns) as u32 * (h + padding) + padding;
        image::imageops::replace(&mut canvas, img, x as i64, y as i64);
    }
    Some(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chw_conversion_places_channels() {
        // 1x2 image: pixel 0 = (-1, 0, 1) -> (0, 127, 255) after denormalize.
        let data = vec![-1.0, 0.5, 0.0, 0.5, 1.0, 0.5];
        let img = chw_vec_to_image(&data, 1, 2, true).unwrap();
        assert_eq!(img.dimensions(), (2, 1));
        let p = img.get_pixel(0, 0);
        assert_eq!(p.0, [0, 127, 255]);
    }

    #[test]
    fn chw_conversion_rejects_bad_length() {
        assert!(chw_vec_to_image(&[0.0; 5], 2, 2, false).is_none());
    }

    #[test]
    fn tile_grid_dimensions() {
        let tiles: Vec<_> = (0..4).map(|_| image::RgbImage::new(8, 8)).collect();
        let grid = tile_images(&tiles, 2, 2).unwrap();
        assert_eq!(grid.dimensions(), (22, 22));
    }

    #[test]
    fn tile_rejects_mixed_sizes() {
        let tiles = vec![image::RgbImage::new(8, 8), image::RgbImage::new(4, 4)];
        assert!(tile_images(&tiles, 2, 2).is_none());
    }
}
