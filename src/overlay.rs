//! Crosshair annotation drawn on captured frames before streaming.

use image::{Rgb, RgbImage};

/// Crosshair geometry at 720 rows; scaled linearly with capture height.
pub const CROSSHAIR_SIZE_PX: f32 = 120.0;
pub const CROSSHAIR_GAP_PX: f32 = 30.0;
const REFERENCE_HEIGHT_PX: f32 = 720.0;

pub const TARGET_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const REFERENCE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crosshair {
    pub size: f32,
    pub gap: f32,
    pub thickness: u32,
}

impl Crosshair {
    pub fn for_capture_height(height: u32) -> Self {
        let scale = height as f32 / REFERENCE_HEIGHT_PX;
        Self {
            size: CROSSHAIR_SIZE_PX * scale,
            gap: CROSSHAIR_GAP_PX * scale,
            thickness: 1,
        }
    }

    /// Draw four arms around (x, y), leaving the gap in the middle open.
    pub fn draw(&self, image: &mut RgbImage, x: f32, y: f32, color: Rgb<u8>) {
        let outer = self.size / 2.0;
        let inner = self.gap / 2.0;
        let (cx, cy) = (x.round() as i64, y.round() as i64);
        let (outer, inner) = (outer.round() as i64, inner.round() as i64);

        for offset in inner..=outer {
            for t in 0..i64::from(self.thickness) {
                let shift = t - i64::from(self.thickness) / 2;
                put_clipped(image, cx + shift, cy - offset, color);
                put_clipped(image, cx + shift, cy + offset, color);
                put_clipped(image, cx - offset, cy + shift, color);
                put_clipped(image, cx + offset, cy + shift, color);
            }
        }
    }
}

fn put_clipped(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x < 0 || y < 0 || x >= i64::from(image.width()) || y >= i64::from(image.height()) {
        return;
    }
    image.put_pixel(x as u32, y as u32, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_scales_with_capture_height() {
        let full = Crosshair::for_capture_height(720);
        assert_eq!(full.size, 120.0);
        assert_eq!(full.gap, 30.0);
        let half = Crosshair::for_capture_height(360);
        assert_eq!(half.size, 60.0);
    }

    #[test]
    fn gap_stays_open_and_arms_are_drawn() {
        let mut image = RgbImage::new(200, 200);
        Crosshair::for_capture_height(720).draw(&mut image, 100.0, 100.0, REFERENCE_COLOR);

        assert_eq!(image.get_pixel(100, 100), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(100, 100 - 15), &REFERENCE_COLOR);
        assert_eq!(image.get_pixel(100, 100 + 60), &REFERENCE_COLOR);
        assert_eq!(image.get_pixel(100 - 60, 100), &REFERENCE_COLOR);
        assert_eq!(image.get_pixel(100, 100 + 61), &Rgb([0, 0, 0]));
    }

    #[test]
    fn drawing_near_edges_is_clipped() {
        let mut image = RgbImage::new(20, 20);
        Crosshair::for_capture_height(720).draw(&mut image, 0.0, 19.0, TARGET_COLOR);
        assert!(image.pixels().any(|p| *p == TARGET_COLOR));
    }
}
