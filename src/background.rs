use crate::config::BackgroundMode;
use crate::types::{Point, WellBounds};
use image::{GrayImage, Luma};

/// Reference image a well is tracked against. Each well owns its buffer,
/// nothing outside `refresh` ever mutates it.
pub struct BackgroundModel {
    bounds: WellBounds,
    buffer: GrayImage,
}

impl BackgroundModel {
    /// Build the initial reference from two frames of the empty-ish scene.
    pub fn build(
        frame_a: &GrayImage,
        frame_b: &GrayImage,
        bounds: WellBounds,
        mode: BackgroundMode,
    ) -> Self {
        let buffer = match mode {
            BackgroundMode::FirstFrame => crop(frame_a, bounds),
            BackgroundMode::MaxOfFirstAndLast => {
                let a = crop(frame_a, bounds);
                let b = crop(frame_b, bounds);
                GrayImage::from_fn(bounds.width, bounds.height, |x, y| {
                    Luma([a.get_pixel(x, y)[0].max(b.get_pixel(x, y)[0])])
                })
            }
        };
        Self { bounds, buffer }
    }

    pub fn bounds(&self) -> WellBounds {
        self.bounds
    }

    pub fn image(&self) -> &GrayImage {
        &self.buffer
    }

    /// Foreground intensity of a sub-rectangle of the covered area. The
    /// animal is darker than the background, so the value is how far below
    /// the reference a pixel falls.
    pub fn foreground(&self, frame: &GrayImage, region: WellBounds) -> GrayImage {
        let dx = region.x - self.bounds.x;
        let dy = region.y - self.bounds.y;
        GrayImage::from_fn(region.width, region.height, |x, y| {
            let reference = self.buffer.get_pixel(dx + x, dy + y)[0];
            let current = frame.get_pixel(region.x + x, region.y + y)[0];
            Luma([reference.saturating_sub(current)])
        })
    }

    /// Replace the buffer with the current frame, preserving a padded box
    /// around the tracked points so the animal is not erased into the
    /// reference. The padding is the diagonal of the point bounding box.
    /// Returns whether anything was preserved; a degenerate or fully
    /// clamped-away box overwrites everything.
    pub fn refresh(&mut self, frame: &GrayImage, tracked: &[Point]) -> bool {
        let mut fresh = crop(frame, self.bounds);
        let preserved = self.preserve_region(tracked, &mut fresh);
        self.buffer = fresh;
        preserved
    }

    fn preserve_region(&self, tracked: &[Point], fresh: &mut GrayImage) -> bool {
        if tracked.is_empty() {
            return false;
        }
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for p in tracked {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let box_width = max_x - min_x;
        let box_height = max_y - min_y;
        if box_width <= 0.0 || box_height <= 0.0 {
            return false;
        }
        let padding = (box_width * box_width + box_height * box_height).sqrt();
        let x0 = ((min_x - padding).floor() as i64).max(0) as u32;
        let y0 = ((min_y - padding).floor() as i64).max(0) as u32;
        let x1 = (((max_x + padding).ceil() as i64).max(0) as u32).min(self.bounds.width);
        let y1 = (((max_y + padding).ceil() as i64).max(0) as u32).min(self.bounds.height);
        if x0 >= x1 || y0 >= y1 {
            return false;
        }
        for y in y0..y1 {
            for x in x0..x1 {
                fresh.put_pixel(x, y, *self.buffer.get_pixel(x, y));
            }
        }
        true
    }
}

fn crop(frame: &GrayImage, bounds: WellBounds) -> GrayImage {
    image::imageops::crop_imm(frame, bounds.x, bounds.y, bounds.width, bounds.height).to_image()
}
