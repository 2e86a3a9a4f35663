use crate::background::BackgroundModel;
use crate::config::{HeadDetectionMode, TailSegmentConfig, TrackingConfig};
use crate::matcher;
use crate::types::{heading_from_segment, angle_diff, Point, WellBounds, WellGeometry, WellTrackingData};
use crate::util::ScopedTimer;
use image::GrayImage;
use std::collections::HashSet;
use std::sync::Arc;

/// Tracks all animals of one well across the frame loop. Coordinates in
/// the tracking buffer are local to the well bounds.
pub struct WellTracker {
    well_index: usize,
    geometry: WellGeometry,
    bounds: WellBounds,
    background: BackgroundModel,
    config: Arc<TrackingConfig>,
    previous_chains: Vec<Option<Vec<Point>>>,
    data: WellTrackingData,
    inline_metric: bool,
    previous_region: Option<GrayImage>,
    moved_pixels: Vec<u32>,
}

/// Tracking output of one well, consumed after the frame loop.
pub struct WellOutput {
    pub well_index: usize,
    pub data: WellTrackingData,
    pub moved_pixels: Vec<u32>,
}

#[derive(Clone, Copy)]
struct CircleSample {
    x: u32,
    y: u32,
    angle: f64,
    luma: u8,
}

impl WellTracker {
    pub fn new(
        well_index: usize,
        config: Arc<TrackingConfig>,
        background: BackgroundModel,
        first_frame: u32,
        nb_frames: usize,
        inline_metric: bool,
    ) -> Self {
        let geometry = config.wells[well_index];
        let bounds = geometry.bounds();
        let nb_animals = config.nb_animals_per_well;
        let nb_points = config.nb_tail_points;
        Self {
            well_index,
            geometry,
            bounds,
            background,
            config,
            previous_chains: vec![None; nb_animals],
            data: WellTrackingData::new(nb_animals, nb_frames, nb_points, first_frame),
            inline_metric,
            previous_region: None,
            moved_pixels: Vec::new(),
        }
    }

    pub fn well_index(&self) -> usize {
        self.well_index
    }

    pub fn into_output(self) -> WellOutput {
        WellOutput {
            well_index: self.well_index,
            data: self.data,
            moved_pixels: self.moved_pixels,
        }
    }

    pub fn process_frame(&mut self, frame: &GrayImage, frame_number: u32) {
        let _timer = ScopedTimer::new("duration.well_tracking");
        let region = crop(frame, self.bounds);
        let blurred_region = self.blur(&region);
        let foreground = self.background.foreground(frame, self.bounds);
        let blurred_foreground = self.blur(&foreground);

        if self.inline_metric {
            let count = match &self.previous_region {
                Some(previous) => changed_pixels(
                    previous,
                    &region,
                    self.config.bout_detection.pixel_diff_threshold,
                ),
                None => 0,
            };
            self.moved_pixels.push(count);
            self.previous_region = Some(region);
        }

        let candidates = self.head_candidates(&blurred_region, &foreground, &blurred_foreground);
        let previous_heads: Vec<Option<Point>> = self
            .previous_chains
            .iter()
            .map(|chain| chain.as_ref().map(|c| c[0]))
            .collect();
        let assigned = matcher::assign_candidates(&candidates, &previous_heads, frame_number);

        for animal in 0..assigned.len() {
            let chain = match assigned[animal] {
                Some(head) => self.track_animal(animal, head, &blurred_region, frame_number),
                None => {
                    metrics::increment_counter!("count.head_detection_fallbacks");
                    self.fallback_chain(animal)
                }
            };
            let heading = heading_from_segment(&chain[0], &chain[1]);
            self.data.set_chain(animal, frame_number, &chain);
            self.data.set_heading(animal, frame_number, heading);
            self.previous_chains[animal] = Some(chain);
        }

        let interval = self.config.background.update_at_interval;
        if interval > 0 && frame_number % interval == 0 {
            self.refresh_background(frame);
        }
        metrics::increment_counter!("count.frames_tracked");
    }

    /// Grow, resample and validate one animal's chain. A chain whose
    /// median luma is too bright is traded for the previous frame's.
    fn track_animal(
        &self,
        animal: usize,
        head: Point,
        blurred_region: &GrayImage,
        frame_number: u32,
    ) -> Vec<Point> {
        let initial_direction = self.previous_chains[animal]
            .as_ref()
            .and_then(|chain| first_segment_direction(chain));
        let (raw, early_stop) = self.grow_tail(blurred_region, head, initial_direction);
        if early_stop {
            metrics::increment_counter!("count.tail_growth_early_stops");
        }
        let nb_points = self.config.nb_tail_points;
        let spacing = self.config.tail_search.max_tail_length_px / (nb_points - 1) as f64;
        let chain = resample_chain(&raw, nb_points, spacing, initial_direction);
        let median = median_luma(blurred_region, &chain);
        if median > self.config.tail_search.max_median_tail_pixel_value {
            metrics::increment_counter!("count.tail_chains_rejected");
            log::warn!(
                "Frame {} well {}: chain rejected, median luma {}",
                frame_number,
                self.well_index,
                median
            );
            return self.fallback_chain(animal);
        }
        chain
    }

    fn fallback_chain(&self, animal: usize) -> Vec<Point> {
        match &self.previous_chains[animal] {
            Some(chain) => chain.clone(),
            None => vec![Point::default(); self.config.nb_tail_points],
        }
    }

    /// Greedy angle-bounded search from the head towards the tail tip.
    /// Returns the grown polyline and whether growth stopped before the
    /// maximum tail length.
    fn grow_tail(
        &self,
        blurred: &GrayImage,
        head: Point,
        initial_direction: Option<f64>,
    ) -> (Vec<Point>, bool) {
        let search = &self.config.tail_search;
        let mut points = vec![head];
        let mut current = head;
        let mut direction = initial_direction;
        let mut length = 0.0;
        let max_steps = (search.max_tail_length_px / search.step_px).ceil() as usize + 2;

        for _ in 0..max_steps {
            if length >= search.max_tail_length_px {
                return (points, false);
            }
            let segment = self.segment_for(length);
            let mut samples = sample_circle(blurred, current, search.step_px);
            if samples.is_empty() {
                return (points, true);
            }
            samples.sort_by_key(|s| s.luma);
            samples.truncate(segment.candidate_count);
            let chosen = match direction {
                // first step without history scans the whole circle
                None => samples[0],
                Some(dir) => {
                    let mut best = samples[0];
                    let mut best_deviation = angle_diff(best.angle, dir).abs();
                    for sample in &samples[1..] {
                        let deviation = angle_diff(sample.angle, dir).abs();
                        if deviation < best_deviation {
                            best = *sample;
                            best_deviation = deviation;
                        }
                    }
                    if best_deviation > segment.max_angle_deviation {
                        return (points, true);
                    }
                    best
                }
            };
            if chosen.luma > search.max_tail_pixel_value {
                return (points, true);
            }
            let next = Point::new(chosen.x as f64, chosen.y as f64);
            length += current.distance_to(&next);
            direction = Some(chosen.angle);
            points.push(next);
            current = next;
        }
        (points, false)
    }

    fn segment_for(&self, length: f64) -> &TailSegmentConfig {
        let fraction = length / self.config.tail_search.max_tail_length_px;
        let segments = &self.config.tail_search.segments;
        segments
            .iter()
            .find(|s| fraction < s.relative_length_boundary)
            .unwrap_or_else(|| &segments[segments.len() - 1])
    }

    fn head_candidates(
        &self,
        blurred_region: &GrayImage,
        foreground: &GrayImage,
        blurred_foreground: &GrayImage,
    ) -> Vec<Point> {
        let detection = &self.config.head_detection;
        let mut candidates = match detection.mode {
            HeadDetectionMode::IntensityExtremum => extremum_candidates(
                blurred_foreground,
                self.config.nb_animals_per_well,
                detection.suppression_radius_px,
            ),
            HeadDetectionMode::BlobCentroid => {
                let blobs = blob_candidates(
                    foreground,
                    detection.foreground_threshold,
                    detection.min_blob_area,
                    detection.max_blob_area,
                );
                blobs
                    .into_iter()
                    .take(self.config.nb_animals_per_well)
                    .map(|(centroid, _)| centroid)
                    .collect()
            }
        };
        candidates.retain(|p| {
            let absolute_x = p.x + self.bounds.x as f64;
            let absolute_y = p.y + self.bounds.y as f64;
            if !self.geometry.contains(absolute_x, absolute_y) {
                return false;
            }
            luma_at(blurred_region, p) <= detection.max_head_pixel_value
        });
        candidates
    }

    fn refresh_background(&mut self, frame: &GrayImage) {
        let offset_x = (self.bounds.x - self.background.bounds().x) as f64;
        let offset_y = (self.bounds.y - self.background.bounds().y) as f64;
        let mut tracked = Vec::new();
        for chain in self.previous_chains.iter().flatten() {
            for p in chain {
                tracked.push(Point::new(p.x + offset_x, p.y + offset_y));
            }
        }
        self.background.refresh(frame, &tracked);
        metrics::increment_counter!("count.background_refreshes");
    }

    fn blur(&self, image: &GrayImage) -> GrayImage {
        let kernel = self.config.head_detection.gaussian_blur_kernel;
        if kernel == 0 {
            return image.clone();
        }
        image::imageops::blur(image, blur_sigma(kernel))
    }
}

/// Sigma matching an auto-sigma Gaussian kernel of the given size.
fn blur_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel - 1) as f32 * 0.5 - 1.0) + 0.8
}

fn crop(frame: &GrayImage, bounds: WellBounds) -> GrayImage {
    image::imageops::crop_imm(frame, bounds.x, bounds.y, bounds.width, bounds.height).to_image()
}

fn luma_at(image: &GrayImage, p: &Point) -> u8 {
    let x = (p.x.round() as i64).clamp(0, image.width() as i64 - 1) as u32;
    let y = (p.y.round() as i64).clamp(0, image.height() as i64 - 1) as u32;
    image.get_pixel(x, y)[0]
}

fn first_segment_direction(chain: &[Point]) -> Option<f64> {
    if chain.len() < 2 || chain[0].distance_to(&chain[1]) < 1e-9 {
        return None;
    }
    Some((chain[1].y - chain[0].y).atan2(chain[1].x - chain[0].x))
}

fn changed_pixels(previous: &GrayImage, current: &GrayImage, threshold: u8) -> u32 {
    previous
        .pixels()
        .zip(current.pixels())
        .filter(|(a, b)| {
            let diff = (a[0] as i16 - b[0] as i16).unsigned_abs() as u8;
            diff > threshold
        })
        .count() as u32
}

fn sample_circle(image: &GrayImage, center: Point, radius: f64) -> Vec<CircleSample> {
    let (width, height) = image.dimensions();
    let steps = ((std::f64::consts::TAU * radius).ceil() as usize).max(16);
    let mut seen = HashSet::new();
    let mut samples = Vec::new();
    for i in 0..steps {
        let angle = std::f64::consts::TAU * i as f64 / steps as f64;
        let x = (center.x + radius * angle.cos()).round() as i64;
        let y = (center.y + radius * angle.sin()).round() as i64;
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            continue;
        }
        if seen.insert((x, y)) {
            samples.push(CircleSample {
                x: x as u32,
                y: y as u32,
                angle,
                luma: image.get_pixel(x as u32, y as u32)[0],
            });
        }
    }
    samples
}

/// Darkest foreground extremes, each further candidate outside the
/// suppression radius of the ones already taken.
fn extremum_candidates(blurred_foreground: &GrayImage, count: usize, suppression: f64) -> Vec<Point> {
    let mut candidates: Vec<Point> = Vec::new();
    for _ in 0..count {
        let mut best_value = 0u8;
        let mut best: Option<Point> = None;
        for (x, y, pixel) in blurred_foreground.enumerate_pixels() {
            if pixel[0] <= best_value {
                continue;
            }
            let p = Point::new(x as f64, y as f64);
            if candidates.iter().any(|c| c.distance_to(&p) < suppression) {
                continue;
            }
            best_value = pixel[0];
            best = Some(p);
        }
        match best {
            Some(p) if best_value > 0 => candidates.push(p),
            _ => break,
        }
    }
    candidates
}

/// Centroids and areas of 4-connected foreground components within the
/// area bounds, largest first.
fn blob_candidates(
    foreground: &GrayImage,
    threshold: u8,
    min_area: u32,
    max_area: u32,
) -> Vec<(Point, u32)> {
    let (width, height) = foreground.dimensions();
    let mut visited = vec![false; (width * height) as usize];
    let mut blobs = Vec::new();
    for start_y in 0..height {
        for start_x in 0..width {
            let start = (start_y * width + start_x) as usize;
            if visited[start] || foreground.get_pixel(start_x, start_y)[0] < threshold {
                continue;
            }
            let mut area = 0u32;
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            let mut stack = vec![(start_x, start_y)];
            visited[start] = true;
            while let Some((x, y)) = stack.pop() {
                area += 1;
                sum_x += x as f64;
                sum_y += y as f64;
                let neighbors = [
                    (x.wrapping_sub(1), y),
                    (x + 1, y),
                    (x, y.wrapping_sub(1)),
                    (x, y + 1),
                ];
                for (nx, ny) in neighbors {
                    if nx >= width || ny >= height {
                        continue;
                    }
                    let idx = (ny * width + nx) as usize;
                    if !visited[idx] && foreground.get_pixel(nx, ny)[0] >= threshold {
                        visited[idx] = true;
                        stack.push((nx, ny));
                    }
                }
            }
            if area >= min_area && area <= max_area {
                blobs.push((Point::new(sum_x / area as f64, sum_y / area as f64), area));
            }
        }
    }
    blobs.sort_by(|a, b| b.1.cmp(&a.1));
    blobs
}

/// Resample a grown polyline to exactly `n` points at the given spacing.
/// Beyond the end of the polyline, points continue from its last point
/// along the last valid direction.
fn resample_chain(raw: &[Point], n: usize, spacing: f64, fallback_dir: Option<f64>) -> Vec<Point> {
    debug_assert!(!raw.is_empty());
    let mut cumulative = Vec::with_capacity(raw.len());
    cumulative.push(0.0);
    for w in raw.windows(2) {
        let last = *cumulative.last().unwrap_or(&0.0);
        cumulative.push(last + w[0].distance_to(&w[1]));
    }
    let total = *cumulative.last().unwrap_or(&0.0);
    let last_direction = if raw.len() >= 2 {
        let a = raw[raw.len() - 2];
        let b = raw[raw.len() - 1];
        Some((b.y - a.y).atan2(b.x - a.x))
    } else {
        fallback_dir
    };
    let end = raw[raw.len() - 1];

    let mut result = Vec::with_capacity(n);
    let mut segment = 0;
    for k in 0..n {
        let distance = k as f64 * spacing;
        if distance <= total && raw.len() >= 2 {
            while segment + 2 < cumulative.len() && cumulative[segment + 1] < distance {
                segment += 1;
            }
            let span = cumulative[segment + 1] - cumulative[segment];
            let t = if span > 0.0 {
                (distance - cumulative[segment]) / span
            } else {
                0.0
            };
            let a = raw[segment];
            let b = raw[segment + 1];
            result.push(Point::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y)));
        } else {
            match last_direction {
                Some(dir) => {
                    let overshoot = distance - total;
                    result.push(Point::new(
                        end.x + overshoot * dir.cos(),
                        end.y + overshoot * dir.sin(),
                    ));
                }
                None => result.push(end),
            }
        }
    }
    result
}

fn median_luma(image: &GrayImage, chain: &[Point]) -> u8 {
    let mut values: Vec<u8> = chain.iter().map(|p| luma_at(image, p)).collect();
    values.sort_unstable();
    values[values.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackgroundMode, BoutDetectionMode};
    use image::Luma;

    fn test_config(mode: HeadDetectionMode) -> TrackingConfig {
        let mut config: TrackingConfig = serde_json::from_str(
            r#"{
                "videoFPS": 100.0,
                "videoPixelSize": 0.01,
                "wells": [
                    { "shape": "rectangle", "topLeftX": 10, "topLeftY": 10, "width": 60, "height": 40 }
                ],
                "tailSearch": { "maxTailLengthPx": 16.0, "stepPx": 2.0 },
                "nbTailPoints": 5
            }"#,
        )
        .unwrap();
        config.head_detection.mode = mode;
        config.head_detection.gaussian_blur_kernel = 0;
        config.head_detection.max_head_pixel_value = 100;
        config.head_detection.min_blob_area = 5;
        config.tail_search.max_tail_pixel_value = 200;
        config.tail_search.max_median_tail_pixel_value = 220;
        config
    }

    fn blank_frame() -> GrayImage {
        GrayImage::from_pixel(80, 60, Luma([255]))
    }

    /// Horizontal dark tail starting at the head, drawn 2px thick.
    fn draw_fish(frame: &mut GrayImage, head_x: u32, head_y: u32, length: u32) {
        for x in head_x..head_x + length {
            frame.put_pixel(x, head_y, Luma([0]));
            frame.put_pixel(x, head_y + 1, Luma([30]));
        }
    }

    fn make_tracker(config: TrackingConfig, inline_metric: bool) -> WellTracker {
        let blank = blank_frame();
        let bounds = config.wells[0].bounds();
        let background =
            BackgroundModel::build(&blank, &blank, bounds, BackgroundMode::FirstFrame);
        WellTracker::new(0, Arc::new(config), background, 0, 10, inline_metric)
    }

    #[test]
    fn straight_tail_is_tracked_left_to_right() {
        let mut tracker = make_tracker(test_config(HeadDetectionMode::IntensityExtremum), false);
        let mut frame = blank_frame();
        draw_fish(&mut frame, 30, 25, 20);
        tracker.process_frame(&frame, 0);
        let output = tracker.into_output();
        let chain = output.data.chain(0, 0);
        assert_eq!(chain.len(), 5);
        // head in well-local coordinates
        assert!((chain[0].x - 20.0).abs() <= 1.5, "head at {:?}", chain[0]);
        assert!((chain[0].y - 15.0).abs() <= 1.5);
        for w in chain.windows(2) {
            assert!(w[1].x > w[0].x, "chain should advance rightward: {:?}", chain);
            assert!((w[1].y - w[0].y).abs() <= 2.0);
        }
        // tail extends right, so the animal faces left
        let heading = output.data.heading(0, 0);
        assert!((heading - std::f64::consts::PI).abs() < 0.5, "heading {}", heading);
    }

    #[test]
    fn short_tail_is_padded_along_its_direction() {
        let mut tracker = make_tracker(test_config(HeadDetectionMode::IntensityExtremum), false);
        let mut frame = blank_frame();
        draw_fish(&mut frame, 30, 25, 7);
        tracker.process_frame(&frame, 0);
        let output = tracker.into_output();
        let chain = output.data.chain(0, 0);
        assert_eq!(chain.len(), 5);
        // padded points continue along +x at the nominal spacing
        let spacing = 16.0 / 4.0;
        assert!((chain[4].x - chain[3].x - spacing).abs() < 1.0);
        assert!((chain[4].y - chain[3].y).abs() < 1.0);
    }

    #[test]
    fn bright_chain_falls_back_to_previous_frame() {
        let mut config = test_config(HeadDetectionMode::IntensityExtremum);
        config.tail_search.max_median_tail_pixel_value = 10;
        let mut tracker = make_tracker(config, false);

        let mut first = blank_frame();
        draw_fish(&mut first, 30, 25, 20);
        tracker.process_frame(&first, 0);

        // same head, but the tail pixels are now too bright to trust
        let mut second = blank_frame();
        for x in 30..50 {
            second.put_pixel(x, 25, Luma([150]));
        }
        second.put_pixel(30, 25, Luma([0]));
        tracker.process_frame(&second, 1);

        let output = tracker.into_output();
        assert_eq!(output.data.chain(0, 1), output.data.chain(0, 0));
    }

    #[test]
    fn vanished_animal_keeps_its_previous_chain() {
        let mut tracker = make_tracker(test_config(HeadDetectionMode::IntensityExtremum), false);
        let mut first = blank_frame();
        draw_fish(&mut first, 30, 25, 20);
        tracker.process_frame(&first, 0);
        tracker.process_frame(&blank_frame(), 1);
        let output = tracker.into_output();
        assert_eq!(output.data.chain(0, 1), output.data.chain(0, 0));
    }

    #[test]
    fn blob_centroid_lands_in_the_blob() {
        let mut tracker = make_tracker(test_config(HeadDetectionMode::BlobCentroid), false);
        let mut frame = blank_frame();
        for y in 20..25 {
            for x in 30..36 {
                frame.put_pixel(x, y, Luma([0]));
            }
        }
        tracker.process_frame(&frame, 0);
        let output = tracker.into_output();
        let head = output.data.head(0, 0);
        // centroid of the 6x5 block at (30..36, 20..25), well-local
        assert!((head.x - 22.5).abs() < 0.6, "head {:?}", head);
        assert!((head.y - 12.0).abs() < 0.6);
    }

    #[test]
    fn inline_metric_counts_changed_pixels() {
        let mut config = test_config(HeadDetectionMode::IntensityExtremum);
        config.bout_detection.mode = BoutDetectionMode::InlineFrameDiff;
        let mut tracker = make_tracker(config, true);
        let mut first = blank_frame();
        draw_fish(&mut first, 30, 25, 20);
        tracker.process_frame(&first, 0);
        let mut second = blank_frame();
        draw_fish(&mut second, 40, 25, 20);
        tracker.process_frame(&second, 1);
        let output = tracker.into_output();
        assert_eq!(output.moved_pixels[0], 0);
        assert!(output.moved_pixels[1] > 0);
    }

    #[test]
    fn resample_interpolates_and_pads() {
        let raw = vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(8.0, 0.0),
        ];
        let chain = resample_chain(&raw, 5, 4.0, None);
        assert_eq!(chain.len(), 5);
        assert_eq!(chain[1], Point::new(4.0, 0.0));
        assert_eq!(chain[2], Point::new(8.0, 0.0));
        // beyond the polyline, continue along the last segment
        assert_eq!(chain[3], Point::new(12.0, 0.0));
        assert_eq!(chain[4], Point::new(16.0, 0.0));
    }

    #[test]
    fn resample_of_a_single_point_repeats_it() {
        let raw = vec![Point::new(3.0, 4.0)];
        let chain = resample_chain(&raw, 4, 2.0, None);
        assert_eq!(chain, vec![Point::new(3.0, 4.0); 4]);
    }

    #[test]
    fn circle_sampling_skips_out_of_bounds() {
        let image = GrayImage::from_pixel(10, 10, Luma([40]));
        let inside = sample_circle(&image, Point::new(5.0, 5.0), 3.0);
        assert!(!inside.is_empty());
        let corner = sample_circle(&image, Point::new(0.0, 0.0), 3.0);
        assert!(corner.len() < inside.len());
        assert!(corner.iter().all(|s| s.x < 10 && s.y < 10));
    }
}
