use crate::types::WellGeometry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How the initial background reference of a well is built from the two
/// reference frames.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundMode {
    /// Use the first reference frame alone.
    #[default]
    FirstFrame,
    /// Per-pixel maximum of the first and last reference frame. Biases
    /// the reference towards the brighter of the two exposures.
    MaxOfFirstAndLast,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackgroundConfig {
    /// Combine rule for the two reference frames.
    #[serde(default)]
    pub mode: BackgroundMode,
    /// Frame used as the second background reference instead of the last
    /// tracked frame. Clamped to the video length.
    #[serde(default)]
    pub last_frame_for_initial_detect: Option<u32>,
    /// Rebuild the background from the current frame every this many
    /// frames, preserving the tracked animal region. 0 disables refresh.
    #[serde(default)]
    pub update_at_interval: u32,
    /// Subtract against a full-frame background buffer instead of one
    /// restricted to the well region.
    #[serde(default)]
    pub subtract_on_whole_image: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            mode: BackgroundMode::default(),
            last_frame_for_initial_detect: None,
            update_at_interval: 0,
            subtract_on_whole_image: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum HeadDetectionMode {
    /// Darkest point of the blurred foreground map, with a suppression
    /// radius between candidates in multi-animal wells.
    #[default]
    IntensityExtremum,
    /// Centroids of thresholded foreground blobs filtered by area.
    BlobCentroid,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeadDetectionConfig {
    #[serde(default)]
    pub mode: HeadDetectionMode,
    /// Gaussian blur kernel size in pixels, applied to the well luma and
    /// foreground maps before detection. Must be odd; 0 disables the blur.
    #[serde(default = "default_blur_kernel")]
    pub gaussian_blur_kernel: u32,
    /// A head candidate is rejected when its blurred luma exceeds this,
    /// the head must be darker than the background.
    #[serde(default = "default_max_head_pixel_value")]
    pub max_head_pixel_value: u8,
    /// Minimum distance between accepted candidates in multi-animal wells.
    #[serde(default = "default_suppression_radius")]
    pub suppression_radius_px: f64,
    /// Foreground threshold for blob extraction.
    #[serde(default = "default_foreground_threshold")]
    pub foreground_threshold: u8,
    /// Blob area bounds in pixels, outside of which a component is
    /// discarded as noise or reflection.
    #[serde(default = "default_min_blob_area")]
    pub min_blob_area: u32,
    #[serde(default = "default_max_blob_area")]
    pub max_blob_area: u32,
}

impl Default for HeadDetectionConfig {
    fn default() -> Self {
        Self {
            mode: HeadDetectionMode::default(),
            gaussian_blur_kernel: default_blur_kernel(),
            max_head_pixel_value: default_max_head_pixel_value(),
            suppression_radius_px: default_suppression_radius(),
            foreground_threshold: default_foreground_threshold(),
            min_blob_area: default_min_blob_area(),
            max_blob_area: default_max_blob_area(),
        }
    }
}

/// Tail search thresholds for one region of the tail. Regions are laid
/// out from head to tip, each ending at its relative length boundary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TailSegmentConfig {
    /// Maximum angular deviation from the running tail direction, radians.
    pub max_angle_deviation: f64,
    /// Number of darkest circle samples kept as step candidates.
    pub candidate_count: usize,
    /// Fraction of the maximum tail length at which this region ends.
    /// The last region must end at 1.0.
    pub relative_length_boundary: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TailSearchConfig {
    /// Forward step radius of the growth search, pixels.
    #[serde(default = "default_tail_step")]
    pub step_px: f64,
    /// Maximum tail arc length from the head, pixels. Growth stops here.
    pub max_tail_length_px: f64,
    /// A step candidate brighter than this is background, growth stops.
    #[serde(default = "default_max_tail_pixel_value")]
    pub max_tail_pixel_value: u8,
    /// A finished chain whose median blurred luma exceeds this is rejected
    /// and the previous frame's chain is kept instead.
    #[serde(default = "default_max_median_tail_pixel_value")]
    pub max_median_tail_pixel_value: u8,
    /// Proximal to distal region thresholds.
    #[serde(default = "default_tail_segments")]
    pub segments: Vec<TailSegmentConfig>,
}

impl Default for TailSearchConfig {
    fn default() -> Self {
        Self {
            step_px: default_tail_step(),
            max_tail_length_px: 60.0,
            max_tail_pixel_value: default_max_tail_pixel_value(),
            max_median_tail_pixel_value: default_max_median_tail_pixel_value(),
            segments: default_tail_segments(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BoutDetectionMode {
    /// Segment the finished track on inter-frame head displacement.
    #[default]
    PostHocDisplacement,
    /// Segment during tracking on the count of changed pixels between
    /// consecutive frames of the well region.
    InlineFrameDiff,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BoutDetectionConfig {
    #[serde(default)]
    pub mode: BoutDetectionMode,
    /// Head displacement per frame above which the animal counts as
    /// moving, pixels.
    #[serde(default = "default_displacement_threshold")]
    pub displacement_threshold_px: f64,
    /// Minimum per-pixel luma change counted by the inline metric.
    #[serde(default = "default_pixel_diff_threshold")]
    pub pixel_diff_threshold: u8,
    /// Changed-pixel count above which a frame counts as moving.
    #[serde(default = "default_min_moved_pixels")]
    pub min_moved_pixels_inline: u32,
    /// Up to this many consecutive still frames inside a bout do not
    /// split it.
    #[serde(default = "default_max_stationary_frames")]
    pub max_stationary_frames: u32,
    /// Bouts separated by fewer than this many frames are merged.
    #[serde(default)]
    pub min_gap_frames: u32,
    /// Bouts shorter than this many frames are dropped.
    #[serde(default = "default_min_bout_frames")]
    pub min_bout_frames: u32,
}

impl Default for BoutDetectionConfig {
    fn default() -> Self {
        Self {
            mode: BoutDetectionMode::default(),
            displacement_threshold_px: default_displacement_threshold(),
            pixel_diff_threshold: default_pixel_diff_threshold(),
            min_moved_pixels_inline: default_min_moved_pixels(),
            max_stationary_frames: default_max_stationary_frames(),
            min_gap_frames: 0,
            min_bout_frames: default_min_bout_frames(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KinematicsConfig {
    /// Moving average window over the tail angle series before bend
    /// detection and heatmap persistence, frames.
    #[serde(default = "default_smoothing_window")]
    pub tail_angle_smoothing_window: usize,
    /// Minimum amplitude difference between successive bends, radians.
    #[serde(default = "default_min_bend_amplitude")]
    pub min_bend_amplitude: f64,
    /// Keep only this many tail points, counted from the tip, in the
    /// persisted angle heatmap. None keeps all of them.
    #[serde(default)]
    pub heatmap_nb_points: Option<usize>,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            tail_angle_smoothing_window: default_smoothing_window(),
            min_bend_amplitude: default_min_bend_amplitude(),
            heatmap_nb_points: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TrackingConfig {
    /// First tracked frame of the video.
    #[serde(default)]
    pub first_frame: u32,
    /// Last tracked frame, inclusive. None tracks through the final frame.
    #[serde(default)]
    pub last_frame: Option<u32>,
    /// Frame rate used for all time conversions.
    #[serde(rename = "videoFPS")]
    pub video_fps: f64,
    /// Physical size of one pixel, units per pixel.
    pub video_pixel_size: f64,
    /// Integer downscale applied to frames and well geometry before
    /// tracking. 0 or 1 disables it.
    #[serde(default)]
    pub resize_frame_factor: u32,
    pub wells: Vec<WellGeometry>,
    #[serde(default = "default_one")]
    pub nb_animals_per_well: usize,
    /// Number of points in every stored tail chain.
    #[serde(default = "default_nb_tail_points")]
    pub nb_tail_points: usize,
    /// Restrict the run to a single well index.
    #[serde(default)]
    pub only_track_this_one_well: Option<usize>,
    /// Log the current video position every this many frames. 0 disables.
    #[serde(default = "default_progress_interval")]
    pub progress_log_interval: u32,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub head_detection: HeadDetectionConfig,
    pub tail_search: TailSearchConfig,
    #[serde(default)]
    pub bout_detection: BoutDetectionConfig,
    #[serde(default)]
    pub kinematics: KinematicsConfig,
}

fn default_one() -> usize {
    1
}

fn default_nb_tail_points() -> usize {
    10
}

fn default_progress_interval() -> u32 {
    100
}

fn default_blur_kernel() -> u32 {
    15
}

fn default_max_head_pixel_value() -> u8 {
    150
}

fn default_suppression_radius() -> f64 {
    20.0
}

fn default_foreground_threshold() -> u8 {
    35
}

fn default_min_blob_area() -> u32 {
    15
}

fn default_max_blob_area() -> u32 {
    100000
}

fn default_tail_step() -> f64 {
    3.0
}

fn default_max_tail_pixel_value() -> u8 {
    220
}

fn default_max_median_tail_pixel_value() -> u8 {
    200
}

fn default_tail_segments() -> Vec<TailSegmentConfig> {
    vec![
        TailSegmentConfig {
            max_angle_deviation: 1.2,
            candidate_count: 10,
            relative_length_boundary: 0.75,
        },
        TailSegmentConfig {
            max_angle_deviation: 0.5,
            candidate_count: 8,
            relative_length_boundary: 0.9,
        },
        TailSegmentConfig {
            max_angle_deviation: 0.3,
            candidate_count: 6,
            relative_length_boundary: 1.0,
        },
    ]
}

fn default_displacement_threshold() -> f64 {
    1.0
}

fn default_pixel_diff_threshold() -> u8 {
    25
}

fn default_min_moved_pixels() -> u32 {
    20
}

fn default_max_stationary_frames() -> u32 {
    5
}

fn default_min_bout_frames() -> u32 {
    3
}

fn default_smoothing_window() -> usize {
    5
}

fn default_min_bend_amplitude() -> f64 {
    0.02
}

impl TrackingConfig {
    pub fn load(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path).with_context(|| format!("Could not open {}", path))?;
        let reader = std::io::BufReader::new(file);
        let config: TrackingConfig =
            serde_json::from_reader(reader).with_context(|| format!("Could not parse {}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let file =
            std::fs::File::create(path).with_context(|| format!("Could not create {}", path))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.wells.is_empty() {
            anyhow::bail!("No wells configured");
        }
        if self.nb_animals_per_well == 0 {
            anyhow::bail!("nbAnimalsPerWell must be at least 1");
        }
        if self.nb_tail_points < 3 {
            anyhow::bail!("nbTailPoints must be at least 3");
        }
        if self.video_fps <= 0.0 {
            anyhow::bail!("videoFPS must be positive");
        }
        if self.video_pixel_size <= 0.0 {
            anyhow::bail!("videoPixelSize must be positive");
        }
        if let Some(last) = self.last_frame {
            if last < self.first_frame {
                anyhow::bail!("lastFrame {} is before firstFrame {}", last, self.first_frame);
            }
        }
        if let Some(well) = self.only_track_this_one_well {
            if well >= self.wells.len() {
                anyhow::bail!(
                    "onlyTrackThisOneWell {} out of range, {} wells configured",
                    well,
                    self.wells.len()
                );
            }
        }
        for well in &self.wells {
            let bounds = well.bounds();
            if bounds.width == 0 || bounds.height == 0 {
                anyhow::bail!("Well with empty bounds: {:?}", well);
            }
        }
        let kernel = self.head_detection.gaussian_blur_kernel;
        if kernel != 0 && kernel % 2 == 0 {
            anyhow::bail!("gaussianBlurKernel must be odd or 0");
        }
        if self.tail_search.step_px <= 0.0 {
            anyhow::bail!("tail step must be positive");
        }
        if self.tail_search.max_tail_length_px <= self.tail_search.step_px {
            anyhow::bail!("maxTailLengthPx must exceed the step size");
        }
        if self.tail_search.segments.is_empty() {
            anyhow::bail!("At least one tail segment is required");
        }
        let mut previous_boundary = 0.0;
        for segment in &self.tail_search.segments {
            if segment.candidate_count == 0 {
                anyhow::bail!("Tail segment candidateCount must be at least 1");
            }
            if segment.max_angle_deviation <= 0.0 {
                anyhow::bail!("Tail segment maxAngleDeviation must be positive");
            }
            if segment.relative_length_boundary <= previous_boundary {
                anyhow::bail!("Tail segment boundaries must be strictly ascending");
            }
            previous_boundary = segment.relative_length_boundary;
        }
        let last = self
            .tail_search
            .segments
            .last()
            .map(|s| s.relative_length_boundary)
            .unwrap_or(0.0);
        if (last - 1.0).abs() > 1e-9 {
            anyhow::bail!("The last tail segment must end at relativeLengthBoundary 1.0");
        }
        if self.kinematics.tail_angle_smoothing_window == 0 {
            anyhow::bail!("tailAngleSmoothingWindow must be at least 1");
        }
        Ok(())
    }

    pub fn effective_downscale(&self) -> u32 {
        if self.resize_frame_factor <= 1 {
            1
        } else {
            self.resize_frame_factor
        }
    }

    /// Config with all pixel-denominated quantities scaled down by the
    /// resize factor, ready to run against downscaled frames.
    pub fn downscaled(&self) -> TrackingConfig {
        let factor = self.effective_downscale();
        if factor == 1 {
            return self.clone();
        }
        let f = factor as f64;
        let mut scaled = self.clone();
        scaled.wells = self.wells.iter().map(|w| w.downscaled(factor)).collect();
        scaled.head_detection.suppression_radius_px /= f;
        scaled.head_detection.min_blob_area /= factor * factor;
        scaled.head_detection.max_blob_area /= factor * factor;
        scaled.tail_search.step_px /= f;
        scaled.tail_search.max_tail_length_px /= f;
        scaled.bout_detection.displacement_threshold_px /= f;
        scaled.bout_detection.min_moved_pixels_inline /= factor * factor;
        scaled
    }
}
